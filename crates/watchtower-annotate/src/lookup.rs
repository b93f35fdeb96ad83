//! The entity lookup collaborator.
//!
//! Uses enum dispatch instead of a trait object because the HTTP variant
//! resolves asynchronously.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use watchtower_types::ViolationMeta;

use crate::config::{AnnotationConfig, LookupMode};
use crate::error::LookupError;
use crate::http::HttpLookup;

/// Result of resolving a set of expressions.
///
/// Every requested expression ends up in exactly one of the two
/// collections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Expressions that resolved, with their metadata.
    pub resolved: BTreeMap<String, ViolationMeta>,
    /// Expressions that failed, with the reason.
    pub failed: Vec<(String, LookupError)>,
}

impl Resolution {
    /// Record the outcome for one expression.
    pub fn record(&mut self, expression: String, outcome: Result<ViolationMeta, LookupError>) {
        match outcome {
            Ok(meta) => {
                self.resolved.insert(expression, meta);
            }
            Err(e) => self.failed.push((expression, e)),
        }
    }
}

/// Resolves violation expressions to entity metadata.
pub enum EntityLookup {
    /// Entity API over HTTP.
    Http(HttpLookup),
    /// Static expression table.
    Fixed(FixedLookup),
}

impl EntityLookup {
    /// Build the lookup described by the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::Config`] if the HTTP client cannot be built.
    pub fn from_config(config: &AnnotationConfig) -> Result<Self, LookupError> {
        match config.mode {
            LookupMode::PerEntity | LookupMode::Batch => Ok(Self::Http(HttpLookup::new(config)?)),
            LookupMode::Fixed => Ok(Self::Fixed(FixedLookup::new(
                config.fixed.clone(),
                config.requires_separator(),
            ))),
        }
    }

    /// Whether an expression is worth looking up at all.
    pub fn is_fetchable(&self, expression: &str) -> bool {
        let require_separator = match self {
            Self::Http(http) => http.requires_separator(),
            Self::Fixed(fixed) => fixed.require_separator,
        };
        !expression.is_empty() && (!require_separator || expression.contains('/'))
    }

    /// Resolve a set of distinct expressions.
    pub async fn resolve(&self, expressions: &[String]) -> Resolution {
        match self {
            Self::Http(http) => http.resolve(expressions).await,
            Self::Fixed(fixed) => fixed.resolve(expressions),
        }
    }

    /// Human-readable name for logging.
    pub const fn name(&self) -> &str {
        match self {
            Self::Http(http) => http.mode_name(),
            Self::Fixed(_) => "fixed",
        }
    }
}

impl std::fmt::Debug for EntityLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityLookup")
            .field("mode", &self.name())
            .finish()
    }
}

/// Lookup backed by a static table from the configuration.
#[derive(Debug, Default)]
pub struct FixedLookup {
    entries: BTreeMap<String, ViolationMeta>,
    require_separator: bool,
    resolve_calls: AtomicUsize,
}

impl FixedLookup {
    /// Create a lookup over the given table.
    pub const fn new(entries: BTreeMap<String, ViolationMeta>, require_separator: bool) -> Self {
        Self {
            entries,
            require_separator,
            resolve_calls: AtomicUsize::new(0),
        }
    }

    /// Number of times [`EntityLookup::resolve`] reached this table.
    pub fn resolve_calls(&self) -> usize {
        self.resolve_calls.load(Ordering::Relaxed)
    }

    fn resolve(&self, expressions: &[String]) -> Resolution {
        self.resolve_calls.fetch_add(1, Ordering::Relaxed);
        let mut resolution = Resolution::default();
        for expression in expressions {
            let outcome = self
                .entries
                .get(expression)
                .cloned()
                .ok_or_else(|| LookupError::NotFound(expression.clone()));
            resolution.record(expression.clone(), outcome);
        }
        resolution
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn table() -> BTreeMap<String, ViolationMeta> {
        BTreeMap::from([(
            "asn/1234".to_owned(),
            ViolationMeta::new("asn", "as1234", "1234"),
        )])
    }

    #[tokio::test]
    async fn fixed_lookup_resolves_known_and_fails_unknown() {
        let lookup = EntityLookup::Fixed(FixedLookup::new(table(), true));
        let resolution = lookup
            .resolve(&["asn/1234".to_owned(), "asn/9".to_owned()])
            .await;
        assert_eq!(resolution.resolved.len(), 1);
        assert_eq!(resolution.resolved.get("asn/1234").unwrap().fqid, "as1234");
        assert_eq!(
            resolution.failed,
            vec![("asn/9".to_owned(), LookupError::NotFound("asn/9".to_owned()))]
        );
    }

    #[test]
    fn fetchable_predicate_follows_configuration() {
        let strict = EntityLookup::Fixed(FixedLookup::new(table(), true));
        assert!(strict.is_fetchable("asn/1234"));
        assert!(!strict.is_fetchable("global"));
        assert!(!strict.is_fetchable(""));

        let lenient = EntityLookup::Fixed(FixedLookup::new(table(), false));
        assert!(lenient.is_fetchable("global"));
        assert!(!lenient.is_fetchable(""));
    }

    #[test]
    fn from_config_builds_fixed_lookup() {
        let config = AnnotationConfig {
            mode: LookupMode::Fixed,
            fixed: table(),
            ..AnnotationConfig::default()
        };
        let lookup = EntityLookup::from_config(&config).unwrap();
        assert_eq!(lookup.name(), "fixed");
        // Fixed mode does not require a separator unless configured to.
        assert!(lookup.is_fetchable("no-separator"));
    }
}
