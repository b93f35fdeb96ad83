//! Configuration for the entity lookup collaborator.

use std::collections::BTreeMap;

use serde::Deserialize;
use watchtower_types::ViolationMeta;

/// Default entity API endpoint.
pub const DEFAULT_ENTITY_API_URL: &str = "https://api.ioda.inetintel.cc.gatech.edu/v2/entities";

/// How expressions are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupMode {
    /// One `GET ?entityType=T&entityCode=C` request per distinct expression.
    #[default]
    PerEntity,
    /// One `POST` carrying every distinct expression of the alert.
    Batch,
    /// A static table from the configuration; no network access.
    Fixed,
}

/// Settings for resolving violation expressions to entity metadata.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnnotationConfig {
    /// Resolution mode.
    #[serde(default)]
    pub mode: LookupMode,

    /// Entity API endpoint (per-entity and batch modes).
    #[serde(default = "default_url")]
    pub url: String,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Only expressions containing `/` are looked up.
    ///
    /// Defaults to `true` in per-entity mode and `false` otherwise.
    #[serde(default)]
    pub require_separator: Option<bool>,

    /// Expression to metadata table for fixed mode.
    #[serde(default)]
    pub fixed: BTreeMap<String, ViolationMeta>,
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            mode: LookupMode::default(),
            url: default_url(),
            timeout_secs: default_timeout_secs(),
            require_separator: None,
            fixed: BTreeMap::new(),
        }
    }
}

impl AnnotationConfig {
    /// Whether the fetchable predicate requires a `type/code` separator.
    pub fn requires_separator(&self) -> bool {
        self.require_separator
            .unwrap_or(self.mode == LookupMode::PerEntity)
    }
}

fn default_url() -> String {
    DEFAULT_ENTITY_API_URL.to_owned()
}

const fn default_timeout_secs() -> u64 {
    10
}
