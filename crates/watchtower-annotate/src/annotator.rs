//! The per-alert annotation pass.

use std::collections::BTreeSet;

use tracing::{debug, error};
use watchtower_types::Alert;

use crate::lookup::EntityLookup;

/// What one call to [`annotate_alert`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnnotationOutcome {
    /// The alert was already annotated; nothing was looked up.
    pub skipped: bool,
    /// Distinct expressions sent to the lookup.
    pub requested: usize,
    /// Expressions that resolved.
    pub resolved: usize,
    /// Expressions that failed.
    pub failed: usize,
}

/// Resolve metadata for every unannotated violation of an alert.
///
/// Idempotent: once an alert has been through this pass, later calls return
/// immediately without touching the lookup. Violations whose expression
/// could not be resolved keep no metadata; a failure for one expression
/// does not affect the others.
#[must_use]
pub async fn annotate_alert(alert: &mut Alert, lookup: &EntityLookup) -> AnnotationOutcome {
    if alert.is_annotated() {
        return AnnotationOutcome {
            skipped: true,
            ..AnnotationOutcome::default()
        };
    }

    let expressions: BTreeSet<String> = alert
        .violations()
        .iter()
        .filter(|v| v.meta().is_none() && lookup.is_fetchable(v.expression()))
        .map(|v| v.expression().to_owned())
        .collect();

    if expressions.is_empty() {
        alert.mark_annotated();
        return AnnotationOutcome::default();
    }

    let expressions: Vec<String> = expressions.into_iter().collect();
    let resolution = lookup.resolve(&expressions).await;

    for (expression, e) in &resolution.failed {
        error!(
            alert = alert.name(),
            expression = expression.as_str(),
            lookup = lookup.name(),
            error = %e,
            "entity annotation failed"
        );
    }

    for violation in alert.violations_mut() {
        if let Some(meta) = resolution.resolved.get(violation.expression()) {
            violation.set_meta(meta.clone());
        }
    }
    alert.mark_annotated();

    let outcome = AnnotationOutcome {
        skipped: false,
        requested: expressions.len(),
        resolved: resolution.resolved.len(),
        failed: resolution.failed.len(),
    };
    debug!(
        alert = alert.name(),
        requested = outcome.requested,
        resolved = outcome.resolved,
        failed = outcome.failed,
        "alert annotated"
    );
    outcome
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use std::collections::BTreeMap;

    use watchtower_types::{AlertBuilder, Violation, ViolationMeta};

    use super::*;
    use crate::lookup::FixedLookup;

    fn lookup() -> EntityLookup {
        EntityLookup::Fixed(FixedLookup::new(
            BTreeMap::from([
                ("asn/1234".to_owned(), ViolationMeta::new("asn", "as1234", "1234")),
                ("country/NZ".to_owned(), ViolationMeta::new("country", "geo.NZ", "NZ")),
            ]),
            true,
        ))
    }

    fn calls(lookup: &EntityLookup) -> usize {
        match lookup {
            EntityLookup::Fixed(fixed) => fixed.resolve_calls(),
            EntityLookup::Http(_) => 0,
        }
    }

    fn alert(expressions: &[&str]) -> Alert {
        let violations = expressions
            .iter()
            .map(|e| Violation::new(*e, "< history", 1000))
            .collect();
        AlertBuilder::new("fq", "X", "critical", 1000)
            .violations(violations)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn assigns_meta_to_every_matching_violation() {
        let lookup = lookup();
        let mut alert = alert(&["asn/1234", "country/NZ", "asn/1234"]);
        let outcome = annotate_alert(&mut alert, &lookup).await;

        assert_eq!(outcome.requested, 2, "duplicate expressions are looked up once");
        assert_eq!(outcome.resolved, 2);
        assert!(alert.is_annotated());
        assert_eq!(alert.violations()[0].meta().unwrap().fqid, "as1234");
        assert_eq!(alert.violations()[1].meta().unwrap().fqid, "geo.NZ");
        assert_eq!(alert.violations()[2].meta().unwrap().fqid, "as1234");
    }

    #[tokio::test]
    async fn second_call_is_a_no_op() {
        let lookup = lookup();
        let mut alert = alert(&["asn/1234"]);
        assert_eq!(annotate_alert(&mut alert, &lookup).await.resolved, 1);
        let first = alert.violations().to_vec();

        let outcome = annotate_alert(&mut alert, &lookup).await;
        assert!(outcome.skipped);
        assert_eq!(calls(&lookup), 1);
        assert_eq!(alert.violations(), first.as_slice());
    }

    #[tokio::test]
    async fn one_failure_does_not_block_the_rest() {
        let lookup = lookup();
        let mut alert = alert(&["asn/404", "country/NZ"]);
        let outcome = annotate_alert(&mut alert, &lookup).await;

        assert_eq!(outcome.failed, 1);
        assert!(alert.violations()[0].meta().is_none());
        assert_eq!(alert.violations()[1].meta().unwrap().meta_code, "NZ");
        assert!(alert.is_annotated());
    }

    #[tokio::test]
    async fn nothing_fetchable_marks_annotated_without_lookup() {
        let lookup = lookup();
        let mut alert = alert(&["global"]);
        let outcome = annotate_alert(&mut alert, &lookup).await;

        assert_eq!(outcome, AnnotationOutcome::default());
        assert!(alert.is_annotated());
        assert_eq!(calls(&lookup), 0);
    }

    #[tokio::test]
    async fn existing_meta_is_kept() {
        let lookup = lookup();
        let mut alert = alert(&["asn/1234"]);
        alert.violations_mut()[0].set_meta(ViolationMeta::new("asn", "preset", "1234"));
        assert_eq!(annotate_alert(&mut alert, &lookup).await, AnnotationOutcome::default());

        assert_eq!(alert.violations()[0].meta().unwrap().fqid, "preset");
        assert_eq!(calls(&lookup), 0);
    }
}
