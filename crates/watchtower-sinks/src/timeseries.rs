//! Timeseries sink: interval-bucketed level and delta metrics.
//!
//! Each alert type (alert `name`) gets its own key package and bucket
//! clock. For every annotated violation two keys are maintained:
//!
//! ```text
//! {metric_prefix}.{alert_fqid}.{meta_fqid}.{level_leaf}   0 normal, 1 warning, 2 critical
//! {metric_prefix}.{alert_fqid}.{meta_fqid}.{delta_leaf}   relative drop x 10000
//! ```
//!
//! Alerts close buckets: an alert in a later bucket first flushes every
//! bucket between the open one and its own, in order, with whatever values
//! the key package holds. Timer ticks flush the open bucket without closing
//! it. Keys that stop receiving updates for `alert_reset_timeout` seconds
//! are forced back to 0 on the next alert or tick for that type.
//!
//! Per-type state lives for the life of the process.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, error, info, warn};
use watchtower_annotate::{EntityLookup, annotate_alert};
use watchtower_timeseries::{KeyPackage, Timeseries, TimeseriesBackend, TimeseriesError};
use watchtower_types::{Alert, AlertLevel};

use crate::config::TimeseriesSinkConfig;
use crate::error::SinkError;

/// Start of the bucket containing `time`.
///
/// `interval` must be positive; a non-positive interval returns `time`.
pub const fn bucket(time: i64, interval: i64) -> i64 {
    match time.checked_div_euclid(interval) {
        Some(quotient) => quotient.saturating_mul(interval),
        None => time,
    }
}

/// Relative drop between baseline and observed value, scaled by 10000.
///
/// `round(|h - v| / max(h, v) * 10000)`. Missing values and a
/// non-positive denominator give 0.
pub fn delta_x10000(value: Option<f64>, history_value: Option<f64>) -> i64 {
    let (Some(value), Some(history)) = (value, history_value) else {
        return 0;
    };
    let denominator = value.max(history);
    if denominator.is_nan() || denominator <= 0.0 {
        return 0;
    }
    let scaled = ((history - value).abs() / denominator * 10_000.0).round();
    if !scaled.is_finite() {
        return 0;
    }
    // Float to int `as` saturates at the i64 bounds.
    #[allow(clippy::cast_possible_truncation)]
    {
        scaled as i64
    }
}

/// Bucket clock and metrics for one alert type.
#[derive(Debug)]
struct AlertTypeState {
    interval_start: i64,
    last_seen: i64,
    keys: KeyPackage,
    last_touched: BTreeMap<String, i64>,
}

impl AlertTypeState {
    fn new(interval_start: i64, last_seen: i64) -> Self {
        Self {
            interval_start,
            last_seen,
            keys: KeyPackage::new(false),
            last_touched: BTreeMap::new(),
        }
    }

    /// Force every stale key among `candidates` back to 0.
    fn reset_stale<'a>(
        &mut self,
        candidates: impl IntoIterator<Item = &'a String>,
        now: i64,
        timeout: i64,
    ) -> usize {
        let mut reset = 0_usize;
        for key in candidates {
            let Some(last) = self.last_touched.get(key) else {
                continue;
            };
            if now.saturating_sub(*last) >= timeout {
                self.keys.upsert(key, 0);
                reset = reset.saturating_add(1);
            }
        }
        reset
    }
}

/// Emits per-alert-type level and delta metrics.
pub struct TimeseriesSink {
    config: TimeseriesSinkConfig,
    lookup: Arc<EntityLookup>,
    timeseries: Timeseries,
    states: BTreeMap<String, AlertTypeState>,
}

impl TimeseriesSink {
    /// Create a sink with no backends; [`TimeseriesSink::start`] enables the
    /// configured ones.
    pub fn new(config: TimeseriesSinkConfig, lookup: Arc<EntityLookup>) -> Self {
        Self {
            config,
            lookup,
            timeseries: Timeseries::new(),
            states: BTreeMap::new(),
        }
    }

    /// Add a backend directly, in addition to the configured ones.
    #[must_use]
    pub fn with_backend(mut self, backend: Box<dyn TimeseriesBackend>) -> Self {
        self.timeseries.add_backend(backend);
        self
    }

    /// Enable every configured backend.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Timeseries`] for an unknown backend name or
    /// invalid backend options.
    pub fn start(&mut self) -> Result<(), SinkError> {
        for name in &self.config.backends {
            self.timeseries
                .enable_backend(name, self.config.options_for(name))?;
        }
        info!(
            interval = self.config.interval,
            backends = ?self.timeseries.backend_names(),
            alert_reset_timeout = ?self.config.reset_timeout(),
            "timeseries sink started"
        );
        Ok(())
    }

    /// Account an alert: close elapsed buckets, then update the level and
    /// delta keys of every annotated violation.
    ///
    /// An alert older than the last one seen for its type is logged and
    /// dropped without touching any state.
    ///
    /// # Errors
    ///
    /// Returns the first backend write failure. Bucket accounting and
    /// metric updates still complete.
    pub async fn handle_alert(&mut self, alert: &mut Alert) -> Result<(), SinkError> {
        let interval = self.config.interval;
        let time = alert.time();
        let this_bucket = bucket(time, interval);

        let state = self
            .states
            .entry(alert.name().to_owned())
            .or_insert_with(|| AlertTypeState::new(this_bucket, time));

        if time < state.last_seen {
            error!(
                alert = alert.name(),
                time,
                last_seen = state.last_seen,
                "time is going backwards, alert dropped"
            );
            return Ok(());
        }
        state.last_seen = time;

        let mut first_error: Option<TimeseriesError> = None;
        while state.interval_start < this_bucket {
            if let Err(e) = state.keys.flush(state.interval_start, &mut self.timeseries) {
                error!(alert = alert.name(), interval_start = state.interval_start, error = %e, "flush failed");
                first_error.get_or_insert(e);
            }
            state.interval_start = state.interval_start.saturating_add(interval);
        }

        let annotation = annotate_alert(alert, &self.lookup).await;
        if annotation.failed > 0 {
            warn!(
                alert = alert.name(),
                unresolved = annotation.failed,
                "no metrics for violations without entity metadata"
            );
        }

        let mut touched: BTreeSet<String> = BTreeSet::new();
        if let Some(level_value) = alert.level().metric_value() {
            for violation in alert.violations() {
                let Some(meta) = violation.meta() else {
                    continue;
                };
                let delta = if alert.level() == AlertLevel::Normal {
                    0
                } else {
                    delta_x10000(violation.value(), violation.history_value())
                };
                let base = format!("{}.{}.{}", self.config.metric_prefix, alert.fqid(), meta.fqid);
                for (leaf, value) in [
                    (&self.config.level_leaf, level_value),
                    (&self.config.delta_leaf, delta),
                ] {
                    let key = format!("{base}.{leaf}");
                    state.keys.upsert(&key, value);
                    state.last_touched.insert(key.clone(), time);
                    touched.insert(key);
                }
            }
        } else {
            debug!(alert = alert.name(), level = %alert.level(), "level has no metric encoding");
        }

        if let Some(timeout) = self.config.reset_timeout() {
            let candidates: Vec<String> = state
                .last_touched
                .keys()
                .filter(|k| !touched.contains(*k))
                .cloned()
                .collect();
            let reset = state.reset_stale(&candidates, time, timeout);
            if reset > 0 {
                debug!(alert = alert.name(), reset, "stale keys reset");
            }
        }

        first_error.map_or(Ok(()), |e| Err(e.into()))
    }

    /// Reset stale keys of every alert type, then flush each type's open
    /// bucket.
    ///
    /// # Errors
    ///
    /// Returns the first backend write failure; every type is still
    /// flushed.
    pub fn handle_timer(&mut self, now: i64) -> Result<(), SinkError> {
        let timeout = self.config.reset_timeout();
        let mut first_error: Option<TimeseriesError> = None;
        for (name, state) in &mut self.states {
            if let Some(timeout) = timeout {
                let keys: Vec<String> = state.last_touched.keys().cloned().collect();
                state.reset_stale(&keys, now, timeout);
            }
            debug!(alert = name.as_str(), interval_start = state.interval_start, "flushing key package");
            if let Err(e) = state.keys.flush(state.interval_start, &mut self.timeseries) {
                error!(alert = name.as_str(), error = %e, "flush failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), |e| Err(e.into()))
    }

    /// Current value of a metric key for an alert type.
    pub fn value(&self, alert_name: &str, key: &str) -> Option<i64> {
        self.states.get(alert_name)?.keys.value(key)
    }

    /// Start of the open bucket for an alert type.
    pub fn interval_start(&self, alert_name: &str) -> Option<i64> {
        self.states.get(alert_name).map(|s| s.interval_start)
    }

    /// Number of alert types tracked.
    pub fn tracked_types(&self) -> usize {
        self.states.len()
    }
}

impl std::fmt::Debug for TimeseriesSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeseriesSink")
            .field("interval", &self.config.interval)
            .field("timeseries", &self.timeseries)
            .field("tracked_types", &self.states.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use watchtower_annotate::FixedLookup;
    use watchtower_timeseries::{MemoryBackend, MemoryHandle};
    use watchtower_types::{AlertBuilder, Violation, ViolationMeta};

    use super::*;

    const LEVEL_KEY: &str = "projects.ioda.alerts.X-fqid.as1234.alert_level";
    const DELTA_KEY: &str = "projects.ioda.alerts.X-fqid.as1234.delta_pct_x100";

    fn sink(reset_timeout: Option<i64>) -> (TimeseriesSink, MemoryHandle) {
        let table = BTreeMap::from([
            ("asn/1234".to_owned(), ViolationMeta::new("asn", "as1234", "1234")),
            ("asn/5678".to_owned(), ViolationMeta::new("asn", "as5678", "5678")),
        ]);
        let lookup = Arc::new(EntityLookup::Fixed(FixedLookup::new(table, true)));
        let config = TimeseriesSinkConfig {
            backends: Vec::new(),
            alert_reset_timeout: reset_timeout,
            ..TimeseriesSinkConfig::default()
        };
        let backend = MemoryBackend::new();
        let handle = backend.handle();
        let mut sink = TimeseriesSink::new(config, lookup).with_backend(Box::new(backend));
        sink.start().unwrap();
        (sink, handle)
    }

    fn alert(level: &str, time: i64, expression: &str, value: f64, history: f64) -> Alert {
        AlertBuilder::new("X-fqid", "X", level, time)
            .violation(Violation::new(expression, "drop", time).with_values(Some(value), Some(history)))
            .build()
            .unwrap()
    }

    #[test]
    fn bucket_floors_to_interval() {
        assert_eq!(bucket(1_000, 60), 960);
        assert_eq!(bucket(960, 60), 960);
        assert_eq!(bucket(59, 60), 0);
        assert_eq!(bucket(1_000, 0), 1_000);
    }

    #[test]
    fn delta_encoding() {
        assert_eq!(delta_x10000(Some(80.0), Some(100.0)), 2_000);
        assert_eq!(delta_x10000(Some(0.0), Some(0.0)), 0);
        assert_eq!(delta_x10000(Some(50.0), Some(50.0)), 0);
        assert_eq!(delta_x10000(Some(10.0), Some(50.0)), 8_000);
        assert_eq!(delta_x10000(None, Some(50.0)), 0);
        assert_eq!(delta_x10000(Some(-5.0), Some(-1.0)), 0);
    }

    #[tokio::test]
    async fn critical_alert_then_stale_reset_on_timer() {
        let (mut sink, handle) = sink(Some(100));
        let mut a = alert("critical", 1_000, "asn/1234", 10.0, 50.0);
        sink.handle_alert(&mut a).await.unwrap();

        assert!(a.is_annotated());
        assert_eq!(sink.value("X", LEVEL_KEY), Some(2));
        assert_eq!(sink.value("X", DELTA_KEY), Some(8_000));
        assert_eq!(sink.interval_start("X"), Some(960));

        sink.handle_timer(1_020).unwrap();
        assert_eq!(handle.value_at(LEVEL_KEY, 960), Some(2));

        handle.clear();
        sink.handle_timer(1_150).unwrap();
        assert_eq!(sink.value("X", LEVEL_KEY), Some(0));
        assert_eq!(handle.value_at(LEVEL_KEY, 960), Some(0));
        assert_eq!(handle.value_at(DELTA_KEY, 960), Some(0));
    }

    #[tokio::test]
    async fn normal_alert_has_zero_delta() {
        let (mut sink, _handle) = sink(None);
        let mut a = alert("normal", 1_000, "asn/1234", 80.0, 100.0);
        sink.handle_alert(&mut a).await.unwrap();
        assert_eq!(sink.value("X", LEVEL_KEY), Some(0));
        assert_eq!(sink.value("X", DELTA_KEY), Some(0));
    }

    #[tokio::test]
    async fn elapsed_buckets_flush_in_order_before_update() {
        let (mut sink, handle) = sink(None);
        sink.handle_alert(&mut alert("critical", 1_000, "asn/1234", 10.0, 50.0))
            .await
            .unwrap();
        sink.handle_alert(&mut alert("warning", 1_130, "asn/1234", 40.0, 50.0))
            .await
            .unwrap();

        assert_eq!(handle.flush_times(), vec![960, 1_020]);
        // Both elapsed buckets carry the first alert's level.
        assert_eq!(handle.value_at(LEVEL_KEY, 960), Some(2));
        assert_eq!(handle.value_at(LEVEL_KEY, 1_020), Some(2));
        assert_eq!(sink.interval_start("X"), Some(1_080));

        sink.handle_timer(1_140).unwrap();
        assert_eq!(handle.value_at(LEVEL_KEY, 1_080), Some(1));
    }

    #[tokio::test]
    async fn alert_from_the_past_is_dropped() {
        let (mut sink, handle) = sink(None);
        sink.handle_alert(&mut alert("critical", 1_000, "asn/1234", 10.0, 50.0))
            .await
            .unwrap();
        let mut late = alert("normal", 990, "asn/1234", 50.0, 50.0);
        sink.handle_alert(&mut late).await.unwrap();

        assert!(!late.is_annotated());
        assert_eq!(sink.value("X", LEVEL_KEY), Some(2));
        assert!(handle.points().is_empty());
    }

    #[tokio::test]
    async fn untouched_key_resets_on_next_alert() {
        let (mut sink, _handle) = sink(Some(100));
        sink.handle_alert(&mut alert("critical", 1_000, "asn/1234", 10.0, 50.0))
            .await
            .unwrap();
        sink.handle_alert(&mut alert("critical", 1_050, "asn/5678", 10.0, 50.0))
            .await
            .unwrap();
        assert_eq!(sink.value("X", LEVEL_KEY), Some(2));

        sink.handle_alert(&mut alert("critical", 1_100, "asn/5678", 10.0, 50.0))
            .await
            .unwrap();
        assert_eq!(sink.value("X", LEVEL_KEY), Some(0));
        assert_eq!(
            sink.value("X", "projects.ioda.alerts.X-fqid.as5678.alert_level"),
            Some(2)
        );
    }

    #[tokio::test]
    async fn error_level_and_unannotated_violations_add_no_keys() {
        let (mut sink, handle) = sink(Some(100));
        sink.handle_alert(&mut alert("error", 1_000, "asn/1234", 10.0, 50.0))
            .await
            .unwrap();
        sink.handle_alert(&mut alert("critical", 1_010, "unresolvable", 10.0, 50.0))
            .await
            .unwrap();
        assert_eq!(sink.tracked_types(), 1);
        assert_eq!(sink.value("X", LEVEL_KEY), None);

        sink.handle_timer(1_020).unwrap();
        assert!(handle.points().is_empty());
    }

    #[test]
    fn huge_delta_saturates() {
        assert_eq!(delta_x10000(Some(-1e300), Some(1.0)), i64::MAX);
    }

    #[tokio::test]
    async fn reset_key_stays_zero_until_touched_again() {
        let (mut sink, handle) = sink(Some(100));
        sink.handle_alert(&mut alert("critical", 1_000, "asn/1234", 10.0, 50.0))
            .await
            .unwrap();

        sink.handle_timer(1_150).unwrap();
        sink.handle_timer(1_200).unwrap();
        let levels: Vec<i64> = handle
            .points()
            .into_iter()
            .filter(|p| p.key == LEVEL_KEY)
            .map(|p| p.value)
            .collect();
        assert_eq!(levels, vec![0, 0]);
        assert_eq!(sink.value("X", DELTA_KEY), Some(0));

        handle.clear();
        sink.handle_alert(&mut alert("warning", 1_210, "asn/1234", 40.0, 50.0))
            .await
            .unwrap();
        assert_eq!(sink.value("X", LEVEL_KEY), Some(1));
        assert_eq!(sink.value("X", DELTA_KEY), Some(2_000));

        sink.handle_timer(1_250).unwrap();
        assert_eq!(handle.value_at(LEVEL_KEY, 1_200), Some(1));
    }

    #[tokio::test]
    async fn unresolved_violation_gets_no_keys_beside_resolved_one() {
        let (mut sink, _handle) = sink(None);
        let mut a = AlertBuilder::new("X-fqid", "X", "critical", 1_000)
            .violation(Violation::new("asn/404", "drop", 1_000).with_values(Some(10.0), Some(50.0)))
            .violation(Violation::new("asn/1234", "drop", 1_000).with_values(Some(10.0), Some(50.0)))
            .build()
            .unwrap();
        sink.handle_alert(&mut a).await.unwrap();

        assert!(a.violations()[0].meta().is_none());
        assert_eq!(sink.value("X", LEVEL_KEY), Some(2));
        assert_eq!(sink.value("X", "projects.ioda.alerts.X-fqid.as404.alert_level"), None);
    }

    #[test]
    fn unknown_backend_fails_start() {
        let lookup = Arc::new(EntityLookup::Fixed(FixedLookup::new(BTreeMap::new(), true)));
        let config = TimeseriesSinkConfig {
            backends: vec!["kafka".to_owned()],
            ..TimeseriesSinkConfig::default()
        };
        let mut sink = TimeseriesSink::new(config, lookup);
        assert!(matches!(
            sink.start(),
            Err(SinkError::Timeseries(TimeseriesError::UnknownBackend(_)))
        ));
    }
}
