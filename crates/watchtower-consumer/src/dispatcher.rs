//! The dispatch loop.
//!
//! Each step first fires the timer if it is due, then waits on the stream
//! for at most the poll timeout (or until the next timer deadline, if
//! sooner). A received payload is decoded and delivered to the routed
//! sinks in configured order. A failing sink is logged and skipped; the
//! remaining sinks still receive the event. Only stream errors end the
//! loop.

use std::time::Duration;

use tracing::{debug, error, info, warn};
use watchtower_sinks::{SinkKind, SinkSet};
use watchtower_types::{Alert, ErrorEvent, StreamEvent};

use crate::config::ConsumerConfig;
use crate::error::StreamError;
use crate::stream::{AlertSource, Polled};
use crate::timer::{Clock, TimerSchedule};

/// Which sinks receive which kind of event, in delivery order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Routes {
    /// Receivers of alerts.
    pub alert: Vec<SinkKind>,
    /// Receivers of detector error events.
    pub error: Vec<SinkKind>,
    /// Receivers of timer ticks.
    pub timer: Vec<SinkKind>,
}

impl Routes {
    /// Routes as listed in the configuration.
    pub fn from_config(config: &ConsumerConfig) -> Self {
        Self {
            alert: config.alert_sinks.clone(),
            error: config.error_sinks.clone(),
            timer: config.timer_sinks.clone(),
        }
    }
}

/// Running counters, logged at shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Payloads read from the stream.
    pub received: u64,
    /// Alerts delivered.
    pub alerts: u64,
    /// Error events delivered.
    pub errors: u64,
    /// Payloads that failed to decode.
    pub dropped: u64,
    /// Timer ticks fired.
    pub timers: u64,
    /// Individual sink deliveries that failed.
    pub sink_failures: u64,
}

/// Reads the stream and drives the sinks.
pub struct Dispatcher<S, C> {
    source: S,
    clock: C,
    sinks: SinkSet,
    routes: Routes,
    schedule: TimerSchedule,
    poll_timeout: Duration,
    stats: DispatchStats,
}

impl<S: AlertSource, C: Clock> Dispatcher<S, C> {
    /// Create a dispatcher over started sinks.
    pub const fn new(
        source: S,
        clock: C,
        sinks: SinkSet,
        routes: Routes,
        timer_interval: i64,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            source,
            clock,
            sinks,
            routes,
            schedule: TimerSchedule::new(timer_interval),
            poll_timeout,
            stats: DispatchStats {
                received: 0,
                alerts: 0,
                errors: 0,
                dropped: 0,
                timers: 0,
                sink_failures: 0,
            },
        }
    }

    /// Run steps until the stream fails.
    ///
    /// # Errors
    ///
    /// Returns the stream error that ended the loop.
    pub async fn run(&mut self) -> Result<(), StreamError> {
        info!(
            alert_sinks = ?self.routes.alert,
            error_sinks = ?self.routes.error,
            timer_sinks = ?self.routes.timer,
            "dispatch loop started"
        );
        loop {
            self.step().await?;
        }
    }

    /// One iteration: maybe fire the timer, then wait for one payload.
    ///
    /// # Errors
    ///
    /// Returns the stream error, if the wait failed.
    pub async fn step(&mut self) -> Result<(), StreamError> {
        let now = self.clock.now();
        if self.schedule.check(now) {
            self.fire_timer(now);
        }

        let wait = self.next_wait(now);
        match self.source.poll(wait).await? {
            Polled::Idle => {}
            Polled::Message(payload) => {
                self.stats.received = self.stats.received.saturating_add(1);
                self.dispatch(&payload).await;
            }
        }
        Ok(())
    }

    /// Counters so far.
    pub const fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// The sinks being driven.
    pub const fn sinks(&self) -> &SinkSet {
        &self.sinks
    }

    fn next_wait(&self, now: i64) -> Duration {
        let Some(deadline) = self.schedule.next_deadline() else {
            return self.poll_timeout;
        };
        let until = u64::try_from(deadline.saturating_sub(now)).unwrap_or(0);
        self.poll_timeout.min(Duration::from_secs(until))
    }

    fn fire_timer(&mut self, now: i64) {
        self.stats.timers = self.stats.timers.saturating_add(1);
        debug!(now, "timer fired");
        for kind in &self.routes.timer {
            let Some(sink) = self.sinks.get_mut(*kind) else {
                continue;
            };
            if let Err(e) = sink.handle_timer(now) {
                self.stats.sink_failures = self.stats.sink_failures.saturating_add(1);
                error!(sink = sink.name(), now, error = %e, "timer handling failed");
            }
        }
    }

    async fn dispatch(&mut self, payload: &[u8]) {
        match StreamEvent::decode(payload) {
            Ok(StreamEvent::Alert(mut alert)) => self.deliver_alert(&mut alert).await,
            Ok(StreamEvent::Error(event)) => self.deliver_error(&event).await,
            Err(e) => {
                self.stats.dropped = self.stats.dropped.saturating_add(1);
                warn!(error = %e, bytes = payload.len(), "undecodable payload dropped");
            }
        }
    }

    async fn deliver_alert(&mut self, alert: &mut Alert) {
        self.stats.alerts = self.stats.alerts.saturating_add(1);
        for kind in &self.routes.alert {
            let Some(sink) = self.sinks.get_mut(*kind) else {
                continue;
            };
            if let Err(e) = sink.handle_alert(alert).await {
                self.stats.sink_failures = self.stats.sink_failures.saturating_add(1);
                error!(sink = sink.name(), alert = alert.name(), fqid = alert.fqid(), error = %e, "alert handling failed");
            }
        }
    }

    async fn deliver_error(&mut self, event: &ErrorEvent) {
        self.stats.errors = self.stats.errors.saturating_add(1);
        for kind in &self.routes.error {
            let Some(sink) = self.sinks.get_mut(*kind) else {
                continue;
            };
            if let Err(e) = sink.handle_error(event).await {
                self.stats.sink_failures = self.stats.sink_failures.saturating_add(1);
                error!(sink = sink.name(), fqid = event.fqid.as_str(), error = %e, "error event handling failed");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::collections::{BTreeMap, VecDeque};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicI64, Ordering};

    use watchtower_annotate::{EntityLookup, FixedLookup};
    use watchtower_sinks::{DatabaseConfig, DatabaseSink, LogSink, Sink, TimeseriesSink, TimeseriesSinkConfig};
    use watchtower_timeseries::{MemoryBackend, MemoryHandle};
    use watchtower_types::ViolationMeta;

    use super::*;

    const LEVEL_KEY: &str = "projects.ioda.alerts.X-fqid.as1234.alert_level";

    #[derive(Clone, Default)]
    struct ManualClock(Arc<AtomicI64>);

    impl ManualClock {
        fn set(&self, now: i64) {
            self.0.store(now, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> i64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    /// Replays a fixed script, then reports the stream closed.
    struct ScriptedSource(VecDeque<Polled>);

    impl ScriptedSource {
        fn new(script: impl IntoIterator<Item = Polled>) -> Self {
            Self(script.into_iter().collect())
        }
    }

    impl AlertSource for ScriptedSource {
        async fn poll(&mut self, _wait: Duration) -> Result<Polled, StreamError> {
            self.0.pop_front().ok_or(StreamError::Closed)
        }
    }

    fn lookup() -> Arc<EntityLookup> {
        let table = BTreeMap::from([(
            "asn/1234".to_owned(),
            ViolationMeta::new("asn", "as1234", "1234"),
        )]);
        Arc::new(EntityLookup::Fixed(FixedLookup::new(table, true)))
    }

    fn timeseries_sink() -> (Sink, MemoryHandle) {
        let config = TimeseriesSinkConfig {
            backends: Vec::new(),
            alert_reset_timeout: None,
            ..TimeseriesSinkConfig::default()
        };
        let backend = MemoryBackend::new();
        let handle = backend.handle();
        let mut sink = TimeseriesSink::new(config, lookup()).with_backend(Box::new(backend));
        sink.start().unwrap();
        (Sink::Timeseries(sink), handle)
    }

    fn alert_payload(level: &str, time: i64) -> Polled {
        let value = serde_json::json!({
            "fqid": "X-fqid",
            "name": "X",
            "level": level,
            "time": time,
            "expression": "asn.*",
            "history_expression": "asn.*.history",
            "method": "median",
            "violations": [{
                "expression": "asn/1234",
                "condition": "< 0.5",
                "value": 10.0,
                "history_value": 50.0,
                "time": time,
            }],
        });
        Polled::Message(serde_json::to_vec(&value).unwrap())
    }

    fn error_payload() -> Polled {
        let value = serde_json::json!({
            "fqid": "X-fqid",
            "name": "X",
            "time": 1_000,
            "expression": "asn.*",
            "history_expression": "asn.*.history",
            "type": "query",
            "message": "backend timed out",
        });
        Polled::Message(serde_json::to_vec(&value).unwrap())
    }

    fn routes(alert: &[SinkKind], error: &[SinkKind], timer: &[SinkKind]) -> Routes {
        Routes {
            alert: alert.to_vec(),
            error: error.to_vec(),
            timer: timer.to_vec(),
        }
    }

    fn log_sink(dispatcher: &Dispatcher<ScriptedSource, ManualClock>) -> &LogSink {
        match dispatcher.sinks().get(SinkKind::Log) {
            Some(Sink::Log(sink)) => sink,
            _ => panic!("log sink not enabled"),
        }
    }

    fn timeseries_value(dispatcher: &Dispatcher<ScriptedSource, ManualClock>, key: &str) -> Option<i64> {
        match dispatcher.sinks().get(SinkKind::Timeseries) {
            Some(Sink::Timeseries(sink)) => sink.value("X", key),
            _ => None,
        }
    }

    fn dispatcher(
        script: impl IntoIterator<Item = Polled>,
        clock: &ManualClock,
        sinks: SinkSet,
        routes: Routes,
    ) -> Dispatcher<ScriptedSource, ManualClock> {
        Dispatcher::new(
            ScriptedSource::new(script),
            clock.clone(),
            sinks,
            routes,
            60,
            Duration::from_secs(10),
        )
    }

    fn log_only() -> SinkSet {
        let mut sinks = SinkSet::default();
        sinks.insert(Sink::Log(LogSink::new()));
        sinks
    }

    #[tokio::test]
    async fn timer_does_not_fire_at_startup() {
        let clock = ManualClock::default();
        clock.set(1_020);
        let log = [SinkKind::Log];
        let mut d = dispatcher([Polled::Idle], &clock, log_only(), routes(&log, &log, &log));

        d.step().await.unwrap();
        assert_eq!(d.stats().timers, 0);
        assert_eq!(log_sink(&d).timers_logged(), 0);
    }

    #[tokio::test]
    async fn timer_catches_up_one_interval_per_step() {
        let clock = ManualClock::default();
        clock.set(1_000);
        let log = [SinkKind::Log];
        let mut d = dispatcher(
            std::iter::repeat_n(Polled::Idle, 6),
            &clock,
            log_only(),
            routes(&log, &log, &log),
        );

        d.step().await.unwrap();
        clock.set(1_250);
        for _ in 0..5 {
            d.step().await.unwrap();
        }
        // Deadlines 1020, 1080, 1140, 1200 are due at 1250; 1260 is not.
        assert_eq!(d.stats().timers, 4);
        assert_eq!(log_sink(&d).timers_logged(), 4);
    }

    #[tokio::test]
    async fn undecodable_payload_reaches_no_sink() {
        let clock = ManualClock::default();
        let log = [SinkKind::Log];
        let mut d = dispatcher(
            [Polled::Message(b"{not json".to_vec())],
            &clock,
            log_only(),
            routes(&log, &log, &log),
        );

        d.step().await.unwrap();
        assert_eq!(d.stats().received, 1);
        assert_eq!(d.stats().dropped, 1);
        assert_eq!(log_sink(&d).alerts_logged(), 0);
        assert_eq!(log_sink(&d).errors_logged(), 0);
    }

    #[tokio::test]
    async fn failing_sink_does_not_block_the_others() {
        let clock = ManualClock::default();
        clock.set(1_000);
        let (timeseries, _handle) = timeseries_sink();
        let mut sinks = log_only();
        // Never started, so every delivery fails.
        sinks.insert(Sink::Database(DatabaseSink::new(
            DatabaseConfig::new("postgresql://localhost/none"),
            lookup(),
        )));
        sinks.insert(timeseries);
        let mut d = dispatcher(
            [alert_payload("critical", 1_000)],
            &clock,
            sinks,
            routes(
                &[SinkKind::Database, SinkKind::Timeseries, SinkKind::Log],
                &[SinkKind::Log],
                &[SinkKind::Log],
            ),
        );

        d.step().await.unwrap();
        assert_eq!(d.stats().alerts, 1);
        assert_eq!(d.stats().sink_failures, 1);
        assert_eq!(timeseries_value(&d, LEVEL_KEY), Some(2));
        assert_eq!(log_sink(&d).alerts_logged(), 1);
    }

    #[tokio::test]
    async fn error_event_goes_to_error_sinks_only() {
        let clock = ManualClock::default();
        let (timeseries, handle) = timeseries_sink();
        let mut sinks = log_only();
        sinks.insert(timeseries);
        let mut d = dispatcher(
            [error_payload()],
            &clock,
            sinks,
            routes(&[SinkKind::Timeseries], &[SinkKind::Log], &[SinkKind::Timeseries]),
        );

        d.step().await.unwrap();
        assert_eq!(d.stats().errors, 1);
        assert_eq!(d.stats().alerts, 0);
        assert_eq!(log_sink(&d).errors_logged(), 1);
        assert!(handle.points().is_empty());
    }

    #[tokio::test]
    async fn due_timer_runs_before_the_received_alert() {
        let clock = ManualClock::default();
        clock.set(1_000);
        let (timeseries, handle) = timeseries_sink();
        let mut sinks = SinkSet::default();
        sinks.insert(timeseries);
        let ts = [SinkKind::Timeseries];
        let mut d = dispatcher(
            [alert_payload("critical", 1_000), alert_payload("warning", 1_010)],
            &clock,
            sinks,
            routes(&ts, &ts, &ts),
        );

        d.step().await.unwrap();
        clock.set(1_020);
        d.step().await.unwrap();

        // The flush of bucket 960 saw the first alert's level, not the second.
        assert_eq!(handle.value_at(LEVEL_KEY, 960), Some(2));
        assert_eq!(timeseries_value(&d, LEVEL_KEY), Some(1));
        assert_eq!(d.stats().timers, 1);
    }

    #[tokio::test]
    async fn closed_stream_ends_the_loop() {
        let clock = ManualClock::default();
        let log = [SinkKind::Log];
        let mut d = dispatcher([Polled::Idle], &clock, log_only(), routes(&log, &log, &log));

        let err = d.run().await.unwrap_err();
        assert!(matches!(err, StreamError::Closed));
    }

    #[test]
    fn routes_follow_configuration() {
        let config = ConsumerConfig::parse(
            "alert_sinks: [timeseries, log]\nerror_sinks: [log]\ntimer_sinks: [timeseries]",
        )
        .unwrap();
        assert_eq!(
            Routes::from_config(&config),
            routes(
                &[SinkKind::Timeseries, SinkKind::Log],
                &[SinkKind::Log],
                &[SinkKind::Timeseries],
            )
        );
    }
}
