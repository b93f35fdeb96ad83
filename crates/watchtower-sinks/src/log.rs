//! Log sink: one structured log line per alert, violation, error and tick.

use tracing::{error, info, warn};
use watchtower_types::{Alert, AlertLevel, ErrorEvent, Violation};

/// Writes every delivery to the process log.
///
/// Normal alerts log at `info`, warnings at `warn`, critical and error
/// alerts at `error`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink {
    alerts: u64,
    errors: u64,
    timers: u64,
}

impl LogSink {
    /// Create a log sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Log an alert and each of its violations.
    pub fn handle_alert(&mut self, alert: &Alert) {
        let level = alert.level();
        emit(level, alert.fqid(), &alert_line(alert));
        for violation in alert.violations() {
            emit(level, alert.fqid(), &violation_line(alert, violation));
        }
        self.alerts = self.alerts.saturating_add(1);
    }

    /// Log a detector error event.
    pub fn handle_error(&mut self, event: &ErrorEvent) {
        error!(fqid = event.fqid.as_str(), "{}", error_line(event));
        self.errors = self.errors.saturating_add(1);
    }

    /// Log a timer tick.
    pub fn handle_timer(&mut self, now: i64) {
        info!(now, "TIMER: periodic timer fired at {now}");
        self.timers = self.timers.saturating_add(1);
    }

    /// Alerts logged so far.
    pub const fn alerts_logged(&self) -> u64 {
        self.alerts
    }

    /// Error events logged so far.
    pub const fn errors_logged(&self) -> u64 {
        self.errors
    }

    /// Timer ticks logged so far.
    pub const fn timers_logged(&self) -> u64 {
        self.timers
    }
}

fn emit(level: AlertLevel, fqid: &str, line: &str) {
    match level {
        AlertLevel::Normal => info!(fqid, "{line}"),
        AlertLevel::Warning => warn!(fqid, "{line}"),
        AlertLevel::Critical | AlertLevel::Error => error!(fqid, "{line}"),
    }
}

fn alert_line(alert: &Alert) -> String {
    format!(
        "ALERT: {} {} {} ({})",
        alert.level().as_str().to_uppercase(),
        alert.name(),
        alert.time(),
        alert.expression()
    )
}

fn violation_line(alert: &Alert, violation: &Violation) -> String {
    format!(
        "VIOLATION: {} Time: {} {} Value: {} History Value: {}",
        alert.level().as_str().to_uppercase(),
        alert.time(),
        violation.expression(),
        display_value(violation.value()),
        display_value(violation.history_value())
    )
}

fn error_line(event: &ErrorEvent) -> String {
    format!(
        "ERROR: {} {} {} {} {}",
        event.error_type, event.name, event.time, event.expression, event.message
    )
}

fn display_value(value: Option<f64>) -> String {
    value.map_or_else(|| "unknown".to_owned(), |v| v.to_string())
}
