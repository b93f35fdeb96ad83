//! Error types for sinks.
//!
//! A [`SinkError`] returned from `start` is fatal to the process; one
//! returned while handling an alert, error event or timer tick is logged by
//! the dispatcher and does not stop delivery to other sinks.

use watchtower_timeseries::TimeseriesError;

/// Errors that can occur while starting or running a sink.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// A sink configuration block is missing or invalid.
    #[error("config error: {0}")]
    Config(String),

    /// A sink that needs `start` was used before it.
    #[error("sink {0} used before start")]
    NotStarted(&'static str),

    /// A `PostgreSQL` operation failed.
    #[error("PostgreSQL error: {0}")]
    Database(#[from] sqlx::Error),

    /// The Slack API rejected a request or was unreachable.
    #[error("Slack error: {0}")]
    Slack(String),

    /// Slack kept rate-limiting until the retry budget ran out.
    #[error("Slack rate limit persisted after {attempts} attempts")]
    RateLimited {
        /// Attempts made.
        attempts: u32,
    },

    /// A message template failed to load or render.
    #[error("template error: {0}")]
    Template(String),

    /// A timeseries backend failed.
    #[error("timeseries error: {0}")]
    Timeseries(#[from] TimeseriesError),
}
