//! Error types for the consumer process.
//!
//! Everything here is fatal: configuration problems and sink start
//! failures stop the process before the loop starts, and a stream error
//! stops the loop. Per-message and per-sink failures never surface as
//! errors; the dispatcher logs them and keeps going.

use watchtower_annotate::LookupError;
use watchtower_sinks::SinkError;

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value is out of range or a required value is missing.
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Errors from the alert stream.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Failed to connect to the NATS server.
    #[error("NATS connect failed: {0}")]
    Connect(String),

    /// Failed to join the queue group.
    #[error("NATS subscribe failed: {0}")]
    Subscribe(String),

    /// The subscription ended.
    #[error("alert stream closed")]
    Closed,
}

/// Fatal errors of the consumer process.
#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The entity lookup could not be built.
    #[error("annotation setup failed: {0}")]
    Lookup(#[from] LookupError),

    /// A sink could not be built or started.
    #[error("sink setup failed: {0}")]
    Sink(#[from] SinkError),

    /// The alert stream failed.
    #[error(transparent)]
    Stream(#[from] StreamError),
}
