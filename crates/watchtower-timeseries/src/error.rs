//! Error types for timeseries emission.

/// Errors raised while configuring backends or writing points.
#[derive(Debug, thiserror::Error)]
pub enum TimeseriesError {
    /// No backend is registered under this name.
    #[error("unknown timeseries backend: {0}")]
    UnknownBackend(String),

    /// Backend options could not be parsed.
    #[error("invalid options for backend {backend}: {message}")]
    InvalidOptions {
        /// Backend name.
        backend: String,
        /// What was wrong.
        message: String,
    },

    /// A backend failed to write.
    #[error("backend {backend} write failed: {source}")]
    Write {
        /// Backend name.
        backend: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A key index does not belong to this key package.
    #[error("key index {0} out of range")]
    UnknownKey(usize),
}
