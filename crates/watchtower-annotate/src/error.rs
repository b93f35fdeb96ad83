//! Error types for entity lookups.
//!
//! Every variant describes the failure of one expression. A failure never
//! aborts the annotation of the other expressions in the same alert.

/// Failure to resolve one expression to entity metadata.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    /// The HTTP request could not be sent or its body could not be read.
    #[error("entity API request failed: {0}")]
    Request(String),

    /// The entity API answered with a non-success status.
    #[error("entity API returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, as far as it could be read.
        body: String,
    },

    /// The response carried no usable `data` for the expression.
    #[error("no entity data for {expression}: {detail}")]
    MissingData {
        /// The expression that was looked up.
        expression: String,
        /// The API's `error` field, or a description of what was missing.
        detail: String,
    },

    /// The response `data` did not have the expected record structure.
    #[error("malformed entity record for {expression}: {reason}")]
    Malformed {
        /// The expression that was looked up.
        expression: String,
        /// What was wrong with the record.
        reason: String,
    },

    /// The fixed lookup table has no entry for the expression.
    #[error("no entity known for {0}")]
    NotFound(String),

    /// The lookup could not be configured.
    #[error("lookup configuration error: {0}")]
    Config(String),
}
