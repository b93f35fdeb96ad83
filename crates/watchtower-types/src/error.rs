//! Error types for alert validation and stream decoding.

/// A value failed one of the alert model invariants.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// The level is not one of `critical`, `warning`, `normal`, `error`.
    #[error("alert level must be one of critical, warning, normal, error (got {0:?})")]
    InvalidLevel(String),

    /// The alert time is negative.
    #[error("alert time must be a non-negative UTC epoch (got {0})")]
    NegativeTime(i64),

    /// A required builder field was never set.
    #[error("alert field {0} is required")]
    MissingField(&'static str),
}

/// A stream payload could not be turned into a [`StreamEvent`].
///
/// [`StreamEvent`]: crate::StreamEvent
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The payload is not valid JSON or does not match the expected shape.
    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),

    /// The payload is a JSON value but not an object.
    #[error("payload is not a JSON object")]
    NotAnObject,

    /// The payload is an object carrying neither `violations` nor `message`.
    #[error("payload is neither an alert nor an error event")]
    UnknownShape,
}
