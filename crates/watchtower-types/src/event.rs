//! Detector error events and stream payload decoding.

use serde::{Deserialize, Serialize};

use crate::alert::Alert;
use crate::error::DecodeError;

/// A failure the detector reports instead of an alert.
///
/// Carries the same identity fields as an alert plus the failure class
/// (`type`) and a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEvent {
    /// Identity of the monitored entity and condition.
    pub fqid: String,
    /// Human-readable name.
    pub name: String,
    /// Epoch seconds of the failed evaluation.
    pub time: i64,
    /// Query that was being evaluated.
    #[serde(default)]
    pub expression: String,
    /// Baseline query that was being evaluated.
    #[serde(default)]
    pub history_expression: String,
    /// Failure class.
    #[serde(rename = "type")]
    pub error_type: String,
    /// Failure description.
    pub message: String,
}

/// One decoded payload from the alert stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A validated alert.
    Alert(Alert),
    /// A detector error report.
    Error(ErrorEvent),
}

impl StreamEvent {
    /// Decode a raw stream payload.
    ///
    /// An object with a `violations` field is an alert; otherwise an object
    /// with a `message` field is an error event.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] when the payload is not JSON, not an object,
    /// has neither shape, or fails alert validation.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let value: serde_json::Value = serde_json::from_slice(payload)?;
        let Some(object) = value.as_object() else {
            return Err(DecodeError::NotAnObject);
        };
        if object.contains_key("violations") {
            Ok(Self::Alert(serde_json::from_value(value)?))
        } else if object.contains_key("message") {
            Ok(Self::Error(serde_json::from_value(value)?))
        } else {
            Err(DecodeError::UnknownShape)
        }
    }

    /// Alert or error name, for logging.
    pub fn name(&self) -> &str {
        match self {
            Self::Alert(alert) => alert.name(),
            Self::Error(error) => &error.name,
        }
    }
}
