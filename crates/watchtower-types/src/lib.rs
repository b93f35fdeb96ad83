//! Shared type definitions for the Watchtower alert dispatcher.
//!
//! Every payload that arrives on the alert stream is decoded into one of the
//! types defined here before it reaches a sink. Sinks only ever see values
//! that passed validation.
//!
//! # Modules
//!
//! - [`level`] -- The fixed alert level enumeration
//! - [`alert`] -- Alerts, violations and their annotation metadata
//! - [`event`] -- Detector error events and the decoded stream event
//! - [`error`] -- Validation and decode errors

pub mod alert;
pub mod error;
pub mod event;
pub mod level;

// Re-export all public types at crate root for convenience.
pub use alert::{Alert, AlertBuilder, Violation, ViolationMeta};
pub use error::{DecodeError, ValidationError};
pub use event::{ErrorEvent, StreamEvent};
pub use level::AlertLevel;
