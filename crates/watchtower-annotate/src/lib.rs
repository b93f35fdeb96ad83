//! Violation metadata annotation for the Watchtower alert dispatcher.
//!
//! Violations arrive with an opaque expression such as `asn/1234`. Sinks
//! that group or label by entity need to know what that expression refers
//! to, so this crate resolves expressions through an entity lookup
//! collaborator and writes the result back onto the alert.
//!
//! Resolution is scoped to a single alert: the first sink that asks for
//! annotation pays for the lookups, later sinks see the alert already
//! annotated. Nothing is cached across alerts.
//!
//! # Modules
//!
//! - [`config`] -- Lookup mode, endpoint and fetchable predicate settings
//! - [`lookup`] -- The [`EntityLookup`] collaborator and its variants
//! - [`http`] -- HTTP entity API client (per-entity and batch)
//! - [`annotator`] -- The idempotent per-alert annotation pass
//! - [`error`] -- Per-expression lookup failures

pub mod annotator;
pub mod config;
pub mod error;
pub mod http;
pub mod lookup;

pub use annotator::{AnnotationOutcome, annotate_alert};
pub use config::{AnnotationConfig, LookupMode};
pub use error::LookupError;
pub use http::HttpLookup;
pub use lookup::{EntityLookup, FixedLookup, Resolution};
