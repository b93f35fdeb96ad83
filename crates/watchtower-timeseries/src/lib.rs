//! Timeseries emission for the Watchtower alert dispatcher.
//!
//! Metrics are grouped into a [`KeyPackage`]: an ordered set of keys, each
//! holding the latest integer value. Flushing a key package writes every
//! key's current value at a given timestamp to all enabled backends of a
//! [`Timeseries`].
//!
//! # Modules
//!
//! - [`key_package`] -- Keyed metric values flushed together
//! - [`backend`] -- The backend contract and the `ascii` / memory backends
//! - [`timeseries`] -- The set of enabled backends
//! - [`error`] -- Emission errors

pub mod backend;
pub mod error;
pub mod key_package;
pub mod timeseries;

pub use backend::{AsciiBackend, MemoryBackend, MemoryHandle, Point, TimeseriesBackend};
pub use error::TimeseriesError;
pub use key_package::KeyPackage;
pub use timeseries::Timeseries;
