//! The set of enabled backends.

use tracing::info;

use crate::backend::{AsciiBackend, TimeseriesBackend};
use crate::error::TimeseriesError;

/// Fan-out of flushed points to every enabled backend.
#[derive(Default)]
pub struct Timeseries {
    backends: Vec<Box<dyn TimeseriesBackend>>,
}

impl Timeseries {
    /// Create a timeseries handle with no backends.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable a backend by configuration name.
    ///
    /// # Errors
    ///
    /// Returns [`TimeseriesError::UnknownBackend`] for an unknown name, or
    /// the backend's own error for invalid options.
    pub fn enable_backend(&mut self, name: &str, opts: &str) -> Result<(), TimeseriesError> {
        let backend: Box<dyn TimeseriesBackend> = match name {
            AsciiBackend::NAME => Box::new(AsciiBackend::from_options(opts)?),
            other => return Err(TimeseriesError::UnknownBackend(other.to_owned())),
        };
        info!(backend = name, "enabled timeseries backend");
        self.backends.push(backend);
        Ok(())
    }

    /// Enable an already constructed backend.
    pub fn add_backend(&mut self, backend: Box<dyn TimeseriesBackend>) {
        info!(backend = backend.name(), "enabled timeseries backend");
        self.backends.push(backend);
    }

    /// Names of the enabled backends, in order.
    pub fn backend_names(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    /// Write one flush to every backend.
    ///
    /// Every backend is attempted even if an earlier one fails; the first
    /// failure is returned.
    ///
    /// # Errors
    ///
    /// Returns the first backend error.
    pub fn write(&mut self, time: i64, points: &[(&str, i64)]) -> Result<(), TimeseriesError> {
        let mut first_error = None;
        for backend in &mut self.backends {
            if let Err(e) = backend.write(time, points) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl std::fmt::Debug for Timeseries {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timeseries")
            .field("backends", &self.backend_names())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    #[test]
    fn unknown_backend_is_rejected() {
        let mut ts = Timeseries::new();
        assert!(matches!(
            ts.enable_backend("kafka", ""),
            Err(TimeseriesError::UnknownBackend(name)) if name == "kafka"
        ));
        assert!(ts.backend_names().is_empty());
    }

    #[test]
    fn writes_reach_every_backend() {
        let mut ts = Timeseries::new();
        let first = MemoryBackend::new();
        let second = MemoryBackend::new();
        let (h1, h2) = (first.handle(), second.handle());
        ts.add_backend(Box::new(first));
        ts.add_backend(Box::new(second));

        ts.write(300, &[("k", 7)]).unwrap();
        assert_eq!(h1.value_at("k", 300), Some(7));
        assert_eq!(h2.value_at("k", 300), Some(7));
        assert_eq!(ts.backend_names(), vec!["memory", "memory"]);
    }
}
