//! Timeseries backends.
//!
//! A backend receives every point of one key package flush in a single
//! call. The `ascii` backend writes graphite-style `key value time` lines;
//! the memory backend keeps points in a shared buffer that the caller can
//! inspect.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::TimeseriesError;

/// One emitted metric point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Point {
    /// Metric key.
    pub key: String,
    /// Integer value.
    pub value: i64,
    /// Epoch seconds the value applies to.
    pub time: i64,
}

/// Destination for flushed key packages.
pub trait TimeseriesBackend: Send {
    /// Backend name as used in configuration.
    fn name(&self) -> &str;

    /// Write all points of one flush, sharing the timestamp `time`.
    ///
    /// # Errors
    ///
    /// Returns [`TimeseriesError::Write`] if the points cannot be written.
    fn write(&mut self, time: i64, points: &[(&str, i64)]) -> Result<(), TimeseriesError>;
}

/// Writes `key value time` lines to stdout or a file.
pub struct AsciiBackend {
    out: Box<dyn Write + Send>,
}

impl AsciiBackend {
    /// Backend name in configuration.
    pub const NAME: &'static str = "ascii";

    /// Build from an options string.
    ///
    /// An empty string writes to stdout; `-f <path>` appends to `path`.
    ///
    /// # Errors
    ///
    /// Returns [`TimeseriesError::InvalidOptions`] for unrecognized options
    /// or an unopenable file.
    pub fn from_options(opts: &str) -> Result<Self, TimeseriesError> {
        let invalid = |message: String| TimeseriesError::InvalidOptions {
            backend: Self::NAME.to_owned(),
            message,
        };
        let mut words = opts.split_whitespace();
        match (words.next(), words.next(), words.next()) {
            (None, _, _) => Ok(Self::new(Box::new(io::stdout()))),
            (Some("-f"), Some(path), None) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|e| invalid(format!("cannot open {path}: {e}")))?;
                Ok(Self::new(Box::new(file)))
            }
            _ => Err(invalid(format!("unrecognized options {opts:?}"))),
        }
    }

    /// Write to an arbitrary sink.
    pub const fn new(out: Box<dyn Write + Send>) -> Self {
        Self { out }
    }
}

impl TimeseriesBackend for AsciiBackend {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn write(&mut self, time: i64, points: &[(&str, i64)]) -> Result<(), TimeseriesError> {
        let wrap = |source| TimeseriesError::Write {
            backend: Self::NAME.to_owned(),
            source,
        };
        for (key, value) in points {
            writeln!(self.out, "{key} {value} {time}").map_err(wrap)?;
        }
        self.out.flush().map_err(wrap)
    }
}

/// Keeps points in memory.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    points: Arc<Mutex<Vec<Point>>>,
}

/// Read side of a [`MemoryBackend`].
#[derive(Debug, Clone, Default)]
pub struct MemoryHandle {
    points: Arc<Mutex<Vec<Point>>>,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle sharing this backend's buffer.
    pub fn handle(&self) -> MemoryHandle {
        MemoryHandle {
            points: Arc::clone(&self.points),
        }
    }
}

impl MemoryHandle {
    /// Every point written so far, in write order.
    pub fn points(&self) -> Vec<Point> {
        self.points
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Distinct flush timestamps, in write order.
    pub fn flush_times(&self) -> Vec<i64> {
        let mut times: Vec<i64> = Vec::new();
        for point in self.points() {
            if times.last() != Some(&point.time) {
                times.push(point.time);
            }
        }
        times
    }

    /// The most recent value written for `key`.
    pub fn latest(&self, key: &str) -> Option<i64> {
        self.points()
            .iter()
            .rev()
            .find(|p| p.key == key)
            .map(|p| p.value)
    }

    /// The value written for `key` at `time`, if any.
    pub fn value_at(&self, key: &str, time: i64) -> Option<i64> {
        self.points()
            .iter()
            .rev()
            .find(|p| p.key == key && p.time == time)
            .map(|p| p.value)
    }

    /// Drop everything recorded so far.
    pub fn clear(&self) {
        self.points
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl TimeseriesBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    fn write(&mut self, time: i64, points: &[(&str, i64)]) -> Result<(), TimeseriesError> {
        let mut buffer = self.points.lock().unwrap_or_else(PoisonError::into_inner);
        buffer.extend(points.iter().map(|(key, value)| Point {
            key: (*key).to_owned(),
            value: *value,
            time,
        }));
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// A `Write` that appends into a shared buffer.
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn ascii_writes_graphite_lines() {
        let buf = SharedBuf::default();
        let mut backend = AsciiBackend::new(Box::new(buf.clone()));
        backend.write(120, &[("a.b.alert_level", 2), ("a.b.delta", 8000)]).unwrap();

        let text = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert_eq!(text, "a.b.alert_level 2 120\na.b.delta 8000 120\n");
    }

    #[test]
    fn ascii_rejects_unknown_options() {
        assert!(matches!(
            AsciiBackend::from_options("--compress"),
            Err(TimeseriesError::InvalidOptions { .. })
        ));
        assert!(AsciiBackend::from_options("").is_ok());
    }

    #[test]
    fn memory_handle_sees_writes() {
        let mut backend = MemoryBackend::new();
        let handle = backend.handle();
        backend.write(60, &[("k", 1)]).unwrap();
        backend.write(120, &[("k", 0)]).unwrap();

        assert_eq!(handle.flush_times(), vec![60, 120]);
        assert_eq!(handle.latest("k"), Some(0));
        assert_eq!(handle.value_at("k", 60), Some(1));
        handle.clear();
        assert!(handle.points().is_empty());
    }
}
