//! Keyed metric values flushed together.

use std::collections::HashMap;

use crate::error::TimeseriesError;
use crate::timeseries::Timeseries;

/// An ordered set of metric keys and their current values.
///
/// Values persist across flushes unless the package was created with
/// `reset_on_flush`, in which case every value returns to 0 after each
/// flush.
#[derive(Debug, Clone, Default)]
pub struct KeyPackage {
    keys: Vec<String>,
    values: Vec<i64>,
    index: HashMap<String, usize>,
    reset_on_flush: bool,
}

impl KeyPackage {
    /// Create an empty key package.
    pub fn new(reset_on_flush: bool) -> Self {
        Self {
            reset_on_flush,
            ..Self::default()
        }
    }

    /// Index of `key`, if it has been added.
    pub fn get_key(&self, key: &str) -> Option<usize> {
        self.index.get(key).copied()
    }

    /// Add `key` with value 0, returning its index.
    ///
    /// Adding an existing key returns the existing index.
    pub fn add_key(&mut self, key: &str) -> usize {
        if let Some(idx) = self.get_key(key) {
            return idx;
        }
        let idx = self.keys.len();
        self.keys.push(key.to_owned());
        self.values.push(0);
        self.index.insert(key.to_owned(), idx);
        idx
    }

    /// Set the value at `idx`.
    ///
    /// # Errors
    ///
    /// Returns [`TimeseriesError::UnknownKey`] if `idx` was not returned by
    /// [`KeyPackage::add_key`].
    pub fn set(&mut self, idx: usize, value: i64) -> Result<(), TimeseriesError> {
        let slot = self
            .values
            .get_mut(idx)
            .ok_or(TimeseriesError::UnknownKey(idx))?;
        *slot = value;
        Ok(())
    }

    /// Add `key` if needed and set its value.
    pub fn upsert(&mut self, key: &str, value: i64) {
        let idx = self.add_key(key);
        if let Some(slot) = self.values.get_mut(idx) {
            *slot = value;
        }
    }

    /// Current value of `key`.
    pub fn value(&self, key: &str) -> Option<i64> {
        self.get_key(key).and_then(|idx| self.values.get(idx).copied())
    }

    /// Number of keys.
    pub const fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether no key has been added.
    pub const fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Write every key's current value at `time`.
    ///
    /// An empty package writes nothing.
    ///
    /// # Errors
    ///
    /// Returns the first backend error.
    pub fn flush(&mut self, time: i64, ts: &mut Timeseries) -> Result<(), TimeseriesError> {
        if self.keys.is_empty() {
            return Ok(());
        }
        let points: Vec<(&str, i64)> = self
            .keys
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().copied())
            .collect();
        let result = ts.write(time, &points);
        if self.reset_on_flush {
            self.values.iter_mut().for_each(|v| *v = 0);
        }
        result
    }
}
