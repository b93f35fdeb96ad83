//! The alert level enumeration.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Severity reported by the detector for one alert.
///
/// The wire form is the lowercase variant name. Any other string is
/// rejected at decode time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    /// The monitored condition is in outage.
    Critical,
    /// The monitored condition is degraded.
    Warning,
    /// The monitored condition has returned to normal.
    Normal,
    /// The detector failed to evaluate the condition.
    Error,
}

impl AlertLevel {
    /// All levels, in wire order.
    pub const ALL: [Self; 4] = [Self::Critical, Self::Warning, Self::Normal, Self::Error];

    /// The lowercase wire name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Warning => "warning",
            Self::Normal => "normal",
            Self::Error => "error",
        }
    }

    /// Integer encoding used for level metrics.
    ///
    /// `normal` is 0, `warning` 1, `critical` 2. `error` has no metric
    /// encoding.
    pub const fn metric_value(self) -> Option<i64> {
        match self {
            Self::Normal => Some(0),
            Self::Warning => Some(1),
            Self::Critical => Some(2),
            Self::Error => None,
        }
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertLevel {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|level| level.as_str() == s)
            .ok_or_else(|| ValidationError::InvalidLevel(s.to_owned()))
    }
}
