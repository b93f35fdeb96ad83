//! Fixed-cadence timer schedule.

use chrono::Utc;

/// Source of the current time in epoch seconds.
pub trait Clock {
    /// Current epoch seconds.
    fn now(&self) -> i64;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        Utc::now().timestamp()
    }
}

/// When the next timer tick is due.
///
/// The first deadline is the interval boundary after the one at or before
/// the first observed time, so nothing fires on startup. Each fired tick
/// advances the deadline by exactly one interval; after a stall the
/// schedule catches up one tick per check instead of skipping.
#[derive(Debug, Clone, Copy)]
pub struct TimerSchedule {
    interval: i64,
    next: Option<i64>,
}

impl TimerSchedule {
    /// Create an unarmed schedule. `interval` must be positive.
    pub const fn new(interval: i64) -> Self {
        Self {
            interval,
            next: None,
        }
    }

    /// Arm on first call, then report whether a tick is due at `now`.
    pub const fn check(&mut self, now: i64) -> bool {
        match self.next {
            None => {
                self.next = Some(first_deadline(now, self.interval));
                false
            }
            Some(next) if now >= next => {
                self.next = Some(next.saturating_add(self.interval));
                true
            }
            Some(_) => false,
        }
    }

    /// The armed deadline, if any.
    pub const fn next_deadline(&self) -> Option<i64> {
        self.next
    }
}

/// `floor(now / interval) * interval + interval`.
pub const fn first_deadline(now: i64, interval: i64) -> i64 {
    match now.checked_div_euclid(interval) {
        Some(quotient) => quotient.saturating_mul(interval).saturating_add(interval),
        None => now,
    }
}
