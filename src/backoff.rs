//! Exponential backoff schedule.
//!
//! Used by the HTTP retry wrapper between attempts and by the supervisor
//! while it waits for a free processor slot.

use std::time::Duration;

/// Yields `base`, then doubles on every step, never exceeding `max`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    current: Duration,
    base: Duration,
    max: Duration,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        let base = base.min(max);
        Self {
            current: base,
            base,
            max,
        }
    }

    /// Start over from the base interval.
    pub fn reset(&mut self) {
        self.current = self.base;
    }
}

impl Iterator for ExponentialBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        Some(delay)
    }
}
