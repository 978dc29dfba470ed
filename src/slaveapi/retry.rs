//! Retry wrapper for slaveapi calls.
//!
//! Only transport errors are retried. A well-formed error response from
//! slaveapi is final and returned as-is.

use std::thread;
use std::time::Duration;

use tracing::warn;

use crate::backoff::ExponentialBackoff;

use super::{ApiError, Result};

/// How persistently to retry a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Always at least one.
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// The outcome of a single attempt.
pub enum RetryResult<T> {
    Ok(T),
    /// Transport failure; worth trying again.
    Retry(reqwest::Error),
    /// Final failure; give up now.
    Err(ApiError),
}

type SleepFn = Box<dyn Fn(Duration) + Send + Sync>;

/// Runs an operation until it succeeds, fails for good, or runs out of attempts.
pub struct Retrier {
    policy: RetryPolicy,
    sleep_fn: SleepFn,
}

impl Retrier {
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_sleep(policy, Box::new(thread::sleep))
    }

    pub fn with_sleep(policy: RetryPolicy, sleep_fn: SleepFn) -> Self {
        Self { policy, sleep_fn }
    }

    /// Retry `operation` against `url` according to the policy.
    pub fn retry<T>(&self, url: &str, mut operation: impl FnMut() -> RetryResult<T>) -> Result<T> {
        let attempts = self.policy.attempts.max(1);
        let mut delays = ExponentialBackoff::new(self.policy.base_delay, self.policy.max_delay);
        let mut attempt = 1;
        loop {
            match operation() {
                RetryResult::Ok(value) => return Ok(value),
                RetryResult::Err(e) => return Err(e),
                RetryResult::Retry(source) if attempt >= attempts => {
                    return Err(ApiError::Unavailable {
                        url: url.to_string(),
                        attempts,
                        source,
                    });
                }
                RetryResult::Retry(source) => {
                    let delay = delays.next().unwrap_or(self.policy.max_delay);
                    warn!(
                        url,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %source,
                        "slaveapi call failed, retrying"
                    );
                    (self.sleep_fn)(delay);
                    attempt += 1;
                }
            }
        }
    }
}
