//! Retry policy: decides backoff delays.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

/// Exponential backoff with no jitter.
///
/// `backoff(n)` is the delay scheduled after the n-th recorded failure:
/// `base_delay * 2^(n - 1)`, optionally clamped by `max_delay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay after the first failure.
    pub base_delay: Duration,

    /// Optional ceiling. Delays below it keep doubling unchanged.
    pub max_delay: Option<Duration>,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay: None,
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// Delay for the given retry count (1-indexed; 0 is treated as 1).
    ///
    /// Example with base_delay=10s:
    /// - retry_count 1: 10s
    /// - retry_count 2: 20s
    /// - retry_count 3: 40s
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.saturating_sub(1);
        let delay = 2u32
            .checked_pow(exponent)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .unwrap_or(Duration::MAX);

        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }

    /// `now + backoff(retry_count)`, saturating at the far future.
    pub fn next_retry_at(&self, retry_count: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        add_saturating(now, self.backoff(retry_count))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

pub(crate) fn add_saturating(at: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(delay)
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
