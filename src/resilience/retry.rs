//! Retry Logic
//!
//! Tiered backoff for failed identity refreshes.

use std::time::Duration;

use crate::error::UID2Error;

/// Refresh retry configuration.
///
/// The first `short_retry_threshold` consecutive failures are retried after
/// `short_delay`, every later one after `long_delay`. There is no attempt cap;
/// retries stop only when the held identity can no longer be refreshed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshRetryConfig {
    /// Delay after each of the first failures.
    pub short_delay: Duration,
    /// Delay once the short retries are used up.
    pub long_delay: Duration,
    /// Number of consecutive failures retried after the short delay.
    pub short_retry_threshold: u32,
}

impl Default for RefreshRetryConfig {
    fn default() -> Self {
        DEFAULT_REFRESH_RETRY_CONFIG
    }
}

/// Default refresh retry configuration.
pub const DEFAULT_REFRESH_RETRY_CONFIG: RefreshRetryConfig = RefreshRetryConfig {
    short_delay: Duration::from_secs(5),
    long_delay: Duration::from_secs(60),
    short_retry_threshold: 5,
};

impl RefreshRetryConfig {
    /// Delay before the next attempt, given the number of failures so far
    /// (zero-based: `0` is the delay after the first failure).
    pub fn delay_for(&self, failed_attempts: u32) -> Duration {
        if failed_attempts < self.short_retry_threshold {
            self.short_delay
        } else {
            self.long_delay
        }
    }

    /// Whether a refresh that failed with `error` should be attempted again.
    pub fn should_retry(&self, error: &UID2Error) -> bool {
        error.is_retryable()
    }
}
