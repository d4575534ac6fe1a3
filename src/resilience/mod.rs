//! Resilience
//!
//! Retry policy for the automatic identity refresh.

pub mod retry;

pub use retry::{RefreshRetryConfig, DEFAULT_REFRESH_RETRY_CONFIG};
