//! Time Source
//!
//! Wall-clock access for expiry decisions.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Source of the current time in milliseconds since the Unix epoch.
pub trait TimeSource: Send + Sync {
    /// Current time in milliseconds.
    fn now_ms(&self) -> i64;

    /// Whether the given millisecond timestamp has been reached.
    fn has_passed(&self, timestamp_ms: i64) -> bool {
        self.now_ms() >= timestamp_ms
    }

    /// Time remaining until the given timestamp, zero if it has passed.
    fn until(&self, timestamp_ms: i64) -> Duration {
        let remaining = timestamp_ms.saturating_sub(self.now_ms());
        Duration::from_millis(remaining.max(0) as u64)
    }
}

/// System clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Test clock that follows tokio's (possibly paused) clock.
///
/// Reports `start_ms` plus the tokio time elapsed since creation, plus any
/// manual skew. Advancing tokio time with `tokio::time::advance` moves this
/// clock and the manager's timers together.
#[derive(Clone, Debug)]
pub struct MockTimeSource {
    start_ms: i64,
    anchor: tokio::time::Instant,
    skew_ms: Arc<Mutex<i64>>,
}

impl MockTimeSource {
    /// Create a clock starting at the given time.
    pub fn new(start_ms: i64) -> Self {
        Self {
            start_ms,
            anchor: tokio::time::Instant::now(),
            skew_ms: Arc::new(Mutex::new(0)),
        }
    }

    /// Move the reported time forward without moving tokio's clock.
    pub fn skew(&self, by: Duration) {
        *self.skew_ms.lock() += by.as_millis() as i64;
    }
}

impl TimeSource for MockTimeSource {
    fn now_ms(&self) -> i64 {
        let elapsed = self.anchor.elapsed().as_millis() as i64;
        self.start_ms + elapsed + *self.skew_ms.lock()
    }
}
