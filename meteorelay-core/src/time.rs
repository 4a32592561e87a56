//! Time management for the relay
//!
//! Provides clock abstraction so the cache and the upload worker can be
//! driven either by the wall clock or by a controllable clock in tests:
//! - System clock (Unix seconds, rounded to the nearest second)
//! - Fixed clock (shared, manually advanced)

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Timestamp in whole seconds since the Unix epoch
pub type Timestamp = u64;

/// Source of time for the system
///
/// Implementations must be shareable with the upload worker thread.
pub trait TimeSource: Send + Sync {
    /// Get current timestamp in seconds
    fn now(&self) -> Timestamp;
}

impl<T: TimeSource + ?Sized> TimeSource for Arc<T> {
    fn now(&self) -> Timestamp {
        (**self).now()
    }
}

/// Wall clock time source
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTime;

impl TimeSource for SystemTime {
    fn now(&self) -> Timestamp {
        use std::time::{SystemTime as StdSystemTime, UNIX_EPOCH};

        let elapsed = StdSystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        // Round half up, the way station software stamps its packets
        (elapsed.as_millis() as u64 + 500) / 1000
    }
}

/// Fixed time source for testing
///
/// Clones share the same underlying instant, so a test can hand one clone to
/// a worker thread and advance the other.
#[derive(Debug, Clone)]
pub struct FixedTime {
    timestamp: Arc<AtomicU64>,
}

impl FixedTime {
    /// Clock frozen at `timestamp`
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            timestamp: Arc::new(AtomicU64::new(timestamp)),
        }
    }

    /// Move the clock to `timestamp`
    pub fn set(&self, timestamp: Timestamp) {
        self.timestamp.store(timestamp, Ordering::SeqCst);
    }

    /// Move the clock forward by `secs`
    pub fn advance(&self, secs: u64) {
        self.timestamp.fetch_add(secs, Ordering::SeqCst);
    }
}

impl TimeSource for FixedTime {
    fn now(&self) -> Timestamp {
        self.timestamp.load(Ordering::SeqCst)
    }
}

/// Age of `earlier` as seen from `later`; zero if `earlier` is in the future
pub fn age(earlier: Timestamp, later: Timestamp) -> u64 {
    later.saturating_sub(earlier)
}
