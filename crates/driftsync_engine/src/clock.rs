//! Wall-clock abstraction.
//!
//! Cache ages and last-sync markers are wall-clock times. Production code
//! uses [`SystemTimeSource`]; tests drive [`FakeTimeSource`] by hand to
//! cross the multi-hour backup and TTL thresholds.

use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Source of wall-clock time.
pub trait TimeSource: Send + Sync {
    /// Current time.
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A manually advanced clock with millisecond resolution.
///
/// Clones share the same time.
#[derive(Debug, Clone)]
pub struct FakeTimeSource {
    millis: Arc<AtomicI64>,
}

impl FakeTimeSource {
    /// Creates a clock stopped at `at`.
    pub fn new(at: DateTime<Utc>) -> Self {
        Self {
            millis: Arc::new(AtomicI64::new(at.timestamp_millis())),
        }
    }

    /// Moves the clock forward (or backward, for a negative delta).
    pub fn advance(&self, delta: chrono::Duration) {
        self.millis
            .fetch_add(delta.num_milliseconds(), Ordering::SeqCst);
    }

    /// Sets the clock.
    pub fn set(&self, at: DateTime<Utc>) {
        self.millis.store(at.timestamp_millis(), Ordering::SeqCst);
    }
}

impl TimeSource for FakeTimeSource {
    fn now(&self) -> DateTime<Utc> {
        let millis = self.millis.load(Ordering::SeqCst);
        Utc.timestamp_millis_opt(millis)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// Monotonic time as seen by the tokio timer.
///
/// Follows the paused clock in `tokio::time::pause` tests and falls back to
/// the OS clock outside a runtime.
pub fn monotonic_now() -> Instant {
    tokio::time::Instant::now().into_std()
}
