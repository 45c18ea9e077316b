//! Time sources for the work queue
//!
//! The queue never reads wall-clock time directly; it asks a [`Clock`] how far
//! time has advanced since the clock's epoch. Production code uses
//! [`SystemClock`]. Tests use [`ManualClock`] and move time forward with
//! [`ManualClock::advance`], so a 60 second grace delay can be crossed without
//! sleeping.

use parking_lot::Mutex;
use std::fmt;
use std::time::{Duration, Instant};

/// Monotonic time source
pub trait Clock: Send + Sync + fmt::Debug {
    /// Time elapsed since this clock's epoch
    fn now(&self) -> Duration;

    /// Longest a waiting worker may park before re-reading [`now`](Self::now)
    ///
    /// `None` means the worker may sleep until the next deadline. Clocks that
    /// can jump forward without notifying anyone must return `Some`.
    fn park_limit(&self) -> Option<Duration> {
        None
    }
}

/// Real monotonic time
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    /// Clock whose epoch is now
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }
}

/// Virtual time that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
}

/// How often a worker re-reads a manual clock while a deadline is pending
const MANUAL_PARK_LIMIT: Duration = Duration::from_millis(1);

impl ManualClock {
    /// Clock starting at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward by `by`
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now = now.saturating_add(by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock()
    }

    fn park_limit(&self) -> Option<Duration> {
        Some(MANUAL_PARK_LIMIT)
    }
}
