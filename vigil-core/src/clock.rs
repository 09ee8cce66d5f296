//! Playback clocks
//!
//! Monotonic millisecond time for scheduling decisions. `SystemClock` reads
//! milliseconds since construction, relative to no particular epoch.
//! `ManualClock` is stepped by hand in tests.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

/// Monotonic millisecond clock behind every scheduling decision.
pub trait MediaClock: Send + Sync {
    /// Current time in milliseconds, relative to no particular epoch.
    fn now_ms(&self) -> i64;
}

/// Real clock anchored at construction.
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaClock for SystemClock {
    fn now_ms(&self) -> i64 {
        self.origin.elapsed().as_millis() as i64
    }
}

/// Deterministic clock for tests. Reads return whatever the test last set.
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(start_ms),
        }
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }

    pub fn set(&self, now_ms: i64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }
}

impl MediaClock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
