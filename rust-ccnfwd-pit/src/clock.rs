//! Microsecond clocks used for every PIT lifetime comparison.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Source of the current time in microseconds.
pub trait Clock: Send + Sync {
    fn now_us(&self) -> u64;
}

/// Wall-clock anchored, monotonic clock.
///
/// The epoch offset is sampled once; later readings advance with
/// [`Instant`] so they never go backwards.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
    base_us: u64,
}

impl SystemClock {
    pub fn new() -> Self {
        let base_us = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_else(|_| Duration::from_secs(0))
            .as_micros() as u64;
        Self {
            origin: Instant::now(),
            base_us,
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_us(&self) -> u64 {
        self.base_us + self.origin.elapsed().as_micros() as u64
    }
}

/// Clock driven by hand, for tests and trace replay.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_us: AtomicU64,
}

impl ManualClock {
    pub fn new(start_us: u64) -> Self {
        Self {
            now_us: AtomicU64::new(start_us),
        }
    }

    pub fn set(&self, now_us: u64) {
        self.now_us.store(now_us, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.now_us.fetch_add(by.as_micros() as u64, Ordering::SeqCst);
    }

    pub fn advance_ms(&self, ms: u64) {
        self.advance(Duration::from_millis(ms));
    }
}

impl Clock for ManualClock {
    fn now_us(&self) -> u64 {
        self.now_us.load(Ordering::SeqCst)
    }
}
