//! Monotonic time source shared by engines.

use std::time::Instant;

/// Monotonic, non-decreasing millisecond counter.
pub trait Clock: Send + Sync + 'static {
    fn now_ms(&self) -> u64;
}

/// Milliseconds elapsed since the clock was created, backed by [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        // u128 -> u64 only overflows after ~584 million years.
        self.origin.elapsed().as_millis() as u64
    }
}
