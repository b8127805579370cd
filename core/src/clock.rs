//! Time source used by every context.
//!
//! Timestamps are microseconds since an arbitrary per-clock origin. Marker
//! rows, pacing deadlines and generation timings all share one clock so the
//! values are directly comparable.

use std::time::{Duration, Instant};

/// Monotonic microsecond clock.
pub trait Clock: Send + Sync {
    /// Current time in microseconds.
    fn now_us(&self) -> u64;

    /// Block the calling thread until `deadline_us` has passed.
    fn sleep_until(&self, deadline_us: u64);
}

/// Wall-clock implementation backed by [`Instant`].
#[derive(Debug, Clone)]
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

impl Clock for SystemClock {
    fn now_us(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }

    fn sleep_until(&self, deadline_us: u64) {
        // thread::sleep may wake early on some platforms
        loop {
            let now = self.now_us();
            if now >= deadline_us {
                return;
            }
            std::thread::sleep(Duration::from_micros(deadline_us - now));
        }
    }
}
