//! High-resolution timer for frame timing.

use std::time::{Duration, Instant};

/// High-resolution timer for measuring elapsed and per-frame time.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    last_tick: Instant,
    last_delta: Duration,
}

impl Timer {
    /// Create a new timer, starting from now.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_tick: now,
            last_delta: Duration::ZERO,
        }
    }

    /// Total elapsed time since the timer was created or reset.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Time elapsed since the last call to `tick()`, and start a new interval.
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        self.last_delta = now - self.last_tick;
        self.last_tick = now;
        self.last_delta
    }

    /// The interval measured by the most recent `tick()`.
    pub fn last_delta(&self) -> Duration {
        self.last_delta
    }

    /// Reset the timer to the current time.
    pub fn reset(&mut self) {
        let now = Instant::now();
        self.start = now;
        self.last_tick = now;
        self.last_delta = Duration::ZERO;
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
