//! Clock abstraction
//!
//! The pacer, the congestion controller and the process thread all read time
//! through a shared [`Clock`] so tests can drive them with a simulated clock.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

/// Monotonic time source
pub trait Clock: Send + Sync {
    /// Current time in microseconds since the clock's origin
    fn time_in_microseconds(&self) -> i64;

    /// Current time in milliseconds since the clock's origin
    fn time_in_milliseconds(&self) -> i64 {
        self.time_in_microseconds() / 1_000
    }
}

/// Wall clock backed by `std::time::Instant`
///
/// Time zero is the moment the clock was created.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Create a new system clock starting at zero
    pub fn new() -> Self {
        SystemClock {
            origin: Instant::now(),
        }
    }

    /// Create a clock whose origin is the given instant
    pub fn from_instant(origin: Instant) -> Self {
        SystemClock { origin }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn time_in_microseconds(&self) -> i64 {
        self.origin
            .elapsed()
            .as_micros()
            .try_into()
            .unwrap_or(i64::MAX)
    }
}

/// Manually advanced clock for tests and simulations
#[derive(Debug)]
pub struct SimulatedClock {
    micros: AtomicI64,
}

impl SimulatedClock {
    /// Create a simulated clock at the given start time
    pub fn new(start_us: i64) -> Self {
        SimulatedClock {
            micros: AtomicI64::new(start_us),
        }
    }

    /// Move time forward
    pub fn advance(&self, delta: Duration) {
        let delta_us: i64 = delta.as_micros().try_into().unwrap_or(i64::MAX);
        self.micros.fetch_add(delta_us, Ordering::SeqCst);
    }

    /// Move time forward by whole milliseconds
    pub fn advance_ms(&self, delta_ms: i64) {
        self.micros.fetch_add(delta_ms * 1_000, Ordering::SeqCst);
    }
}

impl Clock for SimulatedClock {
    fn time_in_microseconds(&self) -> i64 {
        self.micros.load(Ordering::SeqCst)
    }
}
