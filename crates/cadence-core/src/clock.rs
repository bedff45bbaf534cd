//! Monotonic clock sources
//!
//! The stream clock only ever reads time differences, so any source that
//! never runs backwards will do. `SystemClock` is the production source;
//! `ManualClock` is a deterministic source for tests and simulations.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

use crate::types::Usecs;

/// A monotonic microsecond clock
///
/// Implementations must be safe to sample from the realtime audio thread:
/// no locks, no allocation, no syscalls beyond the clock read itself.
pub trait MonotonicClock: Send + Sync {
    /// Current time in microseconds from an arbitrary fixed origin
    fn now_usecs(&self) -> Usecs;
}

/// Monotonic clock backed by `std::time::Instant`
///
/// The origin is the moment the clock was created; only differences are
/// meaningful, which is all the interpolator needs.
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

impl MonotonicClock for SystemClock {
    fn now_usecs(&self) -> Usecs {
        self.origin.elapsed().as_micros() as Usecs
    }
}

/// Manually advanced clock for deterministic tests
///
/// Time only moves when the test calls [`ManualClock::advance`] or
/// [`ManualClock::set`], so control-loop cycles can be stepped exactly.
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    /// Create a clock starting at 0
    pub fn new() -> Self {
        Self::at(0)
    }

    /// Create a clock starting at `usecs`
    pub fn at(usecs: Usecs) -> Self {
        Self {
            now: AtomicI64::new(usecs),
        }
    }

    /// Jump forward by `usecs`
    pub fn advance(&self, usecs: Usecs) {
        self.now.fetch_add(usecs, Ordering::SeqCst);
    }

    /// Set the absolute time
    pub fn set(&self, usecs: Usecs) {
        self.now.store(usecs, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock for ManualClock {
    fn now_usecs(&self) -> Usecs {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now_usecs();
        let b = clock.now_usecs();
        assert!(b >= a);
    }

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::new();
        assert_eq!(clock.now_usecs(), 0);
        clock.advance(20_000);
        assert_eq!(clock.now_usecs(), 20_000);
        clock.set(1_000_000);
        assert_eq!(clock.now_usecs(), 1_000_000);
    }
}
