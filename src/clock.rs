//! Simulation Clock
//!
//! Monotonic simulated clock with millisecond resolution, driven entirely by
//! candle timestamps. Never calls system time - this is the central
//! invariant enabling deterministic replay.

use std::fmt;

/// Milliseconds since Unix epoch.
pub type Millis = i64;

/// Monotonic simulation clock.
///
/// # Determinism contract
/// - `now()` returns the current simulation time, never wall time
/// - `advance_to()` only moves forward, panics on backward movement
/// - every timestamp recorded by the engine (orders, positions, report rows)
///   must originate from this clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Clock {
    current: Millis,
}

impl Clock {
    /// Create a clock starting at the given time.
    #[inline]
    pub fn new(start_time: Millis) -> Self {
        Self {
            current: start_time,
        }
    }

    /// Current simulation time in milliseconds.
    #[inline]
    pub fn now(&self) -> Millis {
        self.current
    }

    /// Advance the clock to a new time. Panics if time would go backward.
    #[inline]
    pub fn advance_to(&mut self, new_time: Millis) {
        assert!(
            new_time >= self.current,
            "Clock: cannot go backward from {} to {}",
            self.current,
            new_time
        );
        self.current = new_time;
    }

    /// Milliseconds elapsed since a past timestamp. Zero if `past` is in the future.
    #[inline]
    pub fn elapsed_since(&self, past: Millis) -> Millis {
        (self.current - past).max(0)
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new(0)
    }
}

impl fmt::Display for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t={}ms", self.current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advances_forward() {
        let mut clock = Clock::new(0);
        clock.advance_to(1000);
        assert_eq!(clock.now(), 1000);
    }

    #[test]
    #[should_panic(expected = "cannot go backward")]
    fn panics_on_backward_advance() {
        let mut clock = Clock::new(1000);
        clock.advance_to(500);
    }

    #[test]
    fn elapsed_since_clamps_to_zero() {
        let clock = Clock::new(1000);
        assert_eq!(clock.elapsed_since(2000), 0);
        assert_eq!(clock.elapsed_since(400), 600);
    }
}
