//! Wall-clock abstraction
//!
//! Every timer computation takes "now" from a [`Clock`] so that display
//! clients, engines and stores can be driven by a controllable clock in tests.

use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex};

/// Source of the current wall-clock instant
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Real system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests and simulations
#[derive(Debug, Clone)]
pub struct ManualClock {
    current: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: Arc::new(Mutex::new(start)),
        }
    }

    /// Clock starting at a fixed, arbitrary instant (2024-01-01T00:00:00Z)
    pub fn at_epoch() -> Self {
        Self::new(DateTime::<Utc>::from_timestamp(1_704_067_200, 0).unwrap_or_default())
    }

    /// Move the clock forward by `ms` milliseconds
    pub fn advance_ms(&self, ms: i64) {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        *current += Duration::milliseconds(ms);
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = instant;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::at_epoch()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Milliseconds from `from` to `to`, clamped at zero
pub fn millis_between(from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    (to - from).num_milliseconds().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::at_epoch();
        let start = clock.now();
        clock.advance_ms(1_500);
        assert_eq!(millis_between(start, clock.now()), 1_500);
    }

    #[test]
    fn test_manual_clock_set_jumps() {
        let clock = ManualClock::at_epoch();
        let start = clock.now();
        clock.set(start + Duration::minutes(90));
        assert_eq!(millis_between(start, clock.now()), 5_400_000);

        // Jumping backwards is allowed; elapsed time clamps at zero
        clock.set(start - Duration::seconds(1));
        assert_eq!(millis_between(start, clock.now()), 0);
    }

    #[test]
    fn test_millis_between_clamps_negative() {
        let clock = ManualClock::at_epoch();
        let later = clock.now() + Duration::seconds(5);
        assert_eq!(millis_between(later, clock.now()), 0);
    }
}
