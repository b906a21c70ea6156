//! Reconnect delay policy.
//!
//! Produces a monotone, bounded delay sequence: each consecutive connection
//! failure moves the delay a fixed step from `min` toward `max`, where it
//! saturates. A successful handshake (READY) resets the sequence.

use std::time::Duration;

/// Default minimum reconnect delay.
const DEFAULT_MIN_MS: u64 = 500;

/// Default maximum reconnect delay.
const DEFAULT_MAX_MS: u64 = 60_000;

/// Number of consecutive failures it takes to climb from min to max.
const RAMP_STEPS: u32 = 100;

/// Linear ramp between a minimum and maximum delay.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    min: Duration,
    max: Duration,
    failures: u32,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(DEFAULT_MIN_MS),
            Duration::from_millis(DEFAULT_MAX_MS),
        )
    }
}

impl ReconnectBackoff {
    /// Create a policy with the given bounds. `max` is clamped up to `min`.
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max: max.max(min),
            failures: 0,
        }
    }

    /// Record a failure and return the delay to sleep before the next attempt.
    ///
    /// Always in `[min, max]`, non-decreasing between resets, saturating at
    /// `max` after [`RAMP_STEPS`] consecutive failures.
    pub fn next_delay(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);

        let span_ms = (self.max - self.min).as_millis() as u64;
        let climbed = span_ms.saturating_mul(u64::from(self.failures.min(RAMP_STEPS)))
            / u64::from(RAMP_STEPS);
        let delay = self.min + Duration::from_millis(climbed);
        delay.min(self.max)
    }

    /// Clear the failure count; the next delay starts from `min` again.
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    /// Consecutive failures since the last reset.
    pub fn failures(&self) -> u32 {
        self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_stay_within_bounds() {
        let mut backoff = ReconnectBackoff::default();
        let min = Duration::from_millis(DEFAULT_MIN_MS);
        let max = Duration::from_millis(DEFAULT_MAX_MS);

        for _ in 0..200 {
            let d = backoff.next_delay();
            assert!(d >= min, "delay {d:?} below min");
            assert!(d <= max, "delay {d:?} above max");
        }
    }

    #[test]
    fn delays_are_monotone_and_saturate() {
        let mut backoff = ReconnectBackoff::default();
        let mut last = Duration::ZERO;
        for _ in 0..150 {
            let d = backoff.next_delay();
            assert!(d >= last, "sequence must be non-decreasing");
            last = d;
        }
        assert_eq!(last, Duration::from_millis(DEFAULT_MAX_MS));
    }

    #[test]
    fn reset_returns_to_min() {
        let mut backoff = ReconnectBackoff::default();
        for _ in 0..50 {
            backoff.next_delay();
        }
        assert!(backoff.failures() > 0);

        backoff.reset();
        assert_eq!(backoff.failures(), 0);
        // First delay after reset is one step above min, still far below max.
        let first = backoff.next_delay();
        assert!(first < Duration::from_millis(DEFAULT_MAX_MS) / 2);
        assert!(first >= Duration::from_millis(DEFAULT_MIN_MS));
    }

    #[test]
    fn degenerate_equal_bounds() {
        let d = Duration::from_millis(250);
        let mut backoff = ReconnectBackoff::new(d, d);
        assert_eq!(backoff.next_delay(), d);
        assert_eq!(backoff.next_delay(), d);
    }

    #[test]
    fn max_below_min_is_clamped() {
        let mut backoff =
            ReconnectBackoff::new(Duration::from_millis(500), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
    }
}
