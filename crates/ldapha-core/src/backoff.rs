//! Reconnection backoff controller.
//!
//! Holds the delay inserted before each reconnection attempt. Failures double
//! the delay up to the configured maximum; a successful reconnect resets it to
//! the minimum.

use std::time::Duration;

/// Default minimum backoff in seconds.
pub const DEFAULT_MIN_BACKOFF_SECS: u64 = 1;

/// Default initial backoff in seconds.
pub const DEFAULT_CURRENT_BACKOFF_SECS: u64 = 1;

/// Default maximum backoff in seconds.
pub const DEFAULT_MAX_BACKOFF_SECS: u64 = 32;

/// Exponential backoff state.
///
/// Invariant: `min <= current <= max` after construction and after every
/// adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    min: Duration,
    current: Duration,
    max: Duration,
}

impl Backoff {
    /// Create a backoff controller, clamping `current` into `[min, max]`.
    ///
    /// If `min > max` the bounds are swapped.
    #[must_use]
    pub fn new(min: Duration, current: Duration, max: Duration) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        Self {
            min,
            current: current.clamp(min, max),
            max,
        }
    }

    /// Delay to wait before the next reconnection attempt.
    #[must_use]
    pub const fn current(&self) -> Duration {
        self.current
    }

    /// Lower bound.
    #[must_use]
    pub const fn min(&self) -> Duration {
        self.min
    }

    /// Upper bound.
    #[must_use]
    pub const fn max(&self) -> Duration {
        self.max
    }

    /// Record a failure: double the delay (capped at `max`) and return it.
    pub fn next_delay(&mut self) -> Duration {
        self.current = self.current.saturating_mul(2).clamp(self.min, self.max);
        self.current
    }

    /// Record a success: reset the delay to `min`.
    pub fn reset_delay(&mut self) {
        self.current = self.min;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(DEFAULT_MIN_BACKOFF_SECS),
            Duration::from_secs(DEFAULT_CURRENT_BACKOFF_SECS),
            Duration::from_secs(DEFAULT_MAX_BACKOFF_SECS),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let backoff = Backoff::default();
        assert_eq!(backoff.min(), Duration::from_secs(1));
        assert_eq!(backoff.current(), Duration::from_secs(1));
        assert_eq!(backoff.max(), Duration::from_secs(32));
    }

    #[test]
    fn test_doubles_until_capped() {
        let mut backoff = Backoff::default();

        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(), Duration::from_secs(4));
        assert_eq!(backoff.next_delay(), Duration::from_secs(8));
        assert_eq!(backoff.next_delay(), Duration::from_secs(16));
        assert_eq!(backoff.next_delay(), Duration::from_secs(32));

        // Capped
        assert_eq!(backoff.next_delay(), Duration::from_secs(32));
        assert_eq!(backoff.next_delay(), Duration::from_secs(32));
    }

    #[test]
    fn test_reset_returns_to_min() {
        let mut backoff = Backoff::new(
            Duration::from_millis(100),
            Duration::from_millis(800),
            Duration::from_secs(5),
        );
        backoff.next_delay();
        assert_eq!(backoff.current(), Duration::from_millis(1600));

        backoff.reset_delay();
        assert_eq!(backoff.current(), Duration::from_millis(100));
    }

    #[test]
    fn test_constructor_enforces_bounds() {
        let backoff = Backoff::new(
            Duration::from_secs(2),
            Duration::from_secs(60),
            Duration::from_secs(10),
        );
        assert_eq!(backoff.current(), Duration::from_secs(10));

        let swapped = Backoff::new(
            Duration::from_secs(10),
            Duration::from_secs(1),
            Duration::from_secs(2),
        );
        assert_eq!(swapped.min(), Duration::from_secs(2));
        assert_eq!(swapped.max(), Duration::from_secs(10));
        assert_eq!(swapped.current(), Duration::from_secs(2));
    }

    #[test]
    fn test_zero_min_still_grows_from_current() {
        let mut backoff = Backoff::new(
            Duration::ZERO,
            Duration::from_millis(10),
            Duration::from_millis(50),
        );
        assert_eq!(backoff.next_delay(), Duration::from_millis(20));
        assert_eq!(backoff.next_delay(), Duration::from_millis(40));
        assert_eq!(backoff.next_delay(), Duration::from_millis(50));
        backoff.reset_delay();
        assert_eq!(backoff.current(), Duration::ZERO);
    }
}
