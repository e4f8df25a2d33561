//! # Exponential Backoff
//!
//! Retry delays for failed reconciliations.
//!
//! Every failed cycle doubles the delay before the next attempt, starting at `start`
//! and capped at `max`. A successful cycle resets it, so the next failure starts again
//! from `start`.
//!
//! ## Usage
//!
//! ```rust
//! use node_ip_webhook::controller::backoff::ExponentialBackoff;
//! use std::time::Duration;
//!
//! let mut backoff = ExponentialBackoff::new(Duration::from_millis(5), Duration::from_secs(1));
//! assert_eq!(backoff.next_backoff(), Duration::from_millis(5));
//! assert_eq!(backoff.next_backoff(), Duration::from_millis(10));
//! assert_eq!(backoff.next_backoff(), Duration::from_millis(20));
//! ```

use std::time::Duration;

/// Exponential backoff calculator
///
/// Each call to [`ExponentialBackoff::next_backoff`] returns the current delay and
/// doubles it for the next call, never exceeding `max`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// First delay (for reset)
    start: Duration,
    /// Delay returned by the next call
    current: Duration,
    /// Upper bound
    max: Duration,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff between `start` and `max`
    #[must_use]
    pub fn new(start: Duration, max: Duration) -> Self {
        Self {
            start,
            current: start.min(max),
            max,
        }
    }

    /// Get the next backoff duration and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        result
    }

    /// Reset the backoff to the initial state
    pub fn reset(&mut self) {
        self.current = self.start.min(self.max);
    }
}
