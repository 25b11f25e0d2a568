//! # Exponential Backoff
//!
//! Doubling backoff between "permission effective" probes while a pull grant
//! propagates.
//!
//! ## Usage
//!
//! ```rust
//! use deploy_reconciler::controller::backoff::ExponentialBackoff;
//! use std::time::Duration;
//!
//! let mut backoff = ExponentialBackoff::new(Duration::from_secs(2), Duration::from_secs(10));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(2));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(4));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(8));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(10));
//! ```

use std::time::Duration;

/// Exponential backoff calculator
///
/// Each call returns the current delay and doubles it for the next call, capped at
/// the maximum.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// First delay (for reset)
    start: Duration,
    /// Delay returned by the next call
    current: Duration,
    /// Upper bound on any delay
    max: Duration,
}

impl ExponentialBackoff {
    /// Create a backoff starting at `start` and capped at `max`
    ///
    /// A `start` above `max` is clamped to `max`.
    ///
    /// # Example
    ///
    /// ```
    /// use deploy_reconciler::controller::backoff::ExponentialBackoff;
    /// use std::time::Duration;
    ///
    /// let backoff = ExponentialBackoff::new(Duration::from_millis(500), Duration::from_secs(8));
    /// ```
    #[must_use]
    pub fn new(start: Duration, max: Duration) -> Self {
        let start = start.min(max);
        Self {
            start,
            current: start,
            max,
        }
    }

    /// Get the next delay and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        result
    }

    /// Reset the backoff to the initial state
    ///
    /// # Example
    ///
    /// ```
    /// use deploy_reconciler::controller::backoff::ExponentialBackoff;
    /// use std::time::Duration;
    ///
    /// let mut backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(60));
    /// backoff.next_backoff();
    /// backoff.next_backoff();
    /// backoff.reset();
    /// assert_eq!(backoff.next_backoff(), Duration::from_secs(1));
    /// ```
    pub fn reset(&mut self) {
        self.current = self.start;
    }
}
