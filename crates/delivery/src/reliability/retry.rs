//! Retry policy for downstream calls

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::DeliveryError;

/// Upper bound on any single backoff delay
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Configuration for delivery retries
///
/// Exponential backoff, capped at [`MAX_BACKOFF`] by default. Jitter is off
/// unless configured, so delays are exact.
///
/// # Example
///
/// ```
/// use herald_delivery::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::exponential()
///     .with_max_attempts(4)
///     .with_initial_interval(Duration::from_secs(1));
///
/// assert_eq!(policy.delay_for_attempt(1), Duration::ZERO);
/// assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(1));
/// assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(2));
/// assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(4));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including initial)
    pub max_attempts: u32,

    /// Delay before the first retry
    #[serde(with = "super::duration_millis")]
    pub initial_interval: Duration,

    /// Maximum delay between retries
    #[serde(with = "super::duration_millis")]
    pub max_interval: Duration,

    /// Backoff multiplier (e.g., 2.0 for exponential)
    pub backoff_coefficient: f64,

    /// Jitter factor (0.0-1.0) to add randomness
    ///
    /// A value of 0.1 means ±10% randomness.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

impl RetryPolicy {
    /// Exponential backoff with the relay defaults
    ///
    /// - 3 max attempts
    /// - 1 second initial interval
    /// - 30 second max interval
    /// - 2x backoff coefficient
    /// - no jitter
    pub fn exponential() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: Duration::from_secs(1),
            max_interval: MAX_BACKOFF,
            backoff_coefficient: 2.0,
            jitter: 0.0,
        }
    }

    /// Create a policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_interval: Duration::ZERO,
            max_interval: Duration::ZERO,
            backoff_coefficient: 1.0,
            jitter: 0.0,
        }
    }

    /// Set the maximum number of attempts
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set the initial retry interval
    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    /// Set the maximum retry interval
    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    /// Set the jitter factor (0.0-1.0)
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before retry number `retry` (1-based)
    ///
    /// `min(initial * coefficient^(retry-1), max_interval)`, before jitter.
    pub fn backoff(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(retry - 1).unwrap_or(i32::MAX);
        let base = self.initial_interval.as_secs_f64() * self.backoff_coefficient.powi(exponent);
        let capped = base.min(self.max_interval.as_secs_f64());

        let jittered = if self.jitter > 0.0 && capped > 0.0 {
            let mut rng = rand::thread_rng();
            let jitter_range = capped * self.jitter;
            let jitter_offset = rng.gen_range(-jitter_range..jitter_range);
            (capped + jitter_offset).clamp(0.0, self.max_interval.as_secs_f64())
        } else {
            capped
        };

        Duration::from_secs_f64(jittered)
    }

    /// Delay to wait before attempt number `attempt` (1-based)
    ///
    /// The first attempt goes out immediately.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.backoff(attempt.saturating_sub(1))
    }

    /// Whether a failed attempt should be followed by another one
    pub fn should_retry(&self, error: &DeliveryError, attempt: u32) -> bool {
        error.is_retryable() && self.has_attempts_remaining(attempt)
    }

    /// Check if there are remaining attempts
    pub fn has_attempts_remaining(&self, current_attempt: u32) -> bool {
        current_attempt < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_defaults() {
        let policy = RetryPolicy::exponential();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_interval, Duration::from_secs(1));
        assert_eq!(policy.max_interval, Duration::from_secs(30));
        assert_eq!(policy.backoff_coefficient, 2.0);
    }

    #[test]
    fn test_no_retry() {
        let policy = RetryPolicy::no_retry();
        assert_eq!(policy.max_attempts, 1);
        assert!(!policy.has_attempts_remaining(1));
    }

    #[test]
    fn test_backoff_per_retry() {
        let policy = RetryPolicy::exponential();

        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.backoff(5), Duration::from_secs(16));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy::exponential();

        assert_eq!(policy.backoff(6), Duration::from_secs(30));
        assert_eq!(policy.backoff(40), Duration::from_secs(30));

        let slow = RetryPolicy::exponential().with_initial_interval(Duration::from_secs(10));
        assert_eq!(slow.backoff(3), Duration::from_secs(30));
    }

    #[test]
    fn test_delay_for_attempt() {
        let policy = RetryPolicy::exponential()
            .with_initial_interval(Duration::from_millis(500));

        // Attempt 1 (initial) has no delay
        assert_eq!(policy.delay_for_attempt(1), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(2000));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy::exponential().with_jitter(0.5);

        for _ in 0..100 {
            let delay = policy.backoff(2);
            assert!(delay >= Duration::from_secs(1));
            assert!(delay <= Duration::from_secs(3));
        }
        for _ in 0..100 {
            assert!(policy.backoff(10) <= MAX_BACKOFF);
        }
    }

    #[test]
    fn test_should_retry_classification() {
        let policy = RetryPolicy::exponential();

        let unavailable = DeliveryError::HttpStatus { status: 503, body: String::new() };
        let bad_request = DeliveryError::HttpStatus { status: 400, body: String::new() };

        assert!(policy.should_retry(&unavailable, 1));
        assert!(policy.should_retry(&unavailable, 2));
        assert!(!policy.should_retry(&unavailable, 3));
        assert!(!policy.should_retry(&bad_request, 1));
        assert!(policy.should_retry(&DeliveryError::Timeout(Duration::from_secs(1)), 1));
        assert!(!policy.should_retry(&DeliveryError::Unexpected("boom".into()), 1));
    }

    #[test]
    fn test_serialization() {
        let policy = RetryPolicy::exponential().with_max_attempts(10);

        let json = serde_json::to_string(&policy).unwrap();
        let parsed: RetryPolicy = serde_json::from_str(&json).unwrap();

        assert_eq!(policy, parsed);
    }
}
