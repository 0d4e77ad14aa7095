//! Reliability patterns for event delivery
//!
//! This module provides:
//! - [`RateLimiter`] - Per-key fixed-window admission
//! - [`CircuitBreaker`] - Process-wide failure gate
//! - [`RetryPolicy`] - Capped exponential backoff

mod circuit_breaker;
mod rate_limiter;
mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitPermit, CircuitState, CircuitStatus,
};
pub use rate_limiter::{RateLimitConfig, RateLimitWindow, RateLimiter, RateLimiterStats};
pub use retry::{RetryPolicy, MAX_BACKOFF};

/// Serde support for Duration as milliseconds
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        // u64 keeps the wire format within JSON's integer range
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
