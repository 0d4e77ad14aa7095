//! Fixed-window rate limiter keyed by routing key and event type

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::event::EventType;

/// Rate limiter configuration
///
/// # Example
///
/// ```
/// use herald_delivery::RateLimitConfig;
/// use std::time::Duration;
///
/// let config = RateLimitConfig::default()
///     .with_max_events_per_window(20)
///     .with_window(Duration::from_secs(10));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Events admitted per key within one window
    pub max_events_per_window: u32,

    /// Window length; also the sweep period
    #[serde(with = "super::duration_millis")]
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_events_per_window: 100,
            window: Duration::from_secs(60),
        }
    }
}

impl RateLimitConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set how many events a key may send per window
    pub fn with_max_events_per_window(mut self, max: u32) -> Self {
        self.max_events_per_window = max;
        self
    }

    /// Set the window length
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }
}

/// Counting window for one `routing_key:event_type` key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitWindow {
    pub count: u32,
    pub reset_at: Instant,
}

impl RateLimitWindow {
    fn fresh(reset_at: Instant) -> Self {
        Self { count: 0, reset_at }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now >= self.reset_at
    }
}

/// Point-in-time view of the limiter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimiterStats {
    /// Windows currently held in memory, expired or not
    pub total_keys: usize,
    /// Events admitted across all unexpired windows
    pub active_requests: u64,
}

/// Per-key admission gate
///
/// Each `(routing_key, event_type)` pair gets its own window that resets
/// entirely once it elapses. Windows are created lazily and dropped by
/// [`sweep`](Self::sweep), so memory stays bounded by the number of keys
/// active within one window. Denials are silent to the caller; the limiter
/// only logs them.
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: DashMap<String, RateLimitWindow>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            windows: DashMap::new(),
            clock,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Admit or deny one event for the key
    ///
    /// Admission increments the window count; a denial leaves it untouched.
    pub fn admit(&self, routing_key: &str, event_type: EventType) -> bool {
        let now = self.clock.now();
        let reset_at = now + self.config.window;

        let mut window = self
            .windows
            .entry(window_key(routing_key, event_type))
            .or_insert_with(|| RateLimitWindow::fresh(reset_at));

        if window.is_expired(now) {
            *window = RateLimitWindow::fresh(reset_at);
        }

        if window.count >= self.config.max_events_per_window {
            warn!(
                routing_key = %routing_key,
                event_type = %event_type,
                current_count = window.count,
                max_events = self.config.max_events_per_window,
                resets_in_ms = window.reset_at.saturating_duration_since(now).as_millis() as u64,
                "Rate limit exceeded"
            );
            return false;
        }

        window.count += 1;
        true
    }

    /// Events the key may still send in its current window
    pub fn remaining(&self, routing_key: &str, event_type: EventType) -> u32 {
        let now = self.clock.now();
        match self.windows.get(&window_key(routing_key, event_type)) {
            Some(window) if !window.is_expired(now) => self
                .config
                .max_events_per_window
                .saturating_sub(window.count),
            _ => self.config.max_events_per_window,
        }
    }

    /// When the key's active window resets, if it has one
    pub fn reset_at(&self, routing_key: &str, event_type: EventType) -> Option<Instant> {
        let now = self.clock.now();
        self.windows
            .get(&window_key(routing_key, event_type))
            .filter(|window| !window.is_expired(now))
            .map(|window| window.reset_at)
    }

    pub fn stats(&self) -> RateLimiterStats {
        let now = self.clock.now();
        let mut stats = RateLimiterStats {
            total_keys: 0,
            active_requests: 0,
        };

        for window in self.windows.iter() {
            stats.total_keys += 1;
            if !window.is_expired(now) {
                stats.active_requests += u64::from(window.count);
            }
        }

        stats
    }

    /// Drop every expired window, returning how many were removed
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let before = self.windows.len();
        self.windows.retain(|_, window| !window.is_expired(now));
        let removed = before.saturating_sub(self.windows.len());

        if removed > 0 {
            debug!(removed, remaining = self.windows.len(), "Swept expired rate limit windows");
        }

        removed
    }
}

fn window_key(routing_key: &str, event_type: EventType) -> String {
    format!("{routing_key}:{event_type}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn limiter(max: u32, window_secs: u64) -> (RateLimiter, ManualClock) {
        let clock = ManualClock::new();
        let config = RateLimitConfig::new()
            .with_max_events_per_window(max)
            .with_window(Duration::from_secs(window_secs));
        (RateLimiter::new(config, Arc::new(clock.clone())), clock)
    }

    #[test]
    fn test_default_config() {
        let config = RateLimitConfig::default();
        assert_eq!(config.max_events_per_window, 100);
        assert_eq!(config.window, Duration::from_secs(60));
    }

    #[test]
    fn test_denies_after_max_events() {
        let (limiter, _clock) = limiter(5, 60);

        for _ in 0..5 {
            assert!(limiter.admit("C1", EventType::MessageCreate));
        }
        assert!(!limiter.admit("C1", EventType::MessageCreate));
        assert_eq!(limiter.remaining("C1", EventType::MessageCreate), 0);
    }

    #[test]
    fn test_keys_are_independent() {
        let (limiter, _clock) = limiter(1, 60);

        assert!(limiter.admit("C1", EventType::MessageCreate));
        assert!(!limiter.admit("C1", EventType::MessageCreate));

        // Same channel, different type; same type, different channel
        assert!(limiter.admit("C1", EventType::MessageDelete));
        assert!(limiter.admit("C2", EventType::MessageCreate));
    }

    #[test]
    fn test_window_resets_after_duration() {
        let (limiter, clock) = limiter(2, 60);

        assert!(limiter.admit("C1", EventType::MessageUpdate));
        assert!(limiter.admit("C1", EventType::MessageUpdate));
        assert!(!limiter.admit("C1", EventType::MessageUpdate));

        clock.advance(Duration::from_secs(59));
        assert!(!limiter.admit("C1", EventType::MessageUpdate));

        clock.advance(Duration::from_secs(1));
        assert!(limiter.admit("C1", EventType::MessageUpdate));
        assert_eq!(limiter.remaining("C1", EventType::MessageUpdate), 1);
    }

    #[test]
    fn test_remaining_and_reset_at_without_window() {
        let (limiter, clock) = limiter(10, 60);

        assert_eq!(limiter.remaining("C1", EventType::ThreadCreate), 10);
        assert!(limiter.reset_at("C1", EventType::ThreadCreate).is_none());

        limiter.admit("C1", EventType::ThreadCreate);
        assert_eq!(limiter.remaining("C1", EventType::ThreadCreate), 9);
        assert_eq!(
            limiter.reset_at("C1", EventType::ThreadCreate),
            Some(clock.now() + Duration::from_secs(60))
        );

        clock.advance(Duration::from_secs(61));
        assert_eq!(limiter.remaining("C1", EventType::ThreadCreate), 10);
        assert!(limiter.reset_at("C1", EventType::ThreadCreate).is_none());
    }

    #[test]
    fn test_sweep_removes_only_expired_windows() {
        let (limiter, clock) = limiter(10, 60);

        limiter.admit("C1", EventType::MessageCreate);
        limiter.admit("C1", EventType::MessageCreate);
        clock.advance(Duration::from_secs(30));
        limiter.admit("C2", EventType::MessageCreate);

        assert_eq!(limiter.sweep(), 0);
        assert_eq!(limiter.stats().total_keys, 2);
        assert_eq!(limiter.stats().active_requests, 3);

        clock.advance(Duration::from_secs(30));
        assert_eq!(limiter.stats().active_requests, 1);
        assert_eq!(limiter.sweep(), 1);

        let stats = limiter.stats();
        assert_eq!(stats.total_keys, 1);
        assert_eq!(stats.active_requests, 1);
    }
}
