//! Time source for the pipeline
//!
//! Rate-limit windows, breaker timeouts and retry delays all read time
//! through [`Clock`]. Production code uses [`SystemClock`]; tests use
//! [`ManualClock`] and move time forward explicitly.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Clock abstraction for time operations
#[async_trait]
pub trait Clock: Send + Sync + Debug {
    /// Monotonic time, used for windows and timeouts
    fn now(&self) -> Instant;

    /// Wall-clock time, used for timestamps in metrics and health output
    fn now_utc(&self) -> DateTime<Utc>;

    /// Suspend the current task for `duration`
    async fn sleep(&self, duration: Duration);
}

/// Real clock backed by the OS and tokio timers
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Manually driven clock for deterministic tests
///
/// Time only moves on [`advance`](Self::advance) or [`sleep`](Clock::sleep).
/// Sleeping returns immediately after advancing the clock and records the
/// requested duration, so retry backoff can be asserted without waiting.
#[derive(Debug, Clone)]
pub struct ManualClock {
    base: Instant,
    base_utc: DateTime<Utc>,
    offset: Arc<Mutex<Duration>>,
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            base_utc: Utc::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
            sleeps: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Move time forward
    pub fn advance(&self, duration: Duration) {
        *self.offset.lock() += duration;
    }

    /// Total time elapsed since the clock was created
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock()
    }

    /// Every duration passed to `sleep`, in call order
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        let offset = *self.offset.lock();
        self.base_utc + chrono::Duration::from_std(offset).unwrap_or(chrono::TimeDelta::MAX)
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
        self.advance(duration);
    }
}
