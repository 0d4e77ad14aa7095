//! Periodic background jobs
//!
//! Each job runs on its own tokio task and stops when [`BackgroundTasks::shutdown`]
//! flips the shared watch channel.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::metrics::MetricsCollector;
use crate::reliability::RateLimiter;

/// Default period of the metrics summary log
pub const DEFAULT_SUMMARY_INTERVAL: Duration = Duration::from_secs(300);

/// Shortest period a job may run at; tokio intervals reject zero
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Owner of the pipeline's timers
pub struct BackgroundTasks {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl Default for BackgroundTasks {
    fn default() -> Self {
        Self::new()
    }
}

impl BackgroundTasks {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            handles: Vec::new(),
        }
    }

    /// Run `job` every `period`, first after one full period
    ///
    /// Periods shorter than a millisecond are raised to one millisecond.
    pub fn spawn_interval<F>(&mut self, name: &'static str, period: Duration, mut job: F)
    where
        F: FnMut() + Send + 'static,
    {
        let period = period.max(MIN_PERIOD);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        debug!(task = name, "Background task shutting down");
                        break;
                    }
                    _ = ticker.tick() => job(),
                }
            }
        });

        debug!(task = name, period_ms = period.as_millis() as u64, "Background task started");
        self.handles.push((name, handle));
    }

    /// Drop expired rate-limit windows once per window length
    pub fn spawn_rate_limit_sweep(&mut self, rate_limiter: Arc<RateLimiter>) {
        let period = rate_limiter.config().window;
        self.spawn_interval("rate_limit_sweep", period, move || {
            rate_limiter.sweep();
        });
    }

    /// Log a metrics summary every `period`
    pub fn spawn_metrics_summary(&mut self, metrics: Arc<MetricsCollector>, period: Duration) {
        self.spawn_interval("metrics_summary", period, move || metrics.log_summary());
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Stop every job and wait for it to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);

        for (name, handle) in self.handles {
            if let Err(e) = handle.await {
                warn!(task = name, error = %e, "Background task ended abnormally");
            }
        }

        info!("Background tasks stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::event::EventType;
    use crate::reliability::RateLimitConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_interval_runs_until_shutdown() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let mut tasks = BackgroundTasks::new();

        let counter = ticks.clone();
        tasks.spawn_interval("counter", Duration::from_millis(100), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(tasks.len(), 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(300)).await;
        let before_shutdown = ticks.load(Ordering::SeqCst);
        assert!((3..=4).contains(&before_shutdown));

        tasks.shutdown().await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), before_shutdown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_period_is_clamped() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let mut tasks = BackgroundTasks::new();

        let counter = ticks.clone();
        tasks.spawn_interval("zero", Duration::ZERO, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        let seen = ticks.load(Ordering::SeqCst);
        assert!((1..=10).contains(&seen), "{seen}");

        // Task must still be alive to observe shutdown
        tasks.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_metrics_interval_does_not_panic() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());
        let metrics = Arc::new(MetricsCollector::new(clock));

        let mut tasks = BackgroundTasks::new();
        tasks.spawn_metrics_summary(metrics, Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(5)).await;

        let finished: Vec<_> = tasks.handles.iter().map(|(_, h)| h.is_finished()).collect();
        assert_eq!(finished, vec![false]);
        tasks.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_task_removes_expired_windows() {
        let clock = ManualClock::new();
        let limiter = Arc::new(RateLimiter::new(
            RateLimitConfig::default().with_window(Duration::from_secs(1)),
            Arc::new(clock.clone()) as Arc<dyn Clock>,
        ));
        assert!(limiter.admit("C1", EventType::MessageCreate));
        assert_eq!(limiter.stats().total_keys, 1);

        let mut tasks = BackgroundTasks::new();
        tasks.spawn_rate_limit_sweep(limiter.clone());

        clock.advance(Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(limiter.stats().total_keys, 0);
        tasks.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_without_tasks() {
        let tasks = BackgroundTasks::default();
        assert!(tasks.is_empty());
        tasks.shutdown().await;
    }
}
