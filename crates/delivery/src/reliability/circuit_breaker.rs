//! Circuit breaker guarding the downstream endpoint

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::clock::Clock;
use crate::error::DeliveryError;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - all calls allowed
    Closed,

    /// Failure threshold exceeded - all calls rejected
    Open,

    /// Reset timeout elapsed - a single trial call is in flight
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Circuit breaker configuration
///
/// # State Machine
///
/// ```text
/// ┌─────────┐  failure threshold  ┌─────────┐  reset timeout  ┌──────────┐
/// │ Closed  │ ─────────────────► │  Open   │ ──────────────► │ HalfOpen │
/// └─────────┘                     └─────────┘                 └──────────┘
///      ▲                               ▲        trial failed       │
///      │                               └───────────────────────────┤
///      │                 trial succeeded                           │
///      └───────────────────────────────────────────────────────────┘
/// ```
///
/// # Example
///
/// ```
/// use herald_delivery::CircuitBreakerConfig;
/// use std::time::Duration;
///
/// let config = CircuitBreakerConfig::default()
///     .with_failure_threshold(3)
///     .with_reset_timeout(Duration::from_secs(30));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures required to open the circuit
    pub failure_threshold: u32,

    /// Time to wait before transitioning from open to half-open
    #[serde(with = "super::duration_millis")]
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new circuit breaker configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the failure threshold to open the circuit
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Set the reset timeout (time before trying again after opening)
    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }
}

/// Snapshot of the breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitStatus {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    /// Set while open; the first admission at or after this instant is the trial
    pub open_until: Option<Instant>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            open_until: None,
        }
    }
}

/// Process-wide circuit breaker
///
/// A single breaker covers the single downstream endpoint. All transitions
/// happen under one mutex, so admission and outcome recording are atomic
/// with respect to each other.
///
/// # Example
///
/// ```
/// use herald_delivery::{CircuitBreaker, CircuitBreakerConfig, SystemClock};
/// use std::sync::Arc;
///
/// let breaker = CircuitBreaker::new(CircuitBreakerConfig::default(), Arc::new(SystemClock));
///
/// match breaker.allow() {
///     Ok(permit) => {
///         let call_succeeded = true;
///         if call_succeeded {
///             permit.success();
///         } else {
///             permit.failure();
///         }
///     }
///     Err(_) => {
///         // Circuit is open, fail fast
///     }
/// };
/// ```
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerState::closed()),
            clock,
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Ask to make a call
    ///
    /// Returns a permit that must be resolved with the call's outcome.
    /// While open, fails with [`DeliveryError::CircuitOpen`] until the reset
    /// timeout elapses; the next caller then becomes the half-open trial and
    /// everyone else is rejected until that trial resolves.
    pub fn allow(&self) -> Result<CircuitPermit<'_>, DeliveryError> {
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed => Ok(CircuitPermit::new(self, false)),
            CircuitState::Open => {
                let now = self.clock.now();
                match inner.open_until {
                    Some(until) if now < until => Err(DeliveryError::CircuitOpen),
                    _ => {
                        inner.state = CircuitState::HalfOpen;
                        info!("Circuit breaker entering half-open state");
                        Ok(CircuitPermit::new(self, true))
                    }
                }
            }
            // Half-open only lasts while the single trial is outstanding
            CircuitState::HalfOpen => Err(DeliveryError::CircuitOpen),
        }
    }

    /// Record a successful call: closes the circuit and clears failures
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Closed {
            info!(previous = %inner.state, "Circuit breaker closed");
        }
        *inner = BreakerState::closed();
    }

    /// Record a failed call
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);

        let should_open = match inner.state {
            CircuitState::Closed => inner.consecutive_failures >= self.config.failure_threshold,
            CircuitState::HalfOpen => true,
            // Late outcome of a call admitted before the circuit opened
            CircuitState::Open => false,
        };

        if should_open {
            let until = self.clock.now() + self.config.reset_timeout;
            // Keep the open-state invariant even if the trial path reopened early
            inner.consecutive_failures = inner
                .consecutive_failures
                .max(self.config.failure_threshold);
            inner.state = CircuitState::Open;
            inner.open_until = Some(until);

            warn!(
                failures = inner.consecutive_failures,
                reset_timeout_ms = self.config.reset_timeout.as_millis() as u64,
                "Circuit breaker opened"
            );
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn status(&self) -> CircuitStatus {
        let inner = self.inner.lock();
        CircuitStatus {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            open_until: inner.open_until.filter(|_| inner.state == CircuitState::Open),
        }
    }

    /// Force the circuit closed
    pub fn reset(&self) {
        *self.inner.lock() = BreakerState::closed();
        info!("Circuit breaker manually reset");
    }
}

/// Permit that must be held during a protected call
///
/// Dropping a permit without resolving it counts as a failure: the call was
/// abandoned, and a half-open breaker must not wait forever for its trial.
#[must_use = "resolve the permit with success() or failure()"]
pub struct CircuitPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    resolved: bool,
}

impl<'a> CircuitPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, trial: bool) -> Self {
        Self {
            breaker,
            trial,
            resolved: false,
        }
    }

    /// Whether this call is the half-open trial
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    /// Report the call succeeded
    pub fn success(mut self) {
        self.resolved = true;
        self.breaker.record_success();
    }

    /// Report the call failed
    pub fn failure(mut self) {
        self.resolved = true;
        self.breaker.record_failure();
    }
}

impl Drop for CircuitPermit<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            self.breaker.record_failure();
        }
    }
}
