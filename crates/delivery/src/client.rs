//! HTTP delivery of events to the downstream tool endpoint
//!
//! Every event passes the same gates in order: the per-key rate limiter, the
//! enabled check, then the circuit breaker. Admitted events are wrapped in a
//! JSON-RPC `tools/call` envelope and POSTed with retries. The outcome is
//! recorded in the metrics and returned; nothing is propagated as an error.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{DeliveryError, Result};
use crate::event::Event;
use crate::metrics::MetricsCollector;
use crate::reliability::{
    CircuitBreaker, CircuitBreakerConfig, RateLimitConfig, RateLimiter, RetryPolicy,
};

/// Default total timeout for one HTTP attempt
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// User agent sent with every request
pub const USER_AGENT: &str = concat!("herald-relay/", env!("CARGO_PKG_VERSION"));

const JSONRPC_VERSION: &str = "2.0";
const RPC_METHOD: &str = "tools/call";
const TOOL_NAME: &str = "DISCORD_WEBHOOK";

/// Longest response body kept in an error, in characters
const MAX_ERROR_BODY: usize = 1024;

const API_KEY_HEADER: HeaderName = HeaderName::from_static("x-api-key");
const WEBHOOK_SECRET_HEADER: HeaderName = HeaderName::from_static("x-webhook-secret");

/// Configuration for the delivery client
///
/// Secrets are never serialized.
///
/// # Example
///
/// ```
/// use herald_delivery::{DeliveryConfig, RetryPolicy};
/// use std::time::Duration;
///
/// let config = DeliveryConfig::new("https://tools.example.com/rpc")
///     .with_request_timeout(Duration::from_secs(10))
///     .with_retry(RetryPolicy::exponential().with_max_attempts(5))
///     .with_api_key("secret");
///
/// assert!(config.is_enabled());
/// assert!(!DeliveryConfig::disabled().is_enabled());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Downstream URL; delivery is disabled when unset
    pub endpoint: Option<String>,

    /// Total timeout for a single attempt
    #[serde(with = "crate::reliability::duration_millis")]
    pub request_timeout: Duration,

    pub retry: RetryPolicy,

    /// Reuse pooled connections between requests
    pub keep_alive: bool,

    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing)]
    pub webhook_secret: Option<String>,

    pub user_agent: String,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retry: RetryPolicy::exponential(),
            keep_alive: true,
            api_key: None,
            webhook_secret: None,
            user_agent: USER_AGENT.to_string(),
        }
    }
}

impl DeliveryConfig {
    /// Create a configuration delivering to `endpoint`
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            ..Self::default()
        }
    }

    /// Create a configuration with no downstream
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_webhook_secret(mut self, secret: impl Into<String>) -> Self {
        self.webhook_secret = Some(secret.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Whether a downstream endpoint is configured
    pub fn is_enabled(&self) -> bool {
        self.endpoint.is_some()
    }
}

/// Why an event was not attempted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    RateLimited,
    /// No downstream endpoint is configured
    Disabled,
    CircuitOpen,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimited => write!(f, "rate-limited"),
            Self::Disabled => write!(f, "disabled"),
            Self::CircuitOpen => write!(f, "circuit-open"),
        }
    }
}

/// Result of handing one event to the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Downstream accepted the event
    Sent { attempts: u32 },
    /// Dropped before any I/O
    Denied(DenyReason),
    /// Every allowed attempt failed; carries the last error
    Failed(DeliveryError),
}

impl DeliveryOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent { .. })
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    jsonrpc: &'static str,
    method: &'static str,
    params: EnvelopeParams<'a>,
    id: i64,
}

#[derive(Serialize)]
struct EnvelopeParams<'a> {
    name: &'static str,
    arguments: &'a Event,
}

/// Resilient event delivery client
///
/// The rate limiter, breaker and metrics are shared handles so that
/// background tasks and the health surface can observe the same state.
pub struct DeliveryClient {
    http: reqwest::Client,
    config: DeliveryConfig,
    rate_limiter: Arc<RateLimiter>,
    circuit_breaker: Arc<CircuitBreaker>,
    metrics: Arc<MetricsCollector>,
    clock: Arc<dyn Clock>,
    last_request_id: AtomicI64,
}

impl DeliveryClient {
    /// Create a client with default rate limiting and breaker settings
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` if the endpoint is not a valid
    /// URL or the HTTP client cannot be built.
    pub fn new(config: DeliveryConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let rate_limiter = Arc::new(RateLimiter::new(RateLimitConfig::default(), clock.clone()));
        let circuit_breaker = Arc::new(CircuitBreaker::new(
            CircuitBreakerConfig::default(),
            clock.clone(),
        ));
        let metrics = Arc::new(MetricsCollector::new(clock.clone()));

        Self::from_parts(config, rate_limiter, circuit_breaker, metrics, clock)
    }

    /// Create a client around existing state
    pub fn from_parts(
        config: DeliveryConfig,
        rate_limiter: Arc<RateLimiter>,
        circuit_breaker: Arc<CircuitBreaker>,
        metrics: Arc<MetricsCollector>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        if let Some(endpoint) = &config.endpoint {
            let url = reqwest::Url::parse(endpoint).map_err(|e| {
                DeliveryError::configuration(format!("invalid endpoint {endpoint:?}: {e}"))
            })?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(DeliveryError::configuration(format!(
                    "endpoint must use http or https, got {}",
                    url.scheme()
                )));
            }
        }

        let http = build_http_client(&config)?;

        Ok(Self {
            http,
            config,
            rate_limiter,
            circuit_breaker,
            metrics,
            clock,
            last_request_id: AtomicI64::new(0),
        })
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.is_enabled()
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.circuit_breaker
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// Deliver one event
    ///
    /// Never fails: rejections and downstream errors are reported through
    /// the returned [`DeliveryOutcome`] and recorded in the metrics.
    pub async fn deliver(&self, event: &Event) -> DeliveryOutcome {
        let event_type = event.event_type;

        if !self.rate_limiter.admit(&event.routing_key, event_type) {
            self.metrics.record_event_error(event_type);
            return DeliveryOutcome::Denied(DenyReason::RateLimited);
        }

        let Some(endpoint) = self.config.endpoint.as_deref() else {
            debug!(event_type = %event_type, "Delivery disabled, skipping event");
            return DeliveryOutcome::Denied(DenyReason::Disabled);
        };

        let permit = match self.circuit_breaker.allow() {
            Ok(permit) => permit,
            Err(_) => {
                self.metrics.record_event_error(event_type);
                warn!(event_type = %event_type, "Circuit breaker open, dropping event");
                return DeliveryOutcome::Denied(DenyReason::CircuitOpen);
            }
        };

        let span = info_span!(
            "event_delivery",
            delivery_id = %Uuid::now_v7(),
            event_type = %event_type,
            routing_key = %event.routing_key,
            trial = permit.is_trial(),
        );

        async move {
            debug!(event = ?event, "Delivering event");

            let started = self.clock.now();
            let max_attempts = self.config.retry.max_attempts;
            let mut attempt = 0;

            let result = loop {
                attempt += 1;

                let delay = self.config.retry.delay_for_attempt(attempt);
                if !delay.is_zero() {
                    debug!(attempt, delay_ms = delay.as_millis() as u64, "Backing off before retry");
                    self.clock.sleep(delay).await;
                }

                match self.send_once(endpoint, event).await {
                    Ok(()) => break Ok(()),
                    Err(err) if self.config.retry.should_retry(&err, attempt) => {
                        warn!(attempt, max_attempts, error = %err, "Delivery attempt failed, retrying");
                    }
                    Err(err) => break Err(err),
                }
            };

            let latency = self.clock.now().saturating_duration_since(started);

            match result {
                Ok(()) => {
                    self.metrics.record_event(event_type, latency);
                    self.metrics.record_delivery(true, latency, None, None);
                    permit.success();

                    info!(attempts = attempt, latency_ms = latency.as_millis() as u64, "Event delivered");
                    DeliveryOutcome::Sent { attempts: attempt }
                }
                Err(err) => {
                    self.metrics.record_delivery(
                        false,
                        latency,
                        Some(&err.to_string()),
                        err.status_code(),
                    );
                    self.metrics.record_event_error(event_type);
                    permit.failure();

                    error!(attempts = attempt, error = %err, "Event delivery failed");
                    DeliveryOutcome::Failed(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn send_once(&self, endpoint: &str, event: &Event) -> Result<()> {
        let envelope = Envelope {
            jsonrpc: JSONRPC_VERSION,
            method: RPC_METHOD,
            params: EnvelopeParams {
                name: TOOL_NAME,
                arguments: event,
            },
            id: self.next_request_id(),
        };

        let body = serde_json::to_vec(&envelope)
            .map_err(|e| DeliveryError::unexpected(format!("failed to encode envelope: {e}")))?;

        let response = self
            .http
            .post(endpoint)
            .body(body)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        debug!(status = status.as_u16(), request_id = envelope.id, "Received response");

        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(DeliveryError::HttpStatus {
            status: status.as_u16(),
            body: body.chars().take(MAX_ERROR_BODY).collect(),
        })
    }

    fn classify(&self, e: reqwest::Error) -> DeliveryError {
        if e.is_builder() || e.is_decode() {
            DeliveryError::unexpected(e.to_string())
        } else if e.is_timeout() {
            DeliveryError::Timeout(self.config.request_timeout)
        } else if e.is_connect() {
            DeliveryError::network(format!("connection failed: {e}"))
        } else {
            DeliveryError::network(e.to_string())
        }
    }

    /// Epoch milliseconds, bumped past the previous id when the clock has
    /// not moved
    fn next_request_id(&self) -> i64 {
        let now = self.clock.now_utc().timestamp_millis();
        let previous = self
            .last_request_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |prev| {
                Some(now.max(prev + 1))
            })
            .unwrap_or_else(|prev| prev);
        now.max(previous + 1)
    }
}

fn build_http_client(config: &DeliveryConfig) -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("application/json, text/event-stream"),
    );

    if let Some(api_key) = &config.api_key {
        headers.insert(API_KEY_HEADER, secret_header(api_key, "API key")?);
    }
    if let Some(secret) = &config.webhook_secret {
        headers.insert(WEBHOOK_SECRET_HEADER, secret_header(secret, "webhook secret")?);
    }

    let mut builder = reqwest::Client::builder()
        .timeout(config.request_timeout)
        .user_agent(&config.user_agent)
        .default_headers(headers);

    if !config.keep_alive {
        builder = builder.pool_max_idle_per_host(0);
    }

    builder
        .build()
        .map_err(|e| DeliveryError::configuration(format!("failed to build HTTP client: {e}")))
}

fn secret_header(value: &str, what: &str) -> Result<HeaderValue> {
    let mut header = HeaderValue::from_str(value)
        .map_err(|_| DeliveryError::configuration(format!("{what} is not a valid header value")))?;
    header.set_sensitive(true);
    Ok(header)
}
