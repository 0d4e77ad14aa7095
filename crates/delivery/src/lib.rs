// Herald Delivery Pipeline
//
// Forwards upstream chat events to one downstream HTTP tool endpoint.
//
// ```text
// Event ──► RateLimiter ──► enabled? ──► CircuitBreaker ──► POST (retry/backoff)
//              │ deny           │ no          │ open              │
//              ▼                ▼             ▼                   ▼
//          Denied(RateLimited) Denied(Disabled) Denied(CircuitOpen) Sent / Failed
//                                                                  │
//                                                     MetricsCollector
// ```
//
// Key design decisions:
// - Denied events are dropped, never queued
// - One circuit breaker for the whole process (single downstream)
// - All time goes through the Clock trait so tests never sleep
// - Background timers live in BackgroundTasks and stop on shutdown

pub mod client;
pub mod clock;
pub mod error;
pub mod event;
pub mod metrics;
pub mod reliability;
pub mod tasks;

pub use client::{DeliveryClient, DeliveryConfig, DeliveryOutcome, DenyReason, USER_AGENT};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{DeliveryError, Result};
pub use event::{Event, EventType, UnknownEventType};
pub use metrics::{ApiError, ApiMetrics, EventMetrics, MetricsCollector, OverallStats};
pub use reliability::{
    CircuitBreaker, CircuitBreakerConfig, CircuitPermit, CircuitState, CircuitStatus,
    RateLimitConfig, RateLimitWindow, RateLimiter, RateLimiterStats, RetryPolicy, MAX_BACKOFF,
};
pub use tasks::BackgroundTasks;
