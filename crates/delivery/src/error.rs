//! Error taxonomy for the delivery pipeline
//!
//! None of these escape [`DeliveryClient::deliver`](crate::DeliveryClient::deliver);
//! they end up inside a [`DeliveryOutcome`](crate::DeliveryOutcome) and in
//! the metrics error ring.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for delivery operations
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Errors that can occur while delivering an event
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// Rate limit exhausted for the event's key
    #[error("rate limited")]
    RateLimited,

    /// Circuit breaker rejected the call
    #[error("circuit breaker is open")]
    CircuitOpen,

    /// Connection could not be established or was dropped
    #[error("network error: {0}")]
    Network(String),

    /// No complete response within the request timeout
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Downstream answered with a non-success status
    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// Failure outside the HTTP exchange itself
    #[error("unexpected error: {0}")]
    Unexpected(String),

    /// HTTP client could not be built from the configuration
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl DeliveryError {
    /// Create a network error
    pub fn network(msg: impl Into<String>) -> Self {
        DeliveryError::Network(msg.into())
    }

    /// Create an unexpected error
    pub fn unexpected(msg: impl Into<String>) -> Self {
        DeliveryError::Unexpected(msg.into())
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        DeliveryError::Configuration(msg.into())
    }

    /// Whether another attempt could succeed
    ///
    /// Network failures, timeouts, 5xx, 429 and 408 are transient. Every
    /// other 4xx is the request's fault, and local rejections and
    /// unexpected errors will not change on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            DeliveryError::Network(_) | DeliveryError::Timeout(_) => true,
            DeliveryError::HttpStatus { status, .. } => is_retryable_status(*status),
            DeliveryError::RateLimited
            | DeliveryError::CircuitOpen
            | DeliveryError::Unexpected(_)
            | DeliveryError::Configuration(_) => false,
        }
    }

    /// HTTP status carried by the error, if any
    pub fn status_code(&self) -> Option<u16> {
        match self {
            DeliveryError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Status codes worth retrying
pub fn is_retryable_status(status: u16) -> bool {
    status >= 500 || status == 429 || status == 408
}
