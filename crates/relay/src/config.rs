// Relay configuration
//
// Loaded once at startup from environment variables. Every variable is
// optional; invalid values are collected and reported together.

use std::env;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::time::Duration;

use herald_delivery::{CircuitBreakerConfig, DeliveryConfig, RateLimitConfig, RetryPolicy};
use serde::Serialize;
use thiserror::Error;

/// One rejected variable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Every invalid variable found while loading
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid configuration ({} error(s)): {}", .errors.len(), join(.errors))]
pub struct ConfigError {
    pub errors: Vec<FieldError>,
}

fn join(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub colors: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            colors: true,
        }
    }
}

/// Full relay configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    /// Downstream endpoint; delivery is disabled when unset
    pub api_url: Option<String>,
    pub api_timeout: Duration,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    pub keep_alive: bool,
    pub api_key: Option<String>,
    pub webhook_secret: Option<String>,

    pub max_events_per_window: u32,
    pub rate_limit_window: Duration,

    pub health_enabled: bool,
    pub health_port: u16,

    pub logging: LoggingConfig,
    pub metrics_log_interval: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            api_timeout: Duration::from_millis(120_000),
            retry_attempts: 3,
            retry_delay: Duration::from_millis(1000),
            keep_alive: true,
            api_key: None,
            webhook_secret: None,
            max_events_per_window: 100,
            rate_limit_window: Duration::from_millis(60_000),
            health_enabled: true,
            health_port: 3000,
            logging: LoggingConfig::default(),
            metrics_log_interval: Duration::from_millis(300_000),
        }
    }
}

impl RelayConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `API_URL`: downstream endpoint, `http(s)://` (default: unset, delivery disabled)
    /// - `API_TIMEOUT`: per-attempt timeout in ms, 1000..=300000 (default: 120000)
    /// - `API_RETRY_ATTEMPTS`: attempts per event, 1..=10 (default: 3)
    /// - `API_RETRY_DELAY`: base backoff in ms, 100..=10000 (default: 1000)
    /// - `API_KEEP_ALIVE`: reuse connections (default: true)
    /// - `API_KEY`, `WEBHOOK_SECRET`: optional request headers
    /// - `MAX_EVENTS_PER_MINUTE`: events per key per window, 1..=10000 (default: 100)
    /// - `RATE_LIMIT_WINDOW_MS`: window length, 1000..=3600000 (default: 60000)
    /// - `HEALTH_CHECK_ENABLED`: serve health endpoints (default: true)
    /// - `HEALTH_CHECK_PORT`: 1000..=65535 (default: 3000)
    /// - `LOG_LEVEL`: debug, info, warn or error (default: info)
    /// - `LOG_COLORS`: ANSI colours in logs (default: true)
    /// - `METRICS_LOG_INTERVAL_MS`: summary period, 1000..=86400000 (default: 300000)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Create configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let mut vars = Vars {
            lookup,
            errors: Vec::new(),
        };

        let config = Self {
            api_url: vars.url("API_URL"),
            api_timeout: vars.millis("API_TIMEOUT", defaults.api_timeout, 1000..=300_000),
            retry_attempts: vars.number("API_RETRY_ATTEMPTS", defaults.retry_attempts, 1..=10),
            retry_delay: vars.millis("API_RETRY_DELAY", defaults.retry_delay, 100..=10_000),
            keep_alive: vars.boolean("API_KEEP_ALIVE", defaults.keep_alive),
            api_key: vars.string("API_KEY"),
            webhook_secret: vars.string("WEBHOOK_SECRET"),
            max_events_per_window: vars.number(
                "MAX_EVENTS_PER_MINUTE",
                defaults.max_events_per_window,
                1..=10_000,
            ),
            rate_limit_window: vars.millis(
                "RATE_LIMIT_WINDOW_MS",
                defaults.rate_limit_window,
                1000..=3_600_000,
            ),
            health_enabled: vars.boolean("HEALTH_CHECK_ENABLED", defaults.health_enabled),
            health_port: vars.number("HEALTH_CHECK_PORT", defaults.health_port, 1000..=65535),
            logging: LoggingConfig {
                level: vars.log_level("LOG_LEVEL"),
                colors: vars.boolean("LOG_COLORS", defaults.logging.colors),
            },
            metrics_log_interval: vars.millis(
                "METRICS_LOG_INTERVAL_MS",
                defaults.metrics_log_interval,
                1000..=86_400_000,
            ),
        };

        if vars.errors.is_empty() {
            Ok(config)
        } else {
            Err(ConfigError {
                errors: vars.errors,
            })
        }
    }

    pub fn delivery_enabled(&self) -> bool {
        self.api_url.is_some()
    }

    pub fn delivery_config(&self) -> DeliveryConfig {
        let mut config = match &self.api_url {
            Some(url) => DeliveryConfig::new(url.clone()),
            None => DeliveryConfig::disabled(),
        };

        config = config
            .with_request_timeout(self.api_timeout)
            .with_keep_alive(self.keep_alive)
            .with_retry(
                RetryPolicy::exponential()
                    .with_max_attempts(self.retry_attempts)
                    .with_initial_interval(self.retry_delay),
            );

        if let Some(key) = &self.api_key {
            config = config.with_api_key(key.clone());
        }
        if let Some(secret) = &self.webhook_secret {
            config = config.with_webhook_secret(secret.clone());
        }

        config
    }

    pub fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig::default()
            .with_max_events_per_window(self.max_events_per_window)
            .with_window(self.rate_limit_window)
    }

    /// The breaker is not configurable from the environment
    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::default()
    }

    pub fn health_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.health_port))
    }

    /// Loggable view with secrets reduced to whether they are set
    pub fn summary(&self) -> ConfigSummary {
        ConfigSummary {
            api_enabled: self.delivery_enabled(),
            api_url: self.api_url.clone(),
            api_timeout_ms: self.api_timeout.as_millis() as u64,
            retry_attempts: self.retry_attempts,
            retry_delay_ms: self.retry_delay.as_millis() as u64,
            keep_alive: self.keep_alive,
            api_key_set: self.api_key.is_some(),
            webhook_secret_set: self.webhook_secret.is_some(),
            max_events_per_window: self.max_events_per_window,
            rate_limit_window_ms: self.rate_limit_window.as_millis() as u64,
            health_enabled: self.health_enabled,
            health_port: self.health_port,
            log_level: self.logging.level,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfigSummary {
    pub api_enabled: bool,
    pub api_url: Option<String>,
    pub api_timeout_ms: u64,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub keep_alive: bool,
    pub api_key_set: bool,
    pub webhook_secret_set: bool,
    pub max_events_per_window: u32,
    pub rate_limit_window_ms: u64,
    pub health_enabled: bool,
    pub health_port: u16,
    pub log_level: LogLevel,
}

struct Vars<F> {
    lookup: F,
    errors: Vec<FieldError>,
}

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Trimmed value; empty counts as unset
    fn string(&self, field: &'static str) -> Option<String> {
        (self.lookup)(field)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn reject(&mut self, field: &'static str, message: impl Into<String>) {
        self.errors.push(FieldError {
            field,
            message: message.into(),
        });
    }

    fn number<T>(&mut self, field: &'static str, default: T, range: RangeInclusive<T>) -> T
    where
        T: FromStr + PartialOrd + fmt::Display + Copy,
    {
        let Some(raw) = self.string(field) else {
            return default;
        };

        match raw.parse::<T>() {
            Ok(value) if range.contains(&value) => value,
            Ok(_) => {
                self.reject(
                    field,
                    format!("must be between {} and {}", range.start(), range.end()),
                );
                default
            }
            Err(_) => {
                self.reject(field, format!("must be a number, got {raw:?}"));
                default
            }
        }
    }

    fn millis(&mut self, field: &'static str, default: Duration, range: RangeInclusive<u64>) -> Duration {
        let default_ms = default.as_millis() as u64;
        Duration::from_millis(self.number(field, default_ms, range))
    }

    fn boolean(&mut self, field: &'static str, default: bool) -> bool {
        let Some(raw) = self.string(field) else {
            return default;
        };

        match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => true,
            "false" | "0" | "no" => false,
            _ => {
                self.reject(field, "must be a boolean (true/false, 1/0, yes/no)");
                default
            }
        }
    }

    fn url(&mut self, field: &'static str) -> Option<String> {
        let raw = self.string(field)?;

        match url::Url::parse(&raw) {
            Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => Some(raw),
            _ => {
                self.reject(field, "must be an http:// or https:// URL");
                None
            }
        }
    }

    fn log_level(&mut self, field: &'static str) -> LogLevel {
        let Some(raw) = self.string(field) else {
            return LogLevel::default();
        };

        raw.parse().unwrap_or_else(|_| {
            self.reject(field, "must be one of: debug, info, warn, error");
            LogLevel::default()
        })
    }
}
