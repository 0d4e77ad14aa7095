//! In-memory delivery metrics
//!
//! Counters only ever grow until the process restarts. Rates and averages
//! are derived when a snapshot is taken, and every accessor returns an owned
//! copy so callers can serialize without holding the lock.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::event::EventType;

/// Number of recent downstream errors kept for inspection
pub const API_ERROR_HISTORY: usize = 100;

/// Per-event-type counters as seen by readers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetrics {
    /// Events delivered
    pub count: u64,
    /// Events that were dropped or failed
    pub error_count: u64,
    /// Sum of delivery latencies in milliseconds
    pub total_response_time: u64,
    pub last_event: Option<DateTime<Utc>>,
    /// Mean delivery latency in milliseconds
    pub average_response_time: f64,
    /// Errors per delivered event, in percent; 0 before any delivery
    pub error_rate: f64,
}

/// One entry of the downstream error ring
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    pub timestamp: DateTime<Utc>,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}

/// Downstream call counters as seen by readers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiMetrics {
    pub requests: u64,
    pub success_count: u64,
    pub error_count: u64,
    /// Sum of latencies in milliseconds
    pub total_response_time: u64,
    /// Mean latency in milliseconds
    pub average_response_time: f64,
    pub last_request: Option<DateTime<Utc>>,
    /// Most recent errors, oldest first
    pub errors: Vec<ApiError>,
    /// Successful requests in percent; 0 when nothing was sent
    pub success_rate: f64,
}

/// Process-wide summary
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverallStats {
    pub uptime: String,
    pub total_events: u64,
    pub total_api_requests: u64,
    pub overall_success_rate: f64,
    pub event_types: Vec<EventType>,
}

#[derive(Debug, Default)]
struct EventCounters {
    count: u64,
    errors: u64,
    total_ms: u64,
    last_event: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct ApiCounters {
    requests: u64,
    success_count: u64,
    error_count: u64,
    total_ms: u64,
    last_request: Option<DateTime<Utc>>,
    errors: VecDeque<ApiError>,
}

#[derive(Debug, Default)]
struct MetricsState {
    events: BTreeMap<EventType, EventCounters>,
    api: ApiCounters,
}

/// Collector for event and downstream metrics
pub struct MetricsCollector {
    state: Mutex<MetricsState>,
    started_at: Instant,
    clock: Arc<dyn Clock>,
}

impl MetricsCollector {
    /// Create a collector; uptime is measured from this call
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(MetricsState::default()),
            started_at: clock.now(),
            clock,
        }
    }

    /// Record a delivered event and its latency
    pub fn record_event(&self, event_type: EventType, latency: Duration) {
        let now = self.clock.now_utc();
        let mut state = self.state.lock();
        let counters = state.events.entry(event_type).or_default();

        counters.count += 1;
        counters.total_ms += millis(latency);
        counters.last_event = Some(now);

        debug!(event_type = %event_type, count = counters.count, latency_ms = millis(latency), "Event recorded");
    }

    /// Record an event that was dropped or failed
    pub fn record_event_error(&self, event_type: EventType) {
        let mut state = self.state.lock();
        let counters = state.events.entry(event_type).or_default();
        counters.errors += 1;

        debug!(event_type = %event_type, errors = counters.errors, "Event error recorded");
    }

    /// Record the outcome of one downstream delivery
    ///
    /// Failures with an error message are kept in a ring of the last
    /// [`API_ERROR_HISTORY`] entries.
    pub fn record_delivery(
        &self,
        success: bool,
        latency: Duration,
        error: Option<&str>,
        status_code: Option<u16>,
    ) {
        let now = self.clock.now_utc();
        let mut state = self.state.lock();
        let api = &mut state.api;

        api.requests += 1;
        api.total_ms += millis(latency);
        api.last_request = Some(now);

        if success {
            api.success_count += 1;
        } else {
            api.error_count += 1;

            if let Some(error) = error {
                if api.errors.len() == API_ERROR_HISTORY {
                    api.errors.pop_front();
                }
                api.errors.push_back(ApiError {
                    timestamp: now,
                    error: error.to_string(),
                    status_code,
                });
            }
        }

        debug!(
            success,
            latency_ms = millis(latency),
            total_requests = api.requests,
            "Delivery recorded"
        );
    }

    pub fn event_metrics(&self) -> BTreeMap<EventType, EventMetrics> {
        let state = self.state.lock();
        state
            .events
            .iter()
            .map(|(event_type, c)| {
                let metrics = EventMetrics {
                    count: c.count,
                    error_count: c.errors,
                    total_response_time: c.total_ms,
                    last_event: c.last_event,
                    average_response_time: ratio(c.total_ms, c.count),
                    error_rate: ratio(c.errors, c.count) * 100.0,
                };
                (*event_type, metrics)
            })
            .collect()
    }

    pub fn api_metrics(&self) -> ApiMetrics {
        let state = self.state.lock();
        let api = &state.api;
        ApiMetrics {
            requests: api.requests,
            success_count: api.success_count,
            error_count: api.error_count,
            total_response_time: api.total_ms,
            average_response_time: ratio(api.total_ms, api.requests),
            last_request: api.last_request,
            errors: api.errors.iter().cloned().collect(),
            success_rate: ratio(api.success_count, api.requests) * 100.0,
        }
    }

    pub fn overall_stats(&self) -> OverallStats {
        let uptime = self.uptime();
        let state = self.state.lock();

        OverallStats {
            uptime: format_uptime(uptime),
            total_events: state.events.values().map(|c| c.count).sum(),
            total_api_requests: state.api.requests,
            overall_success_rate: ratio(state.api.success_count, state.api.requests) * 100.0,
            event_types: state.events.keys().copied().collect(),
        }
    }

    /// Time since the collector was created
    pub fn uptime(&self) -> Duration {
        self.clock.now().saturating_duration_since(self.started_at)
    }

    /// Log a metrics summary, with per-type detail at debug level
    pub fn log_summary(&self) {
        let overall = self.overall_stats();
        let api = self.api_metrics();

        info!(
            uptime = %overall.uptime,
            total_events = overall.total_events,
            total_api_requests = overall.total_api_requests,
            success_rate = format_args!("{:.2}%", overall.overall_success_rate),
            avg_response_time = format_args!("{:.2}ms", api.average_response_time),
            event_types = ?overall.event_types,
            "Metrics summary"
        );

        for (event_type, metrics) in self.event_metrics() {
            if metrics.count > 0 {
                debug!(
                    event_type = %event_type,
                    count = metrics.count,
                    avg_response_time = format_args!("{:.2}ms", metrics.average_response_time),
                    error_rate = format_args!("{:.2}%", metrics.error_rate),
                    "Event type metrics"
                );
            }
        }
    }
}

/// Human readable uptime: `2d 3h 4m`, `3h 4m` or `4m 5s`
pub fn format_uptime(uptime: Duration) -> String {
    let seconds = uptime.as_secs();
    let minutes = seconds / 60;
    let hours = minutes / 60;
    let days = hours / 24;

    if days > 0 {
        format!("{}d {}h {}m", days, hours % 24, minutes % 60)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes % 60)
    } else {
        format!("{}m {}s", minutes, seconds % 60)
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}
