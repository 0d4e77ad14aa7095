//! Health state and the reports derived from it

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use herald_delivery::{ApiMetrics, Clock, EventMetrics, EventType, MetricsCollector, OverallStats};
use parking_lot::RwLock;
use serde::{Serialize, Serializer};
use tracing::info;

/// Minimum API success rate, in percent, for the relay to count as healthy
pub const HEALTHY_SUCCESS_RATE: f64 = 50.0;

#[derive(Debug, Default)]
struct Connectivity {
    connected: bool,
    identity: Option<String>,
    last_success: Option<DateTime<Utc>>,
}

struct Inner {
    metrics: Arc<MetricsCollector>,
    delivery_enabled: bool,
    clock: Arc<dyn Clock>,
    connectivity: RwLock<Connectivity>,
}

/// Shared state behind the health endpoints
///
/// Cheap to clone; all clones observe the same flags.
#[derive(Clone)]
pub struct HealthState {
    inner: Arc<Inner>,
}

impl HealthState {
    pub fn new(metrics: Arc<MetricsCollector>, delivery_enabled: bool, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                metrics,
                delivery_enabled,
                clock,
                connectivity: RwLock::new(Connectivity::default()),
            }),
        }
    }

    /// Update upstream connectivity and the identity the relay runs as
    pub fn set_connectivity(&self, connected: bool, identity: Option<String>) {
        let mut connectivity = self.inner.connectivity.write();
        connectivity.connected = connected;
        connectivity.identity = identity;

        info!(
            connected,
            identity = connectivity.identity.as_deref().unwrap_or("-"),
            "Upstream connectivity updated"
        );
    }

    /// Mark that a delivery just succeeded
    pub fn record_successful_delivery(&self) {
        self.inner.connectivity.write().last_success = Some(self.inner.clock.now_utc());
    }

    pub fn delivery_enabled(&self) -> bool {
        self.inner.delivery_enabled
    }

    pub fn health(&self) -> HealthReport {
        let (connected, identity, last_success) = self.connectivity();
        let api = self.inner.metrics.api_metrics();
        let overall = self.inner.metrics.overall_stats();

        let healthy = connected
            && (!self.inner.delivery_enabled || api.success_rate > HEALTHY_SUCCESS_RATE);

        HealthReport {
            status: if healthy {
                HealthStatus::Healthy
            } else {
                HealthStatus::Unhealthy
            },
            timestamp: self.inner.clock.now_utc(),
            uptime: overall.uptime,
            discord: UpstreamReport {
                connected,
                user: identity,
            },
            api: ApiHealth {
                enabled: self.inner.delivery_enabled,
                last_successful_call: last_success,
                success_rate: api.success_rate,
            },
            metrics: MetricsTotals {
                total_events: overall.total_events,
                total_api_requests: overall.total_api_requests,
            },
        }
    }

    pub fn readiness(&self) -> ReadinessReport {
        let (connected, _, last_success) = self.connectivity();

        let api = if self.inner.delivery_enabled {
            ApiReadiness::Enabled {
                ready: last_success.is_some(),
            }
        } else {
            ApiReadiness::Disabled
        };

        let api_ready = match api {
            ApiReadiness::Enabled { ready } => ready,
            ApiReadiness::Disabled => true,
        };

        ReadinessReport {
            ready: connected && api_ready,
            discord: connected,
            api,
            timestamp: self.inner.clock.now_utc(),
        }
    }

    pub fn liveness(&self) -> LivenessReport {
        LivenessReport {
            alive: true,
            timestamp: self.inner.clock.now_utc(),
        }
    }

    pub fn metrics(&self) -> MetricsReport {
        MetricsReport {
            overall: self.inner.metrics.overall_stats(),
            events: self.inner.metrics.event_metrics(),
            api: self.inner.metrics.api_metrics(),
            timestamp: self.inner.clock.now_utc(),
        }
    }

    fn connectivity(&self) -> (bool, Option<String>, Option<DateTime<Utc>>) {
        let connectivity = self.inner.connectivity.read();
        (
            connectivity.connected,
            connectivity.identity.clone(),
            connectivity.last_success,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub uptime: String,
    pub discord: UpstreamReport,
    pub api: ApiHealth,
    pub metrics: MetricsTotals,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Upstream chat connection
#[derive(Debug, Clone, Serialize)]
pub struct UpstreamReport {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiHealth {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_successful_call: Option<DateTime<Utc>>,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsTotals {
    pub total_events: u64,
    pub total_api_requests: u64,
}

/// Downstream readiness: a boolean, or `"disabled"` without a downstream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiReadiness {
    Enabled { ready: bool },
    Disabled,
}

impl Serialize for ApiReadiness {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Enabled { ready } => serializer.serialize_bool(*ready),
            Self::Disabled => serializer.serialize_str("disabled"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadinessReport {
    pub ready: bool,
    pub discord: bool,
    pub api: ApiReadiness,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LivenessReport {
    pub alive: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub overall: OverallStats,
    pub events: BTreeMap<EventType, EventMetrics>,
    pub api: ApiMetrics,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_delivery::ManualClock;
    use std::time::Duration;

    fn state(delivery_enabled: bool) -> (HealthState, Arc<MetricsCollector>) {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());
        let metrics = Arc::new(MetricsCollector::new(clock.clone()));
        (HealthState::new(metrics.clone(), delivery_enabled, clock), metrics)
    }

    #[test]
    fn test_unhealthy_until_connected() {
        let (state, _) = state(false);
        assert!(!state.health().is_healthy());

        state.set_connectivity(true, Some("herald#0001".to_string()));
        let report = state.health();
        assert!(report.is_healthy());
        assert_eq!(report.discord.user.as_deref(), Some("herald#0001"));
    }

    #[test]
    fn test_enabled_delivery_needs_success_rate() {
        let (state, metrics) = state(true);
        state.set_connectivity(true, None);
        assert!(!state.health().is_healthy());

        metrics.record_delivery(true, Duration::from_millis(10), None, None);
        metrics.record_delivery(false, Duration::from_millis(10), Some("HTTP 500"), Some(500));
        // Exactly 50% is not enough
        assert!(!state.health().is_healthy());

        metrics.record_delivery(true, Duration::from_millis(10), None, None);
        assert!(state.health().is_healthy());
    }

    #[test]
    fn test_readiness() {
        let (state, _) = state(true);
        state.set_connectivity(true, None);

        let report = state.readiness();
        assert!(!report.ready);
        assert_eq!(report.api, ApiReadiness::Enabled { ready: false });

        state.record_successful_delivery();
        assert!(state.readiness().ready);

        state.set_connectivity(false, None);
        assert!(!state.readiness().ready);
    }

    #[test]
    fn test_readiness_with_delivery_disabled() {
        let (state, _) = state(false);
        state.set_connectivity(true, None);

        let report = state.readiness();
        assert!(report.ready);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["api"], "disabled");
        assert_eq!(json["discord"], true);
    }

    #[test]
    fn test_health_report_shape() {
        let (state, _) = state(true);
        state.set_connectivity(true, None);
        state.record_successful_delivery();

        let json = serde_json::to_value(state.health()).unwrap();
        assert_eq!(json["status"], "unhealthy");
        assert_eq!(json["uptime"], "0m 0s");
        assert!(json["discord"].get("user").is_none());
        assert_eq!(json["api"]["enabled"], true);
        assert!(json["api"]["lastSuccessfulCall"].is_string());
        assert_eq!(json["api"]["successRate"], 0.0);
        assert_eq!(json["metrics"]["totalEvents"], 0);
        assert_eq!(json["metrics"]["totalApiRequests"], 0);
    }
}
