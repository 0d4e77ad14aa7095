// Herald Health Surface
// Decision: Served on its own port so health checks never compete with event traffic
// Decision: Reports are computed per request from live metrics, nothing is cached

pub mod routes;
pub mod server;
pub mod state;

pub use routes::router;
pub use server::{HealthServer, HealthServerError};
pub use state::{
    ApiReadiness, HealthReport, HealthState, HealthStatus, LivenessReport, MetricsReport,
    ReadinessReport, HEALTHY_SUCCESS_RATE,
};
