//! Health server over a real socket

use std::net::SocketAddr;
use std::sync::Arc;

use herald_delivery::{Clock, MetricsCollector, SystemClock};
use herald_health::{HealthServer, HealthServerError, HealthState};
use serde_json::Value;

fn state() -> HealthState {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    HealthState::new(Arc::new(MetricsCollector::new(clock.clone())), false, clock)
}

fn loopback() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 0))
}

#[tokio::test]
async fn test_serves_health_endpoints_until_shutdown() {
    let state = state();
    let server = HealthServer::bind(loopback(), state.clone()).await.unwrap();
    let base = format!("http://{}", server.local_addr());
    let client = reqwest::Client::new();

    let live = client.get(format!("{base}/live")).send().await.unwrap();
    assert_eq!(live.status(), 200);
    assert_eq!(
        live.headers()["content-type"].to_str().unwrap(),
        "application/json"
    );
    let body: Value = live.json().await.unwrap();
    assert_eq!(body["alive"], true);

    let health = client.get(format!("{base}/health")).send().await.unwrap();
    assert_eq!(health.status(), 503);

    state.set_connectivity(true, Some("herald".to_string()));
    let health = client.get(format!("{base}/health")).send().await.unwrap();
    assert_eq!(health.status(), 200);

    let put = client.put(format!("{base}/ready")).send().await.unwrap();
    assert_eq!(put.status(), 405);

    server.shutdown().await.unwrap();
    let after = reqwest::Client::new().get(format!("{base}/live")).send().await;
    assert!(after.is_err());
}

#[tokio::test]
async fn test_bind_conflict_is_reported() {
    let first = HealthServer::bind(loopback(), state()).await.unwrap();

    let err = HealthServer::bind(first.local_addr(), state())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, HealthServerError::Bind { .. }));
    assert!(err.to_string().contains("failed to bind"));

    first.shutdown().await.unwrap();
}
