//! End-to-end: NDJSON input through the relay to a mock downstream

use std::sync::Arc;

use herald_delivery::{Clock, DeliveryOutcome, DenyReason, ManualClock};
use herald_relay::{EventRelay, EventSource, RelayConfig};
use serde_json::Value;
use wiremock::{matchers::method, Mock, MockServer, ResponseTemplate};

const INPUT: &str = concat!(
    r#"{"eventType":"message_create","channelId":"C1","timestamp":"2026-03-01T10:00:00Z","content":"one"}"#,
    "\n",
    r#"{"eventType":"message_create","channelId":"C1","timestamp":"2026-03-01T10:00:01Z","content":"two"}"#,
    "\n",
    "{broken\n",
    r#"{"eventType":"message_create","channelId":"C1","timestamp":"2026-03-01T10:00:02Z","content":"three"}"#,
    "\n",
    r#"{"eventType":"thread_create","channelId":"C1","timestamp":"2026-03-01T10:00:03Z","name":"release"}"#,
    "\n",
);

#[tokio::test]
async fn test_relay_forwards_stream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(3)
        .mount(&server)
        .await;

    let config = RelayConfig {
        api_url: Some(format!("{}/rpc", server.uri())),
        max_events_per_window: 2,
        ..RelayConfig::default()
    };
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());
    let relay = EventRelay::from_config(&config, clock).unwrap();
    relay.health().set_connectivity(true, Some("herald".to_string()));

    let mut source = EventSource::new(INPUT.as_bytes());
    let mut outcomes = Vec::new();
    while let Some(event) = source.next_event().await.unwrap() {
        outcomes.push(relay.process(&event).await);
    }

    assert_eq!(source.skipped(), 1);
    assert_eq!(
        outcomes,
        vec![
            DeliveryOutcome::Sent { attempts: 1 },
            DeliveryOutcome::Sent { attempts: 1 },
            DeliveryOutcome::Denied(DenyReason::RateLimited),
            DeliveryOutcome::Sent { attempts: 1 },
        ]
    );

    let requests = server.received_requests().await.unwrap();
    let last: Value = requests[2].body_json().unwrap();
    assert_eq!(last["params"]["arguments"]["eventType"], "thread_create");
    assert_eq!(last["params"]["arguments"]["name"], "release");

    let health = relay.health().health();
    assert!(health.is_healthy());
    assert_eq!(health.metrics.total_events, 3);
    assert_eq!(health.metrics.total_api_requests, 3);
    assert!(relay.health().readiness().ready);

    relay.shutdown().await;
}
