// Event relay
//
// Glue between an event source, the delivery client and the health state.
// Owns the background timers so they stop with the relay.

use std::sync::Arc;
use std::time::Duration;

use herald_delivery::{
    BackgroundTasks, CircuitBreaker, Clock, DeliveryClient, DeliveryOutcome, DenyReason, Event,
    MetricsCollector, RateLimiter, Result,
};
use herald_health::HealthState;
use tracing::{debug, info};

use crate::config::RelayConfig;

pub struct EventRelay {
    client: Arc<DeliveryClient>,
    health: HealthState,
    tasks: BackgroundTasks,
}

impl EventRelay {
    pub fn new(client: DeliveryClient, health: HealthState) -> Self {
        Self {
            client: Arc::new(client),
            health,
            tasks: BackgroundTasks::new(),
        }
    }

    /// Build the whole pipeline from configuration
    pub fn from_config(config: &RelayConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit_config(), clock.clone()));
        let circuit_breaker = Arc::new(CircuitBreaker::new(
            config.circuit_breaker_config(),
            clock.clone(),
        ));
        let metrics = Arc::new(MetricsCollector::new(clock.clone()));

        let client = DeliveryClient::from_parts(
            config.delivery_config(),
            rate_limiter,
            circuit_breaker,
            metrics.clone(),
            clock.clone(),
        )?;
        let health = HealthState::new(metrics, config.delivery_enabled(), clock);

        Ok(Self::new(client, health))
    }

    pub fn client(&self) -> &Arc<DeliveryClient> {
        &self.client
    }

    pub fn health(&self) -> &HealthState {
        &self.health
    }

    /// Start the rate-limit sweep and the periodic metrics summary
    pub fn start_background_tasks(&mut self, summary_interval: Duration) {
        self.tasks
            .spawn_rate_limit_sweep(self.client.rate_limiter().clone());
        self.tasks
            .spawn_metrics_summary(self.client.metrics().clone(), summary_interval);
    }

    /// Deliver one event and report success to the health state
    pub async fn process(&self, event: &Event) -> DeliveryOutcome {
        let outcome = self.client.deliver(event).await;

        match &outcome {
            DeliveryOutcome::Sent { .. } => self.health.record_successful_delivery(),
            // Rate limit and open circuit denials are already warned about upstream
            DeliveryOutcome::Denied(DenyReason::RateLimited) => {
                debug!(
                    event_type = %event.event_type,
                    routing_key = %event.routing_key,
                    "Event dropped: rate limited"
                );
            }
            DeliveryOutcome::Denied(DenyReason::Disabled) => {
                debug!(event_type = %event.event_type, "Event not forwarded: delivery disabled");
            }
            DeliveryOutcome::Denied(DenyReason::CircuitOpen) => {
                debug!(event_type = %event.event_type, "Event dropped: circuit open");
            }
            // Already logged by the client
            DeliveryOutcome::Failed(_) => {}
        }

        outcome
    }

    /// Stop timers and log a final metrics summary
    pub async fn shutdown(self) {
        self.tasks.shutdown().await;
        self.client.metrics().log_summary();
        info!("Event relay stopped");
    }
}
