// Herald relay binary
// Decision: Events arrive as NDJSON on stdin; EOF or a signal ends the process

use std::sync::Arc;

use anyhow::{Context, Result};
use herald_delivery::{Clock, SystemClock};
use herald_health::HealthServer;
use herald_relay::{telemetry, EventRelay, EventSource, LoggingConfig, RelayConfig};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = match RelayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            telemetry::init(&LoggingConfig::default());
            for field in &e.errors {
                error!(field = field.field, "{}", field.message);
            }
            return Err(e).context("Configuration validation failed");
        }
    };

    telemetry::init(&config.logging);
    info!(config = ?config.summary(), "Herald starting");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let mut relay =
        EventRelay::from_config(&config, clock).context("Failed to build delivery client")?;
    relay.start_background_tasks(config.metrics_log_interval);

    let health_server = if config.health_enabled {
        let server = HealthServer::bind(config.health_addr(), relay.health().clone())
            .await
            .context("Failed to start health server")?;
        Some(server)
    } else {
        info!("Health server disabled");
        None
    };

    relay.health().set_connectivity(true, None);

    let mut source = EventSource::stdin();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
            next = source.next_event() => match next {
                Ok(Some(event)) => {
                    relay.process(&event).await;
                }
                Ok(None) => {
                    info!(skipped = source.skipped(), "Event source closed");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Failed to read events");
                    break;
                }
            }
        }
    }

    relay.health().set_connectivity(false, None);
    relay.shutdown().await;

    if let Some(server) = health_server {
        if let Err(e) = server.shutdown().await {
            error!(error = %e, "Health server did not stop cleanly");
        }
    }

    info!("Herald stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
