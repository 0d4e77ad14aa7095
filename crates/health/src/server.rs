//! Health server lifecycle

use std::io;
use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::routes::router;
use crate::state::HealthState;

#[derive(Debug, Error)]
pub enum HealthServerError {
    #[error("failed to bind health server on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("health server failed: {0}")]
    Serve(#[source] io::Error),
}

/// Running health server
pub struct HealthServer {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<io::Result<()>>,
}

impl HealthServer {
    /// Bind `addr` and start serving in the background
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError::Bind` if the address cannot be bound.
    pub async fn bind(addr: SocketAddr, state: HealthState) -> Result<Self, HealthServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| HealthServerError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| HealthServerError::Bind { addr, source })?;

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let app = router(state);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.changed().await;
                })
                .await
        });

        info!(addr = %local_addr, "Health server listening");

        Ok(Self {
            local_addr,
            shutdown_tx,
            handle,
        })
    }

    /// Address actually bound, useful when binding port 0
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections and wait for in-flight requests
    pub async fn shutdown(self) -> Result<(), HealthServerError> {
        let _ = self.shutdown_tx.send(true);

        let result = match self.handle.await {
            Ok(result) => result.map_err(HealthServerError::Serve),
            Err(e) => Err(HealthServerError::Serve(io::Error::other(e))),
        };

        info!("Health server stopped");
        result
    }
}
