//! HTTP layer for operators: config editing, queries and maintenance.

mod handlers;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{CollectorError, Result};

pub use handlers::{
    AdminResponse, AgentSummary, HealthResponse, LevelView, RollupLevelResponse, SeriesResponse,
    TransactionConfigResponse,
};
pub use routes::create_router;
pub use state::UiState;

/// The running UI HTTP server.
pub struct UiServer {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    handle: Mutex<Option<JoinHandle<std::io::Result<()>>>>,
}

impl UiServer {
    /// Binds `bind_address` and serves the UI router in the background.
    pub async fn start(bind_address: SocketAddr, state: Arc<UiState>) -> Result<Self> {
        let listener = TcpListener::bind(bind_address)
            .await
            .map_err(|e| CollectorError::Bind {
                address: bind_address.to_string(),
                reason: e.to_string(),
            })?;
        let local_addr = listener.local_addr().map_err(|e| CollectorError::Bind {
            address: bind_address.to_string(),
            reason: e.to_string(),
        })?;

        let shutdown = CancellationToken::new();
        let router = create_router(state);
        let signal = shutdown.clone();
        let handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await
        });

        tracing::info!(address = %local_addr, "UI server listening");
        Ok(Self {
            local_addr,
            shutdown,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting requests and waits up to `drain_timeout` for
    /// in-flight ones. Requests still running after that are aborted.
    pub async fn close(&self, drain_timeout: Duration) -> Result<()> {
        self.shutdown.cancel();
        let Some(mut handle) = self.handle.lock().take() else {
            return Ok(());
        };

        match tokio::time::timeout(drain_timeout, &mut handle).await {
            Ok(Ok(Ok(()))) => {
                tracing::info!("UI server stopped");
                Ok(())
            }
            Ok(Ok(Err(e))) => Err(CollectorError::Internal(format!("UI server error: {e}"))),
            Ok(Err(e)) => Err(CollectorError::Internal(format!("UI server task failed: {e}"))),
            Err(_) => {
                handle.abort();
                Err(CollectorError::DrainTimeout {
                    resource: "UI server".to_string(),
                    timeout_ms: u64::try_from(drain_timeout.as_millis()).unwrap_or(u64::MAX),
                })
            }
        }
    }
}
