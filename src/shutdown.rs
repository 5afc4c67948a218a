use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::observability::platform_metrics;
use crate::storage::Store;

/// Graceful shutdown coordinator for Guildkeeper
pub struct ShutdownCoordinator {
    store: Arc<dyn Store>,
}

impl ShutdownCoordinator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Resolves on SIGINT or SIGTERM.
    pub async fn wait_for_signal() {
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
                    error!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown"),
            _ = terminate => info!("Received terminate signal, initiating graceful shutdown"),
        }
    }

    /// Flushes usage statistics and closes the store.
    pub async fn shutdown_all_services(&self) {
        info!("Initiating graceful shutdown of all services...");

        platform_metrics().log_stats();

        if timeout(Duration::from_secs(10), self.store.close()).await.is_err() {
            warn!("Timed out closing the database");
        }

        info!("Graceful shutdown completed successfully");
    }
}
