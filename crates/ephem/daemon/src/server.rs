//! Server setup and lifecycle management

use crate::api::{create_router, AppState};
use crate::config::{DaemonConfig, StorageConfig};
use crate::error::{DaemonError, DaemonResult};
use ephem_doctor::ProviderPreflight;
use ephem_driver::{DriverRegistry, HookDriver};
use ephem_orchestrator::{CancellationToken, Orchestrator};
use ephem_scheduler::TeardownScheduler;
use ephem_store::{InMemoryStackStore, SqliteStackStore, StackStore};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Ephem Daemon Server
pub struct Server {
    config: DaemonConfig,
    state: AppState,
    scheduler: Arc<TeardownScheduler>,
    trigger_rx: mpsc::Receiver<()>,
    shutdown: CancellationToken,
}

impl Server {
    /// Create a new server with the given configuration
    pub async fn new(config: DaemonConfig) -> DaemonResult<Self> {
        let store = open_store(&config.storage).await?;

        let mut drivers = DriverRegistry::new();
        for (provider, commands) in config.hook_drivers()? {
            tracing::info!(%provider, "Registered hook driver");
            drivers.register(provider, Arc::new(HookDriver::new(provider.as_str(), commands)));
        }
        if drivers.is_empty() {
            tracing::warn!("No drivers configured; deploys will be rejected");
        }

        let mut orchestrator =
            Orchestrator::new(store, drivers).with_retry_policy(config.retry.to_policy());
        if config.doctor.preflight {
            orchestrator =
                orchestrator.with_preflight(Arc::new(ProviderPreflight::new(config.doctor.clone())));
        }

        let (scheduler, trigger_rx) =
            TeardownScheduler::new(orchestrator.clone(), config.scheduler.to_scheduler_config());

        let shutdown = CancellationToken::new();
        let state = AppState::new(
            orchestrator,
            scheduler.clone(),
            config.doctor.clone(),
            shutdown.clone(),
        );

        Ok(Self {
            config,
            state,
            scheduler,
            trigger_rx,
            shutdown,
        })
    }

    /// Run the server until ctrl-c or SIGTERM
    pub async fn run(self) -> DaemonResult<()> {
        let addr = self.config.server.listen_addr;
        let app = create_router(self.state, self.config.server.enable_cors);
        let listener = TcpListener::bind(addr).await?;

        tracing::info!("Ephem daemon listening on {}", addr);

        let scheduler_handle = if self.config.scheduler.enabled {
            Some(tokio::spawn(
                self.scheduler
                    .clone()
                    .run(self.trigger_rx, self.shutdown.clone()),
            ))
        } else {
            tracing::warn!("Teardown scheduler disabled; expired stacks will not be destroyed");
            None
        };

        let shutdown = self.shutdown.clone();
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown_signal().await;
                shutdown.cancel();
            })
            .await;

        tracing::info!("Ephem daemon shutting down");
        self.shutdown.cancel();
        if let Some(handle) = scheduler_handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Scheduler task failed");
            }
        }

        served.map_err(|e| DaemonError::Server(e.to_string()))
    }
}

async fn open_store(config: &StorageConfig) -> DaemonResult<Arc<dyn StackStore>> {
    match config {
        StorageConfig::Memory => {
            tracing::warn!("Using in-memory storage; stack records are lost on restart");
            Ok(Arc::new(InMemoryStackStore::new()))
        }
        StorageConfig::Sqlite {
            path,
            max_connections,
        } => {
            tracing::info!(path = %path.display(), "Opening SQLite store");
            Ok(Arc::new(SqliteStackStore::open(path, *max_connections).await?))
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_server_builds_with_memory_store_and_no_drivers() {
        let server = Server::new(DaemonConfig::default()).await.unwrap();
        assert!(server.state.orchestrator.list_stacks(true).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_server_rejects_unknown_driver_provider() {
        let mut config = DaemonConfig::default();
        config.drivers.insert(
            "azure".to_string(),
            ephem_driver::HookCommands {
                create: vec!["true".to_string()],
                destroy: vec!["true".to_string()],
                ..Default::default()
            },
        );
        assert!(matches!(Server::new(config).await, Err(DaemonError::Config(_))));
    }
}
