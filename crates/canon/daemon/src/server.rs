//! Server setup and lifecycle management

use crate::api::create_router;
use crate::api::rest::state::AppState;
use crate::auth::Authenticator;
use crate::config::{DaemonConfig, StorageConfig};
use crate::error::{DaemonError, DaemonResult};
use crate::rate_limit::RateLimiter;
use axum::Router;
use canon_gate::constitution;
use canon_ledger::{HashChainLedger, InMemoryCacheStore, LedgerStore, Reconciler};
use canon_service::DecisionService;
use canon_store::InMemoryCanonStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// Canon Daemon Server
pub struct Server {
    config: DaemonConfig,
    state: AppState,
    ledger: Arc<HashChainLedger>,
    fast: Arc<InMemoryCacheStore>,
}

impl Server {
    /// Open the stores and wire the decision service.
    pub async fn new(config: DaemonConfig) -> DaemonResult<Self> {
        config.validate().map_err(DaemonError::Config)?;

        let canon = InMemoryCanonStore::with_genesis(constitution())
            .map_err(|e| DaemonError::Storage(e.to_string()))?;
        let fast = Arc::new(InMemoryCacheStore::new());
        let durable = open_archive(&config.storage).await?;
        let ledger = Arc::new(HashChainLedger::new(
            fast.clone(),
            durable,
            config.ledger_config(),
        ));

        let service = DecisionService::new(Arc::new(canon), ledger.clone(), config.engine_config())
            .with_idempotency_ttl(Duration::from_secs(config.cache.idempotency_ttl_secs));

        let state = AppState::new(
            Arc::new(service),
            Arc::new(Authenticator::new(&config.auth)),
            Arc::new(RateLimiter::new(&config.rate_limit)),
        );

        Ok(Self {
            config,
            state,
            ledger,
            fast,
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn router(&self) -> Router {
        create_router(self.state.clone(), &self.config.server)
    }

    /// Run the server
    pub async fn run(self) -> DaemonResult<()> {
        let addr = self.config.server.listen_addr;
        let app = self.router();

        let listener = TcpListener::bind(addr).await?;

        tracing::info!(
            %addr,
            version = %self.state.version,
            auth = ?self.state.auth.mode(),
            rate_limited = self.state.limiter.is_enabled(),
            "Canon daemon listening"
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let maintenance = (self.config.reconcile.interval_secs > 0).then(|| {
            tokio::spawn(maintenance_loop(
                self.ledger.clone(),
                self.fast.clone(),
                Duration::from_secs(self.config.reconcile.interval_secs),
                shutdown_rx,
            ))
        });

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| DaemonError::Server(e.to_string()))?;

        tracing::info!("Canon daemon shutting down");

        let _ = shutdown_tx.send(true);
        if let Some(handle) = maintenance {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Maintenance task ended abnormally");
            }
        }

        Ok(())
    }
}

#[cfg(feature = "postgres")]
async fn open_archive(storage: &StorageConfig) -> DaemonResult<Arc<dyn LedgerStore>> {
    use canon_ledger::{InMemoryLedgerStore, PostgresLedgerStore};

    match storage {
        StorageConfig::Memory => Ok(Arc::new(InMemoryLedgerStore::new())),
        StorageConfig::Postgres {
            url,
            max_connections,
            connect_timeout_secs,
        } => {
            let store =
                PostgresLedgerStore::connect_with_options(url, *max_connections, *connect_timeout_secs)
                    .await
                    .map_err(|e| DaemonError::Storage(e.to_string()))?;
            tracing::info!(max_connections, "Connected to postgres ledger archive");
            Ok(Arc::new(store))
        }
    }
}

#[cfg(not(feature = "postgres"))]
async fn open_archive(storage: &StorageConfig) -> DaemonResult<Arc<dyn LedgerStore>> {
    use canon_ledger::InMemoryLedgerStore;

    match storage {
        StorageConfig::Memory => Ok(Arc::new(InMemoryLedgerStore::new())),
        StorageConfig::Postgres { .. } => Err(DaemonError::Config(
            "storage type postgres requires the `postgres` feature".to_string(),
        )),
    }
}

/// Periodic fast/durable reconciliation and expired-entry purge.
async fn maintenance_loop(
    ledger: Arc<HashChainLedger>,
    fast: Arc<InMemoryCacheStore>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let reconciler = Reconciler::new(ledger);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let purged = fast.purge_expired();
                if purged > 0 {
                    tracing::debug!(purged, "Purged expired fast-store entries");
                }
                if let Err(e) = reconciler.run_once(true).await {
                    tracing::warn!(error = %e, "Reconciliation pass failed");
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
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
