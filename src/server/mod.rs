pub mod router;
pub mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::admission::{AdmissionChain, IdempotencyFilter, RateLimiter, Sweeper};
use crate::collab::{spawn_notification_listener, BotDirectory, LogNotifier, MemoryBotDirectory, Notifier};
use crate::config::{SentinelConfig, StorageBackend, StorageConfig};
use crate::error::{Result, SentinelError};
use crate::metrics::SentinelMetrics;
use crate::provider::memory::MemoryProvider;
use crate::provider::redis::{RedisConfig, RedisProvider};
use crate::provider::AlertProvider;
use crate::store::AlertStore;

use state::AppState;

/// Open the configured storage backend.
pub async fn connect_provider(storage: &StorageConfig) -> Result<Arc<dyn AlertProvider>> {
    let provider: Arc<dyn AlertProvider> = match storage.backend {
        StorageBackend::Memory => Arc::new(MemoryProvider::default()),
        StorageBackend::Redis => Arc::new(
            RedisProvider::connect(RedisConfig {
                url: storage.redis_url.clone(),
            })
            .await?,
        ),
    };
    tracing::info!(provider = provider.name(), "Storage backend ready");
    Ok(provider)
}

/// Long-lived components behind the router
///
/// Owns the background tasks (cache sweepers, notification listener) so
/// they can be joined on shutdown.
pub struct Services {
    pub state: AppState,
    sweeper: Sweeper,
    listener: JoinHandle<()>,
}

impl Services {
    /// Wire every component and start the background tasks.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(
        config: &SentinelConfig,
        provider: Arc<dyn AlertProvider>,
        notifier: Arc<dyn Notifier>,
        shutdown: CancellationToken,
    ) -> Self {
        let metrics = Arc::new(SentinelMetrics::new());
        let store = Arc::new(AlertStore::with_options(provider, config.store_options()));

        let admission = Arc::new(
            AdmissionChain::new(
                RateLimiter::new(config.rate_limit.settings()),
                IdempotencyFilter::new(config.idempotency.ttl()),
                config.signature.validator(),
            )
            .trust_forwarded_for(config.rate_limit.trust_forwarded_for)
            .with_metrics(metrics.clone()),
        );

        let mut sweeper = Sweeper::new(shutdown.child_token());
        admission.spawn_sweepers(&mut sweeper, config.rate_limit.idle_sweep());

        let target = store.clone();
        sweeper.spawn_async("alerts", config.storage.sweep_interval(), move || {
            let store = target.clone();
            async move {
                store.sweep_expired().await.unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "Expired alert sweep failed");
                    0
                })
            }
        });

        let admin = Arc::new(config.admin.guard());

        let bots: Arc<dyn BotDirectory> =
            Arc::new(MemoryBotDirectory::seeded(config.bots.iter().cloned()));

        let listener =
            spawn_notification_listener(store.bus().clone(), notifier, shutdown.child_token());

        tracing::info!(
            signature = admission.signatures().is_enabled(),
            admin = admin.is_enabled(),
            bots = config.bots.len(),
            sweepers = sweeper.len(),
            "Services initialized"
        );

        let state = AppState::new(store, admission, admin, bots, metrics, shutdown);
        Self {
            state,
            sweeper,
            listener,
        }
    }

    pub fn router(&self, cors_origins: &[String]) -> Router {
        router::build(self.state.clone(), cors_origins)
    }

    /// Cancel and join every background task.
    pub async fn shutdown(self) {
        self.state.shutdown.cancel();
        self.sweeper.shutdown().await;
        if let Err(e) = self.listener.await {
            tracing::warn!(error = %e, "Notification listener task failed");
        }
    }
}

/// Start the HTTP server with the given configuration.
pub async fn start(config: SentinelConfig) -> Result<()> {
    config.validate()?;

    let shutdown = CancellationToken::new();
    let provider = connect_provider(&config.storage).await?;
    let services = Services::new(&config, provider, Arc::new(LogNotifier), shutdown.clone());
    let app = services.router(&config.server.cors_origins);

    let bind_addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| SentinelError::Server(format!("Failed to bind to {bind_addr}: {e}")))?;

    tracing::info!("Server listening on {bind_addr}");

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Shutdown signal received");
        signal_token.cancel();
    });

    let graceful = shutdown.clone();
    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { graceful.cancelled().await })
    .await
    .map_err(|e| SentinelError::Server(format!("Server error: {e}")));

    services.shutdown().await;
    tracing::info!("Server stopped");
    served
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
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
        () = ctrl_c => {},
        () = terminate => {},
    }
}
