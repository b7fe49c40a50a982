use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::admission::{AdmissionChain, AdminGuard};
use crate::collab::BotDirectory;
use crate::metrics::SentinelMetrics;
use crate::store::AlertStore;

/// Shared application state accessible to all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<AlertStore>,
    pub admission: Arc<AdmissionChain>,
    /// Bearer-token gate for the purge routes
    pub admin: Arc<AdminGuard>,
    pub bots: Arc<dyn BotDirectory>,
    pub metrics: Arc<SentinelMetrics>,
    /// Fired on process shutdown; ends open streams
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        store: Arc<AlertStore>,
        admission: Arc<AdmissionChain>,
        admin: Arc<AdminGuard>,
        bots: Arc<dyn BotDirectory>,
        metrics: Arc<SentinelMetrics>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            admission,
            admin,
            bots,
            metrics,
            shutdown,
        }
    }
}
