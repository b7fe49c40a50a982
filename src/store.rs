//! Alert store built on pluggable providers
//!
//! `AlertStore` assigns identities, applies the retention TTL, keeps the
//! timeline and level/source indices in step with the records, answers
//! list/search queries, and publishes every accepted alert on the bus
//! once it has been written.

use crate::bus::{EventBus, DEFAULT_CHANNEL};
use crate::error::{Result, SentinelError};
use crate::provider::AlertProvider;
use crate::types::{sort_newest_first, Alert, IndexKind};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Retention applied to every alert (30 days)
pub const ALERT_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Longest retention a store will apply (10 years)
pub const MAX_RETENTION: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// Default deadline for a single backend operation
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(5);

/// Tunables for an `AlertStore`
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Record lifetime
    pub retention: Duration,
    /// Per-operation deadline against the backend
    pub op_timeout: Duration,
    /// Bus channel name
    pub channel: String,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            retention: ALERT_TTL,
            op_timeout: DEFAULT_OP_TIMEOUT,
            channel: DEFAULT_CHANNEL.to_string(),
        }
    }
}

/// High-level alert store backed by a pluggable provider
pub struct AlertStore {
    provider: Arc<dyn AlertProvider>,
    bus: EventBus,
    options: StoreOptions,
}

impl AlertStore {
    /// Create a store with default options
    pub fn new(provider: impl AlertProvider + 'static) -> Self {
        Self::with_options(Arc::new(provider), StoreOptions::default())
    }

    /// Create a store over a shared provider
    ///
    /// Retention is clamped to `MAX_RETENTION`.
    pub fn with_options(provider: Arc<dyn AlertProvider>, mut options: StoreOptions) -> Self {
        options.retention = options.retention.min(MAX_RETENTION);
        let bus = EventBus::new(provider.clone(), options.channel.clone());
        Self {
            provider,
            bus,
            options,
        }
    }

    /// The bus alerts are published on
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Provider name
    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Retention applied to new alerts
    pub fn retention(&self) -> Duration {
        self.options.retention
    }

    /// Run a backend operation under the store deadline
    async fn guarded<T>(&self, op: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        guarded(op, self.options.op_timeout, fut).await
    }

    /// Record a new alert and publish it
    ///
    /// The write and the publish run on their own task, so dropping the
    /// returned future (client gone, outer timeout) never leaves a stored
    /// alert unpublished.
    pub async fn add(
        &self,
        source: &str,
        level: &str,
        title: &str,
        message: &str,
    ) -> Result<Alert> {
        let provider = self.provider.clone();
        let bus = self.bus.clone();
        let retention = self.options.retention;
        let deadline = self.options.op_timeout;
        let (source, level, title, message) = (
            source.to_string(),
            level.to_string(),
            title.to_string(),
            message.to_string(),
        );

        let task = tokio::spawn(async move {
            let id = guarded("next_id", deadline, provider.next_id()).await?;
            let alert = Alert::new(id, &source, &level, &title, &message);

            guarded("put", deadline, provider.put(&alert, retention)).await?;

            // The record is durable at this point; a lost publish only costs
            // live viewers one frame.
            if let Err(e) = guarded("publish", deadline, bus.publish(&alert)).await {
                tracing::warn!(alert_id = alert.id, error = %e, "Failed to publish alert event");
            }

            tracing::info!(
                alert_id = alert.id,
                source = %alert.source,
                level = %alert.level,
                "Alert stored"
            );
            Ok(alert)
        });

        task.await
            .map_err(|e| SentinelError::Backend(format!("add task failed: {}", e)))?
    }

    /// All live alerts, newest first
    ///
    /// Timeline entries whose record has expired are dropped on the way.
    pub async fn list(&self) -> Result<Vec<Alert>> {
        let ids = self.guarded("timeline", self.provider.timeline()).await?;
        let records = self.guarded("get_many", self.provider.get_many(&ids)).await?;

        let mut alerts = Vec::with_capacity(records.len());
        let mut stale = Vec::new();
        for (id, record) in ids.iter().zip(records) {
            match record {
                Some(alert) => alerts.push(alert),
                None => stale.push(*id),
            }
        }

        if !stale.is_empty() {
            tracing::debug!(count = stale.len(), "Dropping expired timeline entries");
            // The read already succeeded; cleanup is retried on the next one
            if let Err(e) = self
                .guarded("remove_from_timeline", self.provider.remove_from_timeline(&stale))
                .await
            {
                tracing::warn!(count = stale.len(), error = %e, "Failed to drop expired timeline entries");
            }
        }

        sort_newest_first(&mut alerts);
        Ok(alerts)
    }

    /// Filtered search
    ///
    /// `level` and `source` narrow through the indices (intersection when
    /// both are set); `query` is a case-insensitive substring over title,
    /// message, and source. Empty strings mean "no filter".
    pub async fn search(&self, query: &str, level: &str, source: &str) -> Result<Vec<Alert>> {
        let mut filters = Vec::new();
        if !level.is_empty() {
            filters.push((IndexKind::Level, level.to_string()));
        }
        if !source.is_empty() {
            filters.push((IndexKind::Source, source.to_string()));
        }

        let ids = if filters.is_empty() {
            self.guarded("timeline", self.provider.timeline()).await?
        } else {
            self.guarded("intersect", self.provider.intersect(&filters))
                .await?
        };

        let records = self.guarded("get_many", self.provider.get_many(&ids)).await?;
        let mut alerts: Vec<Alert> = records
            .into_iter()
            .flatten()
            .filter(|a| a.matches_text(query))
            .collect();

        sort_newest_first(&mut alerts);
        Ok(alerts)
    }

    /// Delete every alert and every index
    pub async fn purge_all(&self) -> Result<()> {
        self.guarded("purge_all", self.provider.purge_all()).await?;
        tracing::info!("All alerts purged");
        Ok(())
    }

    /// Delete alerts whose source contains `chat:<chat_tag>`
    ///
    /// Returns the number of alerts removed.
    pub async fn purge_by_chat(&self, chat_tag: &str) -> Result<usize> {
        let ids = self.guarded("timeline", self.provider.timeline()).await?;
        let records = self.guarded("get_many", self.provider.get_many(&ids)).await?;

        let doomed: Vec<Alert> = records
            .into_iter()
            .flatten()
            .filter(|a| a.belongs_to_chat(chat_tag))
            .collect();

        self.guarded("delete", self.provider.delete(&doomed)).await?;

        tracing::info!(chat = %chat_tag, count = doomed.len(), "Alerts purged for chat");
        Ok(doomed.len())
    }

    /// Drop expired records and index members from the backend
    ///
    /// Returns how many records were reclaimed.
    pub async fn sweep_expired(&self) -> Result<usize> {
        self.guarded("sweep_expired", self.provider.sweep_expired()).await
    }

    /// Backend liveness check
    pub async fn ping(&self) -> Result<()> {
        self.guarded("ping", self.provider.ping()).await
    }
}

async fn guarded<T>(op: &str, deadline: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(SentinelError::Timeout(format!("{} exceeded {:?}", op, deadline))),
    }
}
