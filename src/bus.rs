//! Single-channel event bus
//!
//! Every accepted alert is published once, as JSON, on one named channel.
//! Delivery is at-most-once: only subscriptions open at publish time see
//! the message, and nothing is replayed later.

use crate::error::Result;
use crate::provider::{AlertProvider, Subscription};
use crate::types::Alert;
use std::sync::Arc;

/// Default channel name for alert events
pub const DEFAULT_CHANNEL: &str = "alert_events";

/// Publish/subscribe handle over a provider channel
#[derive(Clone)]
pub struct EventBus {
    provider: Arc<dyn AlertProvider>,
    channel: String,
}

impl EventBus {
    /// Create a bus on the given channel
    pub fn new(provider: Arc<dyn AlertProvider>, channel: impl Into<String>) -> Self {
        Self {
            provider,
            channel: channel.into(),
        }
    }

    /// Channel name
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Publish an alert as JSON
    pub async fn publish(&self, alert: &Alert) -> Result<()> {
        let payload = serde_json::to_string(alert)?;
        self.publish_raw(&payload).await?;

        tracing::debug!(
            alert_id = alert.id,
            channel = %self.channel,
            "Alert published"
        );
        Ok(())
    }

    /// Publish a pre-serialized payload
    pub async fn publish_raw(&self, payload: &str) -> Result<()> {
        self.provider.publish(&self.channel, payload).await
    }

    /// Open a live subscription; the caller must `close` it when done
    pub async fn subscribe(&self) -> Result<Box<dyn Subscription>> {
        let sub = self.provider.subscribe(&self.channel).await?;
        tracing::debug!(channel = %self.channel, "Subscription opened");
        Ok(sub)
    }
}
