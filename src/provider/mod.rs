//! Alert provider trait, the core abstraction for storage backends
//!
//! A provider is a key-value store with secondary sets, a time-ordered
//! index, and a publish/subscribe channel (Redis, in-memory). The
//! `AlertStore` and `EventBus` drive all operations through it.

use crate::error::Result;
use crate::types::{Alert, IndexKind};
use async_trait::async_trait;
use std::time::Duration;

pub mod memory;
pub mod redis;

/// Core trait for alert backends
///
/// Implementations own record persistence, TTL enforcement, index
/// maintenance, and message fan-out. Missing or expired records are
/// reported as `None`, never as errors.
#[async_trait]
pub trait AlertProvider: Send + Sync {
    /// Atomically assign the next alert identity
    async fn next_id(&self) -> Result<u64>;

    /// Write a record together with its timeline and index entries
    ///
    /// Level/source index sets are re-stamped with the same TTL as the record.
    async fn put(&self, alert: &Alert, ttl: Duration) -> Result<()>;

    /// Fetch records by id, preserving input order (`None` = absent or expired)
    async fn get_many(&self, ids: &[u64]) -> Result<Vec<Option<Alert>>>;

    /// All timeline identities, newest first
    async fn timeline(&self) -> Result<Vec<u64>>;

    /// Drop identities from the timeline
    async fn remove_from_timeline(&self, ids: &[u64]) -> Result<()>;

    /// Members of the intersection of the given index sets
    ///
    /// A single filter returns that set's members. An empty filter list
    /// returns nothing.
    async fn intersect(&self, filters: &[(IndexKind, String)]) -> Result<Vec<u64>>;

    /// Delete records and remove them from the timeline and their index sets
    async fn delete(&self, alerts: &[Alert]) -> Result<()>;

    /// Delete every record, the timeline, and every index set
    ///
    /// The identity counter is kept so ids never repeat.
    async fn purge_all(&self) -> Result<()>;

    /// Publish a payload to a named channel (best effort, non-durable)
    async fn publish(&self, channel: &str, payload: &str) -> Result<()>;

    /// Open a live subscription on a named channel
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>>;

    /// Reclaim expired records and stale index members
    ///
    /// Backends with native key expiry have nothing to do. Returns the
    /// number of records removed.
    async fn sweep_expired(&self) -> Result<usize> {
        Ok(0)
    }

    /// Liveness check against the backend
    async fn ping(&self) -> Result<()>;

    /// Provider name (e.g., "redis", "memory")
    fn name(&self) -> &str;
}

/// Live receive handle on a channel
///
/// Only messages published while the handle is open are delivered.
/// Call `close` when the consumer goes away.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next message; `None` once the channel is gone
    async fn next(&mut self) -> Result<Option<String>>;

    /// Release the subscription
    async fn close(self: Box<Self>) -> Result<()>;
}
