//! # alert-sentinel
//!
//! Webhook alert ingestion with admission control, a TTL-bound alert store,
//! and live fan-out to connected viewers.
//!
//! ## Overview
//!
//! Inbound alerts pass an admission chain (per-client rate limit,
//! idempotency-key dedup, HMAC signature check), are normalized into a
//! uniform record, written to the store with a retention TTL, and published
//! on an event bus. Every open `/events` stream receives each accepted alert.
//!
//! ## Quick Start
//!
//! ```rust
//! use alert_sentinel::{AlertStore, MemoryProvider};
//!
//! # async fn example() -> alert_sentinel::Result<()> {
//! let store = AlertStore::new(MemoryProvider::default());
//!
//! let alert = store.add("grafana", "critical", "CPU high", "node-3 at 98%").await?;
//! println!("Stored alert {}", alert.id);
//!
//! let hits = store.search("cpu", "critical", "").await?;
//! assert_eq!(hits.len(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Providers
//!
//! - **memory**: In-process provider for tests and single-node use
//! - **redis**: Redis keys, sets, a sorted-set timeline, and pub/sub
//!
//! ## Architecture
//!
//! - **AdmissionChain**: rate limiter, idempotency filter, signature validator
//! - **AlertStore**: id assignment, indexed writes, list and search
//! - **EventBus**: publish/subscribe over the provider's channel
//! - **AlertProvider** trait: storage and pub/sub abstraction

pub mod admission;
pub mod api;
pub mod bus;
pub mod collab;
pub mod config;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod provider;
pub mod server;
pub mod store;
pub mod types;

// Re-export core types
pub use admission::{AdmissionChain, IdempotencyFilter, RateLimiter, Rejection, SignatureValidator};
pub use bus::EventBus;
pub use config::SentinelConfig;
pub use error::{Result, SentinelError};
pub use provider::{AlertProvider, Subscription};
pub use store::{AlertStore, StoreOptions};
pub use types::{Alert, AlertList, IngestResponse, PurgeResponse, PurgeScope};

// Re-export providers for convenience
pub use provider::memory::{MemoryConfig, MemoryProvider};
pub use provider::redis::{RedisConfig, RedisProvider};
