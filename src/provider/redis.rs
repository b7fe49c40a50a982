//! Redis alert provider
//!
//! Records live under `alert:<id>` with a TTL, the timeline is the sorted
//! set `alerts:timeline` (score = creation time in millis), and each
//! level/source value has a set `alerts:level:<v>` / `alerts:source:<v>`.
//! Pub/sub uses a dedicated connection per subscription.

use super::{AlertProvider, Subscription};
use crate::error::{Result, SentinelError};
use crate::types::{Alert, IndexKind};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use redis::aio::ConnectionManager;
use std::pin::Pin;
use std::time::Duration;

const NEXT_ID_KEY: &str = "alert:next_id";
const TIMELINE_KEY: &str = "alerts:timeline";
const SCAN_BATCH: usize = 500;

/// Redis connection settings
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Connection URL (`redis://[:password@]host:port/db`)
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379/0".to_string(),
        }
    }
}

/// Redis-backed provider
pub struct RedisProvider {
    client: redis::Client,
    conn: ConnectionManager,
}

impl RedisProvider {
    /// Connect and verify the server answers
    pub async fn connect(config: RedisConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| SentinelError::Config(format!("invalid redis url: {}", e)))?;

        let conn = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| SentinelError::Connection(format!("redis connect failed: {}", e)))?;

        let provider = Self { client, conn };
        provider.ping().await?;

        tracing::info!("Connected to Redis");
        Ok(provider)
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(keys)
    }

    async fn delete_keys(&self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        for chunk in keys.chunks(SCAN_BATCH) {
            let _: i64 = redis::cmd("DEL")
                .arg(chunk.to_vec())
                .query_async(&mut conn)
                .await?;
        }
        Ok(())
    }
}

fn parse_member(member: &str) -> Option<u64> {
    member.strip_prefix("alert:")?.parse().ok()
}

fn parse_members(members: Vec<String>) -> Vec<u64> {
    members.iter().filter_map(|m| parse_member(m)).collect()
}

#[async_trait]
impl AlertProvider for RedisProvider {
    async fn next_id(&self) -> Result<u64> {
        let mut conn = self.conn.clone();
        let id: u64 = redis::cmd("INCR")
            .arg(NEXT_ID_KEY)
            .query_async(&mut conn)
            .await?;
        Ok(id)
    }

    async fn put(&self, alert: &Alert, ttl: Duration) -> Result<()> {
        let data = serde_json::to_string(alert)?;
        let key = Alert::key(alert.id);
        let ttl_secs = ttl.as_secs().max(1);

        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.cmd("SET").arg(&key).arg(data).arg("EX").arg(ttl_secs).ignore();
        pipe.cmd("ZADD")
            .arg(TIMELINE_KEY)
            .arg(alert.timestamp_millis())
            .arg(&key)
            .ignore();

        for (kind, value) in [(IndexKind::Level, &alert.level), (IndexKind::Source, &alert.source)] {
            if value.is_empty() {
                continue;
            }
            let index_key = kind.key(value);
            pipe.cmd("SADD").arg(&index_key).arg(&key).ignore();
            pipe.cmd("EXPIRE").arg(&index_key).arg(ttl_secs).ignore();
        }

        let mut conn = self.conn.clone();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn get_many(&self, ids: &[u64]) -> Result<Vec<Option<Alert>>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<String> = ids.iter().map(|id| Alert::key(*id)).collect();
        let mut conn = self.conn.clone();
        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await?;

        Ok(values
            .into_iter()
            .map(|raw| {
                raw.and_then(|json| match serde_json::from_str::<Alert>(&json) {
                    Ok(alert) => Some(alert),
                    Err(e) => {
                        tracing::warn!(error = %e, "Skipping undecodable alert record");
                        None
                    }
                })
            })
            .collect())
    }

    async fn timeline(&self) -> Result<Vec<u64>> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = redis::cmd("ZREVRANGE")
            .arg(TIMELINE_KEY)
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await?;
        Ok(parse_members(members))
    }

    async fn remove_from_timeline(&self, ids: &[u64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let keys: Vec<String> = ids.iter().map(|id| Alert::key(*id)).collect();
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("ZREM")
            .arg(TIMELINE_KEY)
            .arg(&keys)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn intersect(&self, filters: &[(IndexKind, String)]) -> Result<Vec<u64>> {
        let keys: Vec<String> = filters.iter().map(|(kind, v)| kind.key(v)).collect();
        let mut conn = self.conn.clone();
        let members: Vec<String> = match keys.len() {
            0 => return Ok(Vec::new()),
            1 => {
                redis::cmd("SMEMBERS")
                    .arg(&keys[0])
                    .query_async(&mut conn)
                    .await?
            }
            _ => redis::cmd("SINTER").arg(&keys).query_async(&mut conn).await?,
        };
        Ok(parse_members(members))
    }

    async fn delete(&self, alerts: &[Alert]) -> Result<()> {
        if alerts.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for alert in alerts {
            let key = Alert::key(alert.id);
            pipe.cmd("DEL").arg(&key).ignore();
            pipe.cmd("ZREM").arg(TIMELINE_KEY).arg(&key).ignore();
            pipe.cmd("SREM")
                .arg(IndexKind::Level.key(&alert.level))
                .arg(&key)
                .ignore();
            pipe.cmd("SREM")
                .arg(IndexKind::Source.key(&alert.source))
                .arg(&key)
                .ignore();
        }

        let mut conn = self.conn.clone();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn purge_all(&self) -> Result<()> {
        let records: Vec<String> = self
            .scan_keys("alert:*")
            .await?
            .into_iter()
            .filter(|k| k != NEXT_ID_KEY)
            .collect();
        self.delete_keys(&records).await?;
        self.delete_keys(&[TIMELINE_KEY.to_string()]).await?;

        for kind in [IndexKind::Level, IndexKind::Source] {
            let index_keys = self.scan_keys(&format!("{}*", kind.prefix())).await?;
            self.delete_keys(&index_keys).await?;
        }

        tracing::info!(records = records.len(), "Purged all alerts");
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| SentinelError::Publish {
                channel: channel.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| SentinelError::Subscribe {
                channel: channel.to_string(),
                reason: e.to_string(),
            })?;
        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| SentinelError::Subscribe {
                channel: channel.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Box::new(RedisSubscription {
            messages: Box::pin(pubsub.into_on_message()),
            channel: channel.to_string(),
        }))
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    fn name(&self) -> &str {
        "redis"
    }
}

/// Redis pub/sub subscription; dropping it closes the dedicated connection
pub struct RedisSubscription {
    messages: Pin<Box<dyn Stream<Item = redis::Msg> + Send>>,
    channel: String,
}

#[async_trait]
impl Subscription for RedisSubscription {
    async fn next(&mut self) -> Result<Option<String>> {
        match self.messages.next().await {
            Some(msg) => Ok(Some(msg.get_payload::<String>()?)),
            None => Ok(None),
        }
    }

    async fn close(self: Box<Self>) -> Result<()> {
        tracing::debug!(channel = %self.channel, "Redis subscription closed");
        Ok(())
    }
}
