//! In-memory alert provider
//!
//! Single-process backend for tests, development, and deployments that
//! don't need alerts to outlive the process. Expiry uses the tokio clock,
//! so tests can drive it with `tokio::time::pause` and `advance`.

use super::{AlertProvider, Subscription};
use crate::error::Result;
use crate::types::{Alert, IndexKind};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::time::Instant;

/// Configuration for the in-memory provider
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Per-channel broadcast buffer; slower subscribers skip older messages
    pub channel_capacity: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
        }
    }
}

struct Record {
    alert: Alert,
    expires_at: Instant,
}

struct IndexSet {
    members: HashSet<u64>,
    expires_at: Instant,
}

#[derive(Default)]
struct State {
    records: HashMap<u64, Record>,
    /// (timestamp millis, id) ascending; read in reverse for newest-first
    timeline: BTreeSet<(i64, u64)>,
    scores: HashMap<u64, i64>,
    indices: HashMap<String, IndexSet>,
}

impl State {
    fn unlink_timeline(&mut self, id: u64) {
        if let Some(score) = self.scores.remove(&id) {
            self.timeline.remove(&(score, id));
        }
    }

    fn live_index(&mut self, key: &str, now: Instant) -> Option<&HashSet<u64>> {
        let expired = self.indices.get(key).map(|s| s.expires_at <= now)?;
        if expired {
            self.indices.remove(key);
            return None;
        }
        self.indices.get(key).map(|s| &s.members)
    }

    fn remove_index_member(&mut self, key: &str, id: u64) {
        if let Some(set) = self.indices.get_mut(key) {
            set.members.remove(&id);
            if set.members.is_empty() {
                self.indices.remove(key);
            }
        }
    }

    fn unlink_indices(&mut self, alert: &Alert) {
        self.remove_index_member(&IndexKind::Level.key(&alert.level), alert.id);
        self.remove_index_member(&IndexKind::Source.key(&alert.source), alert.id);
    }

    /// Drop expired records everywhere they are referenced, then expired sets
    fn sweep(&mut self, now: Instant) -> usize {
        let expired: Vec<u64> = self
            .records
            .iter()
            .filter(|(_, r)| r.expires_at <= now)
            .map(|(id, _)| *id)
            .collect();

        for id in &expired {
            if let Some(record) = self.records.remove(id) {
                self.unlink_timeline(*id);
                self.unlink_indices(&record.alert);
            }
        }
        self.indices.retain(|_, set| set.expires_at > now);

        expired.len()
    }
}

/// In-memory provider
pub struct MemoryProvider {
    state: RwLock<State>,
    next_id: AtomicU64,
    channels: std::sync::Mutex<HashMap<String, broadcast::Sender<String>>>,
    config: MemoryConfig,
}

impl MemoryProvider {
    /// Create a provider with custom configuration
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            state: RwLock::new(State::default()),
            next_id: AtomicU64::new(0),
            channels: std::sync::Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Number of live (non-expired) records
    pub async fn record_count(&self) -> usize {
        let now = Instant::now();
        let state = self.state.read().await;
        state.records.values().filter(|r| r.expires_at > now).count()
    }

    /// Number of identities currently on the timeline, expired or not
    pub async fn timeline_len(&self) -> usize {
        self.state.read().await.timeline.len()
    }

    /// Number of index sets currently held
    pub async fn index_count(&self) -> usize {
        self.state.read().await.indices.len()
    }

    /// Number of records held, expired or not
    pub async fn stored_len(&self) -> usize {
        self.state.read().await.records.len()
    }

    /// Number of open subscriptions on `channel`
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(channel)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        let mut channels = self
            .channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.config.channel_capacity).0)
            .clone()
    }
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new(MemoryConfig::default())
    }
}

#[async_trait]
impl AlertProvider for MemoryProvider {
    async fn next_id(&self) -> Result<u64> {
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn put(&self, alert: &Alert, ttl: Duration) -> Result<()> {
        let expires_at = Instant::now() + ttl.min(crate::store::MAX_RETENTION);
        let score = alert.timestamp_millis();
        let mut state = self.state.write().await;

        state.records.insert(
            alert.id,
            Record {
                alert: alert.clone(),
                expires_at,
            },
        );
        state.timeline.insert((score, alert.id));
        state.scores.insert(alert.id, score);

        for (kind, value) in [(IndexKind::Level, &alert.level), (IndexKind::Source, &alert.source)] {
            if value.is_empty() {
                continue;
            }
            let set = state.indices.entry(kind.key(value)).or_insert_with(|| IndexSet {
                members: HashSet::new(),
                expires_at,
            });
            set.members.insert(alert.id);
            set.expires_at = expires_at;
        }

        Ok(())
    }

    async fn get_many(&self, ids: &[u64]) -> Result<Vec<Option<Alert>>> {
        let now = Instant::now();
        let mut state = self.state.write().await;
        let mut out = Vec::with_capacity(ids.len());

        for id in ids {
            let expired = match state.records.get(id) {
                Some(record) if record.expires_at > now => {
                    out.push(Some(record.alert.clone()));
                    continue;
                }
                Some(_) => true,
                None => false,
            };
            if expired {
                if let Some(record) = state.records.remove(id) {
                    state.unlink_indices(&record.alert);
                }
            }
            out.push(None);
        }

        Ok(out)
    }

    async fn timeline(&self) -> Result<Vec<u64>> {
        let state = self.state.read().await;
        Ok(state.timeline.iter().rev().map(|(_, id)| *id).collect())
    }

    async fn remove_from_timeline(&self, ids: &[u64]) -> Result<()> {
        let mut state = self.state.write().await;
        for id in ids {
            state.unlink_timeline(*id);
        }
        Ok(())
    }

    async fn intersect(&self, filters: &[(IndexKind, String)]) -> Result<Vec<u64>> {
        let now = Instant::now();
        let mut state = self.state.write().await;

        let mut result: Option<HashSet<u64>> = None;
        for (kind, value) in filters {
            let members = match state.live_index(&kind.key(value), now) {
                Some(members) => members.clone(),
                None => return Ok(Vec::new()),
            };
            result = Some(match result {
                Some(acc) => acc.intersection(&members).copied().collect(),
                None => members,
            });
        }

        Ok(result.map(|s| s.into_iter().collect()).unwrap_or_default())
    }

    async fn delete(&self, alerts: &[Alert]) -> Result<()> {
        let mut state = self.state.write().await;
        for alert in alerts {
            state.records.remove(&alert.id);
            state.unlink_timeline(alert.id);
            state.unlink_indices(alert);
        }
        Ok(())
    }

    async fn purge_all(&self) -> Result<()> {
        let mut state = self.state.write().await;
        *state = State::default();
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        // No receivers is fine: delivery is to whoever is listening now.
        let _ = self.sender(channel).send(payload.to_string());
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>> {
        let rx = self.sender(channel).subscribe();
        Ok(Box::new(MemorySubscription {
            rx,
            channel: channel.to_string(),
        }))
    }

    async fn sweep_expired(&self) -> Result<usize> {
        let now = Instant::now();
        Ok(self.state.write().await.sweep(now))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Broadcast-backed subscription for the in-memory provider
pub struct MemorySubscription {
    rx: broadcast::Receiver<String>,
    channel: String,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next(&mut self) -> Result<Option<String>> {
        loop {
            match self.rx.recv().await {
                Ok(msg) => return Ok(Some(msg)),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(channel = %self.channel, skipped = n, "Subscriber lagged, skipped messages");
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(None),
            }
        }
    }

    async fn close(self: Box<Self>) -> Result<()> {
        tracing::debug!(channel = %self.channel, "Memory subscription closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: Duration = Duration::from_secs(86_400);

    fn alert(id: u64, level: &str, source: &str) -> Alert {
        Alert::new(id, source, level, format!("title {}", id), "body")
    }

    #[tokio::test]
    async fn test_next_id_is_monotonic() {
        let provider = MemoryProvider::default();
        assert_eq!(provider.next_id().await.unwrap(), 1);
        assert_eq!(provider.next_id().await.unwrap(), 2);
        assert_eq!(provider.next_id().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_put_and_get_many_preserves_order() {
        let provider = MemoryProvider::default();
        provider.put(&alert(1, "info", "a"), DAY).await.unwrap();
        provider.put(&alert(2, "info", "a"), DAY).await.unwrap();

        let got = provider.get_many(&[2, 99, 1]).await.unwrap();
        assert_eq!(got[0].as_ref().unwrap().id, 2);
        assert!(got[1].is_none());
        assert_eq!(got[2].as_ref().unwrap().id, 1);
    }

    #[tokio::test]
    async fn test_intersect_single_and_multiple() {
        let provider = MemoryProvider::default();
        provider.put(&alert(1, "warning", "x"), DAY).await.unwrap();
        provider.put(&alert(2, "warning", "y"), DAY).await.unwrap();
        provider.put(&alert(3, "critical", "x"), DAY).await.unwrap();

        let mut warn = provider
            .intersect(&[(IndexKind::Level, "WARNING".into())])
            .await
            .unwrap();
        warn.sort();
        assert_eq!(warn, vec![1, 2]);

        let both = provider
            .intersect(&[
                (IndexKind::Level, "warning".into()),
                (IndexKind::Source, "x".into()),
            ])
            .await
            .unwrap();
        assert_eq!(both, vec![1]);

        let none = provider
            .intersect(&[(IndexKind::Level, "missing".into())])
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_records_and_indices_expire() {
        let provider = MemoryProvider::default();
        provider
            .put(&alert(1, "info", "a"), Duration::from_secs(60))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;

        assert!(provider.get_many(&[1]).await.unwrap()[0].is_none());
        assert!(provider
            .intersect(&[(IndexKind::Level, "info".into())])
            .await
            .unwrap()
            .is_empty());
        // Timeline entries are only dropped when a reader notices
        assert_eq!(provider.timeline_len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_reclaims_expired_records_and_indices() {
        let provider = MemoryProvider::default();
        provider
            .put(&alert(1, "info", "a"), Duration::from_secs(60))
            .await
            .unwrap();
        provider
            .put(&alert(2, "critical", "b"), Duration::from_secs(60))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;
        provider.put(&alert(3, "info", "c"), DAY).await.unwrap();

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(provider.stored_len().await, 3);

        assert_eq!(provider.sweep_expired().await.unwrap(), 2);
        assert_eq!(provider.stored_len().await, 1);
        assert_eq!(provider.timeline().await.unwrap(), vec![3]);
        // Only level:info and source:c still have live members
        assert_eq!(provider.index_count().await, 2);
        assert_eq!(
            provider
                .intersect(&[(IndexKind::Level, "info".into())])
                .await
                .unwrap(),
            vec![3]
        );

        assert_eq!(provider.sweep_expired().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_read_unlinks_index_members() {
        let provider = MemoryProvider::default();
        provider
            .put(&alert(1, "info", "a"), Duration::from_secs(10))
            .await
            .unwrap();
        provider.put(&alert(2, "info", "b"), DAY).await.unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(provider.get_many(&[1]).await.unwrap()[0].is_none());

        assert_eq!(
            provider
                .intersect(&[(IndexKind::Level, "info".into())])
                .await
                .unwrap(),
            vec![2]
        );
    }

    #[tokio::test]
    async fn test_oversized_ttl_is_clamped() {
        let provider = MemoryProvider::default();
        provider.put(&alert(1, "info", "a"), Duration::MAX).await.unwrap();
        assert_eq!(provider.record_count().await, 1);
    }

    #[tokio::test]
    async fn test_delete_removes_index_membership() {
        let provider = MemoryProvider::default();
        let a = alert(1, "info", "bot:a:chat:42");
        let b = alert(2, "info", "bot:b:chat:7");
        provider.put(&a, DAY).await.unwrap();
        provider.put(&b, DAY).await.unwrap();

        provider.delete(&[a]).await.unwrap();

        assert_eq!(provider.timeline().await.unwrap(), vec![2]);
        let info = provider
            .intersect(&[(IndexKind::Level, "info".into())])
            .await
            .unwrap();
        assert_eq!(info, vec![2]);
        assert!(provider
            .intersect(&[(IndexKind::Source, "bot:a:chat:42".into())])
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_purge_all_keeps_counter() {
        let provider = MemoryProvider::default();
        let id = provider.next_id().await.unwrap();
        provider.put(&alert(id, "info", "a"), DAY).await.unwrap();

        provider.purge_all().await.unwrap();

        assert_eq!(provider.record_count().await, 0);
        assert_eq!(provider.timeline_len().await, 0);
        assert_eq!(provider.index_count().await, 0);
        assert_eq!(provider.next_id().await.unwrap(), id + 1);
    }

    #[tokio::test]
    async fn test_publish_reaches_only_active_subscribers() {
        let provider = MemoryProvider::default();
        provider.publish("ch", "before").await.unwrap();

        let mut sub = provider.subscribe("ch").await.unwrap();
        provider.publish("ch", "after").await.unwrap();
        provider.publish("other", "elsewhere").await.unwrap();

        assert_eq!(sub.next().await.unwrap().as_deref(), Some("after"));
        sub.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_lagged_subscriber_skips_ahead() {
        let provider = MemoryProvider::new(MemoryConfig {
            channel_capacity: 2,
        });
        let mut sub = provider.subscribe("ch").await.unwrap();
        for i in 0..5 {
            provider.publish("ch", &i.to_string()).await.unwrap();
        }
        assert_eq!(sub.next().await.unwrap().as_deref(), Some("3"));
        assert_eq!(sub.next().await.unwrap().as_deref(), Some("4"));
    }
}
