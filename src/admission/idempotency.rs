//! TTL cache of client-supplied idempotency keys
//!
//! Also backs the nonce replay cache for signed requests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Default retention for idempotency keys (10 minutes)
pub const DEFAULT_IDEMPOTENCY_TTL: Duration = Duration::from_secs(600);

/// Longest retention a filter will honour (30 days)
pub const MAX_IDEMPOTENCY_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Set of recently seen keys with fixed expiry
pub struct IdempotencyFilter {
    ttl: Duration,
    entries: Mutex<HashMap<String, Instant>>,
}

impl IdempotencyFilter {
    /// `ttl` is clamped to `MAX_IDEMPOTENCY_TTL`
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl: ttl.min(MAX_IDEMPOTENCY_TTL),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Report whether `key` was already seen within the TTL
    ///
    /// An empty key is never seen and is not recorded. A duplicate does not
    /// extend the original expiry.
    pub fn seen(&self, key: &str) -> bool {
        self.seen_at(key, Instant::now())
    }

    pub fn seen_at(&self, key: &str, now: Instant) -> bool {
        if key.is_empty() {
            return false;
        }

        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(expires_at) = entries.get(key) {
            if *expires_at > now {
                return true;
            }
        }

        entries.insert(key.to_string(), now + self.ttl);
        false
    }

    /// Remove expired entries, returning how many were dropped
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|_, expires_at| *expires_at > now);
        before - entries.len()
    }

    /// Number of tracked keys, expired or not
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for IdempotencyFilter {
    fn default() -> Self {
        Self::new(DEFAULT_IDEMPOTENCY_TTL)
    }
}
