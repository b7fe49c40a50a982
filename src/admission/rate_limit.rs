//! Per-client token bucket rate limiter

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Token bucket parameters
#[derive(Debug, Clone, Copy)]
pub struct RateLimitSettings {
    /// Tokens added per refill period
    pub rate: f64,
    /// Bucket capacity
    pub burst: f64,
    /// Refill period
    pub refill: Duration,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            rate: 60.0,
            burst: 30.0,
            refill: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    last: Instant,
}

/// Token bucket limiter keyed by client
///
/// Buckets are created lazily with `burst - 1` tokens, the first request
/// paying for itself. Refill is continuous and clamped to `burst`.
pub struct RateLimiter {
    settings: RateLimitSettings,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new(settings: RateLimitSettings) -> Self {
        Self {
            settings,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> RateLimitSettings {
        self.settings
    }

    /// Decide whether `key` may proceed now
    pub fn allow(&self, key: &str) -> bool {
        self.allow_at(key, Instant::now())
    }

    /// Decide whether `key` may proceed at `now`
    pub fn allow_at(&self, key: &str, now: Instant) -> bool {
        let RateLimitSettings {
            rate,
            burst,
            refill,
        } = self.settings;
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());

        let Some(bucket) = buckets.get_mut(key) else {
            if burst < 1.0 {
                return false;
            }
            buckets.insert(
                key.to_string(),
                Bucket {
                    tokens: burst - 1.0,
                    last: now,
                },
            );
            return true;
        };

        let elapsed = now.saturating_duration_since(bucket.last).as_secs_f64();
        let period = refill.as_secs_f64();
        let refilled = if period > 0.0 {
            bucket.tokens + rate * elapsed / period
        } else {
            burst
        };
        let tokens = refilled.min(burst);

        if tokens < 1.0 {
            return false;
        }

        bucket.tokens = tokens - 1.0;
        bucket.last = now;
        true
    }

    /// Evict buckets idle for at least `max_idle` that have fully refilled
    ///
    /// A full idle bucket behaves exactly like a fresh one, so eviction
    /// never changes a later decision. Returns the number removed.
    pub fn sweep_idle(&self, max_idle: Duration) -> usize {
        self.sweep_idle_at(max_idle, Instant::now())
    }

    pub fn sweep_idle_at(&self, max_idle: Duration, now: Instant) -> usize {
        let RateLimitSettings {
            rate,
            burst,
            refill,
        } = self.settings;
        let period = refill.as_secs_f64();
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let before = buckets.len();

        buckets.retain(|_, bucket| {
            let idle = now.saturating_duration_since(bucket.last);
            if idle < max_idle {
                return true;
            }
            let projected = if period > 0.0 {
                bucket.tokens + rate * idle.as_secs_f64() / period
            } else {
                burst
            };
            projected < burst
        });

        before - buckets.len()
    }

    /// Number of tracked clients
    pub fn len(&self) -> usize {
        self.buckets.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    fn tokens(&self, key: &str) -> Option<f64> {
        self.buckets
            .lock()
            .unwrap()
            .get(key)
            .map(|bucket| bucket.tokens)
    }
}
