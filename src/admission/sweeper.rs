//! Periodic cleanup of in-memory admission state

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Owns the background sweep tasks
///
/// Every task stops when the shared token is cancelled. `shutdown` cancels
/// and joins them all.
pub struct Sweeper {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Sweeper {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            handles: Vec::new(),
        }
    }

    /// Run `sweep` every `period` until cancelled
    ///
    /// `sweep` returns how many entries it removed. A zero period spawns
    /// nothing.
    pub fn spawn<F>(&mut self, name: &'static str, period: Duration, sweep: F)
    where
        F: Fn() -> usize + Send + 'static,
    {
        self.spawn_async(name, period, move || std::future::ready(sweep()));
    }

    /// Like `spawn`, for sweeps that have to await a backend
    pub fn spawn_async<F, Fut>(&mut self, name: &'static str, period: Duration, sweep: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = usize> + Send + 'static,
    {
        if period.is_zero() {
            tracing::debug!(sweeper = name, "Sweeper disabled");
            return;
        }

        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = sweep().await;
                        if removed > 0 {
                            tracing::debug!(sweeper = name, removed, "Swept expired entries");
                        }
                    }
                }
            }

            tracing::debug!(sweeper = name, "Sweeper stopped");
        });

        self.handles.push(handle);
    }

    /// Number of running tasks
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Cancel every task and wait for it to finish
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Sweeper task failed");
            }
        }
    }
}
