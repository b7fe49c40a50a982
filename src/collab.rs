//! External collaborators
//!
//! The bot/chat directory and the push notifier live outside this
//! service. They are modelled as traits with in-process defaults so the
//! relay endpoints and the notification fan-out can run standalone.

use crate::bus::EventBus;
use crate::types::Alert;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Fallback notification text for payloads that do not decode
pub const GENERIC_NOTIFICATION: &str = "New Incident Alert Received!";

// ─── Bots ───

/// A relay bot known to the directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bot {
    pub name: String,
    pub token: String,
    /// Chat ids this bot relays for
    #[serde(default)]
    pub chats: Vec<String>,
}

/// Random bot token: 32 bytes, hex encoded
pub fn generate_token() -> String {
    let bytes: [u8; 32] = rand::random();
    hex::encode(bytes)
}

/// Resolves opaque bot tokens to bot identities
#[async_trait]
pub trait BotDirectory: Send + Sync {
    /// Look up a bot by token
    async fn resolve(&self, token: &str) -> Option<Bot>;

    /// Add or replace a bot
    async fn register(&self, bot: Bot);

    /// Create a bot with a fresh token
    async fn create(&self, name: &str) -> Bot {
        let bot = Bot {
            name: name.to_string(),
            token: generate_token(),
            chats: Vec::new(),
        };
        self.register(bot.clone()).await;
        bot
    }

    /// Attach a chat to a bot; false if the token is unknown
    async fn register_chat(&self, token: &str, chat_id: &str) -> bool;

    /// All bots
    async fn bots(&self) -> Vec<Bot>;
}

/// In-memory bot directory
#[derive(Default)]
pub struct MemoryBotDirectory {
    bots: RwLock<HashMap<String, Bot>>,
}

impl MemoryBotDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory pre-populated with `bots`
    pub fn seeded(bots: impl IntoIterator<Item = Bot>) -> Self {
        let bots = bots
            .into_iter()
            .map(|bot| (bot.token.clone(), bot))
            .collect();
        Self {
            bots: RwLock::new(bots),
        }
    }
}

#[async_trait]
impl BotDirectory for MemoryBotDirectory {
    async fn resolve(&self, token: &str) -> Option<Bot> {
        if token.is_empty() {
            return None;
        }
        self.bots.read().await.get(token).cloned()
    }

    async fn register(&self, bot: Bot) {
        tracing::info!(bot = %bot.name, "Bot registered");
        self.bots.write().await.insert(bot.token.clone(), bot);
    }

    async fn register_chat(&self, token: &str, chat_id: &str) -> bool {
        let mut bots = self.bots.write().await;
        match bots.get_mut(token) {
            Some(bot) => {
                if !bot.chats.iter().any(|c| c == chat_id) {
                    bot.chats.push(chat_id.to_string());
                }
                true
            }
            None => false,
        }
    }

    async fn bots(&self) -> Vec<Bot> {
        let mut bots: Vec<Bot> = self.bots.read().await.values().cloned().collect();
        bots.sort_by(|a, b| a.name.cmp(&b.name));
        bots
    }
}

// ─── Notifications ───

/// Push notification sink
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, message: &str) -> crate::Result<()>;

    fn name(&self) -> &str;
}

/// Notifier that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, message: &str) -> crate::Result<()> {
        tracing::info!(notification = %message, "Notification delivered");
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Text pushed for a bus payload
pub fn notification_text(payload: &str) -> String {
    match serde_json::from_str::<Alert>(payload) {
        Ok(alert) => format!("🚨 {}: {}", alert.title, alert.message),
        Err(_) => GENERIC_NOTIFICATION.to_string(),
    }
}

/// Forward every bus event to `notifier` until `cancel` fires
///
/// Delivery failures are logged and skipped.
pub fn spawn_notification_listener(
    bus: EventBus,
    notifier: Arc<dyn Notifier>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut sub = match bus.subscribe().await {
            Ok(sub) => sub,
            Err(e) => {
                tracing::error!(error = %e, "Notification listener failed to subscribe");
                return;
            }
        };
        tracing::info!(notifier = notifier.name(), "Notification listener started");

        loop {
            let payload = tokio::select! {
                _ = cancel.cancelled() => break,
                next = sub.next() => match next {
                    Ok(Some(payload)) => payload,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "Notification listener receive failed");
                        break;
                    }
                },
            };

            if let Err(e) = notifier.deliver(&notification_text(&payload)).await {
                tracing::warn!(notifier = notifier.name(), error = %e, "Notification delivery failed");
            }
        }

        if let Err(e) = sub.close().await {
            tracing::debug!(error = %e, "Failed to close notification subscription");
        }
        tracing::info!("Notification listener stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::memory::MemoryProvider;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingNotifier {
        messages: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn deliver(&self, message: &str) -> crate::Result<()> {
            self.messages.lock().unwrap().push(message.to_string());
            Ok(())
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    #[test]
    fn test_generate_token_shape() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_directory_resolve_and_create() {
        let dir = MemoryBotDirectory::seeded(vec![Bot {
            name: "ops".into(),
            token: "tok".into(),
            chats: vec!["42".into()],
        }]);

        assert_eq!(dir.resolve("tok").await.unwrap().name, "ops");
        assert!(dir.resolve("nope").await.is_none());
        assert!(dir.resolve("").await.is_none());

        let created = dir.create("infra").await;
        assert_eq!(dir.resolve(&created.token).await.unwrap().name, "infra");
        assert_eq!(dir.bots().await.len(), 2);
    }

    #[tokio::test]
    async fn test_register_chat() {
        let dir = MemoryBotDirectory::new();
        let bot = dir.create("ops").await;

        assert!(dir.register_chat(&bot.token, "7").await);
        assert!(dir.register_chat(&bot.token, "7").await);
        assert!(!dir.register_chat("missing", "7").await);
        assert_eq!(dir.resolve(&bot.token).await.unwrap().chats, vec!["7"]);
    }

    #[test]
    fn test_notification_text() {
        let alert = Alert::new(1, "x", "critical", "Disk Full", "sda1");
        let payload = serde_json::to_string(&alert).unwrap();
        assert_eq!(notification_text(&payload), "🚨 Disk Full: sda1");
        assert_eq!(notification_text("garbage"), GENERIC_NOTIFICATION);
    }

    #[tokio::test]
    async fn test_listener_forwards_until_cancelled() {
        let bus = EventBus::new(Arc::new(MemoryProvider::default()), "alerts");
        let notifier = Arc::new(RecordingNotifier::default());
        let cancel = CancellationToken::new();

        let handle = spawn_notification_listener(bus.clone(), notifier.clone(), cancel.clone());

        // Wait for the listener to subscribe
        tokio::time::sleep(Duration::from_millis(50)).await;
        bus.publish(&Alert::new(1, "x", "info", "CPU High", "95%"))
            .await
            .unwrap();

        for _ in 0..50 {
            if !notifier.messages.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(
            notifier.messages.lock().unwrap().as_slice(),
            &["🚨 CPU High: 95%".to_string()]
        );

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
