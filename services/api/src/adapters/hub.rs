//! services/api/src/adapters/hub.rs
//!
//! In-process pub/sub for live chat. Each conversation id is a topic; stored
//! messages are broadcast to every WebSocket subscribed to it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use lemontree_core::domain::Message;
use lemontree_core::ports::MessagePublisher;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

const DEFAULT_CAPACITY: usize = 256;

/// Thread-safe, cloneable. Keyed by conversation id.
#[derive(Clone)]
pub struct ChatHub {
    channels: Arc<RwLock<HashMap<String, broadcast::Sender<Message>>>>,
    capacity: usize,
}

impl ChatHub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            capacity,
        }
    }

    /// Subscribes to a conversation, creating its channel if needed.
    pub async fn subscribe(&self, conversation_id: &str) -> broadcast::Receiver<Message> {
        let mut channels = self.channels.write().await;
        channels
            .entry(conversation_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Drops channels nobody listens to any more.
    pub async fn cleanup(&self) {
        let mut channels = self.channels.write().await;
        channels.retain(|_, tx| tx.receiver_count() > 0);
    }

    #[cfg(test)]
    pub(crate) async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }
}

impl Default for ChatHub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessagePublisher for ChatHub {
    async fn publish(&self, message: &Message) {
        let channels = self.channels.read().await;
        if let Some(tx) = channels.get(&message.conversation_id) {
            // No receivers left is fine.
            let delivered = tx.send(message.clone()).unwrap_or(0);
            debug!(conversation_id = %message.conversation_id, delivered, "Published message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn message(conversation_id: &str) -> Message {
        Message {
            id: Uuid::new_v4(),
            conversation_id: conversation_id.to_string(),
            sender_id: Uuid::new_v4(),
            body: "Still available?".to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn subscribers_receive_only_their_conversation() {
        let hub = ChatHub::new();
        let mut lamp = hub.subscribe("lamp").await;
        let mut desk = hub.subscribe("desk").await;

        let sent = message("lamp");
        hub.publish(&sent).await;

        assert_eq!(lamp.recv().await.unwrap(), sent);
        assert!(desk.try_recv().is_err());
    }

    #[tokio::test]
    async fn publishing_without_subscribers_is_a_no_op() {
        let hub = ChatHub::new();
        hub.publish(&message("nobody")).await;
        assert!(hub.channels.read().await.is_empty());
    }

    #[tokio::test]
    async fn cleanup_removes_abandoned_channels() {
        let hub = ChatHub::new();
        let rx = hub.subscribe("lamp").await;
        assert_eq!(hub.channels.read().await.len(), 1);

        drop(rx);
        hub.cleanup().await;
        assert!(hub.channels.read().await.is_empty());
    }
}
