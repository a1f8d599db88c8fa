//! crates/lemontree_core/src/messaging.rs
//!
//! Conversations between a requester and an item owner.

use std::sync::Arc;

use chrono::{SubsecRound, Utc};
use futures::future::try_join_all;
use serde_json::json;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::{Conversation, ConversationSummary, Message, SessionContext, User};
use crate::notify::{Notifier, APP_NAME};
use crate::ports::{ConversationStore, ItemStore, MessagePublisher, PortError, PortResult, UserStore};

pub struct MessagingService {
    conversations: Arc<dyn ConversationStore>,
    items: Arc<dyn ItemStore>,
    users: Arc<dyn UserStore>,
    notifier: Notifier,
    publisher: Arc<dyn MessagePublisher>,
}

impl MessagingService {
    pub fn new(
        conversations: Arc<dyn ConversationStore>,
        items: Arc<dyn ItemStore>,
        users: Arc<dyn UserStore>,
        notifier: Notifier,
        publisher: Arc<dyn MessagePublisher>,
    ) -> Self {
        Self {
            conversations,
            items,
            users,
            notifier,
            publisher,
        }
    }

    /// Requests an item: opens (or reopens) the conversation with its owner
    /// and posts the first message.
    #[instrument(skip(self, session, text), fields(user_id = ?session.user_id()))]
    pub async fn start_conversation(
        &self,
        session: &SessionContext,
        item_id: Uuid,
        text: &str,
    ) -> PortResult<Conversation> {
        let user = session.require_user()?;
        let body = message_body(text)?;
        let item = self.items.get_item(item_id).await?;
        if !session.can_see(&item) {
            return Err(PortError::NotFound(format!("item {}", item_id)));
        }
        if item.owner_id == user.id {
            return Err(PortError::InvalidInput("you cannot request your own item".to_string()));
        }
        if !item.is_available() {
            return Err(PortError::InvalidInput("this item is no longer available".to_string()));
        }

        let id = Conversation::id_for(item.id, user.id, item.owner_id);
        let existing = match self.conversations.get_conversation(&id).await {
            Ok(conversation) => Some(conversation),
            Err(PortError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };
        if let Some(mut conversation) = existing {
            if !conversation.deleted_by.is_empty() {
                self.conversations.restore(&conversation.id).await?;
                conversation.deleted_by.clear();
            }
            self.post(user, &conversation, body).await?;
            return Ok(conversation);
        }

        let conversation = self
            .conversations
            .create_conversation(&Conversation {
                id,
                item_id: item.id,
                participants: vec![user.id, item.owner_id],
                deleted_by: Vec::new(),
                created_at: Utc::now().trunc_subsecs(6),
            })
            .await?;
        self.store_and_publish(user, &conversation, body).await?;
        info!(conversation_id = %conversation.id, item_id = %item.id, "Conversation started");

        if let Some(owner) = self.reachable_participant(item.owner_id, user.id).await {
            self.notifier
                .notify(
                    &owner,
                    "Your item has been requested!",
                    &format!(
                        "Your item, {}, has been requested! Please check \"Your Listings\" on the {} app for more details.",
                        item.name, APP_NAME
                    ),
                    json!({ "itemID": item.id }),
                )
                .await;
        }
        Ok(conversation)
    }

    /// Posts a message to a conversation the requester takes part in.
    pub async fn send_message(
        &self,
        session: &SessionContext,
        conversation_id: &str,
        text: &str,
    ) -> PortResult<Message> {
        let user = session.require_user()?;
        let body = message_body(text)?;
        let conversation = self.participant_conversation(user.id, conversation_id).await?;
        self.post(user, &conversation, body).await
    }

    /// A conversation the requester takes part in.
    pub async fn conversation(
        &self,
        session: &SessionContext,
        conversation_id: &str,
    ) -> PortResult<Conversation> {
        let user = session.require_user()?;
        self.participant_conversation(user.id, conversation_id).await
    }

    /// All messages of a conversation, oldest first.
    pub async fn messages(
        &self,
        session: &SessionContext,
        conversation_id: &str,
    ) -> PortResult<Vec<Message>> {
        let user = session.require_user()?;
        self.participant_conversation(user.id, conversation_id).await?;
        self.conversations.list_messages(conversation_id).await
    }

    /// The requester's inbox: conversations they have not deleted, with the
    /// latest message and item details, most recently active first.
    pub async fn conversations(&self, session: &SessionContext) -> PortResult<Vec<ConversationSummary>> {
        let user = session.require_user()?;
        let conversations = self.conversations.conversations_for_user(user.id).await?;
        let summaries = conversations
            .into_iter()
            .filter(|c| !c.is_deleted_for(user.id))
            .map(|c| self.summarize(c));
        let mut summaries = try_join_all(summaries).await?;

        summaries.sort_by_key(|s| {
            std::cmp::Reverse(
                s.recent_message
                    .as_ref()
                    .map(|m| m.created_at)
                    .unwrap_or(s.conversation.created_at),
            )
        });
        Ok(summaries)
    }

    /// Hides a conversation from the requester's inbox.
    pub async fn delete_conversation(
        &self,
        session: &SessionContext,
        conversation_id: &str,
    ) -> PortResult<()> {
        let user = session.require_user()?;
        self.participant_conversation(user.id, conversation_id).await?;
        self.conversations.mark_deleted(conversation_id, user.id).await
    }

    /// Deletes the conversation for the requester and blocks the other side.
    pub async fn report_conversation(
        &self,
        session: &SessionContext,
        conversation_id: &str,
    ) -> PortResult<()> {
        let user = session.require_user()?;
        let conversation = self.participant_conversation(user.id, conversation_id).await?;
        let other = conversation
            .other_participant(user.id)
            .ok_or_else(|| PortError::Unexpected("Other participant not found.".to_string()))?;
        self.conversations.mark_deleted(conversation_id, user.id).await?;
        self.users.block_user(user.id, other).await?;
        info!(conversation_id, blocked_user = %other, "Conversation reported");
        Ok(())
    }

    async fn participant_conversation(&self, user_id: Uuid, conversation_id: &str) -> PortResult<Conversation> {
        let conversation = self.conversations.get_conversation(conversation_id).await?;
        if !conversation.is_participant(user_id) {
            return Err(PortError::Forbidden("not a participant of this conversation".to_string()));
        }
        Ok(conversation)
    }

    async fn store_and_publish(
        &self,
        sender: &User,
        conversation: &Conversation,
        body: String,
    ) -> PortResult<Message> {
        let message = Message {
            id: Uuid::new_v4(),
            conversation_id: conversation.id.clone(),
            sender_id: sender.id,
            body,
            created_at: Utc::now().trunc_subsecs(6),
        };
        self.conversations.add_message(&message).await?;
        self.publisher.publish(&message).await;
        Ok(message)
    }

    async fn post(&self, sender: &User, conversation: &Conversation, body: String) -> PortResult<Message> {
        let message = self.store_and_publish(sender, conversation, body).await?;

        if let Some(recipient_id) = conversation.other_participant(sender.id) {
            if let Some(recipient) = self.reachable_participant(recipient_id, sender.id).await {
                self.notifier
                    .notify(
                        &recipient,
                        &format!("New message from {}", sender.name),
                        &message.body,
                        json!({ "conversationID": conversation.id }),
                    )
                    .await;
            }
        }
        Ok(message)
    }

    /// Loads a participant to notify, unless they blocked the sender.
    /// Lookup failures only cost the notification.
    async fn reachable_participant(&self, recipient_id: Uuid, sender_id: Uuid) -> Option<User> {
        match self.users.has_blocked(recipient_id, sender_id).await {
            Ok(false) => {}
            Ok(true) => return None,
            Err(e) => {
                warn!(error = %e, "Could not check blocks; skipping notification");
                return None;
            }
        }
        match self.users.get_user(recipient_id).await {
            Ok(user) if !user.is_deleted => Some(user),
            Ok(_) => None,
            Err(e) => {
                warn!(user_id = %recipient_id, error = %e, "Could not load recipient");
                None
            }
        }
    }

    async fn summarize(&self, conversation: Conversation) -> PortResult<ConversationSummary> {
        let recent_message = self.conversations.latest_message(&conversation.id).await?;
        let item = match self.items.get_item(conversation.item_id).await {
            Ok(item) => Some(item),
            Err(PortError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };
        Ok(ConversationSummary {
            recent_message,
            item_name: item.as_ref().map(|i| i.name.clone()),
            item_image: item.as_ref().and_then(|i| i.images.first().cloned()),
            item_status: item.as_ref().map(|i| i.status),
            conversation,
        })
    }
}

fn message_body(text: &str) -> PortResult<String> {
    let body = text.trim();
    if body.is_empty() {
        return Err(PortError::InvalidInput("message must not be empty".to_string()));
    }
    Ok(body.to_string())
}
