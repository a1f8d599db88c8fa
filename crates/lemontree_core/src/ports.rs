//! crates/lemontree_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of the document database, the geocoder and the push relay.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{Conversation, GeoLocation, Item, Message, User};
use crate::geo::GeoPoint;
use crate::query::ItemQuery;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Storage Ports
//=========================================================================================

#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Runs a query. Records that fail schema validation are skipped.
    async fn query_items(&self, query: &ItemQuery) -> PortResult<Vec<Item>>;

    async fn get_item(&self, item_id: Uuid) -> PortResult<Item>;

    async fn insert_item(&self, item: &Item) -> PortResult<()>;

    /// Overwrites the stored record with `item`. The stored save count is
    /// kept; only `adjust_saves` changes it.
    async fn update_item(&self, item: &Item) -> PortResult<()>;

    /// Atomically adds `delta` to the save count, never going below zero.
    /// Returns the new count.
    async fn adjust_saves(&self, item_id: Uuid, delta: i32) -> PortResult<u32>;

    // --- User saves ---
    /// Returns `false` if the user had already saved the item.
    async fn record_save(&self, user_id: Uuid, item_id: Uuid) -> PortResult<bool>;

    /// Returns `false` if there was nothing to remove.
    async fn remove_save(&self, user_id: Uuid, item_id: Uuid) -> PortResult<bool>;

    async fn saved_item_ids(&self, user_id: Uuid) -> PortResult<Vec<Uuid>>;

    // --- Moderation ---
    async fn record_report(&self, item_id: Uuid, reported_by: Uuid) -> PortResult<()>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_user(&self, user_id: Uuid) -> PortResult<User>;

    async fn save_user(&self, user: &User) -> PortResult<()>;

    /// Writes latitude, longitude and geohash in a single update.
    async fn update_location(&self, user_id: Uuid, location: &GeoLocation) -> PortResult<()>;

    async fn set_push_notifications(
        &self,
        user_id: Uuid,
        allow: bool,
        push_token: Option<String>,
    ) -> PortResult<()>;

    /// Admins that have push notifications switched on.
    async fn admins_accepting_push(&self) -> PortResult<Vec<User>>;

    async fn block_user(&self, blocked_by: Uuid, blocked_user: Uuid) -> PortResult<()>;

    async fn has_blocked(&self, blocked_by: Uuid, blocked_user: Uuid) -> PortResult<bool>;
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn get_conversation(&self, conversation_id: &str) -> PortResult<Conversation>;

    /// Creates the conversation if it does not exist yet; returns the stored one.
    async fn create_conversation(&self, conversation: &Conversation) -> PortResult<Conversation>;

    async fn add_message(&self, message: &Message) -> PortResult<()>;

    /// All messages, oldest first.
    async fn list_messages(&self, conversation_id: &str) -> PortResult<Vec<Message>>;

    async fn latest_message(&self, conversation_id: &str) -> PortResult<Option<Message>>;

    async fn conversations_for_user(&self, user_id: Uuid) -> PortResult<Vec<Conversation>>;

    async fn mark_deleted(&self, conversation_id: &str, user_id: Uuid) -> PortResult<()>;

    /// Brings the conversation back into both participants' inboxes.
    async fn restore(&self, conversation_id: &str) -> PortResult<()>;
}

//=========================================================================================
// External Service Ports
//=========================================================================================

#[async_trait]
pub trait GeocodingService: Send + Sync {
    /// Resolves a postal code within a country to coordinates.
    async fn geocode(&self, postal_code: &str, country: &str) -> PortResult<GeoPoint>;
}

#[async_trait]
pub trait PushNotificationService: Send + Sync {
    /// Delivers a single notification to a device token.
    async fn send(
        &self,
        push_token: &str,
        title: &str,
        body: &str,
        data: serde_json::Value,
    ) -> PortResult<()>;
}

#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// Fans a stored message out to live subscribers of its conversation.
    /// Delivery is best-effort.
    async fn publish(&self, message: &Message);
}
