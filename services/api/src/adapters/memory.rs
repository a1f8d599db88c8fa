//! services/api/src/adapters/memory.rs
//!
//! A process-local document store implementing every storage port. Items and
//! users are held as raw JSON documents, exactly as a document database would
//! hand them over, and go through schema validation on every read.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use lemontree_core::document::{self, item_document, location_value, parse_items, user_document};
use lemontree_core::domain::{Conversation, GeoLocation, Item, Message, User};
use lemontree_core::ports::{ConversationStore, ItemStore, PortError, PortResult, UserStore};
use lemontree_core::query::ItemQuery;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ApiError;

/// Shape of a seed file: documents keyed by id.
#[derive(Debug, Default, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub users: HashMap<Uuid, Value>,
    #[serde(default)]
    pub items: HashMap<Uuid, Value>,
}

#[derive(Default)]
struct State {
    users: HashMap<Uuid, Value>,
    items: HashMap<Uuid, Value>,
    /// (user, item) pairs in the order they were saved.
    saves: Vec<(Uuid, Uuid)>,
    reports: Vec<(Uuid, Uuid)>,
    blocks: HashSet<(Uuid, Uuid)>,
    conversations: HashMap<String, Conversation>,
    messages: Vec<Message>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: Seed) -> Self {
        let state = State {
            users: seed.users,
            items: seed.items,
            ..State::default()
        };
        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    /// Loads a JSON seed file of user and item documents.
    pub async fn load(path: &Path) -> Result<Self, ApiError> {
        let raw = tokio::fs::read_to_string(path).await?;
        let seed: Seed = serde_json::from_str(&raw)
            .map_err(|e| ApiError::Internal(format!("seed file {}: {}", path.display(), e)))?;
        info!(
            users = seed.users.len(),
            items = seed.items.len(),
            path = %path.display(),
            "Loaded seed documents"
        );
        Ok(Self::from_seed(seed))
    }

    /// Replaces a raw document, bypassing validation. Lets callers stage
    /// the malformed records a shared document database can contain.
    pub async fn put_raw_item(&self, item_id: Uuid, raw: Value) {
        self.state.write().await.items.insert(item_id, raw);
    }

    pub async fn report_count(&self, item_id: Uuid) -> usize {
        self.state
            .read()
            .await
            .reports
            .iter()
            .filter(|(id, _)| *id == item_id)
            .count()
    }
}

fn parse_user_or_unexpected(id: Uuid, raw: &Value) -> PortResult<User> {
    document::parse_user(id, raw).map_err(|e| PortError::Unexpected(format!("user {}: {}", id, e)))
}

fn user_doc_mut<'a>(state: &'a mut State, user_id: Uuid) -> PortResult<&'a mut serde_json::Map<String, Value>> {
    state
        .users
        .get_mut(&user_id)
        .and_then(Value::as_object_mut)
        .ok_or_else(|| PortError::NotFound(format!("user {}", user_id)))
}

//=========================================================================================
// `ItemStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl ItemStore for MemoryStore {
    async fn query_items(&self, query: &ItemQuery) -> PortResult<Vec<Item>> {
        let state = self.state.read().await;
        let items = parse_items(state.items.iter().map(|(id, raw)| (*id, raw)));
        Ok(query.apply(&items))
    }

    async fn get_item(&self, item_id: Uuid) -> PortResult<Item> {
        let state = self.state.read().await;
        let raw = state
            .items
            .get(&item_id)
            .ok_or_else(|| PortError::NotFound(format!("item {}", item_id)))?;
        document::parse_item(item_id, raw)
            .map_err(|e| PortError::Unexpected(format!("item {}: {}", item_id, e)))
    }

    async fn insert_item(&self, item: &Item) -> PortResult<()> {
        let mut state = self.state.write().await;
        if state.items.contains_key(&item.id) {
            return Err(PortError::InvalidInput(format!("item {} already exists", item.id)));
        }
        state.items.insert(item.id, item_document(item));
        Ok(())
    }

    async fn update_item(&self, item: &Item) -> PortResult<()> {
        let mut state = self.state.write().await;
        let slot = state
            .items
            .get_mut(&item.id)
            .ok_or_else(|| PortError::NotFound(format!("item {}", item.id)))?;
        let saves = slot.get("saves").cloned();
        let mut document = item_document(item);
        if let (Some(saves), Some(fields)) = (saves, document.as_object_mut()) {
            fields.insert("saves".to_string(), saves);
        }
        *slot = document;
        Ok(())
    }

    async fn adjust_saves(&self, item_id: Uuid, delta: i32) -> PortResult<u32> {
        let mut state = self.state.write().await;
        let doc = state
            .items
            .get_mut(&item_id)
            .and_then(Value::as_object_mut)
            .ok_or_else(|| PortError::NotFound(format!("item {}", item_id)))?;
        let current = doc.get("saves").and_then(Value::as_i64).unwrap_or(0);
        let next = (current + i64::from(delta)).max(0);
        doc.insert("saves".to_string(), json!(next));
        Ok(u32::try_from(next).unwrap_or(u32::MAX))
    }

    async fn record_save(&self, user_id: Uuid, item_id: Uuid) -> PortResult<bool> {
        let mut state = self.state.write().await;
        if state.saves.contains(&(user_id, item_id)) {
            return Ok(false);
        }
        state.saves.push((user_id, item_id));
        Ok(true)
    }

    async fn remove_save(&self, user_id: Uuid, item_id: Uuid) -> PortResult<bool> {
        let mut state = self.state.write().await;
        let before = state.saves.len();
        state.saves.retain(|pair| *pair != (user_id, item_id));
        Ok(state.saves.len() < before)
    }

    async fn saved_item_ids(&self, user_id: Uuid) -> PortResult<Vec<Uuid>> {
        let state = self.state.read().await;
        Ok(state
            .saves
            .iter()
            .rev()
            .filter(|(user, _)| *user == user_id)
            .map(|(_, item)| *item)
            .collect())
    }

    async fn record_report(&self, item_id: Uuid, reported_by: Uuid) -> PortResult<()> {
        self.state.write().await.reports.push((item_id, reported_by));
        Ok(())
    }
}

//=========================================================================================
// `UserStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl UserStore for MemoryStore {
    async fn get_user(&self, user_id: Uuid) -> PortResult<User> {
        let state = self.state.read().await;
        let raw = state
            .users
            .get(&user_id)
            .ok_or_else(|| PortError::NotFound(format!("user {}", user_id)))?;
        parse_user_or_unexpected(user_id, raw)
    }

    async fn save_user(&self, user: &User) -> PortResult<()> {
        self.state.write().await.users.insert(user.id, user_document(user));
        Ok(())
    }

    async fn update_location(&self, user_id: Uuid, location: &GeoLocation) -> PortResult<()> {
        let mut state = self.state.write().await;
        let doc = user_doc_mut(&mut state, user_id)?;
        doc.insert("location".to_string(), location_value(location));
        Ok(())
    }

    async fn set_push_notifications(
        &self,
        user_id: Uuid,
        allow: bool,
        push_token: Option<String>,
    ) -> PortResult<()> {
        let mut state = self.state.write().await;
        let doc = user_doc_mut(&mut state, user_id)?;
        doc.insert("allowPushNotifications".to_string(), json!(allow));
        if let Some(token) = push_token {
            doc.insert("expoPushToken".to_string(), json!(token));
        }
        Ok(())
    }

    async fn admins_accepting_push(&self) -> PortResult<Vec<User>> {
        let state = self.state.read().await;
        Ok(state
            .users
            .iter()
            .filter_map(|(id, raw)| match document::parse_user(*id, raw) {
                Ok(user) => Some(user),
                Err(e) => {
                    warn!(user_id = %id, error = %e, "Skipping malformed user document");
                    None
                }
            })
            .filter(|u| u.is_admin && u.allow_push_notifications && !u.is_deleted)
            .collect())
    }

    async fn block_user(&self, blocked_by: Uuid, blocked_user: Uuid) -> PortResult<()> {
        self.state.write().await.blocks.insert((blocked_by, blocked_user));
        Ok(())
    }

    async fn has_blocked(&self, blocked_by: Uuid, blocked_user: Uuid) -> PortResult<bool> {
        Ok(self.state.read().await.blocks.contains(&(blocked_by, blocked_user)))
    }
}

//=========================================================================================
// `ConversationStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn get_conversation(&self, conversation_id: &str) -> PortResult<Conversation> {
        self.state
            .read()
            .await
            .conversations
            .get(conversation_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("conversation {}", conversation_id)))
    }

    async fn create_conversation(&self, conversation: &Conversation) -> PortResult<Conversation> {
        let mut state = self.state.write().await;
        Ok(state
            .conversations
            .entry(conversation.id.clone())
            .or_insert_with(|| conversation.clone())
            .clone())
    }

    async fn add_message(&self, message: &Message) -> PortResult<()> {
        let mut state = self.state.write().await;
        if !state.conversations.contains_key(&message.conversation_id) {
            return Err(PortError::NotFound(format!(
                "conversation {}",
                message.conversation_id
            )));
        }
        state.messages.push(message.clone());
        Ok(())
    }

    async fn list_messages(&self, conversation_id: &str) -> PortResult<Vec<Message>> {
        let state = self.state.read().await;
        let mut messages: Vec<Message> = state
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(messages)
    }

    async fn latest_message(&self, conversation_id: &str) -> PortResult<Option<Message>> {
        Ok(self.list_messages(conversation_id).await?.pop())
    }

    async fn conversations_for_user(&self, user_id: Uuid) -> PortResult<Vec<Conversation>> {
        let state = self.state.read().await;
        let mut conversations: Vec<Conversation> = state
            .conversations
            .values()
            .filter(|c| c.is_participant(user_id))
            .cloned()
            .collect();
        conversations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(conversations)
    }

    async fn mark_deleted(&self, conversation_id: &str, user_id: Uuid) -> PortResult<()> {
        let mut state = self.state.write().await;
        let conversation = state
            .conversations
            .get_mut(conversation_id)
            .ok_or_else(|| PortError::NotFound(format!("conversation {}", conversation_id)))?;
        if !conversation.deleted_by.contains(&user_id) {
            conversation.deleted_by.push(user_id);
        }
        Ok(())
    }

    async fn restore(&self, conversation_id: &str) -> PortResult<()> {
        let mut state = self.state.write().await;
        let conversation = state
            .conversations
            .get_mut(conversation_id)
            .ok_or_else(|| PortError::NotFound(format!("conversation {}", conversation_id)))?;
        conversation.deleted_by.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use lemontree_core::domain::ItemStatus;
    use lemontree_core::geo::GeoPoint;
    use lemontree_core::query::{FieldValue, ItemField, Predicate, SortOrder};

    fn item(name: &str, saves: u32) -> Item {
        let created = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        Item {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            name: name.to_string(),
            description: "Works fine, pick up any evening".to_string(),
            images: vec![],
            categories: vec!["Books".to_string()],
            status: ItemStatus::Available,
            saves,
            location: GeoLocation::new(GeoPoint::new(44.98, -93.27), "United States", "55401"),
            pickup_address: None,
            is_deleted: false,
            is_approved: true,
            approved_by: None,
            created_at: created,
            edited_at: created,
        }
    }

    #[tokio::test]
    async fn malformed_documents_are_skipped_by_queries() {
        let store = MemoryStore::new();
        let good = item("Atlas", 2);
        store.insert_item(&good).await.unwrap();
        store
            .put_raw_item(Uuid::new_v4(), json!({ "name": "Broken", "saves": "lots" }))
            .await;

        let found = store.query_items(&ItemQuery::new()).await.unwrap();
        assert_eq!(found, vec![good]);
    }

    #[tokio::test]
    async fn updates_from_a_stale_snapshot_keep_the_save_count() {
        let store = MemoryStore::new();
        let book = item("Atlas", 1);
        store.insert_item(&book).await.unwrap();

        let mut snapshot = store.get_item(book.id).await.unwrap();
        store.adjust_saves(book.id, 1).await.unwrap();
        snapshot.is_approved = false;
        store.update_item(&snapshot).await.unwrap();

        let stored = store.get_item(book.id).await.unwrap();
        assert!(!stored.is_approved);
        assert_eq!(stored.saves, 2);
    }

    #[tokio::test]
    async fn restoring_clears_every_deletion() {
        let store = MemoryStore::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let conversation = Conversation {
            id: Conversation::id_for(Uuid::new_v4(), a, b),
            item_id: Uuid::new_v4(),
            participants: vec![a, b],
            deleted_by: Vec::new(),
            created_at: Utc::now(),
        };
        store.create_conversation(&conversation).await.unwrap();
        store.mark_deleted(&conversation.id, a).await.unwrap();
        store.mark_deleted(&conversation.id, b).await.unwrap();
        assert!(store.conversations_for_user(a).await.unwrap()[0].is_deleted_for(a));

        store.restore(&conversation.id).await.unwrap();
        let stored = store.get_conversation(&conversation.id).await.unwrap();
        assert!(stored.deleted_by.is_empty());
        assert!(matches!(store.restore("missing").await, Err(PortError::NotFound(_))));
    }

    #[tokio::test]
    async fn saves_never_drop_below_zero() {
        let store = MemoryStore::new();
        let book = item("Atlas", 1);
        store.insert_item(&book).await.unwrap();

        assert_eq!(store.adjust_saves(book.id, -1).await.unwrap(), 0);
        assert_eq!(store.adjust_saves(book.id, -1).await.unwrap(), 0);
        assert_eq!(store.adjust_saves(book.id, 3).await.unwrap(), 3);
        assert_eq!(store.get_item(book.id).await.unwrap().saves, 3);

        let popular = store
            .query_items(
                &ItemQuery::new()
                    .filter(Predicate::gte(ItemField::Saves, FieldValue::Int(3)))
                    .order_by(SortOrder::MostSaved),
            )
            .await
            .unwrap();
        assert_eq!(popular.len(), 1);
    }

    #[tokio::test]
    async fn location_and_push_updates_touch_only_their_fields() {
        let store = MemoryStore::new();
        let user = User {
            id: Uuid::new_v4(),
            name: "Ana".into(),
            email: "ana@example.com".into(),
            is_admin: true,
            is_verified: true,
            push_token: None,
            allow_push_notifications: false,
            location: None,
            is_deleted: false,
        };
        store.save_user(&user).await.unwrap();

        let home = GeoLocation::new(GeoPoint::new(37.56, 126.97), "South Korea", "04524");
        store.update_location(user.id, &home).await.unwrap();
        store
            .set_push_notifications(user.id, true, Some("ExponentPushToken[ana]".into()))
            .await
            .unwrap();

        let stored = store.get_user(user.id).await.unwrap();
        assert_eq!(stored.location, Some(home));
        assert_eq!(stored.reachable_push_token(), Some("ExponentPushToken[ana]"));
        assert_eq!(stored.name, "Ana");
        assert_eq!(store.admins_accepting_push().await.unwrap().len(), 1);

        let missing = store.update_location(Uuid::new_v4(), &stored.location.unwrap()).await;
        assert!(matches!(missing, Err(PortError::NotFound(_))));
    }

    #[tokio::test]
    async fn seeds_load_raw_documents() {
        let id = Uuid::new_v4();
        let seed: Seed = serde_json::from_value(json!({
            "users": {
                (id.to_string()): {
                    "name": "Ana",
                    "email": "ana@example.com",
                    "isAdmin": false,
                    "isVerified": true,
                    "expoPushToken": "",
                    "allowPushNotifications": true,
                    "location": { "zipcode": "", "latitude": 0.0, "longitude": 0.0, "country": "United States", "geohash": "" },
                    "isDeleted": false
                }
            }
        }))
        .unwrap();

        let store = MemoryStore::from_seed(seed);
        let user = store.get_user(id).await.unwrap();
        assert_eq!(user.name, "Ana");
        assert!(user.location.is_none());
    }
}
