//! In-process fakes of every port, shared by the unit tests of the services.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use uuid::Uuid;

use crate::domain::{Conversation, GeoLocation, Item, ItemStatus, Message, User};
use crate::geo::GeoPoint;
use crate::ports::{
    ConversationStore, GeocodingService, ItemStore, PortError, PortResult,
    PushNotificationService, UserStore,
};
use crate::query::ItemQuery;

const KM_PER_DEGREE: f64 = 6371.0 * std::f64::consts::PI / 180.0;

/// Moves `north_km` north and `east_km` east of `origin`.
pub fn offset_km(origin: GeoPoint, north_km: f64, east_km: f64) -> GeoPoint {
    let latitude = origin.latitude + north_km / KM_PER_DEGREE;
    let longitude =
        origin.longitude + east_km / (KM_PER_DEGREE * origin.latitude.to_radians().cos());
    GeoPoint::new(latitude, longitude)
}

pub fn user(name: &str, is_admin: bool, location: Option<GeoPoint>) -> User {
    User {
        id: Uuid::new_v4(),
        name: name.to_string(),
        email: format!("{}@example.com", name.to_lowercase()),
        is_admin,
        is_verified: true,
        push_token: Some(format!("ExponentPushToken[{}]", name)),
        allow_push_notifications: true,
        location: location.map(|p| GeoLocation::new(p, "United States", "55401")),
        is_deleted: false,
    }
}

pub fn item_at(owner_id: Uuid, point: GeoPoint, minutes_ago: i64) -> Item {
    let created = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap() - Duration::minutes(minutes_ago);
    Item {
        id: Uuid::new_v4(),
        owner_id,
        name: format!("Item {}", minutes_ago),
        description: "Gently used and looking for a new home".to_string(),
        images: vec!["https://img.example/item.jpg".to_string()],
        categories: vec!["Furniture & Home".to_string()],
        status: ItemStatus::Available,
        saves: 1,
        location: GeoLocation::new(point, "United States", "55401"),
        pickup_address: None,
        is_deleted: false,
        is_approved: true,
        approved_by: None,
        created_at: created,
        edited_at: created,
    }
}

#[derive(Default)]
struct State {
    items: HashMap<Uuid, Item>,
    saves: HashSet<(Uuid, Uuid)>,
    reports: Vec<(Uuid, Uuid)>,
    users: HashMap<Uuid, User>,
    blocks: HashSet<(Uuid, Uuid)>,
    conversations: HashMap<String, Conversation>,
    messages: Vec<Message>,
    queries: usize,
    fail_query: Option<usize>,
    save_on_next_read: Option<Uuid>,
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put_items(&self, items: impl IntoIterator<Item = Item>) {
        let mut state = self.state.lock().unwrap();
        for item in items {
            state.items.insert(item.id, item);
        }
    }

    pub fn put_users(&self, users: impl IntoIterator<Item = User>) {
        let mut state = self.state.lock().unwrap();
        for user in users {
            state.users.insert(user.id, user);
        }
    }

    pub fn item(&self, id: Uuid) -> Item {
        self.state.lock().unwrap().items[&id].clone()
    }

    pub fn user(&self, id: Uuid) -> User {
        self.state.lock().unwrap().users[&id].clone()
    }

    pub fn reports(&self) -> Vec<(Uuid, Uuid)> {
        self.state.lock().unwrap().reports.clone()
    }

    /// The next `get_item` hands out its snapshot, then `user_id` saves the
    /// item before the caller can write it back.
    pub fn save_after_next_read(&self, user_id: Uuid) {
        self.state.lock().unwrap().save_on_next_read = Some(user_id);
    }

    /// Makes the `n`-th query from now on (1-based) fail.
    pub fn fail_query_number(&self, n: usize) {
        let mut state = self.state.lock().unwrap();
        state.fail_query = Some(state.queries + n);
    }
}

#[async_trait]
impl ItemStore for InMemoryStore {
    async fn query_items(&self, query: &ItemQuery) -> PortResult<Vec<Item>> {
        let mut state = self.state.lock().unwrap();
        state.queries += 1;
        if state.fail_query == Some(state.queries) {
            return Err(PortError::Unexpected("backend unavailable".to_string()));
        }
        Ok(query.apply(state.items.values()))
    }

    async fn get_item(&self, item_id: Uuid) -> PortResult<Item> {
        let mut state = self.state.lock().unwrap();
        let snapshot = state
            .items
            .get(&item_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("item {}", item_id)))?;
        if let Some(saver) = state.save_on_next_read.take() {
            if state.saves.insert((saver, item_id)) {
                if let Some(item) = state.items.get_mut(&item_id) {
                    item.saves += 1;
                }
            }
        }
        Ok(snapshot)
    }

    async fn insert_item(&self, item: &Item) -> PortResult<()> {
        self.put_items([item.clone()]);
        Ok(())
    }

    async fn update_item(&self, item: &Item) -> PortResult<()> {
        let mut state = self.state.lock().unwrap();
        let stored = state
            .items
            .get_mut(&item.id)
            .ok_or_else(|| PortError::NotFound(format!("item {}", item.id)))?;
        let saves = stored.saves;
        *stored = item.clone();
        stored.saves = saves;
        Ok(())
    }

    async fn adjust_saves(&self, item_id: Uuid, delta: i32) -> PortResult<u32> {
        let mut state = self.state.lock().unwrap();
        let item = state
            .items
            .get_mut(&item_id)
            .ok_or_else(|| PortError::NotFound(format!("item {}", item_id)))?;
        item.saves = (i64::from(item.saves) + i64::from(delta)).max(0) as u32;
        Ok(item.saves)
    }

    async fn record_save(&self, user_id: Uuid, item_id: Uuid) -> PortResult<bool> {
        Ok(self.state.lock().unwrap().saves.insert((user_id, item_id)))
    }

    async fn remove_save(&self, user_id: Uuid, item_id: Uuid) -> PortResult<bool> {
        Ok(self.state.lock().unwrap().saves.remove(&(user_id, item_id)))
    }

    async fn saved_item_ids(&self, user_id: Uuid) -> PortResult<Vec<Uuid>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .saves
            .iter()
            .filter(|(u, _)| *u == user_id)
            .map(|(_, i)| *i)
            .collect())
    }

    async fn record_report(&self, item_id: Uuid, reported_by: Uuid) -> PortResult<()> {
        self.state.lock().unwrap().reports.push((item_id, reported_by));
        Ok(())
    }
}

#[async_trait]
impl UserStore for InMemoryStore {
    async fn get_user(&self, user_id: Uuid) -> PortResult<User> {
        self.state
            .lock()
            .unwrap()
            .users
            .get(&user_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("user {}", user_id)))
    }

    async fn save_user(&self, user: &User) -> PortResult<()> {
        self.put_users([user.clone()]);
        Ok(())
    }

    async fn update_location(&self, user_id: Uuid, location: &GeoLocation) -> PortResult<()> {
        let mut state = self.state.lock().unwrap();
        let user = state
            .users
            .get_mut(&user_id)
            .ok_or_else(|| PortError::NotFound(format!("user {}", user_id)))?;
        user.location = Some(location.clone());
        Ok(())
    }

    async fn set_push_notifications(
        &self,
        user_id: Uuid,
        allow: bool,
        push_token: Option<String>,
    ) -> PortResult<()> {
        let mut state = self.state.lock().unwrap();
        let user = state
            .users
            .get_mut(&user_id)
            .ok_or_else(|| PortError::NotFound(format!("user {}", user_id)))?;
        user.allow_push_notifications = allow;
        if push_token.is_some() {
            user.push_token = push_token;
        }
        Ok(())
    }

    async fn admins_accepting_push(&self) -> PortResult<Vec<User>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .users
            .values()
            .filter(|u| u.is_admin && u.allow_push_notifications && !u.is_deleted)
            .cloned()
            .collect())
    }

    async fn block_user(&self, blocked_by: Uuid, blocked_user: Uuid) -> PortResult<()> {
        self.state.lock().unwrap().blocks.insert((blocked_by, blocked_user));
        Ok(())
    }

    async fn has_blocked(&self, blocked_by: Uuid, blocked_user: Uuid) -> PortResult<bool> {
        Ok(self.state.lock().unwrap().blocks.contains(&(blocked_by, blocked_user)))
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn get_conversation(&self, conversation_id: &str) -> PortResult<Conversation> {
        self.state
            .lock()
            .unwrap()
            .conversations
            .get(conversation_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("conversation {}", conversation_id)))
    }

    async fn create_conversation(&self, conversation: &Conversation) -> PortResult<Conversation> {
        let mut state = self.state.lock().unwrap();
        Ok(state
            .conversations
            .entry(conversation.id.clone())
            .or_insert_with(|| conversation.clone())
            .clone())
    }

    async fn add_message(&self, message: &Message) -> PortResult<()> {
        self.state.lock().unwrap().messages.push(message.clone());
        Ok(())
    }

    async fn list_messages(&self, conversation_id: &str) -> PortResult<Vec<Message>> {
        let state = self.state.lock().unwrap();
        let mut messages: Vec<Message> = state
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }

    async fn latest_message(&self, conversation_id: &str) -> PortResult<Option<Message>> {
        Ok(self.list_messages(conversation_id).await?.pop())
    }

    async fn conversations_for_user(&self, user_id: Uuid) -> PortResult<Vec<Conversation>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .conversations
            .values()
            .filter(|c| c.is_participant(user_id))
            .cloned()
            .collect())
    }

    async fn mark_deleted(&self, conversation_id: &str, user_id: Uuid) -> PortResult<()> {
        let mut state = self.state.lock().unwrap();
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
        let mut state = self.state.lock().unwrap();
        let conversation = state
            .conversations
            .get_mut(conversation_id)
            .ok_or_else(|| PortError::NotFound(format!("conversation {}", conversation_id)))?;
        conversation.deleted_by.clear();
        Ok(())
    }
}

/// Resolves postal codes from a fixed table and records every lookup.
#[derive(Default)]
pub struct FixedGeocoder {
    points: HashMap<String, GeoPoint>,
    lookups: Mutex<Vec<(String, String)>>,
}

impl FixedGeocoder {
    pub fn with(entries: impl IntoIterator<Item = (&'static str, GeoPoint)>) -> Arc<Self> {
        Arc::new(Self {
            points: entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
            lookups: Mutex::new(Vec::new()),
        })
    }

    pub fn empty() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn lookups(&self) -> Vec<(String, String)> {
        self.lookups.lock().unwrap().clone()
    }
}

#[async_trait]
impl GeocodingService for FixedGeocoder {
    async fn geocode(&self, postal_code: &str, country: &str) -> PortResult<GeoPoint> {
        self.lookups
            .lock()
            .unwrap()
            .push((postal_code.to_string(), country.to_string()));
        self.points
            .get(postal_code)
            .copied()
            .ok_or_else(|| PortError::NotFound(format!("postal code {}", postal_code)))
    }
}

/// Records notifications instead of delivering them.
#[derive(Default)]
pub struct RecordingPush {
    sent: Mutex<Vec<(String, String, String)>>,
    failing: bool,
}

impl RecordingPush {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            failing: true,
            ..Self::default()
        })
    }

    /// (token, title, body) of every notification sent.
    pub fn sent(&self) -> Vec<(String, String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl PushNotificationService for RecordingPush {
    async fn send(
        &self,
        push_token: &str,
        title: &str,
        body: &str,
        _data: serde_json::Value,
    ) -> PortResult<()> {
        if self.failing {
            return Err(PortError::Unexpected("push relay unreachable".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((push_token.to_string(), title.to_string(), body.to_string()));
        Ok(())
    }
}

/// Collects published messages.
#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<Message>>,
}

impl RecordingPublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn published(&self) -> Vec<Message> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl crate::ports::MessagePublisher for RecordingPublisher {
    async fn publish(&self, message: &Message) {
        self.published.lock().unwrap().push(message.clone());
    }
}
