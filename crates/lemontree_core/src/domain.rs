//! crates/lemontree_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or transport format; raw
//! backend documents are turned into them by `crate::document`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::{encode_geohash, GeoPoint, DEFAULT_GEOHASH_PRECISION};
use crate::ports::{PortError, PortResult, UserStore};

//=========================================================================================
// Items
//=========================================================================================

/// Lifecycle status of an item. The serialized labels are the ones stored in
/// item documents and shown to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemStatus {
    #[serde(rename = "Up for Grabs")]
    Available,
    #[serde(rename = "Donated")]
    Given,
    Rejected,
    Pending,
}

impl ItemStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ItemStatus::Available => "Up for Grabs",
            ItemStatus::Given => "Donated",
            ItemStatus::Rejected => "Rejected",
            ItemStatus::Pending => "Pending",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "Up for Grabs" => Some(ItemStatus::Available),
            "Donated" => Some(ItemStatus::Given),
            "Rejected" => Some(ItemStatus::Rejected),
            "Pending" => Some(ItemStatus::Pending),
            _ => None,
        }
    }
}

/// A resolved location. Latitude, longitude and geohash can only be set
/// together so they never drift apart.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoLocation {
    latitude: f64,
    longitude: f64,
    geohash: String,
    pub country: String,
    pub postal_code: String,
}

impl GeoLocation {
    pub fn new(point: GeoPoint, country: impl Into<String>, postal_code: impl Into<String>) -> Self {
        Self {
            latitude: point.latitude,
            longitude: point.longitude,
            geohash: encode_geohash(point, DEFAULT_GEOHASH_PRECISION),
            country: country.into(),
            postal_code: postal_code.into(),
        }
    }

    /// Moves the location, refreshing the coordinate triple at once.
    pub fn relocate(&mut self, point: GeoPoint, postal_code: impl Into<String>) {
        self.latitude = point.latitude;
        self.longitude = point.longitude;
        self.geohash = encode_geohash(point, DEFAULT_GEOHASH_PRECISION);
        self.postal_code = postal_code.into();
    }

    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    pub fn geohash(&self) -> &str {
        &self.geohash
    }
}

/// A donatable object listed by a user.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub description: String,
    pub images: Vec<String>,
    pub categories: Vec<String>,
    pub status: ItemStatus,
    pub saves: u32,
    pub location: GeoLocation,
    pub pickup_address: Option<String>,
    pub is_deleted: bool,
    pub is_approved: bool,
    pub approved_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub edited_at: DateTime<Utc>,
}

impl Item {
    pub fn is_available(&self) -> bool {
        !self.is_deleted && self.status == ItemStatus::Available
    }
}

//=========================================================================================
// Users and the request session
//=========================================================================================

/// Represents an account.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub is_admin: bool,
    pub is_verified: bool,
    pub push_token: Option<String>,
    pub allow_push_notifications: bool,
    pub location: Option<GeoLocation>,
    pub is_deleted: bool,
}

impl User {
    /// The push token, if the user has one and has not opted out.
    pub fn reachable_push_token(&self) -> Option<&str> {
        if !self.allow_push_notifications {
            return None;
        }
        self.push_token.as_deref().filter(|t| !t.is_empty())
    }
}

/// Who is making a request. Passed explicitly into every service call.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    user: Option<User>,
}

impl SessionContext {
    pub fn anonymous() -> Self {
        Self { user: None }
    }

    pub fn signed_in(user: User) -> Self {
        Self { user: Some(user) }
    }

    /// Loads the session for an optional user id. Unknown or deleted users
    /// are rejected rather than silently treated as anonymous.
    pub async fn load(users: &dyn UserStore, user_id: Option<Uuid>) -> PortResult<Self> {
        let Some(user_id) = user_id else {
            return Ok(Self::anonymous());
        };
        let user = users.get_user(user_id).await.map_err(|e| match e {
            PortError::NotFound(_) => PortError::Unauthorized,
            other => other,
        })?;
        if user.is_deleted {
            return Err(PortError::Unauthorized);
        }
        Ok(Self::signed_in(user))
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.user.as_ref().map(|u| u.id)
    }

    pub fn require_user(&self) -> PortResult<&User> {
        self.user.as_ref().ok_or(PortError::Unauthorized)
    }

    pub fn require_admin(&self) -> PortResult<&User> {
        let user = self.require_user()?;
        if !user.is_admin {
            return Err(PortError::Forbidden("admin role required".to_string()));
        }
        Ok(user)
    }

    pub fn is_admin(&self) -> bool {
        self.user.as_ref().is_some_and(|u| u.is_admin)
    }

    /// The requester's location; only signed-in users with a resolved
    /// location have one.
    pub fn requester_location(&self) -> Option<GeoPoint> {
        self.user
            .as_ref()
            .and_then(|u| u.location.as_ref())
            .map(|l| l.point())
    }

    /// Whether the requester may see this item at all.
    pub fn can_see(&self, item: &Item) -> bool {
        if item.is_deleted {
            return false;
        }
        item.is_approved || self.is_admin() || self.user_id() == Some(item.owner_id)
    }
}

//=========================================================================================
// Conversations
//=========================================================================================

/// A conversation between a requester and an item owner.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    pub id: String,
    pub item_id: Uuid,
    pub participants: Vec<Uuid>,
    pub deleted_by: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    /// Conversations are keyed deterministically by item, requester and owner.
    pub fn id_for(item_id: Uuid, requester_id: Uuid, owner_id: Uuid) -> String {
        format!("{}_{}_{}", item_id, requester_id, owner_id)
    }

    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.participants.contains(&user_id)
    }

    pub fn other_participant(&self, user_id: Uuid) -> Option<Uuid> {
        self.participants.iter().copied().find(|p| *p != user_id)
    }

    pub fn is_deleted_for(&self, user_id: Uuid) -> bool {
        self.deleted_by.contains(&user_id)
    }
}

/// A single chat message inside a conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: String,
    pub sender_id: Uuid,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// A conversation as shown in a user's inbox.
#[derive(Debug, Clone)]
pub struct ConversationSummary {
    pub conversation: Conversation,
    pub recent_message: Option<Message>,
    pub item_name: Option<String>,
    pub item_image: Option<String>,
    pub item_status: Option<ItemStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_labels_round_trip() {
        for status in [
            ItemStatus::Available,
            ItemStatus::Given,
            ItemStatus::Rejected,
            ItemStatus::Pending,
        ] {
            assert_eq!(ItemStatus::from_label(status.label()), Some(status));
        }
        assert_eq!(ItemStatus::from_label("Gone"), None);
    }

    #[test]
    fn relocating_refreshes_the_whole_triple() {
        let mut location = GeoLocation::new(GeoPoint::new(51.5, -0.12), "United Kingdom", "SW1A");
        let before = location.geohash().to_string();

        location.relocate(GeoPoint::new(53.48, -2.24), "M1");

        assert_eq!(location.latitude(), 53.48);
        assert_eq!(location.longitude(), -2.24);
        assert_ne!(location.geohash(), before);
        assert_eq!(
            location.geohash(),
            encode_geohash(GeoPoint::new(53.48, -2.24), DEFAULT_GEOHASH_PRECISION)
        );
        assert_eq!(location.postal_code, "M1");
    }

    #[test]
    fn conversation_ids_are_deterministic() {
        let item = Uuid::new_v4();
        let requester = Uuid::new_v4();
        let owner = Uuid::new_v4();
        assert_eq!(
            Conversation::id_for(item, requester, owner),
            format!("{item}_{requester}_{owner}")
        );
    }

    #[test]
    fn push_token_respects_opt_out() {
        let mut user = User {
            id: Uuid::new_v4(),
            name: "Sam".into(),
            email: "sam@example.com".into(),
            is_admin: false,
            is_verified: true,
            push_token: Some("ExponentPushToken[abc]".into()),
            allow_push_notifications: true,
            location: None,
            is_deleted: false,
        };
        assert_eq!(user.reachable_push_token(), Some("ExponentPushToken[abc]"));
        user.allow_push_notifications = false;
        assert_eq!(user.reachable_push_token(), None);
    }
}
