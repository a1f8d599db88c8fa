//! services/api/src/web/dto.rs
//!
//! Request and response payloads of the REST API.

use chrono::{DateTime, Utc};
use lemontree_core::domain::{ConversationSummary, GeoLocation, Item, Message, User};
use lemontree_core::listing::{Listing, ListingPage};
use lemontree_core::ItemDraft;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

//=========================================================================================
// Items and listings
//=========================================================================================

#[derive(Serialize, ToSchema, Debug, Clone)]
pub struct LocationDto {
    pub latitude: f64,
    pub longitude: f64,
    pub geohash: String,
    pub country: String,
    pub postal_code: String,
}

impl From<&GeoLocation> for LocationDto {
    fn from(location: &GeoLocation) -> Self {
        Self {
            latitude: location.latitude(),
            longitude: location.longitude(),
            geohash: location.geohash().to_string(),
            country: location.country.clone(),
            postal_code: location.postal_code.clone(),
        }
    }
}

#[derive(Serialize, ToSchema, Debug, Clone)]
pub struct ItemDto {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub description: String,
    pub images: Vec<String>,
    pub categories: Vec<String>,
    /// Display label, e.g. "Up for Grabs".
    pub status: String,
    pub saves: u32,
    pub location: LocationDto,
    pub pickup_address: Option<String>,
    pub is_approved: bool,
    pub approved_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub edited_at: DateTime<Utc>,
}

impl From<&Item> for ItemDto {
    fn from(item: &Item) -> Self {
        Self {
            id: item.id,
            owner_id: item.owner_id,
            name: item.name.clone(),
            description: item.description.clone(),
            images: item.images.clone(),
            categories: item.categories.clone(),
            status: item.status.label().to_string(),
            saves: item.saves,
            location: LocationDto::from(&item.location),
            pickup_address: item.pickup_address.clone(),
            is_approved: item.is_approved,
            approved_by: item.approved_by.clone(),
            created_at: item.created_at,
            edited_at: item.edited_at,
        }
    }
}

impl From<Item> for ItemDto {
    fn from(item: Item) -> Self {
        Self::from(&item)
    }
}

#[derive(Serialize, ToSchema, Debug)]
pub struct ListingDto {
    pub item: ItemDto,
    /// Great-circle distance from the requester, when their location is known.
    pub distance_km: Option<f64>,
}

impl From<&Listing> for ListingDto {
    fn from(listing: &Listing) -> Self {
        Self {
            item: ItemDto::from(&listing.item),
            distance_km: listing.distance_km,
        }
    }
}

#[derive(Serialize, ToSchema, Debug)]
pub struct ListingPageDto {
    pub regular: Vec<ListingDto>,
    /// Only present on the first page.
    pub popular: Option<Vec<ListingDto>>,
    /// Opaque; pass back as `cursor` to fetch the next page.
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

impl From<ListingPage> for ListingPageDto {
    fn from(page: ListingPage) -> Self {
        Self {
            regular: page.regular.iter().map(ListingDto::from).collect(),
            popular: page
                .popular
                .map(|popular| popular.iter().map(ListingDto::from).collect()),
            next_cursor: page.next_cursor.map(|c| c.encode()),
            has_more: page.has_more,
        }
    }
}

/// Query parameters of `GET /listings`.
#[derive(Deserialize, IntoParams, Debug, Default)]
#[into_params(parameter_in = Query)]
pub struct ListingParams {
    /// Restricts both regular and popular listings to one category.
    pub category: Option<String>,
    /// Name prefix search; narrows regular listings only.
    pub q: Option<String>,
    /// Cursor from a previous page.
    pub cursor: Option<String>,
}

#[derive(Deserialize, ToSchema, Debug)]
pub struct ItemPayload {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    pub postal_code: String,
    #[serde(default)]
    pub pickup_address: Option<String>,
}

impl From<ItemPayload> for ItemDraft {
    fn from(payload: ItemPayload) -> Self {
        ItemDraft {
            name: payload.name,
            description: payload.description,
            images: payload.images,
            categories: payload.categories,
            postal_code: payload.postal_code,
            pickup_address: payload.pickup_address,
        }
    }
}

#[derive(Serialize, ToSchema, Debug)]
pub struct SavesResponse {
    pub item_id: Uuid,
    pub saves: u32,
}

//=========================================================================================
// Users
//=========================================================================================

#[derive(Serialize, ToSchema, Debug)]
pub struct UserDto {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub is_admin: bool,
    pub allow_push_notifications: bool,
    pub location: Option<LocationDto>,
}

impl From<&User> for UserDto {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            is_admin: user.is_admin,
            allow_push_notifications: user.allow_push_notifications,
            location: user.location.as_ref().map(LocationDto::from),
        }
    }
}

#[derive(Deserialize, ToSchema, Debug)]
pub struct LocationPayload {
    pub postal_code: String,
    /// Defaults to the country already on the account.
    #[serde(default)]
    pub country: Option<String>,
}

#[derive(Deserialize, ToSchema, Debug)]
pub struct NotificationsPayload {
    pub allow: bool,
    #[serde(default)]
    pub push_token: Option<String>,
}

//=========================================================================================
// Conversations
//=========================================================================================

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct MessageDto {
    pub id: Uuid,
    pub conversation_id: String,
    pub sender_id: Uuid,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl From<&Message> for MessageDto {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id,
            conversation_id: message.conversation_id.clone(),
            sender_id: message.sender_id,
            body: message.body.clone(),
            created_at: message.created_at,
        }
    }
}

#[derive(Serialize, ToSchema, Debug)]
pub struct ConversationDto {
    pub id: String,
    pub item_id: Uuid,
    pub participants: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub recent_message: Option<MessageDto>,
    pub item_name: Option<String>,
    pub item_image: Option<String>,
    pub item_status: Option<String>,
}

impl From<&ConversationSummary> for ConversationDto {
    fn from(summary: &ConversationSummary) -> Self {
        let conversation = &summary.conversation;
        Self {
            id: conversation.id.clone(),
            item_id: conversation.item_id,
            participants: conversation.participants.clone(),
            created_at: conversation.created_at,
            recent_message: summary.recent_message.as_ref().map(MessageDto::from),
            item_name: summary.item_name.clone(),
            item_image: summary.item_image.clone(),
            item_status: summary.item_status.map(|s| s.label().to_string()),
        }
    }
}

#[derive(Deserialize, ToSchema, Debug)]
pub struct StartConversationPayload {
    pub item_id: Uuid,
    pub text: String,
}

#[derive(Serialize, ToSchema, Debug)]
pub struct StartConversationResponse {
    pub conversation_id: String,
}

#[derive(Deserialize, ToSchema, Debug)]
pub struct SendMessagePayload {
    pub text: String,
}
