//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::error::port_error_response;
use crate::web::dto::{
    ConversationDto, ItemDto, ItemPayload, ListingDto, ListingPageDto, ListingParams,
    LocationDto, LocationPayload, MessageDto, NotificationsPayload, SavesResponse,
    SendMessagePayload, StartConversationPayload, StartConversationResponse, UserDto,
};
use crate::web::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use lemontree_core::domain::SessionContext;
use lemontree_core::listing::ListingRequest;
use lemontree_core::query::Cursor;
use std::sync::Arc;
use tracing::info;
use utoipa::OpenApi;
use uuid::Uuid;

type HandlerError = (StatusCode, String);

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        list_listings_handler,
        create_item_handler,
        get_item_handler,
        edit_item_handler,
        delete_item_handler,
        approve_item_handler,
        reject_item_handler,
        complete_item_handler,
        report_item_handler,
        save_item_handler,
        unsave_item_handler,
        my_items_handler,
        my_saves_handler,
        update_location_handler,
        update_notifications_handler,
        list_conversations_handler,
        start_conversation_handler,
        list_messages_handler,
        send_message_handler,
        delete_conversation_handler,
        report_conversation_handler,
    ),
    components(
        schemas(
            ListingPageDto, ListingDto, ItemDto, LocationDto, ItemPayload, SavesResponse,
            UserDto, LocationPayload, NotificationsPayload, ConversationDto, MessageDto,
            StartConversationPayload, StartConversationResponse, SendMessagePayload
        )
    ),
    tags(
        (name = "Lemontree API", description = "Listing, requesting and giving away free items nearby.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// Listings
//=========================================================================================

/// Fetch a page of nearby listings.
///
/// Signed-in users with a location only see items within the configured
/// radius. Pages are newest first; the first page also carries the most-saved
/// items.
#[utoipa::path(
    get,
    path = "/listings",
    params(
        ListingParams,
        ("x-user-id" = Option<Uuid>, Header, description = "The unique ID of the requester.")
    ),
    responses(
        (status = 200, description = "A page of listings", body = ListingPageDto),
        (status = 400, description = "Malformed cursor"),
        (status = 401, description = "Unknown user")
    )
)]
pub async fn list_listings_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionContext>,
    Query(params): Query<ListingParams>,
) -> Result<impl IntoResponse, HandlerError> {
    let cursor = params
        .cursor
        .as_deref()
        .filter(|c| !c.is_empty())
        .map(Cursor::decode)
        .transpose()
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Invalid cursor: {}", e)))?;

    let mut request = ListingRequest {
        page_size: state.config.listing_page_size,
        radius_km: state.config.listing_radius_km,
        ..ListingRequest::default()
    }
    .after(cursor);
    if let Some(q) = params.q.as_deref() {
        request = request.search(q);
    }
    if let Some(category) = params.category.filter(|c| !c.trim().is_empty()) {
        request = request.category(category);
    }

    let page = state
        .listings
        .fetch_listings(&session, &request)
        .await
        .map_err(port_error_response)?;
    Ok(Json(ListingPageDto::from(page)))
}

//=========================================================================================
// Items
//=========================================================================================

/// Upload a new item.
///
/// The item is geocoded from its postal code and the uploader's country.
/// Items from non-admins wait for approval.
#[utoipa::path(
    post,
    path = "/items",
    request_body = ItemPayload,
    params(("x-user-id" = Uuid, Header, description = "The unique ID of the user.")),
    responses(
        (status = 201, description = "Item created", body = ItemDto),
        (status = 400, description = "Invalid item or postal code"),
        (status = 401, description = "Sign in required")
    )
)]
pub async fn create_item_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionContext>,
    Json(payload): Json<ItemPayload>,
) -> Result<impl IntoResponse, HandlerError> {
    let item = state
        .items
        .create_item(&session, payload.into())
        .await
        .map_err(port_error_response)?;
    Ok((StatusCode::CREATED, Json(ItemDto::from(item))))
}

#[utoipa::path(
    get,
    path = "/items/{id}",
    params(
        ("id" = Uuid, Path, description = "Item id"),
        ("x-user-id" = Option<Uuid>, Header, description = "The unique ID of the requester.")
    ),
    responses(
        (status = 200, description = "The item", body = ItemDto),
        (status = 404, description = "No such item, or not visible to the requester")
    )
)]
pub async fn get_item_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionContext>,
    Path(item_id): Path<Uuid>,
) -> Result<impl IntoResponse, HandlerError> {
    let item = state
        .items
        .get_item(&session, item_id)
        .await
        .map_err(port_error_response)?;
    Ok(Json(ItemDto::from(item)))
}

/// Replace an item's details. Owner only; the item goes back to review
/// unless the owner is an admin.
#[utoipa::path(
    put,
    path = "/items/{id}",
    request_body = ItemPayload,
    params(
        ("id" = Uuid, Path, description = "Item id"),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    ),
    responses(
        (status = 200, description = "Item updated", body = ItemDto),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "No such item")
    )
)]
pub async fn edit_item_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionContext>,
    Path(item_id): Path<Uuid>,
    Json(payload): Json<ItemPayload>,
) -> Result<impl IntoResponse, HandlerError> {
    let item = state
        .items
        .edit_item(&session, item_id, payload.into())
        .await
        .map_err(port_error_response)?;
    Ok(Json(ItemDto::from(item)))
}

#[utoipa::path(
    delete,
    path = "/items/{id}",
    params(
        ("id" = Uuid, Path, description = "Item id"),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    ),
    responses(
        (status = 204, description = "Item deleted"),
        (status = 403, description = "Neither the owner nor an admin")
    )
)]
pub async fn delete_item_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionContext>,
    Path(item_id): Path<Uuid>,
) -> Result<impl IntoResponse, HandlerError> {
    state
        .items
        .delete_item(&session, item_id)
        .await
        .map_err(port_error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/items/{id}/approve",
    params(
        ("id" = Uuid, Path, description = "Item id"),
        ("x-user-id" = Uuid, Header, description = "The unique ID of an admin.")
    ),
    responses(
        (status = 200, description = "Item approved", body = ItemDto),
        (status = 403, description = "Admin role required")
    )
)]
pub async fn approve_item_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionContext>,
    Path(item_id): Path<Uuid>,
) -> Result<impl IntoResponse, HandlerError> {
    let item = state
        .items
        .approve_item(&session, item_id)
        .await
        .map_err(port_error_response)?;
    Ok(Json(ItemDto::from(item)))
}

#[utoipa::path(
    post,
    path = "/items/{id}/reject",
    params(
        ("id" = Uuid, Path, description = "Item id"),
        ("x-user-id" = Uuid, Header, description = "The unique ID of an admin.")
    ),
    responses(
        (status = 200, description = "Item rejected", body = ItemDto),
        (status = 403, description = "Admin role required")
    )
)]
pub async fn reject_item_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionContext>,
    Path(item_id): Path<Uuid>,
) -> Result<impl IntoResponse, HandlerError> {
    let item = state
        .items
        .reject_item(&session, item_id)
        .await
        .map_err(port_error_response)?;
    Ok(Json(ItemDto::from(item)))
}

/// Mark an item as given away.
#[utoipa::path(
    post,
    path = "/items/{id}/complete",
    params(
        ("id" = Uuid, Path, description = "Item id"),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the owner.")
    ),
    responses(
        (status = 200, description = "Item marked as donated", body = ItemDto),
        (status = 403, description = "Not the owner")
    )
)]
pub async fn complete_item_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionContext>,
    Path(item_id): Path<Uuid>,
) -> Result<impl IntoResponse, HandlerError> {
    let item = state
        .items
        .complete_item(&session, item_id)
        .await
        .map_err(port_error_response)?;
    Ok(Json(ItemDto::from(item)))
}

/// Report an item. Its owner is blocked for the reporter.
#[utoipa::path(
    post,
    path = "/items/{id}/report",
    params(
        ("id" = Uuid, Path, description = "Item id"),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    ),
    responses(
        (status = 204, description = "Report recorded"),
        (status = 400, description = "Cannot report your own item")
    )
)]
pub async fn report_item_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionContext>,
    Path(item_id): Path<Uuid>,
) -> Result<impl IntoResponse, HandlerError> {
    state
        .items
        .report_item(&session, item_id)
        .await
        .map_err(port_error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/items/{id}/save",
    params(
        ("id" = Uuid, Path, description = "Item id"),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    ),
    responses((status = 200, description = "Item saved", body = SavesResponse))
)]
pub async fn save_item_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionContext>,
    Path(item_id): Path<Uuid>,
) -> Result<impl IntoResponse, HandlerError> {
    let saves = state
        .items
        .save_item(&session, item_id)
        .await
        .map_err(port_error_response)?;
    Ok(Json(SavesResponse { item_id, saves }))
}

#[utoipa::path(
    delete,
    path = "/items/{id}/save",
    params(
        ("id" = Uuid, Path, description = "Item id"),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    ),
    responses((status = 200, description = "Item unsaved", body = SavesResponse))
)]
pub async fn unsave_item_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionContext>,
    Path(item_id): Path<Uuid>,
) -> Result<impl IntoResponse, HandlerError> {
    let saves = state
        .items
        .unsave_item(&session, item_id)
        .await
        .map_err(port_error_response)?;
    Ok(Json(SavesResponse { item_id, saves }))
}

//=========================================================================================
// The signed-in user
//=========================================================================================

#[utoipa::path(
    get,
    path = "/me/items",
    params(("x-user-id" = Uuid, Header, description = "The unique ID of the user.")),
    responses((status = 200, description = "The user's own listings", body = [ItemDto]))
)]
pub async fn my_items_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionContext>,
) -> Result<impl IntoResponse, HandlerError> {
    let items = state
        .items
        .user_items(&session)
        .await
        .map_err(port_error_response)?;
    Ok(Json(items.iter().map(ItemDto::from).collect::<Vec<_>>()))
}

#[utoipa::path(
    get,
    path = "/me/saves",
    params(("x-user-id" = Uuid, Header, description = "The unique ID of the user.")),
    responses((status = 200, description = "Items the user saved", body = [ItemDto]))
)]
pub async fn my_saves_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionContext>,
) -> Result<impl IntoResponse, HandlerError> {
    let items = state
        .items
        .saved_items(&session)
        .await
        .map_err(port_error_response)?;
    Ok(Json(items.iter().map(ItemDto::from).collect::<Vec<_>>()))
}

/// Move the user to a new postal code.
#[utoipa::path(
    put,
    path = "/me/location",
    request_body = LocationPayload,
    params(("x-user-id" = Uuid, Header, description = "The unique ID of the user.")),
    responses(
        (status = 200, description = "Location updated", body = UserDto),
        (status = 400, description = "Invalid Zipcode")
    )
)]
pub async fn update_location_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionContext>,
    Json(payload): Json<LocationPayload>,
) -> Result<impl IntoResponse, HandlerError> {
    let user = state
        .locations
        .update_user_location(&session, &payload.postal_code, payload.country.as_deref())
        .await
        .map_err(port_error_response)?;
    Ok(Json(UserDto::from(&user)))
}

#[utoipa::path(
    put,
    path = "/me/notifications",
    request_body = NotificationsPayload,
    params(("x-user-id" = Uuid, Header, description = "The unique ID of the user.")),
    responses((status = 204, description = "Preference stored"))
)]
pub async fn update_notifications_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionContext>,
    Json(payload): Json<NotificationsPayload>,
) -> Result<impl IntoResponse, HandlerError> {
    let user_id = state
        .locations
        .update_notifications(&session, payload.allow, payload.push_token)
        .await
        .map_err(port_error_response)?;
    info!(%user_id, allow = payload.allow, "Push preference updated");
    Ok(StatusCode::NO_CONTENT)
}

//=========================================================================================
// Conversations
//=========================================================================================

#[utoipa::path(
    get,
    path = "/conversations",
    params(("x-user-id" = Uuid, Header, description = "The unique ID of the user.")),
    responses((status = 200, description = "The user's inbox, most recent first", body = [ConversationDto]))
)]
pub async fn list_conversations_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionContext>,
) -> Result<impl IntoResponse, HandlerError> {
    let summaries = state
        .messaging
        .conversations(&session)
        .await
        .map_err(port_error_response)?;
    Ok(Json(
        summaries.iter().map(ConversationDto::from).collect::<Vec<_>>(),
    ))
}

/// Request an item by messaging its owner.
#[utoipa::path(
    post,
    path = "/conversations",
    request_body = StartConversationPayload,
    params(("x-user-id" = Uuid, Header, description = "The unique ID of the requester.")),
    responses(
        (status = 201, description = "Conversation opened", body = StartConversationResponse),
        (status = 400, description = "Own item, unavailable item or empty message")
    )
)]
pub async fn start_conversation_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionContext>,
    Json(payload): Json<StartConversationPayload>,
) -> Result<impl IntoResponse, HandlerError> {
    let conversation = state
        .messaging
        .start_conversation(&session, payload.item_id, &payload.text)
        .await
        .map_err(port_error_response)?;
    Ok((
        StatusCode::CREATED,
        Json(StartConversationResponse {
            conversation_id: conversation.id,
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/conversations/{id}/messages",
    params(
        ("id" = String, Path, description = "Conversation id"),
        ("x-user-id" = Uuid, Header, description = "The unique ID of a participant.")
    ),
    responses(
        (status = 200, description = "Messages, oldest first", body = [MessageDto]),
        (status = 403, description = "Not a participant")
    )
)]
pub async fn list_messages_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionContext>,
    Path(conversation_id): Path<String>,
) -> Result<impl IntoResponse, HandlerError> {
    let messages = state
        .messaging
        .messages(&session, &conversation_id)
        .await
        .map_err(port_error_response)?;
    Ok(Json(messages.iter().map(MessageDto::from).collect::<Vec<_>>()))
}

#[utoipa::path(
    post,
    path = "/conversations/{id}/messages",
    request_body = SendMessagePayload,
    params(
        ("id" = String, Path, description = "Conversation id"),
        ("x-user-id" = Uuid, Header, description = "The unique ID of a participant.")
    ),
    responses(
        (status = 201, description = "Message stored", body = MessageDto),
        (status = 403, description = "Not a participant")
    )
)]
pub async fn send_message_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionContext>,
    Path(conversation_id): Path<String>,
    Json(payload): Json<SendMessagePayload>,
) -> Result<impl IntoResponse, HandlerError> {
    let message = state
        .messaging
        .send_message(&session, &conversation_id, &payload.text)
        .await
        .map_err(port_error_response)?;
    Ok((StatusCode::CREATED, Json(MessageDto::from(&message))))
}

#[utoipa::path(
    delete,
    path = "/conversations/{id}",
    params(
        ("id" = String, Path, description = "Conversation id"),
        ("x-user-id" = Uuid, Header, description = "The unique ID of a participant.")
    ),
    responses((status = 204, description = "Conversation hidden from the user's inbox"))
)]
pub async fn delete_conversation_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionContext>,
    Path(conversation_id): Path<String>,
) -> Result<impl IntoResponse, HandlerError> {
    state
        .messaging
        .delete_conversation(&session, &conversation_id)
        .await
        .map_err(port_error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Report a conversation: it is deleted for the reporter and the other
/// participant is blocked.
#[utoipa::path(
    post,
    path = "/conversations/{id}/report",
    params(
        ("id" = String, Path, description = "Conversation id"),
        ("x-user-id" = Uuid, Header, description = "The unique ID of a participant.")
    ),
    responses((status = 204, description = "Conversation reported"))
)]
pub async fn report_conversation_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionContext>,
    Path(conversation_id): Path<String>,
) -> Result<impl IntoResponse, HandlerError> {
    state
        .messaging
        .report_conversation(&session, &conversation_id)
        .await
        .map_err(port_error_response)?;
    Ok(StatusCode::NO_CONTENT)
}
