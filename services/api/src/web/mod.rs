pub mod dto;
pub mod middleware;
pub mod protocol;
pub mod rest;
pub mod state;
pub mod ws_handler;

use axum::{
    middleware as axum_middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use rest::*;

pub use middleware::load_session;
pub use rest::ApiDoc;
pub use state::AppState;
pub use ws_handler::ws_handler;

/// Builds the complete application: every API route behind the session
/// middleware, plus the Swagger UI.
pub fn router(app_state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .route("/listings", get(list_listings_handler))
        .route("/items", post(create_item_handler))
        .route(
            "/items/{id}",
            get(get_item_handler)
                .put(edit_item_handler)
                .delete(delete_item_handler),
        )
        .route("/items/{id}/approve", post(approve_item_handler))
        .route("/items/{id}/reject", post(reject_item_handler))
        .route("/items/{id}/complete", post(complete_item_handler))
        .route("/items/{id}/report", post(report_item_handler))
        .route(
            "/items/{id}/save",
            post(save_item_handler).delete(unsave_item_handler),
        )
        .route("/me/items", get(my_items_handler))
        .route("/me/saves", get(my_saves_handler))
        .route("/me/location", put(update_location_handler))
        .route("/me/notifications", put(update_notifications_handler))
        .route(
            "/conversations",
            get(list_conversations_handler).post(start_conversation_handler),
        )
        .route(
            "/conversations/{id}",
            axum::routing::delete(delete_conversation_handler),
        )
        .route(
            "/conversations/{id}/messages",
            get(list_messages_handler).post(send_message_handler),
        )
        .route("/conversations/{id}/report", post(report_conversation_handler))
        .route("/ws", get(ws_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            load_session,
        ))
        .with_state(app_state);

    // Merge the API router with the Swagger UI router for a complete application.
    Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}
