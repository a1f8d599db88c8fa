//! services/api/src/web/middleware.rs
//!
//! Identifies the requester for every API route.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use lemontree_core::domain::SessionContext;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::error::port_error_response;
use crate::web::state::AppState;

pub const USER_ID_HEADER: &str = "x-user-id";

/// Middleware that loads the requester's `SessionContext`.
///
/// Without an `x-user-id` header the request continues anonymously. A header
/// that is not a UUID, or names an unknown or deleted user, is rejected with
/// 401 Unauthorized. The session is inserted into the request extensions.
pub async fn load_session(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, (StatusCode, String)> {
    // 1. Extract the optional user id
    let user_id = match req.headers().get(USER_ID_HEADER) {
        None => None,
        Some(value) => {
            let parsed = value
                .to_str()
                .ok()
                .and_then(|v| Uuid::parse_str(v.trim()).ok())
                .ok_or_else(|| {
                    (
                        StatusCode::UNAUTHORIZED,
                        format!("Invalid {} header", USER_ID_HEADER),
                    )
                })?;
            Some(parsed)
        }
    };

    // 2. Load the session
    let session = SessionContext::load(state.users.as_ref(), user_id)
        .await
        .map_err(port_error_response)?;
    debug!(user_id = ?session.user_id(), admin = session.is_admin(), "Session loaded");

    // 3. Hand it to the handlers
    req.extensions_mut().insert(session);
    Ok(next.run(req).await)
}
