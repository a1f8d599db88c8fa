//! services/api/src/error.rs
//!
//! Defines the primary error type for the entire API service, and how core
//! port errors are turned into HTTP responses.

use axum::http::StatusCode;
use lemontree_core::ports::PortError;
use tracing::error;

use crate::config::ConfigError;

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error that propagated up from one of the core service ports.
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    /// Represents an error from the underlying database library.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    /// Represents a failure to apply the schema migrations.
    #[error("Migration Error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

/// Maps a port error to the status code and message returned to clients.
/// Unexpected errors are logged and replaced by a generic message.
pub fn port_error_response(e: PortError) -> (StatusCode, String) {
    match e {
        PortError::NotFound(what) => (StatusCode::NOT_FOUND, format!("Not found: {}", what)),
        PortError::Unauthorized => (StatusCode::UNAUTHORIZED, "Sign in required".to_string()),
        PortError::Forbidden(reason) => (StatusCode::FORBIDDEN, reason),
        PortError::InvalidInput(reason) => (StatusCode::BAD_REQUEST, reason),
        PortError::Unexpected(detail) => {
            error!(%detail, "Request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Something went wrong.".to_string(),
            )
        }
    }
}
