//! services/api/src/error.rs
//!
//! Defines the primary error type for the entire API service, and the mapping
//! of core service errors onto HTTP responses.

use crate::config::ConfigError;
use axum::http::StatusCode;
use homecare_core::ServiceError;
use tracing::error;

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error from the underlying database library.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

/// The error half of every handler's return type.
pub type HttpError = (StatusCode, String);

/// Maps a core service error onto a status code and a response body.
///
/// Port failures are logged and answered with a generic body; every other
/// variant carries its specific reason to the caller.
pub fn http_error(err: ServiceError) -> HttpError {
    match err {
        ServiceError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
        ServiceError::InvalidState(msg) => (StatusCode::CONFLICT, msg),
        ServiceError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
        ServiceError::Conflict(msg) | ServiceError::Superseded(msg) => {
            (StatusCode::CONFLICT, msg)
        }
        ServiceError::Port(e) => {
            error!("Service port failure: {:?}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "An internal error occurred".to_string(),
            )
        }
    }
}
