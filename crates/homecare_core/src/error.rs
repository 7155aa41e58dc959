//! crates/homecare_core/src/error.rs
//!
//! The error type returned by the core services.

use crate::ports::PortError;

/// Errors raised by the core services.
///
/// Validation errors mean the input was malformed; invalid-state errors mean
/// the input was fine but the order or job was in the wrong state for it.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    InvalidState(String),

    #[error("{0}")]
    NotFound(String),

    /// Concurrent writers kept winning the compare-and-swap race.
    #[error("{0}")]
    Conflict(String),

    /// A job run lost its slot to a newer run and stopped.
    #[error("{0}")]
    Superseded(String),

    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),
}

impl ServiceError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }
}

/// A convenience type alias for `Result<T, ServiceError>`.
pub type ServiceResult<T> = Result<T, ServiceError>;
