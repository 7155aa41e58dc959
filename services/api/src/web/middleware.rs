//! services/api/src/web/middleware.rs
//!
//! Caller identity middleware for protecting routes.
//!
//! Authentication happens upstream; by the time a request reaches this
//! service the gateway has put the authenticated user's id in `x-user-id`.

use axum::{
    extract::Request,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use tracing::debug;

pub const CALLER_HEADER: &str = "x-user-id";

/// The authenticated caller: the delivery agent, the recipient or an operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerId(pub String);

/// Reads the caller id from the headers, if present and non-blank.
pub fn caller_from_headers(headers: &HeaderMap) -> Option<CallerId> {
    headers
        .get(CALLER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| CallerId(id.to_string()))
}

/// Middleware that requires the `x-user-id` header.
///
/// If present, inserts a `CallerId` into request extensions for handlers to use.
/// If missing or blank, returns 401 Unauthorized.
pub async fn require_identity(mut req: Request, next: Next) -> Result<Response, StatusCode> {
    let caller = caller_from_headers(req.headers()).ok_or_else(|| {
        debug!(path = %req.uri().path(), "Request without caller identity rejected.");
        StatusCode::UNAUTHORIZED
    })?;

    req.extensions_mut().insert(caller);
    Ok(next.run(req).await)
}
