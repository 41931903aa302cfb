//! Caller identity.
//!
//! Token verification happens upstream; the auth proxy forwards the
//! authenticated user's id in `x-user-id`.

use {
    axum::{extract::FromRequestParts, http::request::Parts},
    uuid::Uuid,
};

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";

/// Axum extractor for the authenticated user. Rejects with 401 when the
/// header is missing or not a UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserId(pub Uuid);

impl<S> FromRequestParts<S> for UserId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .map(UserId)
            .ok_or(ApiError::Unauthorized)
    }
}
