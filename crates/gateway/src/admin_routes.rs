//! `/api/v1/admin` handlers: key status and rotation.

use {
    axum::{
        Router,
        extract::State,
        response::Json,
        routing::{get, post},
    },
    cardvault_cards::types::{KeyStatusResponse, RotationResponse},
    tracing::info,
};

use crate::{auth::UserId, error::ApiResult, server::AppState};

pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/keys", get(key_status))
        .route("/cards/rotate-keys", post(rotate_keys))
}

async fn key_status(
    State(state): State<AppState>,
    UserId(_): UserId,
) -> ApiResult<Json<KeyStatusResponse>> {
    Ok(Json(state.cards.key_status().await?))
}

/// Rotates even when some cards fail to move; the per-card results say which.
async fn rotate_keys(
    State(state): State<AppState>,
    UserId(requested_by): UserId,
) -> ApiResult<Json<RotationResponse>> {
    info!(%requested_by, "key rotation requested");
    Ok(Json(state.cards.rotate_keys().await?))
}
