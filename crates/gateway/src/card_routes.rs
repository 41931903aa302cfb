//! `/api/v1/cards` handlers.

use {
    axum::{
        Router,
        extract::{
            Path, State,
            rejection::{JsonRejection, PathRejection},
        },
        http::StatusCode,
        response::Json,
        routing::{get, patch},
    },
    cardvault_cards::types::{BatchUpdateRequest, BatchUpdateResponse, CardRequest, CardResponse},
    uuid::Uuid,
};

use crate::{auth::UserId, error::ApiResult, server::AppState};

pub fn card_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_cards).post(create_card))
        .route("/batch-update", patch(batch_update))
        .route(
            "/{id}",
            get(get_card).put(update_card).delete(delete_card),
        )
}

async fn create_card(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    body: Result<Json<CardRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<CardResponse>)> {
    let Json(req) = body?;
    let card = state.cards.create_card(user_id, &req).await?;
    Ok((StatusCode::CREATED, Json(card)))
}

async fn list_cards(
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> ApiResult<Json<Vec<CardResponse>>> {
    Ok(Json(state.cards.list_cards(user_id).await?))
}

async fn get_card(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    id: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Json<CardResponse>> {
    let Path(id) = id?;
    Ok(Json(state.cards.get_card(user_id, id).await?))
}

async fn update_card(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    id: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<CardRequest>, JsonRejection>,
) -> ApiResult<Json<CardResponse>> {
    let Path(id) = id?;
    let Json(req) = body?;
    Ok(Json(state.cards.update_card(user_id, id, &req).await?))
}

async fn delete_card(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    id: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<StatusCode> {
    let Path(id) = id?;
    state.cards.delete_card(user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn batch_update(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    body: Result<Json<BatchUpdateRequest>, JsonRejection>,
) -> ApiResult<Json<Vec<BatchUpdateResponse>>> {
    let Json(req) = body?;
    Ok(Json(state.cards.batch_update(user_id, req).await?))
}
