use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::handlers::AppState;
use crate::utils::error::AppError;
use crate::utils::response::{empty_success, success};

#[derive(Deserialize)]
pub struct WaitlistRequest {
    pub user_id: Uuid,
}

pub async fn join(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
    Json(input): Json<WaitlistRequest>,
) -> Result<Response, AppError> {
    let status = state.engine.waitlist().join(event_id, input.user_id).await?;
    Ok(success(status, "Joined waitlist").into_response())
}

pub async fn leave(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
    Json(input): Json<WaitlistRequest>,
) -> Result<Response, AppError> {
    state.engine.waitlist().leave(event_id, input.user_id).await?;
    Ok(empty_success("Left waitlist").into_response())
}

#[derive(Deserialize)]
pub struct StatusQuery {
    pub user_id: Uuid,
}

pub async fn status(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
    Query(query): Query<StatusQuery>,
) -> Result<Response, AppError> {
    let status = state
        .engine
        .waitlist()
        .status(event_id, query.user_id)
        .await?;
    Ok(success(status, "Waitlist status").into_response())
}
