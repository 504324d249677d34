use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::handlers::AppState;
use crate::store::CreatePromoCode;
use crate::utils::error::AppError;
use crate::utils::response::{created, success};

pub async fn create_promo(
    State(state): State<AppState>,
    Json(input): Json<CreatePromoCode>,
) -> Result<Response, AppError> {
    let promo = state.engine.store().create_promo(input).await?;
    Ok(created(promo, "Promo code created").into_response())
}

#[derive(Deserialize)]
pub struct DeactivatePromoRequest {
    pub owner_id: Uuid,
}

pub async fn deactivate_promo(
    State(state): State<AppState>,
    Path(promo_id): Path<Uuid>,
    Json(input): Json<DeactivatePromoRequest>,
) -> Result<Response, AppError> {
    let promo = state
        .engine
        .store()
        .deactivate_promo(promo_id, input.owner_id)
        .await?;
    Ok(success(promo, "Promo code deactivated").into_response())
}

#[derive(Deserialize)]
pub struct ValidatePromoRequest {
    pub code: String,
    pub event_id: Uuid,
}

/// Price a code against an event without spending a use.
pub async fn validate_promo(
    State(state): State<AppState>,
    Json(input): Json<ValidatePromoRequest>,
) -> Result<Response, AppError> {
    let event = state.engine.store().get_event(input.event_id).await?;
    let quote = state.engine.promo().validate(&input.code, &event).await?;
    Ok(success(quote, "Promo code is valid").into_response())
}
