use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::handlers::AppState;
use crate::models::PaymentOutcome;
use crate::utils::error::AppError;
use crate::utils::response::success;

#[derive(Deserialize)]
pub struct PurchaseRequest {
    pub user_id: Uuid,
    pub promo_code: Option<String>,
}

/// Buy a ticket, or get a checkout redirect for priced events. A `SoldOut`
/// response is the cue to offer the waitlist.
pub async fn purchase(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
    Json(input): Json<PurchaseRequest>,
) -> Result<Response, AppError> {
    let outcome = state
        .engine
        .purchase_or_reserve(event_id, input.user_id, input.promo_code)
        .await?;
    Ok(success(outcome, "Purchase accepted").into_response())
}

#[derive(Deserialize)]
pub struct ConfirmPaymentRequest {
    pub reference: String,
    pub outcome: PaymentOutcome,
}

/// Payment-provider callback. Duplicate deliveries return the original
/// result.
pub async fn confirm_payment(
    State(state): State<AppState>,
    Json(input): Json<ConfirmPaymentRequest>,
) -> Result<Response, AppError> {
    let ticket = state
        .engine
        .confirm_purchase(&input.reference, input.outcome)
        .await?;
    Ok(success(ticket, "Purchase confirmed").into_response())
}

#[derive(Deserialize)]
pub struct CancelTicketRequest {
    pub requester_id: Uuid,
}

pub async fn cancel_ticket(
    State(state): State<AppState>,
    Path(ticket_id): Path<Uuid>,
    Json(input): Json<CancelTicketRequest>,
) -> Result<Response, AppError> {
    let ticket = state
        .engine
        .cancel_ticket(ticket_id, input.requester_id)
        .await?;
    Ok(success(ticket, "Ticket cancelled").into_response())
}
