use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::handlers::AppState;
use crate::utils::error::AppError;
use crate::utils::response::success;

#[derive(Deserialize)]
pub struct CheckInRequest {
    pub qr_token: String,
    pub verifier_id: Uuid,
}

/// Door scan. On a duplicate the error body carries the original scan time
/// so the operator can see when the ticket was first admitted.
pub async fn check_in(
    State(state): State<AppState>,
    Json(input): Json<CheckInRequest>,
) -> Result<Response, AppError> {
    let detail = state
        .engine
        .checkin()
        .verify_and_check_in(&input.qr_token, input.verifier_id)
        .await?;
    Ok(success(detail, "Ticket checked in").into_response())
}
