use std::sync::Arc;

use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::engine::TicketingEngine;
use crate::utils::response::success;

pub mod checkin;
pub mod events;
pub mod promos;
pub mod purchases;
pub mod waitlist;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<TicketingEngine>,
}

#[derive(Serialize)]
struct HealthPayload {
    status: &'static str,
    service: &'static str,
}

pub async fn health_check() -> Response {
    let payload = HealthPayload {
        status: "ok",
        service: "tessera-api",
    };

    success(payload, "Health check successful").into_response()
}
