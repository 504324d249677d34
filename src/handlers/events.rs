use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::handlers::AppState;
use crate::models::Event;
use crate::store::CreateEvent;
use crate::utils::error::AppError;
use crate::utils::response::{created, success};

/// Event plus the availability numbers the storefront renders.
#[derive(Serialize)]
struct EventDetail {
    #[serde(flatten)]
    event: Event,
    remaining: i32,
    sold_out: bool,
}

impl From<Event> for EventDetail {
    fn from(event: Event) -> Self {
        Self {
            remaining: event.remaining(),
            sold_out: event.is_sold_out(),
            event,
        }
    }
}

pub async fn create_event(
    State(state): State<AppState>,
    Json(input): Json<CreateEvent>,
) -> Result<Response, AppError> {
    let event = state.engine.store().create_event(input).await?;
    Ok(created(EventDetail::from(event), "Event created").into_response())
}

pub async fn get_event(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let event = state.engine.store().get_event(event_id).await?;
    Ok(success(EventDetail::from(event), "Event found").into_response())
}

#[derive(Deserialize)]
pub struct PublishEventRequest {
    pub organizer_id: Uuid,
}

pub async fn publish_event(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
    Json(input): Json<PublishEventRequest>,
) -> Result<Response, AppError> {
    let event = state
        .engine
        .store()
        .publish_event(event_id, input.organizer_id)
        .await?;
    Ok(success(EventDetail::from(event), "Event published").into_response())
}

#[derive(Deserialize)]
pub struct ChangeCapacityRequest {
    pub organizer_id: Uuid,
    pub capacity: i32,
}

pub async fn change_capacity(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
    Json(input): Json<ChangeCapacityRequest>,
) -> Result<Response, AppError> {
    let event = state
        .engine
        .store()
        .change_capacity(event_id, input.organizer_id, input.capacity)
        .await?;
    Ok(success(EventDetail::from(event), "Capacity updated").into_response())
}
