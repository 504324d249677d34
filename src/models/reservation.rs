use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "reservation_state", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReservationState {
    Pending,
    Confirmed,
    Released,
}

/// A capacity hold taken before payment completes.
///
/// A `Pending` reservation occupies one unit of the event's capacity until
/// it is confirmed into a ticket, released, or swept after `expires_at`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Reservation {
    pub id: Uuid,
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub state: ReservationState,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
