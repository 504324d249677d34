use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Publication state of an event. Tickets can only be sold for
/// `Published` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "event_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Draft,
    Published,
}

/// A capacity-bound event.
///
/// `sold_count` is the number of capacity units currently held: tickets in
/// Active or Used state plus reservations still Pending. The store never
/// lets it exceed `capacity`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Event {
    pub id: Uuid,
    pub organizer_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub location: String,
    pub start_time: DateTime<Utc>,
    pub capacity: i32,
    pub sold_count: i32,
    pub price: Decimal,
    pub status: EventStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    pub fn is_free(&self) -> bool {
        self.price.is_zero()
    }

    pub fn remaining(&self) -> i32 {
        self.capacity - self.sold_count
    }

    pub fn is_sold_out(&self) -> bool {
        self.remaining() <= 0
    }
}
