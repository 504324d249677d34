use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Lifecycle state of an issued ticket. `Used` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "ticket_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Active,
    Used,
    Cancelled,
}

/// An admission ticket. The `qr_token` is a bearer credential: whoever
/// presents it at the door is admitted, so it is random, unique, and treated
/// like a secret.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Ticket {
    pub id: Uuid,
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub status: TicketStatus,
    pub qr_token: String,
    pub scanned_at: Option<DateTime<Utc>>,
    pub price_paid: Decimal,
    pub promo_code_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
