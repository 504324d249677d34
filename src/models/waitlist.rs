use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// State of a waitlist entry. `Waiting` and `Notified` are the live states;
/// the rest are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "waitlist_state", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WaitlistState {
    Waiting,
    Notified,
    Converted,
    Expired,
    Left,
}

impl WaitlistState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, WaitlistState::Waiting | WaitlistState::Notified)
    }
}

/// A place in a sold-out event's admission queue.
///
/// `position` is assigned once, monotonically per event, and never
/// renumbered. The position shown to users is the rank among live entries,
/// computed at read time.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WaitlistEntry {
    pub id: Uuid,
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub position: i32,
    pub state: WaitlistState,
    pub joined_at: DateTime<Utc>,
    pub notified_at: Option<DateTime<Utc>>,
    pub hold_expires_at: Option<DateTime<Utc>>,
}
