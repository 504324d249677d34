//! Waitlist Manager: fair, ordered admission for sold-out events.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::gateway::NotificationGateway;
use crate::models::{EventStatus, WaitlistEntry};
use crate::store::LedgerStore;
use crate::utils::error::AppError;

/// What a user sees about their place in the queue. `position` is the rank
/// among live entries, recomputed per read — it shrinks as people ahead
/// leave or convert, without ever renumbering stored positions.
#[derive(Debug, Clone, Serialize)]
pub struct WaitlistStatus {
    pub on_waitlist: bool,
    pub position: Option<i64>,
    pub total_ahead: Option<i64>,
}

impl WaitlistStatus {
    fn absent() -> Self {
        Self {
            on_waitlist: false,
            position: None,
            total_ahead: None,
        }
    }

    fn at_rank(rank: i64) -> Self {
        Self {
            on_waitlist: true,
            position: Some(rank),
            total_ahead: Some(rank - 1),
        }
    }
}

pub struct WaitlistManager {
    store: Arc<dyn LedgerStore>,
    notifier: Arc<dyn NotificationGateway>,
    hold_window: Duration,
}

impl WaitlistManager {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        notifier: Arc<dyn NotificationGateway>,
        hold_window: Duration,
    ) -> Self {
        Self {
            store,
            notifier,
            hold_window,
        }
    }

    /// Join the queue of a sold-out, published event.
    pub async fn join(&self, event_id: Uuid, user_id: Uuid) -> Result<WaitlistStatus, AppError> {
        let event = self.store.get_event(event_id).await?;
        if event.status != EventStatus::Published {
            return Err(AppError::ValidationError(
                "tickets are not on sale for this event".to_string(),
            ));
        }
        if !event.is_sold_out() {
            return Err(AppError::ValidationError(
                "event still has capacity; purchase a ticket directly".to_string(),
            ));
        }
        let entry = self
            .store
            .join_waitlist(event_id, user_id, Utc::now())
            .await?;
        tracing::info!(
            event_id = %event_id,
            user_id = %user_id,
            position = entry.position,
            "Joined waitlist"
        );
        // The fresh entry sits behind every other live entry.
        self.status(event_id, user_id).await
    }

    pub async fn leave(&self, event_id: Uuid, user_id: Uuid) -> Result<(), AppError> {
        self.store.leave_waitlist(event_id, user_id).await?;
        tracing::info!(event_id = %event_id, user_id = %user_id, "Left waitlist");
        Ok(())
    }

    pub async fn status(
        &self,
        event_id: Uuid,
        user_id: Uuid,
    ) -> Result<WaitlistStatus, AppError> {
        Ok(match self.store.waitlist_position(event_id, user_id).await? {
            Some((_, rank)) => WaitlistStatus::at_rank(rank),
            None => WaitlistStatus::absent(),
        })
    }

    /// Serve the queue after a unit of capacity was released: notify the
    /// lowest-position Waiting entry and start its hold window. The freed
    /// unit is not fenced off — the notified user still goes through the
    /// ordinary reserve path, they are just first to hear about it.
    pub async fn promote(
        &self,
        event_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<WaitlistEntry>, AppError> {
        let promoted = self
            .store
            .promote_next_waiting(event_id, now, now + self.hold_window)
            .await?;
        if let Some(entry) = &promoted {
            tracing::info!(
                event_id = %event_id,
                user_id = %entry.user_id,
                position = entry.position,
                "Waitlist entry notified"
            );
            self.notifier.waitlist_spot_open(entry.user_id, event_id).await;
        }
        Ok(promoted)
    }

    /// Mark the user's live entry Converted after a successful reserve.
    pub async fn convert(&self, event_id: Uuid, user_id: Uuid) -> Result<(), AppError> {
        if let Some(entry) = self.store.convert_waitlist_entry(event_id, user_id).await? {
            tracing::debug!(
                event_id = %event_id,
                user_id = %user_id,
                position = entry.position,
                "Waitlist entry converted"
            );
        }
        Ok(())
    }

    /// Expire lapsed holds. Returns the expired entries so the caller can
    /// cascade one promotion per freed hold.
    pub async fn expire_overdue(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<WaitlistEntry>, AppError> {
        let expired = self.store.expire_overdue_holds(now).await?;
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "Expired waitlist holds");
        }
        Ok(expired)
    }
}
