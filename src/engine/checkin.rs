//! Check-in Verifier: admit each ticket exactly once at the venue door.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::models::{Event, Ticket, TicketStatus, User};
use crate::store::LedgerStore;
use crate::utils::error::AppError;

/// Everything the door operator needs on a successful scan.
#[derive(Debug, Clone, Serialize)]
pub struct CheckInDetail {
    pub ticket: Ticket,
    pub attendee: User,
    pub event: Event,
}

pub struct CheckinVerifier {
    store: Arc<dyn LedgerStore>,
}

impl CheckinVerifier {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Validate a QR token and perform the one-way Active → Used transition.
    ///
    /// The transition is a conditional update, so two simultaneous scans of
    /// the same token resolve to one success and one `AlreadyUsed`. A retry
    /// after a timeout therefore either finds its first attempt committed
    /// (`AlreadyUsed`, a benign duplicate) or retries cleanly.
    pub async fn verify_and_check_in(
        &self,
        qr_token: &str,
        verifier_id: Uuid,
    ) -> Result<CheckInDetail, AppError> {
        let ticket = self.store.find_ticket_by_token(qr_token).await?;
        let event = self.store.get_event(ticket.event_id).await?;

        if event.organizer_id != verifier_id {
            return Err(AppError::Forbidden(
                "only the event organizer may check in tickets".to_string(),
            ));
        }

        let ticket = match ticket.status {
            TicketStatus::Cancelled => return Err(AppError::TicketCancelled),
            TicketStatus::Used => {
                return Err(AppError::AlreadyUsed {
                    scanned_at: ticket.scanned_at.unwrap_or(ticket.updated_at),
                })
            }
            TicketStatus::Active => self.store.mark_ticket_used(ticket.id, Utc::now()).await?,
        };

        let attendee = self.store.get_user(ticket.user_id).await?;
        tracing::info!(
            ticket_id = %ticket.id,
            event_id = %event.id,
            "Ticket checked in"
        );
        Ok(CheckInDetail {
            ticket,
            attendee,
            event,
        })
    }
}
