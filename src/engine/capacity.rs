//! Capacity Guard: the only component that takes or returns capacity units.
//!
//! Issued tickets and pending reservations both hold a unit; the store's
//! conditional increment is what makes overselling impossible, and this
//! guard is the only caller of that increment.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::{Reservation, Ticket};
use crate::store::LedgerStore;
use crate::utils::error::AppError;
use crate::utils::token;

pub struct CapacityGuard {
    store: Arc<dyn LedgerStore>,
    reservation_ttl: Duration,
}

impl CapacityGuard {
    pub fn new(store: Arc<dyn LedgerStore>, reservation_ttl: Duration) -> Self {
        Self {
            store,
            reservation_ttl,
        }
    }

    /// Take one unit of the event's capacity, failing fast with `SoldOut`
    /// when none is free. The reservation self-destructs via the sweeper if
    /// the caller never confirms or releases it.
    pub async fn reserve(&self, event_id: Uuid, user_id: Uuid) -> Result<Reservation, AppError> {
        let expires_at = Utc::now() + self.reservation_ttl;
        let reservation = self.store.reserve_unit(event_id, user_id, expires_at).await?;
        tracing::debug!(
            reservation_id = %reservation.id,
            event_id = %event_id,
            user_id = %user_id,
            "Capacity unit reserved"
        );
        Ok(reservation)
    }

    /// Turn a reservation into an Active ticket with a fresh QR token.
    pub async fn confirm(
        &self,
        reservation_id: Uuid,
        price_paid: Decimal,
        promo_code_id: Option<Uuid>,
    ) -> Result<Ticket, AppError> {
        let qr_token = token::generate_qr_token();
        let ticket = self
            .store
            .confirm_reservation(reservation_id, &qr_token, price_paid, promo_code_id)
            .await?;
        tracing::info!(
            ticket_id = %ticket.id,
            event_id = %ticket.event_id,
            "Ticket issued"
        );
        Ok(ticket)
    }

    /// Give a reserved unit back. Returns the event id when a unit was
    /// actually released, so the caller can run exactly one promotion.
    pub async fn release(&self, reservation_id: Uuid) -> Result<Option<Uuid>, AppError> {
        self.store.release_reservation(reservation_id).await
    }

    /// Cancel an Active ticket and give its unit back.
    pub async fn cancel(&self, ticket_id: Uuid) -> Result<Ticket, AppError> {
        let ticket = self.store.cancel_ticket(ticket_id).await?;
        tracing::info!(ticket_id = %ticket.id, event_id = %ticket.event_id, "Ticket cancelled");
        Ok(ticket)
    }

    /// Release every reservation that outlived its TTL. One event id per
    /// released unit.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, AppError> {
        let released = self.store.sweep_expired_reservations(now).await?;
        if !released.is_empty() {
            tracing::info!(count = released.len(), "Swept expired reservations");
        }
        Ok(released)
    }
}
