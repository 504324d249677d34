//! The ticketing engine: capacity, waitlist, check-in, and promo components
//! composed over one ledger store.
//!
//! The composition rules that live here and nowhere else:
//! purchases go quote → reserve → charge → redeem-or-fallback, no store lock
//! is ever held across a payment-provider or notification call, and every
//! released capacity unit triggers exactly one waitlist promotion attempt.

pub mod capacity;
pub mod checkin;
pub mod promo;
pub mod waitlist;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::gateway::{NotificationGateway, PaymentProvider};
use crate::models::{
    EventStatus, PaymentOutcome, PaymentStatus, Ticket,
};
use crate::store::{LedgerStore, NewPayment};
use crate::utils::error::AppError;
use crate::utils::token;

pub use capacity::CapacityGuard;
pub use checkin::{CheckInDetail, CheckinVerifier};
pub use promo::PromoEngine;
pub use waitlist::{WaitlistManager, WaitlistStatus};

/// Tunable policy, all durations sourced from config.
#[derive(Debug, Clone, Copy)]
pub struct EnginePolicy {
    pub reservation_ttl: Duration,
    pub hold_window: Duration,
}

impl Default for EnginePolicy {
    fn default() -> Self {
        Self {
            reservation_ttl: Duration::minutes(15),
            hold_window: Duration::hours(6),
        }
    }
}

/// What a purchase request comes back with: a ticket right away for free
/// events, or a checkout redirect for priced ones.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PurchaseOutcome {
    Ticket { ticket: Ticket },
    PaymentRequired {
        payment_reference: String,
        redirect_url: String,
        amount: Decimal,
    },
}

/// Counters from one sweep pass, for the log line.
#[derive(Debug, Clone, Copy, Default)]
pub struct SweepReport {
    pub released_reservations: usize,
    pub expired_holds: usize,
}

pub struct TicketingEngine {
    store: Arc<dyn LedgerStore>,
    provider: Arc<dyn PaymentProvider>,
    notifier: Arc<dyn NotificationGateway>,
    guard: CapacityGuard,
    waitlist: WaitlistManager,
    checkin: CheckinVerifier,
    promo: PromoEngine,
}

impl TicketingEngine {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        provider: Arc<dyn PaymentProvider>,
        notifier: Arc<dyn NotificationGateway>,
        policy: EnginePolicy,
    ) -> Self {
        Self {
            guard: CapacityGuard::new(store.clone(), policy.reservation_ttl),
            waitlist: WaitlistManager::new(store.clone(), notifier.clone(), policy.hold_window),
            checkin: CheckinVerifier::new(store.clone()),
            promo: PromoEngine::new(store.clone()),
            store,
            provider,
            notifier,
        }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub fn waitlist(&self) -> &WaitlistManager {
        &self.waitlist
    }

    pub fn checkin(&self) -> &CheckinVerifier {
        &self.checkin
    }

    pub fn promo(&self) -> &PromoEngine {
        &self.promo
    }

    /// Entry point for a purchase. Free events issue a ticket immediately;
    /// priced events come back with a checkout redirect and complete later
    /// through [`confirm_purchase`](Self::confirm_purchase). `SoldOut` tells
    /// the caller to offer the waitlist instead.
    pub async fn purchase_or_reserve(
        &self,
        event_id: Uuid,
        user_id: Uuid,
        promo_code: Option<String>,
    ) -> Result<PurchaseOutcome, AppError> {
        let event = self.store.get_event(event_id).await?;
        if event.status != EventStatus::Published {
            return Err(AppError::ValidationError(
                "tickets are not on sale for this event".to_string(),
            ));
        }

        let quote = match promo_code.as_deref() {
            Some(code) => Some(self.promo.validate(code, &event).await?),
            None => None,
        };
        let amount = quote
            .as_ref()
            .map(|q| q.final_price)
            .unwrap_or(event.price);

        let reservation = self.guard.reserve(event_id, user_id).await?;

        // The buyer holds a unit now; a live waitlist entry has served its
        // purpose whether they were notified or jumped the gun.
        self.waitlist.convert(event_id, user_id).await?;

        if amount.is_zero() {
            let promo_code_id = match &quote {
                Some(q) => self.redeem_or_fallback(q.promo_code_id, &q.code).await,
                None => None,
            };
            let ticket = self
                .guard
                .confirm(reservation.id, amount, promo_code_id)
                .await?;
            self.notifier
                .ticket_issued(user_id, event_id, ticket.id)
                .await;
            return Ok(PurchaseOutcome::Ticket { ticket });
        }

        let reference = token::generate_payment_reference();
        self.store
            .create_payment(NewPayment {
                reservation_id: reservation.id,
                event_id,
                user_id,
                amount,
                external_reference: reference.clone(),
                promo_code: quote.as_ref().map(|q| q.code.clone()),
            })
            .await?;

        match self.provider.create_checkout(&reference, amount).await {
            Ok(redirect_url) => Ok(PurchaseOutcome::PaymentRequired {
                payment_reference: reference,
                redirect_url,
                amount,
            }),
            Err(e) => {
                // The provider never saw a session; hand the unit back now
                // instead of waiting for the sweeper.
                self.store
                    .resolve_payment(&reference, PaymentStatus::Failed, None)
                    .await?;
                if let Some(freed) = self.guard.release(reservation.id).await? {
                    self.waitlist.promote(freed, Utc::now()).await?;
                }
                Err(e)
            }
        }
    }

    /// Webhook-style completion for a priced purchase. Safe to deliver more
    /// than once: a reference that already resolved returns its original
    /// result.
    pub async fn confirm_purchase(
        &self,
        reference: &str,
        outcome: PaymentOutcome,
    ) -> Result<Ticket, AppError> {
        let payment = self.store.find_payment_by_reference(reference).await?;

        match payment.status {
            PaymentStatus::Success => {
                // Duplicate delivery after a completed purchase.
                let ticket_id = payment.ticket_id.ok_or_else(|| {
                    AppError::InternalServerError(
                        "resolved payment has no ticket attached".to_string(),
                    )
                })?;
                return self.store.get_ticket(ticket_id).await;
            }
            PaymentStatus::Failed => return Err(AppError::PaymentFailed),
            PaymentStatus::Pending => {}
        }

        if outcome == PaymentOutcome::Failed {
            self.store
                .resolve_payment(reference, PaymentStatus::Failed, None)
                .await?;
            if let Some(freed) = self.guard.release(payment.reservation_id).await? {
                self.waitlist.promote(freed, Utc::now()).await?;
            }
            return Err(AppError::PaymentFailed);
        }

        // Payment succeeded. Spend the promo use if one was quoted; a code
        // exhausted in the meantime must not strand a paid buyer, so the
        // ticket is issued without attribution instead.
        let promo_code_id = match payment.promo_code.as_deref() {
            Some(code) => match self.store.find_promo_by_code(code).await? {
                Some(p) => self.redeem_or_fallback(p.id, code).await,
                None => None,
            },
            None => None,
        };

        let ticket = match self
            .guard
            .confirm(payment.reservation_id, payment.amount, promo_code_id)
            .await
        {
            Ok(ticket) => ticket,
            Err(AppError::ReservationExpired) => {
                tracing::warn!(
                    reference,
                    "Payment succeeded after its reservation was swept; refund is owed"
                );
                self.store
                    .resolve_payment(reference, PaymentStatus::Failed, None)
                    .await?;
                return Err(AppError::ReservationExpired);
            }
            Err(e) => return Err(e),
        };

        self.store
            .resolve_payment(reference, PaymentStatus::Success, Some(ticket.id))
            .await?;
        self.notifier
            .ticket_issued(payment.user_id, payment.event_id, ticket.id)
            .await;
        Ok(ticket)
    }

    /// Cancel an Active ticket, free its unit, and serve the waitlist.
    pub async fn cancel_ticket(
        &self,
        ticket_id: Uuid,
        requester_id: Uuid,
    ) -> Result<Ticket, AppError> {
        let ticket = self.store.get_ticket(ticket_id).await?;
        let event = self.store.get_event(ticket.event_id).await?;
        if requester_id != ticket.user_id && requester_id != event.organizer_id {
            return Err(AppError::Forbidden(
                "only the ticket holder or the organizer may cancel".to_string(),
            ));
        }

        let cancelled = self.guard.cancel(ticket_id).await?;
        self.waitlist.promote(event.id, Utc::now()).await?;
        self.notifier
            .ticket_cancelled(cancelled.user_id, event.id, cancelled.id)
            .await;
        Ok(cancelled)
    }

    /// One pass of the background sweep: release reservations past their
    /// TTL, expire lapsed holds, and cascade one promotion per freed unit
    /// or hold.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<SweepReport, AppError> {
        let released = self.guard.sweep_expired(now).await?;
        for event_id in &released {
            self.waitlist.promote(*event_id, now).await?;
        }

        let expired = self.waitlist.expire_overdue(now).await?;
        for entry in &expired {
            self.waitlist.promote(entry.event_id, now).await?;
        }

        Ok(SweepReport {
            released_reservations: released.len(),
            expired_holds: expired.len(),
        })
    }

    /// Redeem, or fall back to an unattributed ticket when the code ran out
    /// between quoting and confirming.
    async fn redeem_or_fallback(&self, promo_id: Uuid, code: &str) -> Option<Uuid> {
        match self.promo.redeem(promo_id).await {
            Ok(()) => Some(promo_id),
            Err(e) => {
                tracing::warn!(
                    code,
                    error = %e,
                    "Promo redemption failed after purchase was committed; issuing without discount attribution"
                );
                None
            }
        }
    }
}
