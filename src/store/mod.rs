//! Ledger store: the durable record every engine component writes through.
//!
//! Each method that transitions state is atomic with respect to every other
//! call on the same aggregate — the conditional operations (`reserve_unit`,
//! `mark_ticket_used`, `redeem_promo`, `cancel_ticket`) check their
//! precondition and apply the write as one step, so two racing callers can
//! never both pass the check. Components hold no mutable state of their own;
//! anything shared lives here.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::models::{
    Event, Payment, PaymentStatus, PromoCode, Reservation, Ticket, User, WaitlistEntry,
};
use crate::utils::error::AppError;

pub use memory::MemoryLedger;
pub use postgres::PgLedger;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateUser {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateEvent {
    pub organizer_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub location: String,
    pub start_time: DateTime<Utc>,
    pub capacity: i32,
    pub price: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePromoCode {
    pub owner_id: Uuid,
    pub code: String,
    pub event_id: Option<Uuid>,
    pub discount_type: crate::models::DiscountType,
    pub discount_value: Decimal,
    pub max_uses: Option<i32>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub reservation_id: Uuid,
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub external_reference: String,
    pub promo_code: Option<String>,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    // -- users ----------------------------------------------------------

    async fn create_user(&self, input: CreateUser) -> Result<User, AppError>;
    async fn get_user(&self, id: Uuid) -> Result<User, AppError>;

    // -- events ---------------------------------------------------------

    async fn create_event(&self, input: CreateEvent) -> Result<Event, AppError>;
    async fn get_event(&self, id: Uuid) -> Result<Event, AppError>;
    async fn publish_event(&self, id: Uuid, organizer_id: Uuid) -> Result<Event, AppError>;

    /// Change capacity. Rejected unless the new value is positive and at
    /// least the number of units currently held.
    async fn change_capacity(
        &self,
        id: Uuid,
        organizer_id: Uuid,
        capacity: i32,
    ) -> Result<Event, AppError>;

    // -- capacity units -------------------------------------------------

    /// Take one capacity unit: increment `sold_count` where it is still
    /// below capacity and record a Pending reservation. Fails with
    /// `SoldOut` when no unit is free. This is the only way a unit is ever
    /// taken.
    async fn reserve_unit(
        &self,
        event_id: Uuid,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<Reservation, AppError>;

    /// Turn a Pending reservation into an Active ticket. Fails with
    /// `ReservationExpired` when the reservation is no longer Pending.
    async fn confirm_reservation(
        &self,
        reservation_id: Uuid,
        qr_token: &str,
        price_paid: Decimal,
        promo_code_id: Option<Uuid>,
    ) -> Result<Ticket, AppError>;

    /// Release a Pending reservation and give its unit back. Returns the
    /// event id when a unit was actually released, `None` when the
    /// reservation had already left the Pending state.
    async fn release_reservation(&self, reservation_id: Uuid) -> Result<Option<Uuid>, AppError>;

    /// Release every Pending reservation whose `expires_at` has passed.
    /// Returns one event id per released unit.
    async fn sweep_expired_reservations(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, AppError>;

    // -- tickets --------------------------------------------------------

    async fn get_ticket(&self, id: Uuid) -> Result<Ticket, AppError>;
    async fn find_ticket_by_token(&self, qr_token: &str) -> Result<Ticket, AppError>;

    /// One-way Active → Used transition, applied only where the ticket is
    /// still Active. Of two racing scans exactly one succeeds; the loser
    /// gets `AlreadyUsed` carrying the winner's scan time.
    async fn mark_ticket_used(
        &self,
        ticket_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Ticket, AppError>;

    /// Active → Cancelled transition plus release of the ticket's unit.
    async fn cancel_ticket(&self, ticket_id: Uuid) -> Result<Ticket, AppError>;

    // -- waitlist -------------------------------------------------------

    /// Append a Waiting entry with the next monotonic position. Fails with
    /// `AlreadyWaiting` when the user already has a live entry.
    async fn join_waitlist(
        &self,
        event_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<WaitlistEntry, AppError>;

    /// Mark the caller's live entry Left. Positions of the remaining
    /// entries are not renumbered. Fails with `NotWaiting` when there is
    /// no live entry.
    async fn leave_waitlist(&self, event_id: Uuid, user_id: Uuid) -> Result<(), AppError>;

    /// The caller's live entry and its rank among live entries, if any.
    async fn waitlist_position(
        &self,
        event_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<(WaitlistEntry, i64)>, AppError>;

    /// Move the lowest-position Waiting entry to Notified, stamping
    /// `notified_at` and `hold_expires_at`. `None` when nobody is Waiting.
    async fn promote_next_waiting(
        &self,
        event_id: Uuid,
        now: DateTime<Utc>,
        hold_expires_at: DateTime<Utc>,
    ) -> Result<Option<WaitlistEntry>, AppError>;

    /// Move the user's live entry (if any) to Converted.
    async fn convert_waitlist_entry(
        &self,
        event_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<WaitlistEntry>, AppError>;

    /// Expire every Notified entry whose hold has lapsed. Returns the
    /// expired entries so the caller can cascade promotion.
    async fn expire_overdue_holds(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<WaitlistEntry>, AppError>;

    // -- promo codes ----------------------------------------------------

    async fn create_promo(&self, input: CreatePromoCode) -> Result<PromoCode, AppError>;

    /// Lookup by canonical (uppercase) code.
    async fn find_promo_by_code(&self, code: &str) -> Result<Option<PromoCode>, AppError>;

    /// Owner switches a code off; existing tickets keep their discount.
    async fn deactivate_promo(&self, promo_id: Uuid, owner_id: Uuid) -> Result<PromoCode, AppError>;

    /// Increment `used_count` where uses remain (`max_uses` null or
    /// `used_count < max_uses`). Fails with `PromoExhausted` when the
    /// condition no longer holds — two concurrent redemptions of a code
    /// with one use left resolve to one success, one failure.
    async fn redeem_promo(&self, promo_id: Uuid) -> Result<(), AppError>;

    // -- payments -------------------------------------------------------

    async fn create_payment(&self, input: NewPayment) -> Result<Payment, AppError>;
    async fn find_payment_by_reference(&self, reference: &str) -> Result<Payment, AppError>;

    /// Resolve a Pending payment to a terminal status, optionally linking
    /// the issued ticket. A payment that is already terminal is returned
    /// unchanged, which makes duplicate provider deliveries harmless.
    async fn resolve_payment(
        &self,
        reference: &str,
        status: PaymentStatus,
        ticket_id: Option<Uuid>,
    ) -> Result<Payment, AppError>;
}
