//! In-process ledger used by the test suite and local development.
//!
//! A single mutex guards the whole ledger and no critical section ever
//! awaits, so every trait method is atomic — the same contract the Postgres
//! implementation gets from guarded single-statement updates.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::{
    Event, EventStatus, Payment, PaymentStatus, PromoCode, Reservation, ReservationState, Ticket,
    TicketStatus, User, WaitlistEntry, WaitlistState,
};
use crate::store::{CreateEvent, CreatePromoCode, CreateUser, LedgerStore, NewPayment};
use crate::utils::error::AppError;

#[derive(Default)]
struct LedgerInner {
    users: HashMap<Uuid, User>,
    events: HashMap<Uuid, Event>,
    tickets: HashMap<Uuid, Ticket>,
    tickets_by_token: HashMap<String, Uuid>,
    reservations: HashMap<Uuid, Reservation>,
    waitlist: HashMap<Uuid, WaitlistEntry>,
    promos: HashMap<Uuid, PromoCode>,
    promos_by_code: HashMap<String, Uuid>,
    payments: HashMap<Uuid, Payment>,
    payments_by_reference: HashMap<String, Uuid>,
}

#[derive(Default)]
pub struct MemoryLedger {
    inner: Mutex<LedgerInner>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, LedgerInner>, AppError> {
        self.inner
            .lock()
            .map_err(|_| AppError::InternalServerError("ledger mutex poisoned".to_string()))
    }
}

/// Give one capacity unit back. An underflow here means release ran without
/// a matching reserve, which is a consistency bug.
fn release_unit(events: &mut HashMap<Uuid, Event>, event_id: Uuid) -> Result<(), AppError> {
    let event = events
        .get_mut(&event_id)
        .ok_or_else(|| AppError::NotFound(format!("Event {event_id}")))?;
    if event.sold_count <= 0 {
        tracing::error!(
            event_id = %event_id,
            sold_count = event.sold_count,
            "CONSISTENCY VIOLATION: releasing a unit nobody holds"
        );
        return Err(AppError::InternalServerError(
            "ledger consistency violation".to_string(),
        ));
    }
    event.sold_count -= 1;
    event.updated_at = Utc::now();
    Ok(())
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn create_user(&self, input: CreateUser) -> Result<User, AppError> {
        let mut inner = self.lock()?;
        let user = User {
            id: Uuid::new_v4(),
            name: input.name,
            email: input.email,
            created_at: Utc::now(),
        };
        inner.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_user(&self, id: Uuid) -> Result<User, AppError> {
        let inner = self.lock()?;
        inner
            .users
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("User {id}")))
    }

    async fn create_event(&self, input: CreateEvent) -> Result<Event, AppError> {
        if input.capacity <= 0 {
            return Err(AppError::ValidationError(
                "capacity must be positive".to_string(),
            ));
        }
        if input.price < Decimal::ZERO {
            return Err(AppError::ValidationError(
                "price must not be negative".to_string(),
            ));
        }
        let mut inner = self.lock()?;
        let now = Utc::now();
        let event = Event {
            id: Uuid::new_v4(),
            organizer_id: input.organizer_id,
            title: input.title,
            description: input.description,
            location: input.location,
            start_time: input.start_time,
            capacity: input.capacity,
            sold_count: 0,
            price: input.price,
            status: EventStatus::Draft,
            created_at: now,
            updated_at: now,
        };
        inner.events.insert(event.id, event.clone());
        Ok(event)
    }

    async fn get_event(&self, id: Uuid) -> Result<Event, AppError> {
        let inner = self.lock()?;
        inner
            .events
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Event {id}")))
    }

    async fn publish_event(&self, id: Uuid, organizer_id: Uuid) -> Result<Event, AppError> {
        let mut inner = self.lock()?;
        let event = inner
            .events
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Event {id}")))?;
        if event.organizer_id != organizer_id {
            return Err(AppError::Forbidden(
                "only the organizer may publish an event".to_string(),
            ));
        }
        event.status = EventStatus::Published;
        event.updated_at = Utc::now();
        Ok(event.clone())
    }

    async fn change_capacity(
        &self,
        id: Uuid,
        organizer_id: Uuid,
        capacity: i32,
    ) -> Result<Event, AppError> {
        let mut inner = self.lock()?;
        let event = inner
            .events
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Event {id}")))?;
        if event.organizer_id != organizer_id {
            return Err(AppError::Forbidden(
                "only the organizer may change capacity".to_string(),
            ));
        }
        if capacity <= 0 || capacity < event.sold_count {
            return Err(AppError::ValidationError(format!(
                "capacity must be positive and at least the {} units already held",
                event.sold_count
            )));
        }
        event.capacity = capacity;
        event.updated_at = Utc::now();
        Ok(event.clone())
    }

    async fn reserve_unit(
        &self,
        event_id: Uuid,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<Reservation, AppError> {
        let mut inner = self.lock()?;
        let event = inner
            .events
            .get_mut(&event_id)
            .ok_or_else(|| AppError::NotFound(format!("Event {event_id}")))?;
        if event.status != EventStatus::Published {
            return Err(AppError::ValidationError(
                "tickets are not on sale for this event".to_string(),
            ));
        }
        if event.sold_count >= event.capacity {
            return Err(AppError::SoldOut);
        }
        event.sold_count += 1;
        event.updated_at = Utc::now();
        if event.sold_count > event.capacity {
            tracing::error!(
                event_id = %event_id,
                sold_count = event.sold_count,
                capacity = event.capacity,
                "CONSISTENCY VIOLATION: sold_count exceeds capacity"
            );
            return Err(AppError::InternalServerError(
                "ledger consistency violation".to_string(),
            ));
        }
        let now = Utc::now();
        let reservation = Reservation {
            id: Uuid::new_v4(),
            event_id,
            user_id,
            state: ReservationState::Pending,
            expires_at,
            created_at: now,
            updated_at: now,
        };
        inner.reservations.insert(reservation.id, reservation.clone());
        Ok(reservation)
    }

    async fn confirm_reservation(
        &self,
        reservation_id: Uuid,
        qr_token: &str,
        price_paid: Decimal,
        promo_code_id: Option<Uuid>,
    ) -> Result<Ticket, AppError> {
        let mut inner = self.lock()?;
        if inner.tickets_by_token.contains_key(qr_token) {
            return Err(AppError::InternalServerError(
                "qr token collision".to_string(),
            ));
        }
        let reservation = inner
            .reservations
            .get_mut(&reservation_id)
            .ok_or_else(|| AppError::NotFound(format!("Reservation {reservation_id}")))?;
        if reservation.state != ReservationState::Pending {
            return Err(AppError::ReservationExpired);
        }
        reservation.state = ReservationState::Confirmed;
        reservation.updated_at = Utc::now();
        let (event_id, user_id) = (reservation.event_id, reservation.user_id);
        let now = Utc::now();
        let ticket = Ticket {
            id: Uuid::new_v4(),
            event_id,
            user_id,
            status: TicketStatus::Active,
            qr_token: qr_token.to_string(),
            scanned_at: None,
            price_paid,
            promo_code_id,
            created_at: now,
            updated_at: now,
        };
        inner
            .tickets_by_token
            .insert(ticket.qr_token.clone(), ticket.id);
        inner.tickets.insert(ticket.id, ticket.clone());
        Ok(ticket)
    }

    async fn release_reservation(&self, reservation_id: Uuid) -> Result<Option<Uuid>, AppError> {
        let mut inner = self.lock()?;
        let Some(reservation) = inner.reservations.get_mut(&reservation_id) else {
            return Ok(None);
        };
        if reservation.state != ReservationState::Pending {
            return Ok(None);
        }
        reservation.state = ReservationState::Released;
        reservation.updated_at = Utc::now();
        let event_id = reservation.event_id;
        release_unit(&mut inner.events, event_id)?;
        Ok(Some(event_id))
    }

    async fn sweep_expired_reservations(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, AppError> {
        let mut inner = self.lock()?;
        let overdue: Vec<Uuid> = inner
            .reservations
            .values()
            .filter(|r| r.state == ReservationState::Pending && r.expires_at <= now)
            .map(|r| r.id)
            .collect();
        let mut released = Vec::with_capacity(overdue.len());
        for id in overdue {
            let reservation = inner
                .reservations
                .get_mut(&id)
                .expect("reservation disappeared under the lock");
            reservation.state = ReservationState::Released;
            reservation.updated_at = now;
            let event_id = reservation.event_id;
            release_unit(&mut inner.events, event_id)?;
            released.push(event_id);
        }
        Ok(released)
    }

    async fn get_ticket(&self, id: Uuid) -> Result<Ticket, AppError> {
        let inner = self.lock()?;
        inner
            .tickets
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Ticket {id}")))
    }

    async fn find_ticket_by_token(&self, qr_token: &str) -> Result<Ticket, AppError> {
        let inner = self.lock()?;
        inner
            .tickets_by_token
            .get(qr_token)
            .and_then(|id| inner.tickets.get(id))
            .cloned()
            .ok_or_else(|| AppError::NotFound("Ticket".to_string()))
    }

    async fn mark_ticket_used(
        &self,
        ticket_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Ticket, AppError> {
        let mut inner = self.lock()?;
        let ticket = inner
            .tickets
            .get_mut(&ticket_id)
            .ok_or_else(|| AppError::NotFound(format!("Ticket {ticket_id}")))?;
        match ticket.status {
            TicketStatus::Active => {
                ticket.status = TicketStatus::Used;
                ticket.scanned_at = Some(now);
                ticket.updated_at = now;
                Ok(ticket.clone())
            }
            TicketStatus::Used => Err(AppError::AlreadyUsed {
                scanned_at: ticket.scanned_at.unwrap_or(ticket.updated_at),
            }),
            TicketStatus::Cancelled => Err(AppError::TicketCancelled),
        }
    }

    async fn cancel_ticket(&self, ticket_id: Uuid) -> Result<Ticket, AppError> {
        let mut inner = self.lock()?;
        let ticket = inner
            .tickets
            .get_mut(&ticket_id)
            .ok_or_else(|| AppError::NotFound(format!("Ticket {ticket_id}")))?;
        match ticket.status {
            TicketStatus::Active => {
                ticket.status = TicketStatus::Cancelled;
                ticket.updated_at = Utc::now();
                let (event_id, cancelled) = (ticket.event_id, ticket.clone());
                release_unit(&mut inner.events, event_id)?;
                Ok(cancelled)
            }
            TicketStatus::Used => Err(AppError::ValidationError(
                "a checked-in ticket cannot be cancelled".to_string(),
            )),
            TicketStatus::Cancelled => Err(AppError::TicketCancelled),
        }
    }

    async fn join_waitlist(
        &self,
        event_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<WaitlistEntry, AppError> {
        let mut inner = self.lock()?;
        if !inner.events.contains_key(&event_id) {
            return Err(AppError::NotFound(format!("Event {event_id}")));
        }
        let already_live = inner.waitlist.values().any(|e| {
            e.event_id == event_id && e.user_id == user_id && !e.state.is_terminal()
        });
        if already_live {
            return Err(AppError::AlreadyWaiting);
        }
        let next_position = inner
            .waitlist
            .values()
            .filter(|e| e.event_id == event_id && !e.state.is_terminal())
            .map(|e| e.position)
            .max()
            .unwrap_or(0)
            + 1;
        let entry = WaitlistEntry {
            id: Uuid::new_v4(),
            event_id,
            user_id,
            position: next_position,
            state: WaitlistState::Waiting,
            joined_at: now,
            notified_at: None,
            hold_expires_at: None,
        };
        inner.waitlist.insert(entry.id, entry.clone());
        Ok(entry)
    }

    async fn leave_waitlist(&self, event_id: Uuid, user_id: Uuid) -> Result<(), AppError> {
        let mut inner = self.lock()?;
        let entry = inner
            .waitlist
            .values_mut()
            .find(|e| e.event_id == event_id && e.user_id == user_id && !e.state.is_terminal())
            .ok_or(AppError::NotWaiting)?;
        entry.state = WaitlistState::Left;
        Ok(())
    }

    async fn waitlist_position(
        &self,
        event_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<(WaitlistEntry, i64)>, AppError> {
        let inner = self.lock()?;
        let Some(entry) = inner
            .waitlist
            .values()
            .find(|e| e.event_id == event_id && e.user_id == user_id && !e.state.is_terminal())
        else {
            return Ok(None);
        };
        let rank = inner
            .waitlist
            .values()
            .filter(|e| {
                e.event_id == event_id && !e.state.is_terminal() && e.position <= entry.position
            })
            .count() as i64;
        Ok(Some((entry.clone(), rank)))
    }

    async fn promote_next_waiting(
        &self,
        event_id: Uuid,
        now: DateTime<Utc>,
        hold_expires_at: DateTime<Utc>,
    ) -> Result<Option<WaitlistEntry>, AppError> {
        let mut inner = self.lock()?;
        let Some(entry) = inner
            .waitlist
            .values_mut()
            .filter(|e| e.event_id == event_id && e.state == WaitlistState::Waiting)
            .min_by_key(|e| e.position)
        else {
            return Ok(None);
        };
        entry.state = WaitlistState::Notified;
        entry.notified_at = Some(now);
        entry.hold_expires_at = Some(hold_expires_at);
        Ok(Some(entry.clone()))
    }

    async fn convert_waitlist_entry(
        &self,
        event_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<WaitlistEntry>, AppError> {
        let mut inner = self.lock()?;
        let Some(entry) = inner
            .waitlist
            .values_mut()
            .find(|e| e.event_id == event_id && e.user_id == user_id && !e.state.is_terminal())
        else {
            return Ok(None);
        };
        entry.state = WaitlistState::Converted;
        Ok(Some(entry.clone()))
    }

    async fn expire_overdue_holds(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<WaitlistEntry>, AppError> {
        let mut inner = self.lock()?;
        let mut expired = Vec::new();
        for entry in inner.waitlist.values_mut() {
            if entry.state == WaitlistState::Notified
                && entry.hold_expires_at.is_some_and(|at| at <= now)
            {
                entry.state = WaitlistState::Expired;
                expired.push(entry.clone());
            }
        }
        expired.sort_by_key(|e| e.position);
        Ok(expired)
    }

    async fn create_promo(&self, input: CreatePromoCode) -> Result<PromoCode, AppError> {
        let code = input.code.trim().to_uppercase();
        if code.is_empty() {
            return Err(AppError::ValidationError(
                "promo code must not be empty".to_string(),
            ));
        }
        if input.discount_value <= Decimal::ZERO {
            return Err(AppError::ValidationError(
                "discount value must be positive".to_string(),
            ));
        }
        let mut inner = self.lock()?;
        if inner.promos_by_code.contains_key(&code) {
            return Err(AppError::ValidationError(format!(
                "promo code {code} already exists"
            )));
        }
        let promo = PromoCode {
            id: Uuid::new_v4(),
            code: code.clone(),
            owner_id: input.owner_id,
            event_id: input.event_id,
            discount_type: input.discount_type,
            discount_value: input.discount_value,
            max_uses: input.max_uses,
            used_count: 0,
            expires_at: input.expires_at,
            is_active: true,
            created_at: Utc::now(),
        };
        inner.promos_by_code.insert(code, promo.id);
        inner.promos.insert(promo.id, promo.clone());
        Ok(promo)
    }

    async fn find_promo_by_code(&self, code: &str) -> Result<Option<PromoCode>, AppError> {
        let inner = self.lock()?;
        Ok(inner
            .promos_by_code
            .get(&code.trim().to_uppercase())
            .and_then(|id| inner.promos.get(id))
            .cloned())
    }

    async fn deactivate_promo(&self, promo_id: Uuid, owner_id: Uuid) -> Result<PromoCode, AppError> {
        let mut inner = self.lock()?;
        let promo = inner
            .promos
            .get_mut(&promo_id)
            .ok_or_else(|| AppError::NotFound(format!("PromoCode {promo_id}")))?;
        if promo.owner_id != owner_id {
            return Err(AppError::Forbidden(
                "only the owner may deactivate a promo code".to_string(),
            ));
        }
        promo.is_active = false;
        Ok(promo.clone())
    }

    async fn redeem_promo(&self, promo_id: Uuid) -> Result<(), AppError> {
        let mut inner = self.lock()?;
        let promo = inner
            .promos
            .get_mut(&promo_id)
            .ok_or_else(|| AppError::NotFound(format!("PromoCode {promo_id}")))?;
        if !promo.is_active || !promo.has_uses_left() {
            return Err(AppError::PromoExhausted);
        }
        promo.used_count += 1;
        Ok(())
    }

    async fn create_payment(&self, input: NewPayment) -> Result<Payment, AppError> {
        let mut inner = self.lock()?;
        let now = Utc::now();
        let payment = Payment {
            id: Uuid::new_v4(),
            ticket_id: None,
            reservation_id: input.reservation_id,
            event_id: input.event_id,
            user_id: input.user_id,
            amount: input.amount,
            status: PaymentStatus::Pending,
            external_reference: input.external_reference.clone(),
            promo_code: input.promo_code,
            created_at: now,
            updated_at: now,
        };
        inner
            .payments_by_reference
            .insert(input.external_reference, payment.id);
        inner.payments.insert(payment.id, payment.clone());
        Ok(payment)
    }

    async fn find_payment_by_reference(&self, reference: &str) -> Result<Payment, AppError> {
        let inner = self.lock()?;
        inner
            .payments_by_reference
            .get(reference)
            .and_then(|id| inner.payments.get(id))
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Payment {reference}")))
    }

    async fn resolve_payment(
        &self,
        reference: &str,
        status: PaymentStatus,
        ticket_id: Option<Uuid>,
    ) -> Result<Payment, AppError> {
        let mut inner = self.lock()?;
        let payment_id = *inner
            .payments_by_reference
            .get(reference)
            .ok_or_else(|| AppError::NotFound(format!("Payment {reference}")))?;
        let payment = inner
            .payments
            .get_mut(&payment_id)
            .expect("payment index out of sync");
        if payment.status == PaymentStatus::Pending {
            payment.status = status;
            payment.ticket_id = ticket_id.or(payment.ticket_id);
            payment.updated_at = Utc::now();
        }
        Ok(payment.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn seeded_event(ledger: &MemoryLedger) -> Event {
        let organizer = ledger
            .create_user(CreateUser {
                name: "Org".to_string(),
                email: "org@example.com".to_string(),
            })
            .await
            .unwrap();
        let event = ledger
            .create_event(CreateEvent {
                organizer_id: organizer.id,
                title: "Show".to_string(),
                description: None,
                location: "Hall".to_string(),
                start_time: Utc::now() + Duration::days(1),
                capacity: 1,
                price: Decimal::ZERO,
            })
            .await
            .unwrap();
        ledger.publish_event(event.id, organizer.id).await.unwrap()
    }

    #[tokio::test]
    async fn releasing_a_reservation_twice_frees_one_unit() {
        let ledger = MemoryLedger::new();
        let event = seeded_event(&ledger).await;
        let reservation = ledger
            .reserve_unit(event.id, Uuid::new_v4(), Utc::now() + Duration::minutes(15))
            .await
            .unwrap();

        assert_eq!(
            ledger.release_reservation(reservation.id).await.unwrap(),
            Some(event.id)
        );
        // Second release finds nothing pending and does not underflow.
        assert_eq!(ledger.release_reservation(reservation.id).await.unwrap(), None);
        assert_eq!(ledger.get_event(event.id).await.unwrap().sold_count, 0);
    }

    #[tokio::test]
    async fn resolved_payments_do_not_flip() {
        let ledger = MemoryLedger::new();
        let event = seeded_event(&ledger).await;
        let user_id = Uuid::new_v4();
        let reservation = ledger
            .reserve_unit(event.id, user_id, Utc::now() + Duration::minutes(15))
            .await
            .unwrap();
        ledger
            .create_payment(NewPayment {
                reservation_id: reservation.id,
                event_id: event.id,
                user_id,
                amount: Decimal::ZERO,
                external_reference: "pay_test".to_string(),
                promo_code: None,
            })
            .await
            .unwrap();

        let resolved = ledger
            .resolve_payment("pay_test", PaymentStatus::Failed, None)
            .await
            .unwrap();
        assert_eq!(resolved.status, PaymentStatus::Failed);

        // A late contradictory report is ignored.
        let still_failed = ledger
            .resolve_payment("pay_test", PaymentStatus::Success, None)
            .await
            .unwrap();
        assert_eq!(still_failed.status, PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn reserve_fails_cleanly_at_capacity() {
        let ledger = MemoryLedger::new();
        let event = seeded_event(&ledger).await;
        let expires = Utc::now() + Duration::minutes(15);

        ledger
            .reserve_unit(event.id, Uuid::new_v4(), expires)
            .await
            .unwrap();
        let err = ledger
            .reserve_unit(event.id, Uuid::new_v4(), expires)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SoldOut));
        assert_eq!(ledger.get_event(event.id).await.unwrap().sold_count, 1);
    }
}
