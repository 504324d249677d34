//! PostgreSQL ledger.
//!
//! Every conditional transition is a single guarded `UPDATE ... WHERE
//! <precondition>` so the check and the write are one atomic statement; a
//! zero-row result means the precondition no longer held and is mapped back
//! to the matching domain error by re-reading the row. Serialization
//! conflicts on the contended paths are retried a bounded number of times.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{
    Event, EventStatus, Payment, PaymentStatus, PromoCode, Reservation, Ticket, TicketStatus,
    User, WaitlistEntry,
};
use crate::store::{CreateEvent, CreatePromoCode, CreateUser, LedgerStore, NewPayment};
use crate::utils::error::AppError;

const MAX_CONFLICT_RETRIES: u32 = 3;

#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn reserve_unit_once(
        &self,
        event_id: Uuid,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<Reservation, AppError> {
        let mut tx = self.pool.begin().await?;

        let taken = sqlx::query(
            "UPDATE events SET sold_count = sold_count + 1, updated_at = NOW()
             WHERE id = $1 AND status = 'published' AND sold_count < capacity",
        )
        .bind(event_id)
        .execute(&mut *tx)
        .await?;

        if taken.rows_affected() == 0 {
            let event = sqlx::query_as::<_, Event>("SELECT * FROM events WHERE id = $1")
                .bind(event_id)
                .fetch_optional(&mut *tx)
                .await?;
            tx.rollback().await?;
            return Err(match event {
                None => AppError::NotFound(format!("Event {event_id}")),
                Some(e) if e.status != EventStatus::Published => AppError::ValidationError(
                    "tickets are not on sale for this event".to_string(),
                ),
                Some(_) => AppError::SoldOut,
            });
        }

        let reservation = sqlx::query_as::<_, Reservation>(
            "INSERT INTO reservations (id, event_id, user_id, state, expires_at)
             VALUES ($1, $2, $3, 'pending', $4)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(event_id)
        .bind(user_id)
        .bind(expires_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(reservation)
    }

    /// Give one unit back inside an open transaction. A zero-row decrement
    /// means a release without a matching reserve — a consistency bug that
    /// gets logged loudly instead of being papered over.
    async fn release_unit(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        event_id: Uuid,
    ) -> Result<(), AppError> {
        let released = sqlx::query(
            "UPDATE events SET sold_count = sold_count - 1, updated_at = NOW()
             WHERE id = $1 AND sold_count > 0",
        )
        .bind(event_id)
        .execute(&mut **tx)
        .await?;
        if released.rows_affected() == 0 {
            tracing::error!(
                event_id = %event_id,
                "CONSISTENCY VIOLATION: releasing a unit nobody holds"
            );
            return Err(AppError::InternalServerError(
                "ledger consistency violation".to_string(),
            ));
        }
        Ok(())
    }
}

fn is_conflict(err: &AppError) -> bool {
    let AppError::DatabaseError(sqlx::Error::Database(db)) = err else {
        return false;
    };
    // serialization_failure / deadlock_detected
    matches!(db.code().as_deref(), Some("40001") | Some("40P01"))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl LedgerStore for PgLedger {
    async fn create_user(&self, input: CreateUser) -> Result<User, AppError> {
        let user = sqlx::query_as::<_, User>(
            "INSERT INTO users (id, name, email) VALUES ($1, $2, $3) RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(input.name)
        .bind(input.email)
        .fetch_one(&self.pool)
        .await?;
        Ok(user)
    }

    async fn get_user(&self, id: Uuid) -> Result<User, AppError> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
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
        let event = sqlx::query_as::<_, Event>(
            "INSERT INTO events
                (id, organizer_id, title, description, location, start_time, capacity, price, status)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'draft')
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(input.organizer_id)
        .bind(input.title)
        .bind(input.description)
        .bind(input.location)
        .bind(input.start_time)
        .bind(input.capacity)
        .bind(input.price)
        .fetch_one(&self.pool)
        .await?;
        Ok(event)
    }

    async fn get_event(&self, id: Uuid) -> Result<Event, AppError> {
        sqlx::query_as::<_, Event>("SELECT * FROM events WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Event {id}")))
    }

    async fn publish_event(&self, id: Uuid, organizer_id: Uuid) -> Result<Event, AppError> {
        let published = sqlx::query_as::<_, Event>(
            "UPDATE events SET status = 'published', updated_at = NOW()
             WHERE id = $1 AND organizer_id = $2
             RETURNING *",
        )
        .bind(id)
        .bind(organizer_id)
        .fetch_optional(&self.pool)
        .await?;
        match published {
            Some(event) => Ok(event),
            None => {
                self.get_event(id).await?;
                Err(AppError::Forbidden(
                    "only the organizer may publish an event".to_string(),
                ))
            }
        }
    }

    async fn change_capacity(
        &self,
        id: Uuid,
        organizer_id: Uuid,
        capacity: i32,
    ) -> Result<Event, AppError> {
        if capacity <= 0 {
            return Err(AppError::ValidationError(
                "capacity must be positive".to_string(),
            ));
        }
        let changed = sqlx::query_as::<_, Event>(
            "UPDATE events SET capacity = $3, updated_at = NOW()
             WHERE id = $1 AND organizer_id = $2 AND sold_count <= $3
             RETURNING *",
        )
        .bind(id)
        .bind(organizer_id)
        .bind(capacity)
        .fetch_optional(&self.pool)
        .await?;
        match changed {
            Some(event) => Ok(event),
            None => {
                let event = self.get_event(id).await?;
                if event.organizer_id != organizer_id {
                    Err(AppError::Forbidden(
                        "only the organizer may change capacity".to_string(),
                    ))
                } else {
                    Err(AppError::ValidationError(format!(
                        "capacity must be at least the {} units already held",
                        event.sold_count
                    )))
                }
            }
        }
    }

    async fn reserve_unit(
        &self,
        event_id: Uuid,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<Reservation, AppError> {
        let mut attempt = 0;
        loop {
            match self.reserve_unit_once(event_id, user_id, expires_at).await {
                Err(e) if is_conflict(&e) && attempt < MAX_CONFLICT_RETRIES => {
                    attempt += 1;
                    tracing::debug!(attempt, event_id = %event_id, "Retrying reservation after conflict");
                }
                other => return other,
            }
        }
    }

    async fn confirm_reservation(
        &self,
        reservation_id: Uuid,
        qr_token: &str,
        price_paid: Decimal,
        promo_code_id: Option<Uuid>,
    ) -> Result<Ticket, AppError> {
        let mut tx = self.pool.begin().await?;

        let confirmed = sqlx::query_as::<_, Reservation>(
            "UPDATE reservations SET state = 'confirmed', updated_at = NOW()
             WHERE id = $1 AND state = 'pending'
             RETURNING *",
        )
        .bind(reservation_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(reservation) = confirmed else {
            tx.rollback().await?;
            let exists = sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM reservations WHERE id = $1",
            )
            .bind(reservation_id)
            .fetch_one(&self.pool)
            .await?;
            return Err(if exists == 0 {
                AppError::NotFound(format!("Reservation {reservation_id}"))
            } else {
                AppError::ReservationExpired
            });
        };

        let ticket = sqlx::query_as::<_, Ticket>(
            "INSERT INTO tickets
                (id, event_id, user_id, status, qr_token, price_paid, promo_code_id)
             VALUES ($1, $2, $3, 'active', $4, $5, $6)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(reservation.event_id)
        .bind(reservation.user_id)
        .bind(qr_token)
        .bind(price_paid)
        .bind(promo_code_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(ticket)
    }

    async fn release_reservation(&self, reservation_id: Uuid) -> Result<Option<Uuid>, AppError> {
        let mut tx = self.pool.begin().await?;
        let released = sqlx::query_as::<_, Reservation>(
            "UPDATE reservations SET state = 'released', updated_at = NOW()
             WHERE id = $1 AND state = 'pending'
             RETURNING *",
        )
        .bind(reservation_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(reservation) = released else {
            tx.rollback().await?;
            return Ok(None);
        };
        Self::release_unit(&mut tx, reservation.event_id).await?;
        tx.commit().await?;
        Ok(Some(reservation.event_id))
    }

    async fn sweep_expired_reservations(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, AppError> {
        let mut tx = self.pool.begin().await?;
        let swept = sqlx::query_as::<_, Reservation>(
            "UPDATE reservations SET state = 'released', updated_at = NOW()
             WHERE state = 'pending' AND expires_at <= $1
             RETURNING *",
        )
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;
        for reservation in &swept {
            Self::release_unit(&mut tx, reservation.event_id).await?;
        }
        tx.commit().await?;
        Ok(swept.into_iter().map(|r| r.event_id).collect())
    }

    async fn get_ticket(&self, id: Uuid) -> Result<Ticket, AppError> {
        sqlx::query_as::<_, Ticket>("SELECT * FROM tickets WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Ticket {id}")))
    }

    async fn find_ticket_by_token(&self, qr_token: &str) -> Result<Ticket, AppError> {
        sqlx::query_as::<_, Ticket>("SELECT * FROM tickets WHERE qr_token = $1")
            .bind(qr_token)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound("Ticket".to_string()))
    }

    async fn mark_ticket_used(
        &self,
        ticket_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Ticket, AppError> {
        let mut attempt = 0;
        loop {
            let result = sqlx::query_as::<_, Ticket>(
                "UPDATE tickets SET status = 'used', scanned_at = $2, updated_at = $2
                 WHERE id = $1 AND status = 'active'
                 RETURNING *",
            )
            .bind(ticket_id)
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::from);

            match result {
                Ok(Some(ticket)) => return Ok(ticket),
                Ok(None) => {
                    // Lost the race or the ticket was never scannable.
                    let ticket = self.get_ticket(ticket_id).await?;
                    return Err(match ticket.status {
                        TicketStatus::Used => AppError::AlreadyUsed {
                            scanned_at: ticket.scanned_at.unwrap_or(ticket.updated_at),
                        },
                        TicketStatus::Cancelled => AppError::TicketCancelled,
                        TicketStatus::Active => AppError::InternalServerError(
                            "check-in transition raced an active ticket".to_string(),
                        ),
                    });
                }
                Err(e) if is_conflict(&e) && attempt < MAX_CONFLICT_RETRIES => {
                    attempt += 1;
                    tracing::debug!(attempt, ticket_id = %ticket_id, "Retrying check-in after conflict");
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn cancel_ticket(&self, ticket_id: Uuid) -> Result<Ticket, AppError> {
        let mut tx = self.pool.begin().await?;
        let cancelled = sqlx::query_as::<_, Ticket>(
            "UPDATE tickets SET status = 'cancelled', updated_at = NOW()
             WHERE id = $1 AND status = 'active'
             RETURNING *",
        )
        .bind(ticket_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(ticket) = cancelled else {
            tx.rollback().await?;
            let ticket = self.get_ticket(ticket_id).await?;
            return Err(match ticket.status {
                TicketStatus::Used => AppError::ValidationError(
                    "a checked-in ticket cannot be cancelled".to_string(),
                ),
                _ => AppError::TicketCancelled,
            });
        };
        Self::release_unit(&mut tx, ticket.event_id).await?;
        tx.commit().await?;
        Ok(ticket)
    }

    async fn join_waitlist(
        &self,
        event_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<WaitlistEntry, AppError> {
        let mut tx = self.pool.begin().await?;

        // Serialize position assignment per event on the event row.
        let locked = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM events WHERE id = $1 FOR UPDATE",
        )
        .bind(event_id)
        .fetch_optional(&mut *tx)
        .await?;
        if locked.is_none() {
            tx.rollback().await?;
            return Err(AppError::NotFound(format!("Event {event_id}")));
        }

        let live = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM waitlist_entries
             WHERE event_id = $1 AND user_id = $2 AND state IN ('waiting', 'notified')",
        )
        .bind(event_id)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;
        if live > 0 {
            tx.rollback().await?;
            return Err(AppError::AlreadyWaiting);
        }

        let next_position = sqlx::query_scalar::<_, i32>(
            "SELECT COALESCE(MAX(position), 0) + 1 FROM waitlist_entries
             WHERE event_id = $1 AND state IN ('waiting', 'notified')",
        )
        .bind(event_id)
        .fetch_one(&mut *tx)
        .await?;

        let entry = sqlx::query_as::<_, WaitlistEntry>(
            "INSERT INTO waitlist_entries (id, event_id, user_id, position, state, joined_at)
             VALUES ($1, $2, $3, $4, 'waiting', $5)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(event_id)
        .bind(user_id)
        .bind(next_position)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(entry)
    }

    async fn leave_waitlist(&self, event_id: Uuid, user_id: Uuid) -> Result<(), AppError> {
        let left = sqlx::query(
            "UPDATE waitlist_entries SET state = 'left'
             WHERE event_id = $1 AND user_id = $2 AND state IN ('waiting', 'notified')",
        )
        .bind(event_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        if left.rows_affected() == 0 {
            return Err(AppError::NotWaiting);
        }
        Ok(())
    }

    async fn waitlist_position(
        &self,
        event_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<(WaitlistEntry, i64)>, AppError> {
        let entry = sqlx::query_as::<_, WaitlistEntry>(
            "SELECT * FROM waitlist_entries
             WHERE event_id = $1 AND user_id = $2 AND state IN ('waiting', 'notified')",
        )
        .bind(event_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        let Some(entry) = entry else {
            return Ok(None);
        };
        let rank = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM waitlist_entries
             WHERE event_id = $1 AND state IN ('waiting', 'notified') AND position <= $2",
        )
        .bind(event_id)
        .bind(entry.position)
        .fetch_one(&self.pool)
        .await?;
        Ok(Some((entry, rank)))
    }

    async fn promote_next_waiting(
        &self,
        event_id: Uuid,
        now: DateTime<Utc>,
        hold_expires_at: DateTime<Utc>,
    ) -> Result<Option<WaitlistEntry>, AppError> {
        let entry = sqlx::query_as::<_, WaitlistEntry>(
            "UPDATE waitlist_entries
             SET state = 'notified', notified_at = $2, hold_expires_at = $3
             WHERE id = (
                 SELECT id FROM waitlist_entries
                 WHERE event_id = $1 AND state = 'waiting'
                 ORDER BY position
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING *",
        )
        .bind(event_id)
        .bind(now)
        .bind(hold_expires_at)
        .fetch_optional(&self.pool)
        .await?;
        Ok(entry)
    }

    async fn convert_waitlist_entry(
        &self,
        event_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<WaitlistEntry>, AppError> {
        let entry = sqlx::query_as::<_, WaitlistEntry>(
            "UPDATE waitlist_entries SET state = 'converted'
             WHERE event_id = $1 AND user_id = $2 AND state IN ('waiting', 'notified')
             RETURNING *",
        )
        .bind(event_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(entry)
    }

    async fn expire_overdue_holds(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<WaitlistEntry>, AppError> {
        let mut expired = sqlx::query_as::<_, WaitlistEntry>(
            "UPDATE waitlist_entries SET state = 'expired'
             WHERE state = 'notified' AND hold_expires_at <= $1
             RETURNING *",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
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
        let promo = sqlx::query_as::<_, PromoCode>(
            "INSERT INTO promo_codes
                (id, code, owner_id, event_id, discount_type, discount_value, max_uses, expires_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(&code)
        .bind(input.owner_id)
        .bind(input.event_id)
        .bind(input.discount_type)
        .bind(input.discount_value)
        .bind(input.max_uses)
        .bind(input.expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::ValidationError(format!("promo code {code} already exists"))
            } else {
                AppError::from(e)
            }
        })?;
        Ok(promo)
    }

    async fn find_promo_by_code(&self, code: &str) -> Result<Option<PromoCode>, AppError> {
        let promo = sqlx::query_as::<_, PromoCode>("SELECT * FROM promo_codes WHERE code = $1")
            .bind(code.trim().to_uppercase())
            .fetch_optional(&self.pool)
            .await?;
        Ok(promo)
    }

    async fn deactivate_promo(&self, promo_id: Uuid, owner_id: Uuid) -> Result<PromoCode, AppError> {
        let deactivated = sqlx::query_as::<_, PromoCode>(
            "UPDATE promo_codes SET is_active = FALSE
             WHERE id = $1 AND owner_id = $2
             RETURNING *",
        )
        .bind(promo_id)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;
        match deactivated {
            Some(promo) => Ok(promo),
            None => {
                let exists = sqlx::query_scalar::<_, i64>(
                    "SELECT COUNT(*) FROM promo_codes WHERE id = $1",
                )
                .bind(promo_id)
                .fetch_one(&self.pool)
                .await?;
                Err(if exists == 0 {
                    AppError::NotFound(format!("PromoCode {promo_id}"))
                } else {
                    AppError::Forbidden(
                        "only the owner may deactivate a promo code".to_string(),
                    )
                })
            }
        }
    }

    async fn redeem_promo(&self, promo_id: Uuid) -> Result<(), AppError> {
        let mut attempt = 0;
        loop {
            let result = sqlx::query(
                "UPDATE promo_codes SET used_count = used_count + 1
                 WHERE id = $1 AND is_active
                   AND (max_uses IS NULL OR used_count < max_uses)",
            )
            .bind(promo_id)
            .execute(&self.pool)
            .await
            .map_err(AppError::from);

            match result {
                Ok(redeemed) if redeemed.rows_affected() > 0 => return Ok(()),
                Ok(_) => return Err(AppError::PromoExhausted),
                Err(e) if is_conflict(&e) && attempt < MAX_CONFLICT_RETRIES => {
                    attempt += 1;
                    tracing::debug!(attempt, promo_id = %promo_id, "Retrying redemption after conflict");
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn create_payment(&self, input: NewPayment) -> Result<Payment, AppError> {
        let payment = sqlx::query_as::<_, Payment>(
            "INSERT INTO payments
                (id, reservation_id, event_id, user_id, amount, status, external_reference, promo_code)
             VALUES ($1, $2, $3, $4, $5, 'pending', $6, $7)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(input.reservation_id)
        .bind(input.event_id)
        .bind(input.user_id)
        .bind(input.amount)
        .bind(input.external_reference)
        .bind(input.promo_code)
        .fetch_one(&self.pool)
        .await?;
        Ok(payment)
    }

    async fn find_payment_by_reference(&self, reference: &str) -> Result<Payment, AppError> {
        sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE external_reference = $1")
            .bind(reference)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Payment {reference}")))
    }

    async fn resolve_payment(
        &self,
        reference: &str,
        status: PaymentStatus,
        ticket_id: Option<Uuid>,
    ) -> Result<Payment, AppError> {
        let resolved = sqlx::query_as::<_, Payment>(
            "UPDATE payments
             SET status = $2, ticket_id = COALESCE($3, ticket_id), updated_at = NOW()
             WHERE external_reference = $1 AND status = 'pending'
             RETURNING *",
        )
        .bind(reference)
        .bind(status)
        .bind(ticket_id)
        .fetch_optional(&self.pool)
        .await?;
        match resolved {
            Some(payment) => Ok(payment),
            // Already terminal: report the stored outcome unchanged.
            None => self.find_payment_by_reference(reference).await,
        }
    }
}
