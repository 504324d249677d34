//! External collaborators: payment provider and notification delivery.
//!
//! Both are trait objects injected into the engine. Notification delivery is
//! fire-and-forget — implementations swallow and log their own failures, so
//! a dead mail server can never roll back a ticket sale.

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::utils::error::AppError;

/// Checkout-session half of the payment integration. The outcome for a
/// reference arrives later on the confirmation endpoint, reported by the
/// provider exactly once (duplicates are tolerated there).
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Open a checkout session for `reference` and return the redirect URL
    /// the buyer should be sent to.
    async fn create_checkout(
        &self,
        reference: &str,
        amount: Decimal,
    ) -> Result<String, AppError>;
}

/// Development/test provider: every checkout session opens.
pub struct MockPaymentProvider;

#[async_trait]
impl PaymentProvider for MockPaymentProvider {
    async fn create_checkout(
        &self,
        reference: &str,
        amount: Decimal,
    ) -> Result<String, AppError> {
        tracing::debug!(reference, %amount, "Mock checkout session created");
        Ok(format!("https://pay.example.com/checkout/{reference}"))
    }
}

#[async_trait]
pub trait NotificationGateway: Send + Sync {
    async fn ticket_issued(&self, user_id: Uuid, event_id: Uuid, ticket_id: Uuid);
    async fn waitlist_spot_open(&self, user_id: Uuid, event_id: Uuid);
    async fn ticket_cancelled(&self, user_id: Uuid, event_id: Uuid, ticket_id: Uuid);
}

/// Default gateway: structured log lines in place of outbound delivery.
pub struct LogNotifier;

#[async_trait]
impl NotificationGateway for LogNotifier {
    async fn ticket_issued(&self, user_id: Uuid, event_id: Uuid, ticket_id: Uuid) {
        tracing::info!(%user_id, %event_id, %ticket_id, "notify: ticket issued");
    }

    async fn waitlist_spot_open(&self, user_id: Uuid, event_id: Uuid) {
        tracing::info!(%user_id, %event_id, "notify: waitlist spot open");
    }

    async fn ticket_cancelled(&self, user_id: Uuid, event_id: Uuid, ticket_id: Uuid) {
        tracing::info!(%user_id, %event_id, %ticket_id, "notify: ticket cancelled");
    }
}
