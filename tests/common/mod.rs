//! Shared harness: a ticketing engine over the in-memory ledger.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;

use tessera_server::engine::{EnginePolicy, TicketingEngine};
use tessera_server::gateway::{LogNotifier, MockPaymentProvider};
use tessera_server::models::{Event, User};
use tessera_server::store::{CreateEvent, CreateUser, LedgerStore, MemoryLedger};

pub struct Harness {
    pub engine: Arc<TicketingEngine>,
    pub store: Arc<dyn LedgerStore>,
}

pub fn harness() -> Harness {
    harness_with_policy(EnginePolicy::default())
}

pub fn harness_with_policy(policy: EnginePolicy) -> Harness {
    let store: Arc<dyn LedgerStore> = Arc::new(MemoryLedger::new());
    let engine = Arc::new(TicketingEngine::new(
        store.clone(),
        Arc::new(MockPaymentProvider),
        Arc::new(LogNotifier),
        policy,
    ));
    Harness { engine, store }
}

pub async fn user(store: &Arc<dyn LedgerStore>, name: &str) -> User {
    store
        .create_user(CreateUser {
            name: name.to_string(),
            email: format!("{}@example.com", name.to_lowercase()),
        })
        .await
        .unwrap()
}

/// A published event ready to sell.
pub async fn published_event(
    store: &Arc<dyn LedgerStore>,
    organizer: &User,
    capacity: i32,
    price: Decimal,
) -> Event {
    let event = store
        .create_event(CreateEvent {
            organizer_id: organizer.id,
            title: "Warehouse Show".to_string(),
            description: None,
            location: "Pier 9".to_string(),
            start_time: Utc::now() + Duration::days(30),
            capacity,
            price,
        })
        .await
        .unwrap();
    store.publish_event(event.id, organizer.id).await.unwrap()
}

pub fn dec(s: &str) -> Decimal {
    Decimal::from_str_exact(s).unwrap()
}
