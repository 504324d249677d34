//! Check-in Verifier properties: exactly-once admission, duplicate-scan
//! reporting, and door authorization.

mod common;

use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::Barrier;
use tokio::task::JoinSet;

use common::{harness, published_event, user};
use tessera_server::engine::PurchaseOutcome;
use tessera_server::models::{Ticket, TicketStatus};
use tessera_server::store::LedgerStore;
use tessera_server::utils::error::AppError;

async fn issue_free_ticket(
    h: &common::Harness,
    organizer: &tessera_server::models::User,
    buyer: &tessera_server::models::User,
) -> Ticket {
    let event = published_event(&h.store, organizer, 10, Decimal::ZERO).await;
    match h
        .engine
        .purchase_or_reserve(event.id, buyer.id, None)
        .await
        .unwrap()
    {
        PurchaseOutcome::Ticket { ticket } => ticket,
        other => panic!("free event should issue immediately: {other:?}"),
    }
}

#[tokio::test]
async fn successful_scan_returns_full_detail() {
    let h = harness();
    let organizer = user(&h.store, "Org").await;
    let buyer = user(&h.store, "Ada").await;
    let ticket = issue_free_ticket(&h, &organizer, &buyer).await;

    let detail = h
        .engine
        .checkin()
        .verify_and_check_in(&ticket.qr_token, organizer.id)
        .await
        .unwrap();

    assert_eq!(detail.ticket.id, ticket.id);
    assert_eq!(detail.ticket.status, TicketStatus::Used);
    assert!(detail.ticket.scanned_at.is_some());
    assert_eq!(detail.attendee.id, buyer.id);
    assert_eq!(detail.attendee.name, "Ada");
    assert_eq!(detail.event.id, ticket.event_id);
}

#[tokio::test]
async fn concurrent_scans_admit_exactly_once() {
    let h = harness();
    let organizer = user(&h.store, "Org").await;
    let buyer = user(&h.store, "Ada").await;
    let ticket = issue_free_ticket(&h, &organizer, &buyer).await;

    let barrier = Arc::new(Barrier::new(2));
    let mut set = JoinSet::new();
    for _ in 0..2 {
        let engine = h.engine.clone();
        let barrier = barrier.clone();
        let token = ticket.qr_token.clone();
        let verifier = organizer.id;
        set.spawn(async move {
            barrier.wait().await;
            engine.checkin().verify_and_check_in(&token, verifier).await
        });
    }

    let mut admitted = 0;
    let mut duplicates = 0;
    while let Some(result) = set.join_next().await {
        match result.unwrap() {
            Ok(_) => admitted += 1,
            Err(AppError::AlreadyUsed { .. }) => duplicates += 1,
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
    assert_eq!(admitted, 1);
    assert_eq!(duplicates, 1);
}

#[tokio::test]
async fn scenario_d_duplicate_scan_reports_original_time() {
    let h = harness();
    let organizer = user(&h.store, "Org").await;
    let buyer = user(&h.store, "Ada").await;
    let ticket = issue_free_ticket(&h, &organizer, &buyer).await;

    let detail = h
        .engine
        .checkin()
        .verify_and_check_in(&ticket.qr_token, organizer.id)
        .await
        .unwrap();
    let first_scan = detail.ticket.scanned_at.unwrap();

    let err = h
        .engine
        .checkin()
        .verify_and_check_in(&ticket.qr_token, organizer.id)
        .await
        .unwrap_err();
    match err {
        AppError::AlreadyUsed { scanned_at } => assert_eq!(scanned_at, first_scan),
        other => panic!("expected AlreadyUsed, got {other:?}"),
    }

    // scanned_at is written once and never overwritten.
    let stored = h.store.get_ticket(ticket.id).await.unwrap();
    assert_eq!(stored.scanned_at, Some(first_scan));
}

#[tokio::test]
async fn only_the_organizer_may_scan() {
    let h = harness();
    let organizer = user(&h.store, "Org").await;
    let buyer = user(&h.store, "Ada").await;
    let stranger = user(&h.store, "Mallory").await;
    let ticket = issue_free_ticket(&h, &organizer, &buyer).await;

    let err = h
        .engine
        .checkin()
        .verify_and_check_in(&ticket.qr_token, stranger.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    // The failed attempt must not burn the ticket.
    let stored = h.store.get_ticket(ticket.id).await.unwrap();
    assert_eq!(stored.status, TicketStatus::Active);
}

#[tokio::test]
async fn unknown_token_is_not_found() {
    let h = harness();
    let organizer = user(&h.store, "Org").await;

    let err = h
        .engine
        .checkin()
        .verify_and_check_in("definitely-not-a-token", organizer.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn cancelled_ticket_is_rejected_without_mutation() {
    let h = harness();
    let organizer = user(&h.store, "Org").await;
    let buyer = user(&h.store, "Ada").await;
    let ticket = issue_free_ticket(&h, &organizer, &buyer).await;

    h.engine.cancel_ticket(ticket.id, buyer.id).await.unwrap();

    let err = h
        .engine
        .checkin()
        .verify_and_check_in(&ticket.qr_token, organizer.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::TicketCancelled));

    let stored = h.store.get_ticket(ticket.id).await.unwrap();
    assert_eq!(stored.status, TicketStatus::Cancelled);
    assert_eq!(stored.scanned_at, None);
}
