//! Promo Engine properties: pure validation, bounded redemption under
//! concurrency, and the paid-but-exhausted fallback.

mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use tokio::sync::Barrier;
use tokio::task::JoinSet;
use uuid::Uuid;

use common::{dec, harness, published_event, user};
use tessera_server::engine::PurchaseOutcome;
use tessera_server::models::{DiscountType, PaymentOutcome, PromoCode, User};
use tessera_server::store::{CreatePromoCode, LedgerStore};
use tessera_server::utils::error::AppError;

async fn promo(
    store: &Arc<dyn LedgerStore>,
    owner: &User,
    code: &str,
    discount_type: DiscountType,
    value: Decimal,
    event_id: Option<Uuid>,
    max_uses: Option<i32>,
) -> PromoCode {
    store
        .create_promo(CreatePromoCode {
            owner_id: owner.id,
            code: code.to_string(),
            event_id,
            discount_type,
            discount_value: value,
            max_uses,
            expires_at: None,
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn scenario_c_percentage_quote() {
    let h = harness();
    let organizer = user(&h.store, "Org").await;
    let event = published_event(&h.store, &organizer, 10, dec("1000")).await;
    promo(
        &h.store,
        &organizer,
        "SAVE20",
        DiscountType::Percentage,
        dec("20"),
        None,
        None,
    )
    .await;

    let quote = h.engine.promo().validate("SAVE20", &event).await.unwrap();
    assert_eq!(quote.original_price, dec("1000"));
    assert_eq!(quote.discount_amount, dec("200"));
    assert_eq!(quote.final_price, dec("800"));

    // Case-insensitive lookup, and validation mutates nothing.
    let again = h.engine.promo().validate("save20", &event).await.unwrap();
    assert_eq!(again, quote);
}

#[tokio::test]
async fn single_use_code_survives_concurrent_redemption_exactly_once() {
    let h = harness();
    let organizer = user(&h.store, "Org").await;
    let code = promo(
        &h.store,
        &organizer,
        "LASTONE",
        DiscountType::Fixed,
        dec("5"),
        None,
        Some(1),
    )
    .await;

    const ATTEMPTS: usize = 8;
    let barrier = Arc::new(Barrier::new(ATTEMPTS));
    let mut set = JoinSet::new();
    for _ in 0..ATTEMPTS {
        let store = h.store.clone();
        let barrier = barrier.clone();
        let promo_id = code.id;
        set.spawn(async move {
            barrier.wait().await;
            store.redeem_promo(promo_id).await
        });
    }

    let mut redeemed = 0;
    let mut exhausted = 0;
    while let Some(result) = set.join_next().await {
        match result.unwrap() {
            Ok(()) => redeemed += 1,
            Err(AppError::PromoExhausted) => exhausted += 1,
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
    assert_eq!(redeemed, 1);
    assert_eq!(exhausted, ATTEMPTS - 1);

    let stored = h.store.find_promo_by_code("LASTONE").await.unwrap().unwrap();
    assert_eq!(stored.used_count, 1);
}

#[tokio::test]
async fn validate_then_redeem_does_not_drift() {
    let h = harness();
    let organizer = user(&h.store, "Org").await;
    let event = published_event(&h.store, &organizer, 10, dec("100")).await;
    promo(
        &h.store,
        &organizer,
        "ONCE",
        DiscountType::Percentage,
        dec("10"),
        None,
        Some(1),
    )
    .await;

    // Validation spends nothing, so the immediate redeem always has the
    // use the quote promised.
    let quote = h.engine.promo().validate("ONCE", &event).await.unwrap();
    h.engine.promo().redeem(quote.promo_code_id).await.unwrap();

    let err = h.engine.promo().validate("ONCE", &event).await.unwrap_err();
    assert!(matches!(err, AppError::PromoExhausted));
}

#[tokio::test]
async fn validation_rejects_in_order() {
    let h = harness();
    let organizer = user(&h.store, "Org").await;
    let rival = user(&h.store, "Rival").await;
    let event = published_event(&h.store, &organizer, 10, dec("100")).await;
    let rival_event = published_event(&h.store, &rival, 10, dec("100")).await;

    // Unknown code
    let err = h.engine.promo().validate("NOPE", &event).await.unwrap_err();
    assert!(matches!(err, AppError::PromoInvalid(_)));

    // Deactivated code
    let dead = promo(
        &h.store,
        &organizer,
        "DEAD",
        DiscountType::Fixed,
        dec("5"),
        None,
        None,
    )
    .await;
    h.store.deactivate_promo(dead.id, organizer.id).await.unwrap();
    let err = h.engine.promo().validate("DEAD", &event).await.unwrap_err();
    assert!(matches!(err, AppError::PromoInvalid(_)));

    // Expired code
    let stale = h
        .store
        .create_promo(CreatePromoCode {
            owner_id: organizer.id,
            code: "STALE".to_string(),
            event_id: None,
            discount_type: DiscountType::Fixed,
            discount_value: dec("5"),
            max_uses: None,
            expires_at: Some(Utc::now() - Duration::hours(1)),
        })
        .await
        .unwrap();
    assert!(stale.is_active);
    let err = h.engine.promo().validate("STALE", &event).await.unwrap_err();
    assert!(matches!(err, AppError::PromoInvalid(_)));

    // Bound to a different event
    promo(
        &h.store,
        &organizer,
        "ELSEWHERE",
        DiscountType::Fixed,
        dec("5"),
        Some(rival_event.id),
        None,
    )
    .await;
    let err = h
        .engine
        .promo()
        .validate("ELSEWHERE", &event)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::PromoInvalid(_)));

    // Owner-wide code does not reach another organizer's event
    promo(
        &h.store,
        &organizer,
        "MINEONLY",
        DiscountType::Fixed,
        dec("5"),
        None,
        None,
    )
    .await;
    let err = h
        .engine
        .promo()
        .validate("MINEONLY", &rival_event)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::PromoInvalid(_)));
}

#[tokio::test]
async fn oversized_fixed_discount_makes_the_ticket_free() {
    let h = harness();
    let organizer = user(&h.store, "Org").await;
    let buyer = user(&h.store, "Ada").await;
    let event = published_event(&h.store, &organizer, 10, dec("30")).await;
    promo(
        &h.store,
        &organizer,
        "BIGGERTHANPRICE",
        DiscountType::Fixed,
        dec("50"),
        None,
        None,
    )
    .await;

    let quote = h
        .engine
        .promo()
        .validate("BIGGERTHANPRICE", &event)
        .await
        .unwrap();
    assert_eq!(quote.discount_amount, dec("30"));
    assert_eq!(quote.final_price, Decimal::ZERO);

    // A fully discounted purchase skips the payment provider entirely.
    let outcome = h
        .engine
        .purchase_or_reserve(event.id, buyer.id, Some("biggerthanprice".to_string()))
        .await
        .unwrap();
    let PurchaseOutcome::Ticket { ticket } = outcome else {
        panic!("fully discounted purchase should issue immediately");
    };
    assert_eq!(ticket.price_paid, Decimal::ZERO);
    assert_eq!(ticket.promo_code_id, Some(quote.promo_code_id));
}

#[tokio::test]
async fn exhausted_code_fails_the_next_purchase_upfront() {
    let h = harness();
    let organizer = user(&h.store, "Org").await;
    let first = user(&h.store, "Ada").await;
    let second = user(&h.store, "Ben").await;
    let event = published_event(&h.store, &organizer, 10, dec("100")).await;
    promo(
        &h.store,
        &organizer,
        "ONESHOT",
        DiscountType::Percentage,
        dec("100"),
        None,
        Some(1),
    )
    .await;

    let PurchaseOutcome::Ticket { ticket } = h
        .engine
        .purchase_or_reserve(event.id, first.id, Some("ONESHOT".to_string()))
        .await
        .unwrap()
    else {
        panic!("fully discounted purchase should issue immediately");
    };
    assert!(ticket.promo_code_id.is_some());

    let err = h
        .engine
        .purchase_or_reserve(event.id, second.id, Some("ONESHOT".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::PromoExhausted));
}

#[tokio::test]
async fn paid_buyer_is_never_stranded_by_a_raced_out_code() {
    let h = harness();
    let organizer = user(&h.store, "Org").await;
    let ada = user(&h.store, "Ada").await;
    let ben = user(&h.store, "Ben").await;
    let event = published_event(&h.store, &organizer, 10, dec("1000")).await;
    promo(
        &h.store,
        &organizer,
        "SAVE20",
        DiscountType::Percentage,
        dec("20"),
        None,
        Some(1),
    )
    .await;

    // Both buyers quote the discount while a use remains; validation is
    // side-effect-free so neither spends it yet.
    let mut references = Vec::new();
    for buyer in [ada.id, ben.id] {
        match h
            .engine
            .purchase_or_reserve(event.id, buyer, Some("SAVE20".to_string()))
            .await
            .unwrap()
        {
            PurchaseOutcome::PaymentRequired {
                payment_reference,
                amount,
                ..
            } => {
                assert_eq!(amount, dec("800"));
                references.push(payment_reference);
            }
            other => panic!("priced event should require payment: {other:?}"),
        }
    }
    let (ada_ref, ben_ref) = (references[0].clone(), references[1].clone());

    let ada_ticket = h
        .engine
        .confirm_purchase(&ada_ref, PaymentOutcome::Success)
        .await
        .unwrap();
    assert!(ada_ticket.promo_code_id.is_some());

    // Ben's payment already went through; the ticket is issued anyway,
    // just without discount attribution.
    let ben_ticket = h
        .engine
        .confirm_purchase(&ben_ref, PaymentOutcome::Success)
        .await
        .unwrap();
    assert!(ben_ticket.promo_code_id.is_none());
    assert_eq!(ben_ticket.price_paid, dec("800"));

    let code = h.store.find_promo_by_code("SAVE20").await.unwrap().unwrap();
    assert_eq!(code.used_count, 1);
}
