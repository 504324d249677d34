//! Promo Engine: side-effect-free validation, atomic bounded redemption.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::{DiscountQuote, DiscountType, Event, PromoCode};
use crate::store::LedgerStore;
use crate::utils::error::AppError;

pub struct PromoEngine {
    store: Arc<dyn LedgerStore>,
}

impl PromoEngine {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Validate `code` against `event` and price a quote. Mutates nothing:
    /// validating twice in a row always yields the same answer, and a
    /// redeem that follows immediately can only fail if someone else spent
    /// the remaining uses in between.
    pub async fn validate(&self, code: &str, event: &Event) -> Result<DiscountQuote, AppError> {
        let promo = self
            .store
            .find_promo_by_code(code)
            .await?
            .ok_or_else(|| AppError::PromoInvalid("code not found".to_string()))?;

        if !promo.is_active {
            return Err(AppError::PromoInvalid("code is no longer active".to_string()));
        }
        if let Some(expires_at) = promo.expires_at {
            if expires_at <= Utc::now() {
                return Err(AppError::PromoInvalid("code has expired".to_string()));
            }
        }
        let applicable = match promo.event_id {
            Some(event_id) => event_id == event.id,
            None => promo.owner_id == event.organizer_id,
        };
        if !applicable {
            return Err(AppError::PromoInvalid(
                "code does not apply to this event".to_string(),
            ));
        }
        if !promo.has_uses_left() {
            return Err(AppError::PromoExhausted);
        }

        Ok(build_quote(&promo, event.price))
    }

    /// Spend one use. The store increments `used_count` only where uses
    /// remain, so of N concurrent redemptions of a code with one use left,
    /// exactly one succeeds and the rest get `PromoExhausted`.
    pub async fn redeem(&self, promo_id: Uuid) -> Result<(), AppError> {
        self.store.redeem_promo(promo_id).await?;
        tracing::info!(promo_id = %promo_id, "Promo code redeemed");
        Ok(())
    }
}

/// Price a quote. The discount never exceeds the price, so the final price
/// never goes negative.
fn build_quote(promo: &PromoCode, price: Decimal) -> DiscountQuote {
    let raw = match promo.discount_type {
        DiscountType::Percentage => {
            (price * promo.discount_value / Decimal::from(100)).round_dp(2)
        }
        DiscountType::Fixed => promo.discount_value,
    };
    let discount_amount = raw.min(price);
    DiscountQuote {
        promo_code_id: promo.id,
        code: promo.code.clone(),
        original_price: price,
        discount_amount,
        final_price: price - discount_amount,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str_exact(s).unwrap()
    }

    fn promo(discount_type: DiscountType, value: Decimal) -> PromoCode {
        PromoCode {
            id: Uuid::new_v4(),
            code: "SAVE20".to_string(),
            owner_id: Uuid::new_v4(),
            event_id: None,
            discount_type,
            discount_value: value,
            max_uses: Some(10),
            used_count: 0,
            expires_at: None,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn percentage_quote_matches_expected_split() {
        let quote = build_quote(&promo(DiscountType::Percentage, dec("20")), dec("1000"));
        assert_eq!(quote.discount_amount, dec("200"));
        assert_eq!(quote.final_price, dec("800"));
        assert_eq!(quote.original_price, dec("1000"));
    }

    #[test]
    fn fixed_discount_is_clamped_to_price() {
        let quote = build_quote(&promo(DiscountType::Fixed, dec("50")), dec("30"));
        assert_eq!(quote.discount_amount, dec("30"));
        assert_eq!(quote.final_price, Decimal::ZERO);
    }

    #[test]
    fn full_percentage_discount_reaches_zero_not_below() {
        let quote = build_quote(&promo(DiscountType::Percentage, dec("100")), dec("75.50"));
        assert_eq!(quote.discount_amount, dec("75.50"));
        assert_eq!(quote.final_price, Decimal::ZERO);
    }

    #[test]
    fn percentage_discount_rounds_to_cents() {
        let quote = build_quote(&promo(DiscountType::Percentage, dec("33")), dec("10"));
        assert_eq!(quote.discount_amount, dec("3.30"));
        assert_eq!(quote.final_price, dec("6.70"));
    }
}
