use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "discount_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    Percentage,
    Fixed,
}

/// A discount code owned by an organizer.
///
/// `event_id = None` means the code applies to every event of its owner.
/// `max_uses = None` means unlimited. Codes are matched case-insensitively
/// and stored uppercase.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PromoCode {
    pub id: Uuid,
    pub code: String,
    pub owner_id: Uuid,
    pub event_id: Option<Uuid>,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub max_uses: Option<i32>,
    pub used_count: i32,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl PromoCode {
    pub fn has_uses_left(&self) -> bool {
        match self.max_uses {
            Some(max) => self.used_count < max,
            None => true,
        }
    }
}

/// Result of validating a promo code against an event. Computing a quote
/// mutates nothing; the same inputs always produce the same quote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountQuote {
    pub promo_code_id: Uuid,
    pub code: String,
    pub original_price: Decimal,
    pub discount_amount: Decimal,
    pub final_price: Decimal,
}
