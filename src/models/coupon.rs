use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    Percentage,
    Fixed,
}

impl DiscountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscountType::Percentage => "percentage",
            DiscountType::Fixed => "fixed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "fixed" => DiscountType::Fixed,
            _ => DiscountType::Percentage,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Coupon {
    pub id: i64,
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub minimum_order_amount: Decimal,
    pub maximum_discount_amount: Option<Decimal>,
    pub usage_limit: Option<i64>,
    pub used_count: i64,
    pub is_active: bool,
    pub valid_from: NaiveDateTime,
    pub valid_until: NaiveDateTime,
}

impl Coupon {
    pub fn is_valid(&self, now: NaiveDateTime) -> bool {
        self.is_active
            && self.valid_from <= now
            && now <= self.valid_until
            && self.usage_limit.map_or(true, |limit| self.used_count < limit)
    }

    /// Discount for `amount`. Zero when the coupon is not valid or the
    /// amount is under the minimum; never more than `amount`.
    pub fn calculate_discount(&self, amount: Decimal, now: NaiveDateTime) -> Decimal {
        if !self.is_valid(now) || amount < self.minimum_order_amount {
            return Decimal::ZERO;
        }

        let discount = match self.discount_type {
            DiscountType::Percentage => {
                let raw = amount * self.discount_value / Decimal::ONE_HUNDRED;
                match self.maximum_discount_amount {
                    Some(max) => raw.min(max),
                    None => raw,
                }
            }
            DiscountType::Fixed => self.discount_value,
        };

        discount.max(Decimal::ZERO).min(amount).round_dp(2)
    }
}
