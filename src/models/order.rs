use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Refunded => "refunded",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "confirmed" => OrderStatus::Confirmed,
            "processing" => OrderStatus::Processing,
            "shipped" => OrderStatus::Shipped,
            "delivered" => OrderStatus::Delivered,
            "cancelled" => OrderStatus::Cancelled,
            "refunded" => OrderStatus::Refunded,
            _ => OrderStatus::Pending,
        }
    }

    pub fn can_cancel(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Confirmed)
    }
}

/// Shipping/billing address, stored as a JSON blob on the order row.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Address {
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub line1: String,
    #[serde(default)]
    pub line2: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub postal_code: String,
    #[serde(default)]
    pub country: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub user_id: String,
    pub order_number: String,
    pub status: OrderStatus,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub shipping_amount: Decimal,
    pub discount_amount: Decimal,
    pub total_amount: Decimal,
    pub coupon_code: Option<String>,
    pub shipping_address: Address,
    pub billing_address: Address,
    pub notes: String,
    pub payment_method: String,
    pub payment_status: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: i64,
    pub order_id: i64,
    pub product_id: i64,
    pub variant_id: Option<i64>,
    pub product_name: String,
    pub quantity: i64,
    pub unit_price: Decimal,
    pub total_price: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderTracking {
    pub id: i64,
    pub order_id: i64,
    pub status: OrderStatus,
    pub description: String,
    pub created_at: NaiveDateTime,
}

/// Priced snapshot of a booking that payments attach to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceOrder {
    pub id: i64,
    pub user_id: String,
    pub order_number: String,
    pub booking_id: i64,
    pub service_id: i64,
    pub status: OrderStatus,
    pub service_price: Decimal,
    pub addons_price: Decimal,
    pub tax_amount: Decimal,
    pub total_amount: Decimal,
    pub appointment_date: NaiveDate,
    #[serde(with = "super::hhmm")]
    pub appointment_time: NaiveTime,
    pub duration_minutes: i64,
    pub payment_status: String,
    pub created_at: NaiveDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_pending_and_confirmed_cancel() {
        assert!(OrderStatus::Pending.can_cancel());
        assert!(OrderStatus::Confirmed.can_cancel());
        assert!(!OrderStatus::Shipped.can_cancel());
        assert!(!OrderStatus::Delivered.can_cancel());
        assert!(!OrderStatus::Cancelled.can_cancel());
    }

    #[test]
    fn test_address_tolerates_missing_fields() {
        let addr: Address = serde_json::from_str(r#"{"city":"Nairobi"}"#).unwrap();
        assert_eq!(addr.city, "Nairobi");
        assert_eq!(addr.line1, "");
    }
}
