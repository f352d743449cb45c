use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Mpesa,
    Card,
    BankTransfer,
    Paypal,
    Cash,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Mpesa => "mpesa",
            PaymentMethod::Card => "card",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Paypal => "paypal",
            PaymentMethod::Cash => "cash",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "card" => PaymentMethod::Card,
            "bank_transfer" => PaymentMethod::BankTransfer,
            "paypal" => PaymentMethod::Paypal,
            "cash" => PaymentMethod::Cash,
            _ => PaymentMethod::Mpesa,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
    Refunded,
    PartiallyRefunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::PartiallyRefunded => "partially_refunded",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "processing" => PaymentStatus::Processing,
            "completed" => PaymentStatus::Completed,
            "failed" => PaymentStatus::Failed,
            "cancelled" => PaymentStatus::Cancelled,
            "refunded" => PaymentStatus::Refunded,
            "partially_refunded" => PaymentStatus::PartiallyRefunded,
            _ => PaymentStatus::Pending,
        }
    }

    /// Still waiting on the gateway.
    pub fn is_open(&self) -> bool {
        matches!(self, PaymentStatus::Pending | PaymentStatus::Processing)
    }

    pub fn is_refundable(&self) -> bool {
        matches!(self, PaymentStatus::Completed)
    }
}

/// What a payment pays for. Exactly one per payment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "type", content = "id")]
pub enum PaymentTarget {
    Order(i64),
    ServiceOrder(i64),
}

impl PaymentTarget {
    pub fn from_ids(order_id: Option<i64>, service_order_id: Option<i64>) -> Option<Self> {
        match (order_id, service_order_id) {
            (Some(id), None) => Some(PaymentTarget::Order(id)),
            (None, Some(id)) => Some(PaymentTarget::ServiceOrder(id)),
            _ => None,
        }
    }

    pub fn order_id(&self) -> Option<i64> {
        match self {
            PaymentTarget::Order(id) => Some(*id),
            PaymentTarget::ServiceOrder(_) => None,
        }
    }

    pub fn service_order_id(&self) -> Option<i64> {
        match self {
            PaymentTarget::ServiceOrder(id) => Some(*id),
            PaymentTarget::Order(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: i64,
    pub user_id: String,
    pub payment_id: String,
    pub target: PaymentTarget,
    pub amount: Decimal,
    pub currency: String,
    pub payment_method: PaymentMethod,
    pub status: PaymentStatus,
    pub gateway_transaction_id: String,
    pub gateway_reference: String,
    pub gateway_response: Option<serde_json::Value>,
    pub description: String,
    pub failure_reason: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub completed_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MpesaDetails {
    pub phone_number: String,
    pub merchant_request_id: String,
    pub checkout_request_id: String,
    pub mpesa_receipt_number: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardDetails {
    pub last_four: String,
    pub expiry_month: String,
    pub expiry_year: String,
    pub cardholder_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRefund {
    pub id: i64,
    pub refund_id: String,
    pub payment_id: i64,
    pub amount: Decimal,
    pub reason: String,
    pub status: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentWebhook {
    pub id: i64,
    pub webhook_id: String,
    pub payment_method: PaymentMethod,
    pub event_type: String,
    pub data: serde_json::Value,
    pub processed: bool,
    pub created_at: NaiveDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_requires_exactly_one_id() {
        assert_eq!(PaymentTarget::from_ids(Some(1), None), Some(PaymentTarget::Order(1)));
        assert_eq!(
            PaymentTarget::from_ids(None, Some(2)),
            Some(PaymentTarget::ServiceOrder(2))
        );
        assert_eq!(PaymentTarget::from_ids(Some(1), Some(2)), None);
        assert_eq!(PaymentTarget::from_ids(None, None), None);
    }

    #[test]
    fn test_refundable_statuses() {
        assert!(PaymentStatus::Completed.is_refundable());
        assert!(!PaymentStatus::PartiallyRefunded.is_refundable());
        assert!(!PaymentStatus::Pending.is_refundable());
        assert!(!PaymentStatus::Refunded.is_refundable());
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(PaymentStatus::parse("partially_refunded"), PaymentStatus::PartiallyRefunded);
        assert_eq!(PaymentStatus::PartiallyRefunded.as_str(), "partially_refunded");
        assert_eq!(PaymentMethod::parse("card").as_str(), "card");
    }
}
