pub mod card;
pub mod mpesa;

use async_trait::async_trait;
use rust_decimal::Decimal;

pub struct StkPushRequest<'a> {
    pub phone_number: &'a str,
    pub amount: Decimal,
    pub account_reference: &'a str,
    pub description: &'a str,
}

/// The vendor accepted the push; the outcome arrives later on the callback.
#[derive(Debug, Clone)]
pub struct StkPushAccepted {
    pub merchant_request_id: String,
    pub checkout_request_id: String,
    pub raw: serde_json::Value,
}

pub struct CardChargeRequest<'a> {
    pub card_number: &'a str,
    pub expiry_month: &'a str,
    pub expiry_year: &'a str,
    pub cvv: &'a str,
    pub cardholder_name: &'a str,
    pub amount: Decimal,
    pub currency: &'a str,
    pub reference: &'a str,
}

#[derive(Debug, Clone)]
pub struct CardChargeResult {
    pub approved: bool,
    pub transaction_id: String,
    pub failure_reason: String,
    pub raw: serde_json::Value,
}

#[async_trait]
pub trait MpesaGateway: Send + Sync {
    async fn stk_push(&self, request: &StkPushRequest<'_>) -> anyhow::Result<StkPushAccepted>;
}

#[async_trait]
pub trait CardGateway: Send + Sync {
    async fn charge(&self, request: &CardChargeRequest<'_>) -> anyhow::Result<CardChargeResult>;
}
