use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;

use super::gateway::{CardChargeRequest, StkPushRequest};
use crate::db::{self, bookings, orders, payments};
use crate::errors::AppError;
use crate::models::{
    BookingStatus, CardDetails, MpesaDetails, OrderStatus, Payment, PaymentMethod, PaymentRefund,
    PaymentStatus, PaymentTarget,
};
use crate::state::AppState;

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("Payment not found")]
    NotFound,

    #[error("Order not found")]
    OrderNotFound,

    #[error("Service order not found")]
    ServiceOrderNotFound,

    #[error("Provide exactly one of order_id or service_order_id")]
    TargetRequired,

    #[error("Please enter a valid Kenyan phone number")]
    InvalidPhone,

    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Payment cannot be refunded")]
    NotRefundable,

    #[error("Refund amount cannot exceed payment amount")]
    RefundExceedsPayment,

    #[error("Total refund amount would exceed payment amount")]
    RefundExceedsRemaining,

    #[error("Payment failed. Card declined.")]
    CardDeclined,

    #[error(transparent)]
    Database(#[from] anyhow::Error),
}

impl From<PaymentError> for AppError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::NotFound => AppError::NotFound(err.to_string()),
            PaymentError::OrderNotFound => AppError::invalid("order_id", err.to_string()),
            PaymentError::ServiceOrderNotFound => {
                AppError::invalid("service_order_id", err.to_string())
            }
            PaymentError::TargetRequired => AppError::invalid("order_id", err.to_string()),
            PaymentError::InvalidPhone => AppError::invalid("phone_number", err.to_string()),
            PaymentError::InvalidAmount => AppError::invalid("amount", err.to_string()),
            PaymentError::Database(e) => AppError::Internal(e),
            _ => AppError::Conflict(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for PaymentError {
    fn from(err: rusqlite::Error) -> Self {
        PaymentError::Database(err.into())
    }
}

#[derive(Debug, Clone)]
pub struct MpesaInitiation {
    pub phone_number: String,
    pub amount: Decimal,
    pub order_id: Option<i64>,
    pub service_order_id: Option<i64>,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CardInitiation {
    pub card_number: String,
    pub expiry_month: String,
    pub expiry_year: String,
    pub cvv: String,
    pub cardholder_name: String,
    pub amount: Decimal,
    pub order_id: Option<i64>,
    pub service_order_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MpesaInitiated {
    pub payment_id: String,
    pub checkout_request_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CardCharged {
    pub payment_id: String,
    pub status: PaymentStatus,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentDetail {
    #[serde(flatten)]
    pub payment: Payment,
    pub mpesa: Option<MpesaDetails>,
    pub card: Option<CardDetails>,
    pub refunds: Vec<PaymentRefund>,
}

/// What a vendor callback ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// Same vendor key seen before; nothing re-applied.
    Duplicate,
    /// Stored, but no open payment matched.
    Unmatched,
    Completed(String),
    Failed(String),
}

const DEFAULT_DESCRIPTION: &str = "Spa storefront payment";
const MPESA_FAILURE: &str = "Failed to initiate M-Pesa payment";
const CARD_FAILURE: &str = "Payment processing failed";

/// Kenyan numbers in local (07/01) or international (254/+254) form.
pub fn is_valid_phone(phone: &str) -> bool {
    let phone = phone.trim();
    let has_prefix = ["254", "+254", "07", "01"]
        .iter()
        .any(|prefix| phone.starts_with(prefix));
    let digits = phone.trim_start_matches('+');
    has_prefix
        && !digits.is_empty()
        && digits.chars().all(|c| c.is_ascii_digit())
        && (10..=12).contains(&digits.len())
}

/// Resolves the payment target and checks it belongs to the caller.
pub fn resolve_target(
    conn: &Connection,
    user_id: &str,
    order_id: Option<i64>,
    service_order_id: Option<i64>,
) -> Result<PaymentTarget, PaymentError> {
    let target = PaymentTarget::from_ids(order_id, service_order_id)
        .ok_or(PaymentError::TargetRequired)?;
    match target {
        PaymentTarget::Order(id) => {
            orders::get_order(conn, id)?
                .filter(|o| o.user_id == user_id)
                .ok_or(PaymentError::OrderNotFound)?;
        }
        PaymentTarget::ServiceOrder(id) => {
            orders::get_service_order(conn, id)?
                .filter(|o| o.user_id == user_id)
                .ok_or(PaymentError::ServiceOrderNotFound)?;
        }
    }
    Ok(target)
}

/// Creates the pending M-Pesa payment row and its method details.
fn open_mpesa_payment(
    conn: &Connection,
    user_id: &str,
    request: &MpesaInitiation,
    currency: &str,
) -> Result<(i64, String), PaymentError> {
    if !is_valid_phone(&request.phone_number) {
        return Err(PaymentError::InvalidPhone);
    }
    if request.amount <= Decimal::ZERO {
        return Err(PaymentError::InvalidAmount);
    }
    let target = resolve_target(conn, user_id, request.order_id, request.service_order_id)?;

    let payment_id = db::new_token("PAY", 12);
    let tx = conn.unchecked_transaction()?;
    let row_id = payments::insert_payment(
        &tx,
        &payments::NewPayment {
            user_id,
            payment_id: &payment_id,
            target,
            amount: request.amount,
            currency,
            method: PaymentMethod::Mpesa,
            description: request.description.as_deref().unwrap_or(DEFAULT_DESCRIPTION),
        },
    )?;
    payments::insert_mpesa_details(&tx, row_id, request.phone_number.trim())?;
    tx.commit()?;
    Ok((row_id, payment_id))
}

/// Opens a payment and sends the STK push. A gateway failure marks the
/// payment failed and the caller only sees a generic message.
pub async fn initiate_mpesa(
    state: &AppState,
    user_id: &str,
    request: &MpesaInitiation,
) -> Result<MpesaInitiated, AppError> {
    let (row_id, payment_id) = {
        let conn = state.conn()?;
        open_mpesa_payment(&conn, user_id, request, &state.config.currency)?
    };

    let push = StkPushRequest {
        phone_number: request.phone_number.trim(),
        amount: request.amount,
        account_reference: &payment_id,
        description: request.description.as_deref().unwrap_or(DEFAULT_DESCRIPTION),
    };

    match state.mpesa.stk_push(&push).await {
        Ok(accepted) => {
            let conn = state.conn()?;
            payments::set_mpesa_request_ids(
                &conn,
                row_id,
                &accepted.merchant_request_id,
                &accepted.checkout_request_id,
            )?;
            payments::mark_processing(&conn, row_id, &accepted.checkout_request_id, &accepted.raw)?;
            tracing::info!(payment_id = %payment_id, "M-Pesa payment awaiting callback");
            Ok(MpesaInitiated {
                payment_id,
                checkout_request_id: accepted.checkout_request_id,
                message: "STK Push sent to your phone. Please enter your M-Pesa PIN to complete payment."
                    .to_string(),
            })
        }
        Err(e) => {
            tracing::warn!(payment_id = %payment_id, error = %e, "M-Pesa initiation failed");
            let conn = state.conn()?;
            payments::fail_payment(&conn, row_id, &e.to_string(), None)?;
            Err(AppError::Gateway(MPESA_FAILURE.to_string()))
        }
    }
}

fn open_card_payment(
    conn: &Connection,
    user_id: &str,
    request: &CardInitiation,
    currency: &str,
) -> Result<(i64, String), PaymentError> {
    if request.amount <= Decimal::ZERO {
        return Err(PaymentError::InvalidAmount);
    }
    let target = resolve_target(conn, user_id, request.order_id, request.service_order_id)?;

    let digits: String = request.card_number.chars().filter(char::is_ascii_digit).collect();
    let last_four = digits[digits.len().saturating_sub(4)..].to_string();

    let payment_id = db::new_token("PAY", 12);
    let tx = conn.unchecked_transaction()?;
    let row_id = payments::insert_payment(
        &tx,
        &payments::NewPayment {
            user_id,
            payment_id: &payment_id,
            target,
            amount: request.amount,
            currency,
            method: PaymentMethod::Card,
            description: "Card payment",
        },
    )?;
    payments::insert_card_details(
        &tx,
        row_id,
        &CardDetails {
            last_four,
            expiry_month: request.expiry_month.clone(),
            expiry_year: request.expiry_year.clone(),
            cardholder_name: request.cardholder_name.clone(),
        },
    )?;
    tx.commit()?;
    Ok((row_id, payment_id))
}

/// Charges a card synchronously. Only the last four digits are ever stored.
pub async fn initiate_card(
    state: &AppState,
    user_id: &str,
    request: &CardInitiation,
) -> Result<CardCharged, AppError> {
    let (row_id, payment_id) = {
        let conn = state.conn()?;
        open_card_payment(&conn, user_id, request, &state.config.currency)?
    };

    let charge = CardChargeRequest {
        card_number: &request.card_number,
        expiry_month: &request.expiry_month,
        expiry_year: &request.expiry_year,
        cvv: &request.cvv,
        cardholder_name: &request.cardholder_name,
        amount: request.amount,
        currency: &state.config.currency,
        reference: &payment_id,
    };

    match state.card.charge(&charge).await {
        Ok(result) if result.approved => {
            let conn = state.conn()?;
            let tx = conn.unchecked_transaction()?;
            if payments::complete_payment(&tx, row_id, &result.transaction_id, &result.raw)? {
                if let Some(payment) = payments::get_payment(&tx, row_id)? {
                    propagate_completion(&tx, &payment)?;
                }
            }
            tx.commit()?;
            tracing::info!(payment_id = %payment_id, "card payment completed");
            Ok(CardCharged {
                payment_id,
                status: PaymentStatus::Completed,
                message: "Payment successful".to_string(),
            })
        }
        Ok(result) => {
            let reason = if result.failure_reason.is_empty() {
                "Card declined".to_string()
            } else {
                result.failure_reason
            };
            tracing::info!(payment_id = %payment_id, reason = %reason, "card declined");
            let conn = state.conn()?;
            if payments::fail_payment(&conn, row_id, &reason, Some(&result.raw))? {
                if let Some(payment) = payments::get_payment(&conn, row_id)? {
                    propagate_failure(&conn, &payment)?;
                }
            }
            Err(PaymentError::CardDeclined.into())
        }
        Err(e) => {
            tracing::warn!(payment_id = %payment_id, error = %e, "card gateway error");
            let conn = state.conn()?;
            payments::fail_payment(&conn, row_id, &e.to_string(), None)?;
            Err(AppError::Gateway(CARD_FAILURE.to_string()))
        }
    }
}

/// Marks what the payment paid for as paid. A booking behind a service
/// order moves pending → confirmed.
fn propagate_completion(conn: &Connection, payment: &Payment) -> anyhow::Result<()> {
    match payment.target {
        PaymentTarget::Order(order_id) => {
            orders::mark_order_paid(conn, order_id)?;
            orders::insert_tracking(conn, order_id, OrderStatus::Confirmed, "Payment received")?;
        }
        PaymentTarget::ServiceOrder(service_order_id) => {
            orders::mark_service_order_paid(conn, service_order_id)?;
            if let Some(service_order) = orders::get_service_order(conn, service_order_id)? {
                let confirmed = bookings::transition_booking(
                    conn,
                    service_order.booking_id,
                    BookingStatus::Pending,
                    BookingStatus::Confirmed,
                )?;
                if confirmed {
                    tracing::info!(booking_id = %service_order.booking_id, "booking confirmed by payment");
                }
            }
        }
    }
    Ok(())
}

fn propagate_failure(conn: &Connection, payment: &Payment) -> anyhow::Result<()> {
    if let PaymentTarget::Order(order_id) = payment.target {
        orders::set_order_payment_status(conn, order_id, PaymentStatus::Failed.as_str())?;
    }
    Ok(())
}

// ── Callbacks ──

/// Fields pulled from either the Daraja `Body.stkCallback` envelope or the flat form.
#[derive(Debug, Default, PartialEq)]
struct CallbackFields {
    checkout_request_id: Option<String>,
    result_code: Option<i64>,
    result_desc: Option<String>,
    receipt: Option<String>,
}

fn json_i64(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

fn json_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn extract_callback(payload: &Value) -> CallbackFields {
    let body = payload
        .pointer("/Body/stkCallback")
        .unwrap_or(payload);

    let receipt = body.get("MpesaReceiptNumber").and_then(json_string).or_else(|| {
        body.pointer("/CallbackMetadata/Item")
            .and_then(Value::as_array)
            .and_then(|items| {
                items
                    .iter()
                    .find(|item| item.get("Name").and_then(Value::as_str) == Some("MpesaReceiptNumber"))
            })
            .and_then(|item| item.get("Value"))
            .and_then(json_string)
    });

    CallbackFields {
        checkout_request_id: body.get("CheckoutRequestID").and_then(json_string),
        result_code: body.get("ResultCode").and_then(json_i64),
        result_desc: body.get("ResultDesc").and_then(json_string),
        receipt,
    }
}

/// Stores the raw callback, then settles the matching open payment. A
/// repeated callback for the same checkout request is stored once and
/// applied once.
pub fn handle_mpesa_callback(conn: &Connection, payload: &Value) -> anyhow::Result<CallbackOutcome> {
    let fields = extract_callback(payload);
    let webhook_id = fields
        .checkout_request_id
        .clone()
        .unwrap_or_else(|| db::new_token("WH", 12));
    let event_type = payload
        .get("event_type")
        .and_then(Value::as_str)
        .unwrap_or("payment_notification");

    // A stored callback that never settled is applied again on redelivery.
    if !payments::record_webhook(conn, &webhook_id, PaymentMethod::Mpesa, event_type, payload)? {
        let processed = payments::get_webhook(conn, &webhook_id)?.map_or(true, |w| w.processed);
        if processed {
            tracing::info!(webhook_id = %webhook_id, "duplicate M-Pesa callback ignored");
            return Ok(CallbackOutcome::Duplicate);
        }
        tracing::info!(webhook_id = %webhook_id, "retrying unprocessed M-Pesa callback");
    }

    let Some(checkout_request_id) = fields.checkout_request_id.as_deref() else {
        tracing::warn!(webhook_id = %webhook_id, "M-Pesa callback without CheckoutRequestID");
        return Ok(CallbackOutcome::Unmatched);
    };
    let Some(payment) = payments::find_by_checkout_request(conn, checkout_request_id)? else {
        tracing::warn!(checkout_request_id, "M-Pesa callback for unknown payment");
        return Ok(CallbackOutcome::Unmatched);
    };

    let tx = conn.unchecked_transaction()?;
    let outcome = if fields.result_code == Some(0) {
        let receipt = fields.receipt.clone().unwrap_or_default();
        if payments::complete_payment(&tx, payment.id, &receipt, payload)? {
            payments::set_mpesa_receipt(&tx, payment.id, &receipt)?;
            propagate_completion(&tx, &payment)?;
        }
        CallbackOutcome::Completed(payment.payment_id.clone())
    } else {
        let reason = fields
            .result_desc
            .clone()
            .unwrap_or_else(|| "Payment failed".to_string());
        if payments::fail_payment(&tx, payment.id, &reason, Some(payload))? {
            propagate_failure(&tx, &payment)?;
        }
        CallbackOutcome::Failed(payment.payment_id.clone())
    };
    payments::mark_webhook_processed(&tx, &webhook_id)?;
    tx.commit()?;

    tracing::info!(
        payment_id = %payment.payment_id,
        result_code = ?fields.result_code,
        "M-Pesa callback processed"
    );
    Ok(outcome)
}

// ── Refunds ──

/// Files a refund request. Pending, processing and completed refunds all
/// count against the payment amount. Without `amount` the remainder is refunded.
pub fn request_refund(
    conn: &Connection,
    user_id: &str,
    payment_id: &str,
    amount: Option<Decimal>,
    reason: &str,
) -> Result<PaymentRefund, PaymentError> {
    let payment = payments::get_payment_by_public_id(conn, payment_id)?
        .filter(|p| p.user_id == user_id)
        .ok_or(PaymentError::NotFound)?;
    if !payment.status.is_refundable() {
        return Err(PaymentError::NotRefundable);
    }

    let tx = conn.unchecked_transaction()?;
    let committed = payments::committed_refund_total(&tx, payment.id)?;
    let amount = amount.unwrap_or(payment.amount - committed);
    if amount <= Decimal::ZERO {
        return Err(PaymentError::InvalidAmount);
    }
    if amount > payment.amount {
        return Err(PaymentError::RefundExceedsPayment);
    }
    if committed + amount > payment.amount {
        return Err(PaymentError::RefundExceedsRemaining);
    }

    let reason = if reason.trim().is_empty() {
        "Customer requested refund"
    } else {
        reason.trim()
    };
    // The refund starts pending; the payment keeps its status until the refund is settled.
    let refund = payments::insert_refund(&tx, &db::new_token("REF", 12), payment.id, amount, reason)?;
    tx.commit()?;

    tracing::info!(
        payment_id = %payment.payment_id,
        refund_id = %refund.refund_id,
        amount = %refund.amount,
        "refund requested"
    );
    Ok(refund)
}

// ── Queries ──

pub fn list_for_user(conn: &Connection, user_id: &str) -> Result<Vec<Payment>, PaymentError> {
    Ok(payments::list_user_payments(conn, user_id)?)
}

pub fn detail(conn: &Connection, user_id: &str, payment_id: &str) -> Result<PaymentDetail, PaymentError> {
    let payment = payments::get_payment_by_public_id(conn, payment_id)?
        .filter(|p| p.user_id == user_id)
        .ok_or(PaymentError::NotFound)?;
    Ok(PaymentDetail {
        mpesa: payments::get_mpesa_details(conn, payment.id)?,
        card: payments::get_card_details(conn, payment.id)?,
        refunds: payments::list_refunds(conn, payment.id)?,
        payment,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::catalog;
    use crate::services::{cart, orders as order_service};
    use rust_decimal_macros::dec;

    fn placed_order(conn: &Connection, user_id: &str) -> i64 {
        let product = catalog::tests::seed_product(conn, "oil", dec!(1000), 10);
        cart::add(conn, user_id, product.id, None, 1).unwrap();
        let now = db::parse_timestamp("2025-06-01 12:00:00").unwrap();
        order_service::checkout(conn, user_id, &Default::default(), now)
            .unwrap()
            .order
            .id
    }

    /// An M-Pesa payment that has reached the gateway and waits on its callback.
    fn processing_payment(conn: &Connection, user_id: &str, checkout: &str) -> (i64, String, i64) {
        let order_id = placed_order(conn, user_id);
        let (row_id, payment_id) = open_mpesa_payment(
            conn,
            user_id,
            &MpesaInitiation {
                phone_number: "0712345678".into(),
                amount: dec!(1000),
                order_id: Some(order_id),
                service_order_id: None,
                description: None,
            },
            "KES",
        )
        .unwrap();
        payments::set_mpesa_request_ids(conn, row_id, "MR-1", checkout).unwrap();
        payments::mark_processing(conn, row_id, checkout, &serde_json::json!({})).unwrap();
        (row_id, payment_id, order_id)
    }

    fn daraja_success(checkout: &str) -> Value {
        serde_json::json!({
            "Body": {"stkCallback": {
                "MerchantRequestID": "MR-1",
                "CheckoutRequestID": checkout,
                "ResultCode": 0,
                "ResultDesc": "The service request is processed successfully.",
                "CallbackMetadata": {"Item": [
                    {"Name": "Amount", "Value": 1000},
                    {"Name": "MpesaReceiptNumber", "Value": "QGR7ABC123"}
                ]}
            }}
        })
    }

    #[test]
    fn test_phone_prefixes() {
        assert!(is_valid_phone("254712345678"));
        assert!(is_valid_phone("+254712345678"));
        assert!(is_valid_phone("0712345678"));
        assert!(is_valid_phone("0112345678"));
        assert!(!is_valid_phone("0812345678"));
        assert!(!is_valid_phone("712345678"));
        assert!(!is_valid_phone("07123abc78"));
    }

    #[test]
    fn test_target_must_be_single_and_owned() {
        let conn = db::init_db(":memory:").unwrap();
        let order_id = placed_order(&conn, "user-1");

        assert!(matches!(
            resolve_target(&conn, "user-1", None, None),
            Err(PaymentError::TargetRequired)
        ));
        assert!(matches!(
            resolve_target(&conn, "user-1", Some(order_id), Some(1)),
            Err(PaymentError::TargetRequired)
        ));
        assert!(matches!(
            resolve_target(&conn, "user-2", Some(order_id), None),
            Err(PaymentError::OrderNotFound)
        ));
        assert_eq!(
            resolve_target(&conn, "user-1", Some(order_id), None).unwrap(),
            PaymentTarget::Order(order_id)
        );
    }

    #[test]
    fn test_extract_flat_and_envelope_forms() {
        let flat = extract_callback(&serde_json::json!({
            "CheckoutRequestID": "ws_CO_1",
            "ResultCode": "1032",
            "ResultDesc": "Request cancelled by user"
        }));
        assert_eq!(flat.checkout_request_id.as_deref(), Some("ws_CO_1"));
        assert_eq!(flat.result_code, Some(1032));
        assert_eq!(flat.receipt, None);

        let envelope = extract_callback(&daraja_success("ws_CO_2"));
        assert_eq!(envelope.result_code, Some(0));
        assert_eq!(envelope.receipt.as_deref(), Some("QGR7ABC123"));
    }

    #[test]
    fn test_callback_completes_payment_and_confirms_order() {
        let conn = db::init_db(":memory:").unwrap();
        let (row_id, payment_id, order_id) = processing_payment(&conn, "user-1", "ws_CO_9");

        let outcome = handle_mpesa_callback(&conn, &daraja_success("ws_CO_9")).unwrap();
        assert_eq!(outcome, CallbackOutcome::Completed(payment_id));

        let payment = payments::get_payment(&conn, row_id).unwrap().unwrap();
        assert_eq!(payment.status, PaymentStatus::Completed);
        assert_eq!(payment.gateway_transaction_id, "QGR7ABC123");
        assert!(payment.completed_at.is_some());
        assert_eq!(
            payments::get_mpesa_details(&conn, row_id).unwrap().unwrap().mpesa_receipt_number,
            "QGR7ABC123"
        );

        let order = orders::get_order(&conn, order_id).unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Confirmed);
        assert_eq!(order.payment_status, "completed");
        assert!(payments::get_webhook(&conn, "ws_CO_9").unwrap().unwrap().processed);
    }

    #[test]
    fn test_repeated_callback_applies_once() {
        let conn = db::init_db(":memory:").unwrap();
        let (row_id, _, _) = processing_payment(&conn, "user-1", "ws_CO_9");

        handle_mpesa_callback(&conn, &daraja_success("ws_CO_9")).unwrap();
        let failure = serde_json::json!({"CheckoutRequestID": "ws_CO_9", "ResultCode": 1});
        assert_eq!(
            handle_mpesa_callback(&conn, &failure).unwrap(),
            CallbackOutcome::Duplicate
        );
        assert_eq!(
            payments::get_payment(&conn, row_id).unwrap().unwrap().status,
            PaymentStatus::Completed
        );
    }

    #[test]
    fn test_redelivery_settles_a_stored_unprocessed_callback() {
        let conn = db::init_db(":memory:").unwrap();
        let (row_id, payment_id, order_id) = processing_payment(&conn, "user-1", "ws_CO_8");
        let payload = daraja_success("ws_CO_8");

        // stored by an earlier delivery whose settlement never committed
        payments::record_webhook(&conn, "ws_CO_8", PaymentMethod::Mpesa, "payment_notification", &payload)
            .unwrap();

        assert_eq!(
            handle_mpesa_callback(&conn, &payload).unwrap(),
            CallbackOutcome::Completed(payment_id)
        );
        assert_eq!(
            payments::get_payment(&conn, row_id).unwrap().unwrap().status,
            PaymentStatus::Completed
        );
        assert_eq!(
            orders::get_order(&conn, order_id).unwrap().unwrap().status,
            OrderStatus::Confirmed
        );
        assert!(payments::get_webhook(&conn, "ws_CO_8").unwrap().unwrap().processed);
        assert_eq!(
            handle_mpesa_callback(&conn, &payload).unwrap(),
            CallbackOutcome::Duplicate
        );
    }

    #[test]
    fn test_failed_callback_records_reason() {
        let conn = db::init_db(":memory:").unwrap();
        let (row_id, payment_id, order_id) = processing_payment(&conn, "user-1", "ws_CO_7");

        let payload = serde_json::json!({
            "CheckoutRequestID": "ws_CO_7",
            "ResultCode": 1032,
            "ResultDesc": "Request cancelled by user"
        });
        assert_eq!(
            handle_mpesa_callback(&conn, &payload).unwrap(),
            CallbackOutcome::Failed(payment_id)
        );
        let payment = payments::get_payment(&conn, row_id).unwrap().unwrap();
        assert_eq!(payment.status, PaymentStatus::Failed);
        assert_eq!(payment.failure_reason, "Request cancelled by user");
        assert_eq!(payment.gateway_response, Some(payload));
        assert_eq!(
            orders::get_order(&conn, order_id).unwrap().unwrap().status,
            OrderStatus::Pending
        );
    }

    #[test]
    fn test_unmatched_callback_is_stored_unprocessed() {
        let conn = db::init_db(":memory:").unwrap();
        let outcome = handle_mpesa_callback(
            &conn,
            &serde_json::json!({"CheckoutRequestID": "ws_CO_unknown", "ResultCode": 0}),
        )
        .unwrap();
        assert_eq!(outcome, CallbackOutcome::Unmatched);
        assert!(!payments::get_webhook(&conn, "ws_CO_unknown").unwrap().unwrap().processed);

        // no vendor key: a WH token is generated
        let outcome = handle_mpesa_callback(&conn, &serde_json::json!({"ResultCode": 0})).unwrap();
        assert_eq!(outcome, CallbackOutcome::Unmatched);
    }

    #[test]
    fn test_refund_scenario() {
        let conn = db::init_db(":memory:").unwrap();
        let (row_id, payment_id, _) = processing_payment(&conn, "user-1", "ws_CO_5");

        // not yet completed
        assert!(matches!(
            request_refund(&conn, "user-1", &payment_id, Some(dec!(100)), ""),
            Err(PaymentError::NotRefundable)
        ));
        handle_mpesa_callback(&conn, &daraja_success("ws_CO_5")).unwrap();

        let first = request_refund(&conn, "user-1", &payment_id, Some(dec!(400)), "damaged").unwrap();
        assert!(first.refund_id.starts_with("REF"));
        assert_eq!(first.status, "pending");
        assert_eq!(
            payments::get_payment(&conn, row_id).unwrap().unwrap().status,
            PaymentStatus::Completed
        );

        assert!(matches!(
            request_refund(&conn, "user-1", &payment_id, Some(dec!(700)), ""),
            Err(PaymentError::RefundExceedsRemaining)
        ));
        assert!(matches!(
            request_refund(&conn, "user-1", &payment_id, Some(dec!(1200)), ""),
            Err(PaymentError::RefundExceedsPayment)
        ));
        assert!(matches!(
            request_refund(&conn, "user-2", &payment_id, Some(dec!(10)), ""),
            Err(PaymentError::NotFound)
        ));

        let second = request_refund(&conn, "user-1", &payment_id, Some(dec!(600)), "").unwrap();
        assert_eq!(second.reason, "Customer requested refund");
        assert_eq!(
            payments::get_payment(&conn, row_id).unwrap().unwrap().status,
            PaymentStatus::Completed
        );

        // pending requests already cover the full amount
        assert!(matches!(
            request_refund(&conn, "user-1", &payment_id, None, ""),
            Err(PaymentError::InvalidAmount)
        ));

        let detail = detail(&conn, "user-1", &payment_id).unwrap();
        assert_eq!(detail.refunds.len(), 2);
        assert_eq!(detail.mpesa.unwrap().phone_number, "0712345678");
    }
}
