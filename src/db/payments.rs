use std::collections::BTreeMap;

use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use serde::Serialize;

use super::{parse_decimal, parse_timestamp};
use crate::models::{
    CardDetails, MpesaDetails, Payment, PaymentMethod, PaymentRefund, PaymentStatus, PaymentTarget,
    PaymentWebhook,
};

// ── Payments ──

pub struct NewPayment<'a> {
    pub user_id: &'a str,
    pub payment_id: &'a str,
    pub target: PaymentTarget,
    pub amount: Decimal,
    pub currency: &'a str,
    pub method: PaymentMethod,
    pub description: &'a str,
}

const PAYMENT_COLUMNS: &str = "p.id, p.user_id, p.payment_id, p.order_id, p.service_order_id, p.amount, \
     p.currency, p.payment_method, p.status, p.gateway_transaction_id, p.gateway_reference, \
     p.gateway_response, p.description, p.failure_reason, p.created_at, p.updated_at, p.completed_at";

pub fn insert_payment(conn: &Connection, new: &NewPayment) -> anyhow::Result<i64> {
    conn.execute(
        "INSERT INTO payments (user_id, payment_id, order_id, service_order_id, amount, currency, \
           payment_method, description) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            new.user_id,
            new.payment_id,
            new.target.order_id(),
            new.target.service_order_id(),
            new.amount.to_string(),
            new.currency,
            new.method.as_str(),
            new.description,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_payment(conn: &Connection, id: i64) -> anyhow::Result<Option<Payment>> {
    let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments p WHERE p.id = ?1");
    let result = conn
        .query_row(&sql, params![id], |row| Ok(parse_payment_row(row)))
        .optional()?;
    result.transpose()
}

pub fn get_payment_by_public_id(conn: &Connection, payment_id: &str) -> anyhow::Result<Option<Payment>> {
    let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments p WHERE p.payment_id = ?1");
    let result = conn
        .query_row(&sql, params![payment_id], |row| Ok(parse_payment_row(row)))
        .optional()?;
    result.transpose()
}

pub fn find_by_checkout_request(
    conn: &Connection,
    checkout_request_id: &str,
) -> anyhow::Result<Option<Payment>> {
    let sql = format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments p \
         JOIN mpesa_payments m ON m.payment_id = p.id \
         WHERE m.checkout_request_id = ?1"
    );
    let result = conn
        .query_row(&sql, params![checkout_request_id], |row| Ok(parse_payment_row(row)))
        .optional()?;
    result.transpose()
}

pub fn list_user_payments(conn: &Connection, user_id: &str) -> anyhow::Result<Vec<Payment>> {
    let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments p WHERE p.user_id = ?1 ORDER BY p.id DESC");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![user_id], |row| Ok(parse_payment_row(row)))?;

    let mut payments = Vec::new();
    for row in rows {
        payments.push(row??);
    }
    Ok(payments)
}

/// Gateway accepted the request; waiting on its callback.
pub fn mark_processing(
    conn: &Connection,
    id: i64,
    gateway_reference: &str,
    gateway_response: &serde_json::Value,
) -> anyhow::Result<bool> {
    let changed = conn.execute(
        "UPDATE payments SET status = 'processing', gateway_reference = ?1, gateway_response = ?2, \
           updated_at = datetime('now') \
         WHERE id = ?3 AND status = 'pending'",
        params![gateway_reference, gateway_response.to_string(), id],
    )?;
    Ok(changed > 0)
}

/// Completes an open payment. Returns false if it had already settled.
pub fn complete_payment(
    conn: &Connection,
    id: i64,
    transaction_id: &str,
    gateway_response: &serde_json::Value,
) -> anyhow::Result<bool> {
    let changed = conn.execute(
        "UPDATE payments SET status = 'completed', gateway_transaction_id = ?1, gateway_response = ?2, \
           completed_at = datetime('now'), updated_at = datetime('now') \
         WHERE id = ?3 AND status IN ('pending', 'processing')",
        params![transaction_id, gateway_response.to_string(), id],
    )?;
    Ok(changed > 0)
}

/// Fails an open payment. Returns false if it had already settled.
pub fn fail_payment(
    conn: &Connection,
    id: i64,
    failure_reason: &str,
    gateway_response: Option<&serde_json::Value>,
) -> anyhow::Result<bool> {
    let changed = conn.execute(
        "UPDATE payments SET status = 'failed', failure_reason = ?1, \
           gateway_response = COALESCE(?2, gateway_response), updated_at = datetime('now') \
         WHERE id = ?3 AND status IN ('pending', 'processing')",
        params![failure_reason, gateway_response.map(|v| v.to_string()), id],
    )?;
    Ok(changed > 0)
}

pub fn set_payment_status(conn: &Connection, id: i64, status: PaymentStatus) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE payments SET status = ?1, updated_at = datetime('now') WHERE id = ?2",
        params![status.as_str(), id],
    )?;
    Ok(())
}

fn parse_payment_row(row: &rusqlite::Row) -> anyhow::Result<Payment> {
    let order_id: Option<i64> = row.get(3)?;
    let service_order_id: Option<i64> = row.get(4)?;
    let amount: String = row.get(5)?;
    let method: String = row.get(7)?;
    let status: String = row.get(8)?;
    let gateway_response: Option<String> = row.get(11)?;
    let created_at: String = row.get(14)?;
    let updated_at: String = row.get(15)?;
    let completed_at: Option<String> = row.get(16)?;

    let target = PaymentTarget::from_ids(order_id, service_order_id)
        .ok_or_else(|| anyhow::anyhow!("payment row without a single target"))?;

    Ok(Payment {
        id: row.get(0)?,
        user_id: row.get(1)?,
        payment_id: row.get(2)?,
        target,
        amount: parse_decimal(&amount)?,
        currency: row.get(6)?,
        payment_method: PaymentMethod::parse(&method),
        status: PaymentStatus::parse(&status),
        gateway_transaction_id: row.get(9)?,
        gateway_reference: row.get(10)?,
        gateway_response: gateway_response
            .as_deref()
            .map(serde_json::from_str::<serde_json::Value>)
            .transpose()?,
        description: row.get(12)?,
        failure_reason: row.get(13)?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
        completed_at: completed_at.as_deref().map(parse_timestamp).transpose()?,
    })
}

// ── Method details ──

pub fn insert_mpesa_details(conn: &Connection, payment_row_id: i64, phone_number: &str) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO mpesa_payments (payment_id, phone_number) VALUES (?1, ?2)",
        params![payment_row_id, phone_number],
    )?;
    Ok(())
}

pub fn set_mpesa_request_ids(
    conn: &Connection,
    payment_row_id: i64,
    merchant_request_id: &str,
    checkout_request_id: &str,
) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE mpesa_payments SET merchant_request_id = ?1, checkout_request_id = ?2 WHERE payment_id = ?3",
        params![merchant_request_id, checkout_request_id, payment_row_id],
    )?;
    Ok(())
}

pub fn set_mpesa_receipt(conn: &Connection, payment_row_id: i64, receipt: &str) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE mpesa_payments SET mpesa_receipt_number = ?1 WHERE payment_id = ?2",
        params![receipt, payment_row_id],
    )?;
    Ok(())
}

pub fn get_mpesa_details(conn: &Connection, payment_row_id: i64) -> anyhow::Result<Option<MpesaDetails>> {
    Ok(conn
        .query_row(
            "SELECT phone_number, merchant_request_id, checkout_request_id, mpesa_receipt_number \
             FROM mpesa_payments WHERE payment_id = ?1",
            params![payment_row_id],
            |row| {
                Ok(MpesaDetails {
                    phone_number: row.get(0)?,
                    merchant_request_id: row.get(1)?,
                    checkout_request_id: row.get(2)?,
                    mpesa_receipt_number: row.get(3)?,
                })
            },
        )
        .optional()?)
}

pub fn insert_card_details(conn: &Connection, payment_row_id: i64, card: &CardDetails) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO card_payments (payment_id, last_four, expiry_month, expiry_year, cardholder_name) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            payment_row_id,
            card.last_four,
            card.expiry_month,
            card.expiry_year,
            card.cardholder_name,
        ],
    )?;
    Ok(())
}

pub fn get_card_details(conn: &Connection, payment_row_id: i64) -> anyhow::Result<Option<CardDetails>> {
    Ok(conn
        .query_row(
            "SELECT last_four, expiry_month, expiry_year, cardholder_name \
             FROM card_payments WHERE payment_id = ?1",
            params![payment_row_id],
            |row| {
                Ok(CardDetails {
                    last_four: row.get(0)?,
                    expiry_month: row.get(1)?,
                    expiry_year: row.get(2)?,
                    cardholder_name: row.get(3)?,
                })
            },
        )
        .optional()?)
}

// ── Refunds ──

pub fn insert_refund(
    conn: &Connection,
    refund_id: &str,
    payment_row_id: i64,
    amount: Decimal,
    reason: &str,
) -> anyhow::Result<PaymentRefund> {
    conn.execute(
        "INSERT INTO payment_refunds (refund_id, payment_id, amount, reason) VALUES (?1, ?2, ?3, ?4)",
        params![refund_id, payment_row_id, amount.to_string(), reason],
    )?;
    let id = conn.last_insert_rowid();
    let created_at: String = conn.query_row(
        "SELECT created_at FROM payment_refunds WHERE id = ?1",
        params![id],
        |row| row.get(0),
    )?;
    Ok(PaymentRefund {
        id,
        refund_id: refund_id.to_string(),
        payment_id: payment_row_id,
        amount,
        reason: reason.to_string(),
        status: "pending".to_string(),
        created_at: parse_timestamp(&created_at)?,
    })
}

/// Sum of refunds that still count against the payment (pending, processing, completed).
pub fn committed_refund_total(conn: &Connection, payment_row_id: i64) -> anyhow::Result<Decimal> {
    let mut stmt = conn.prepare(
        "SELECT amount FROM payment_refunds \
         WHERE payment_id = ?1 AND status IN ('pending', 'processing', 'completed')",
    )?;
    let rows = stmt.query_map(params![payment_row_id], |row| row.get::<_, String>(0))?;

    let mut total = Decimal::ZERO;
    for row in rows {
        total += parse_decimal(&row?)?;
    }
    Ok(total)
}

pub fn list_refunds(conn: &Connection, payment_row_id: i64) -> anyhow::Result<Vec<PaymentRefund>> {
    let mut stmt = conn.prepare(
        "SELECT id, refund_id, payment_id, amount, reason, status, created_at \
         FROM payment_refunds WHERE payment_id = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map(params![payment_row_id], |row| Ok(parse_refund_row(row)))?;

    let mut refunds = Vec::new();
    for row in rows {
        refunds.push(row??);
    }
    Ok(refunds)
}

fn parse_refund_row(row: &rusqlite::Row) -> anyhow::Result<PaymentRefund> {
    let amount: String = row.get(3)?;
    let created_at: String = row.get(6)?;
    Ok(PaymentRefund {
        id: row.get(0)?,
        refund_id: row.get(1)?,
        payment_id: row.get(2)?,
        amount: parse_decimal(&amount)?,
        reason: row.get(4)?,
        status: row.get(5)?,
        created_at: parse_timestamp(&created_at)?,
    })
}

// ── Webhooks ──

/// Stores a vendor callback. Returns false when `webhook_id` was already seen.
pub fn record_webhook(
    conn: &Connection,
    webhook_id: &str,
    method: PaymentMethod,
    event_type: &str,
    data: &serde_json::Value,
) -> anyhow::Result<bool> {
    let inserted = conn.execute(
        "INSERT INTO payment_webhooks (webhook_id, payment_method, event_type, data) \
         VALUES (?1, ?2, ?3, ?4) ON CONFLICT(webhook_id) DO NOTHING",
        params![webhook_id, method.as_str(), event_type, data.to_string()],
    )?;
    Ok(inserted > 0)
}

pub fn get_webhook(conn: &Connection, webhook_id: &str) -> anyhow::Result<Option<PaymentWebhook>> {
    let result = conn
        .query_row(
            "SELECT id, webhook_id, payment_method, event_type, data, processed, created_at \
             FROM payment_webhooks WHERE webhook_id = ?1",
            params![webhook_id],
            |row| Ok(parse_webhook_row(row)),
        )
        .optional()?;
    result.transpose()
}

pub fn mark_webhook_processed(conn: &Connection, webhook_id: &str) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE payment_webhooks SET processed = 1 WHERE webhook_id = ?1",
        params![webhook_id],
    )?;
    Ok(())
}

fn parse_webhook_row(row: &rusqlite::Row) -> anyhow::Result<PaymentWebhook> {
    let method: String = row.get(2)?;
    let data: String = row.get(4)?;
    let created_at: String = row.get(6)?;
    Ok(PaymentWebhook {
        id: row.get(0)?,
        webhook_id: row.get(1)?,
        payment_method: PaymentMethod::parse(&method),
        event_type: row.get(3)?,
        data: serde_json::from_str(&data)?,
        processed: row.get(5)?,
        created_at: parse_timestamp(&created_at)?,
    })
}

// ── Stats ──

#[derive(Debug, Default, Serialize)]
pub struct PaymentStats {
    pub total_payments: i64,
    pub by_status: BTreeMap<String, i64>,
    pub total_completed_amount: Decimal,
}

/// `None` covers every user.
pub fn payment_stats(conn: &Connection, user_id: Option<&str>) -> anyhow::Result<PaymentStats> {
    let mut stmt = conn.prepare(
        "SELECT status, amount FROM payments WHERE ?1 IS NULL OR user_id = ?1",
    )?;
    let rows = stmt.query_map(params![user_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut stats = PaymentStats::default();
    for row in rows {
        let (status, amount) = row?;
        stats.total_payments += 1;
        if PaymentStatus::parse(&status) == PaymentStatus::Completed {
            stats.total_completed_amount += parse_decimal(&amount)?;
        }
        *stats.by_status.entry(status).or_insert(0) += 1;
    }
    Ok(stats)
}
