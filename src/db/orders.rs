use chrono::{NaiveDate, NaiveTime};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use serde::Serialize;

use super::{fmt_date, fmt_time, parse_date, parse_decimal, parse_time, parse_timestamp};
use crate::models::{Address, CartLine, Order, OrderItem, OrderStatus, OrderTracking, ServiceOrder};

// ── Orders ──

pub struct NewOrder<'a> {
    pub user_id: &'a str,
    pub order_number: &'a str,
    pub subtotal: Decimal,
    pub discount_amount: Decimal,
    pub total_amount: Decimal,
    pub coupon_code: Option<&'a str>,
    pub shipping_address: &'a Address,
    pub billing_address: &'a Address,
    pub notes: &'a str,
    pub payment_method: &'a str,
}

const ORDER_COLUMNS: &str = "id, user_id, order_number, status, subtotal, tax_amount, shipping_amount, \
     discount_amount, total_amount, coupon_code, shipping_address, billing_address, notes, \
     payment_method, payment_status, created_at, updated_at";

pub fn insert_order(conn: &Connection, new: &NewOrder) -> anyhow::Result<i64> {
    conn.execute(
        "INSERT INTO orders (user_id, order_number, subtotal, discount_amount, total_amount, coupon_code, \
           shipping_address, billing_address, notes, payment_method) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            new.user_id,
            new.order_number,
            new.subtotal.to_string(),
            new.discount_amount.to_string(),
            new.total_amount.to_string(),
            new.coupon_code,
            serde_json::to_string(new.shipping_address)?,
            serde_json::to_string(new.billing_address)?,
            new.notes,
            new.payment_method,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_order(conn: &Connection, id: i64) -> anyhow::Result<Option<Order>> {
    let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?1");
    let result = conn
        .query_row(&sql, params![id], |row| Ok(parse_order_row(row)))
        .optional()?;
    result.transpose()
}

pub fn get_order_by_number(conn: &Connection, order_number: &str) -> anyhow::Result<Option<Order>> {
    let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE order_number = ?1");
    let result = conn
        .query_row(&sql, params![order_number], |row| Ok(parse_order_row(row)))
        .optional()?;
    result.transpose()
}

pub fn list_user_orders(conn: &Connection, user_id: &str) -> anyhow::Result<Vec<Order>> {
    let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = ?1 ORDER BY id DESC");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![user_id], |row| Ok(parse_order_row(row)))?;

    let mut orders = Vec::new();
    for row in rows {
        orders.push(row??);
    }
    Ok(orders)
}

/// Sets `to` only if the order is currently in one of `from`.
pub fn transition_order(
    conn: &Connection,
    id: i64,
    from: &[OrderStatus],
    to: OrderStatus,
) -> anyhow::Result<bool> {
    let allowed = from
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "UPDATE orders SET status = ?1, updated_at = datetime('now') \
         WHERE id = ?2 AND status IN ({allowed})"
    );
    let changed = conn.execute(&sql, params![to.as_str(), id])?;
    Ok(changed > 0)
}

/// Records a completed payment; a pending order moves to confirmed.
pub fn mark_order_paid(conn: &Connection, id: i64) -> anyhow::Result<bool> {
    let changed = conn.execute(
        "UPDATE orders SET payment_status = 'completed', \
           status = CASE WHEN status = 'pending' THEN 'confirmed' ELSE status END, \
           updated_at = datetime('now') \
         WHERE id = ?1",
        params![id],
    )?;
    Ok(changed > 0)
}

pub fn set_order_payment_status(conn: &Connection, id: i64, payment_status: &str) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE orders SET payment_status = ?1, updated_at = datetime('now') WHERE id = ?2",
        params![payment_status, id],
    )?;
    Ok(())
}

fn parse_order_row(row: &rusqlite::Row) -> anyhow::Result<Order> {
    let status: String = row.get(3)?;
    let subtotal: String = row.get(4)?;
    let tax: String = row.get(5)?;
    let shipping: String = row.get(6)?;
    let discount: String = row.get(7)?;
    let total: String = row.get(8)?;
    let shipping_address: String = row.get(10)?;
    let billing_address: String = row.get(11)?;
    let created_at: String = row.get(15)?;
    let updated_at: String = row.get(16)?;

    Ok(Order {
        id: row.get(0)?,
        user_id: row.get(1)?,
        order_number: row.get(2)?,
        status: OrderStatus::parse(&status),
        subtotal: parse_decimal(&subtotal)?,
        tax_amount: parse_decimal(&tax)?,
        shipping_amount: parse_decimal(&shipping)?,
        discount_amount: parse_decimal(&discount)?,
        total_amount: parse_decimal(&total)?,
        coupon_code: row.get(9)?,
        shipping_address: serde_json::from_str(&shipping_address)?,
        billing_address: serde_json::from_str(&billing_address)?,
        notes: row.get(12)?,
        payment_method: row.get(13)?,
        payment_status: row.get(14)?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

// ── Order items ──

/// Copies a cart line into the order with its price frozen.
pub fn insert_order_item(conn: &Connection, order_id: i64, line: &CartLine) -> anyhow::Result<()> {
    let name = match &line.variant_label {
        Some(label) => format!("{} ({label})", line.product_name),
        None => line.product_name.clone(),
    };
    conn.execute(
        "INSERT INTO order_items (order_id, product_id, variant_id, product_name, quantity, unit_price, total_price) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            order_id,
            line.product_id,
            line.variant_id,
            name,
            line.quantity,
            line.unit_price.to_string(),
            line.total_price().to_string(),
        ],
    )?;
    Ok(())
}

pub fn list_order_items(conn: &Connection, order_id: i64) -> anyhow::Result<Vec<OrderItem>> {
    let mut stmt = conn.prepare(
        "SELECT id, order_id, product_id, variant_id, product_name, quantity, unit_price, total_price \
         FROM order_items WHERE order_id = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map(params![order_id], |row| Ok(parse_order_item_row(row)))?;

    let mut items = Vec::new();
    for row in rows {
        items.push(row??);
    }
    Ok(items)
}

fn parse_order_item_row(row: &rusqlite::Row) -> anyhow::Result<OrderItem> {
    let unit_price: String = row.get(6)?;
    let total_price: String = row.get(7)?;
    Ok(OrderItem {
        id: row.get(0)?,
        order_id: row.get(1)?,
        product_id: row.get(2)?,
        variant_id: row.get(3)?,
        product_name: row.get(4)?,
        quantity: row.get(5)?,
        unit_price: parse_decimal(&unit_price)?,
        total_price: parse_decimal(&total_price)?,
    })
}

// ── Tracking ──

pub fn insert_tracking(
    conn: &Connection,
    order_id: i64,
    status: OrderStatus,
    description: &str,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO order_tracking (order_id, status, description) VALUES (?1, ?2, ?3)",
        params![order_id, status.as_str(), description],
    )?;
    Ok(())
}

pub fn list_tracking(conn: &Connection, order_id: i64) -> anyhow::Result<Vec<OrderTracking>> {
    let mut stmt = conn.prepare(
        "SELECT id, order_id, status, description, created_at FROM order_tracking \
         WHERE order_id = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map(params![order_id], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
        ))
    })?;

    let mut entries = Vec::new();
    for row in rows {
        let (id, order_id, status, description, created_at) = row?;
        entries.push(OrderTracking {
            id,
            order_id,
            status: OrderStatus::parse(&status),
            description,
            created_at: parse_timestamp(&created_at)?,
        });
    }
    Ok(entries)
}

// ── Service orders ──

pub struct NewServiceOrder<'a> {
    pub user_id: &'a str,
    pub order_number: &'a str,
    pub booking_id: i64,
    pub service_id: i64,
    pub service_price: Decimal,
    pub addons_price: Decimal,
    pub total_amount: Decimal,
    pub appointment_date: NaiveDate,
    pub appointment_time: NaiveTime,
    pub duration_minutes: i64,
}

const SERVICE_ORDER_COLUMNS: &str = "id, user_id, order_number, booking_id, service_id, status, \
     service_price, addons_price, tax_amount, total_amount, appointment_date, appointment_time, \
     duration_minutes, payment_status, created_at";

pub fn insert_service_order(conn: &Connection, new: &NewServiceOrder) -> anyhow::Result<i64> {
    conn.execute(
        "INSERT INTO service_orders (user_id, order_number, booking_id, service_id, service_price, \
           addons_price, total_amount, appointment_date, appointment_time, duration_minutes) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            new.user_id,
            new.order_number,
            new.booking_id,
            new.service_id,
            new.service_price.to_string(),
            new.addons_price.to_string(),
            new.total_amount.to_string(),
            fmt_date(new.appointment_date),
            fmt_time(new.appointment_time),
            new.duration_minutes,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_service_order(conn: &Connection, id: i64) -> anyhow::Result<Option<ServiceOrder>> {
    let sql = format!("SELECT {SERVICE_ORDER_COLUMNS} FROM service_orders WHERE id = ?1");
    let result = conn
        .query_row(&sql, params![id], |row| Ok(parse_service_order_row(row)))
        .optional()?;
    result.transpose()
}

pub fn get_service_order_for_booking(
    conn: &Connection,
    booking_id: i64,
) -> anyhow::Result<Option<ServiceOrder>> {
    let sql = format!("SELECT {SERVICE_ORDER_COLUMNS} FROM service_orders WHERE booking_id = ?1");
    let result = conn
        .query_row(&sql, params![booking_id], |row| Ok(parse_service_order_row(row)))
        .optional()?;
    result.transpose()
}

/// Records a completed payment; a pending service order moves to confirmed.
pub fn mark_service_order_paid(conn: &Connection, id: i64) -> anyhow::Result<bool> {
    let changed = conn.execute(
        "UPDATE service_orders SET payment_status = 'completed', \
           status = CASE WHEN status = 'pending' THEN 'confirmed' ELSE status END \
         WHERE id = ?1",
        params![id],
    )?;
    Ok(changed > 0)
}

pub fn set_service_order_status(conn: &Connection, id: i64, status: OrderStatus) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE service_orders SET status = ?1 WHERE id = ?2",
        params![status.as_str(), id],
    )?;
    Ok(())
}

fn parse_service_order_row(row: &rusqlite::Row) -> anyhow::Result<ServiceOrder> {
    let status: String = row.get(5)?;
    let service_price: String = row.get(6)?;
    let addons_price: String = row.get(7)?;
    let tax: String = row.get(8)?;
    let total: String = row.get(9)?;
    let date: String = row.get(10)?;
    let time: String = row.get(11)?;
    let created_at: String = row.get(14)?;

    Ok(ServiceOrder {
        id: row.get(0)?,
        user_id: row.get(1)?,
        order_number: row.get(2)?,
        booking_id: row.get(3)?,
        service_id: row.get(4)?,
        status: OrderStatus::parse(&status),
        service_price: parse_decimal(&service_price)?,
        addons_price: parse_decimal(&addons_price)?,
        tax_amount: parse_decimal(&tax)?,
        total_amount: parse_decimal(&total)?,
        appointment_date: parse_date(&date)?,
        appointment_time: parse_time(&time)?,
        duration_minutes: row.get(12)?,
        payment_status: row.get(13)?,
        created_at: parse_timestamp(&created_at)?,
    })
}

// ── Stats ──

#[derive(Debug, Default, Serialize)]
pub struct OrderStats {
    pub total_orders: i64,
    pub pending_orders: i64,
    pub cancelled_orders: i64,
    pub paid_revenue: Decimal,
}

pub fn order_stats(conn: &Connection) -> anyhow::Result<OrderStats> {
    let mut stmt = conn.prepare("SELECT status, payment_status, total_amount FROM orders")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    let mut stats = OrderStats::default();
    for row in rows {
        let (status, payment_status, total) = row?;
        stats.total_orders += 1;
        match OrderStatus::parse(&status) {
            OrderStatus::Pending => stats.pending_orders += 1,
            OrderStatus::Cancelled => stats.cancelled_orders += 1,
            _ => {}
        }
        if payment_status == "completed" {
            stats.paid_revenue += parse_decimal(&total)?;
        }
    }
    Ok(stats)
}
