use chrono::NaiveDateTime;
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::Serialize;

use super::coupons::{self, CouponError};
use crate::db::{self, carts, orders};
use crate::errors::AppError;
use crate::models::{Address, Order, OrderItem, OrderStatus, OrderTracking};

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("Order not found")]
    NotFound,

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Order cannot be cancelled (already processing or shipped)")]
    NotCancellable,

    #[error(transparent)]
    Coupon(#[from] CouponError),

    #[error(transparent)]
    Database(#[from] anyhow::Error),
}

impl From<OrderError> for AppError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::NotFound => AppError::NotFound(err.to_string()),
            OrderError::Coupon(e) => e.into(),
            OrderError::Database(e) => AppError::Internal(e),
            _ => AppError::Conflict(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for OrderError {
    fn from(err: rusqlite::Error) -> Self {
        OrderError::Database(err.into())
    }
}

#[derive(Debug, Clone, Default)]
pub struct CheckoutRequest {
    pub shipping_address: Address,
    /// Falls back to the shipping address.
    pub billing_address: Option<Address>,
    pub notes: String,
    pub payment_method: String,
    pub coupon_code: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderDetail {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<OrderItem>,
    pub tracking: Vec<OrderTracking>,
}

/// Turns the caller's cart into an order with prices frozen per line, then empties the cart.
pub fn checkout(
    conn: &Connection,
    user_id: &str,
    request: &CheckoutRequest,
    now: NaiveDateTime,
) -> Result<OrderDetail, OrderError> {
    let tx = conn.unchecked_transaction()?;

    let cart_id = carts::get_or_create_cart(&tx, user_id)?;
    let lines = carts::cart_lines(&tx, cart_id)?;
    if lines.is_empty() {
        return Err(OrderError::EmptyCart);
    }

    let subtotal: Decimal = lines.iter().map(|l| l.total_price()).sum();
    let (coupon_code, discount_amount) = match request.coupon_code.as_deref().map(str::trim) {
        Some(code) if !code.is_empty() => {
            let (coupon, discount) = coupons::redeem(&tx, code, subtotal, now)?;
            (Some(coupon.code), discount)
        }
        _ => (None, Decimal::ZERO),
    };

    let order_number = db::new_token("LD", 8);
    let billing = request
        .billing_address
        .as_ref()
        .unwrap_or(&request.shipping_address);
    let order_id = orders::insert_order(
        &tx,
        &orders::NewOrder {
            user_id,
            order_number: &order_number,
            subtotal,
            discount_amount,
            total_amount: subtotal - discount_amount,
            coupon_code: coupon_code.as_deref(),
            shipping_address: &request.shipping_address,
            billing_address: billing,
            notes: &request.notes,
            payment_method: &request.payment_method,
        },
    )?;

    for line in &lines {
        orders::insert_order_item(&tx, order_id, line)?;
    }
    orders::insert_tracking(&tx, order_id, OrderStatus::Pending, "Order placed")?;
    carts::clear_cart(&tx, cart_id)?;
    tx.commit()?;

    tracing::info!(
        order_id = %order_id,
        order_number = %order_number,
        items = lines.len(),
        %subtotal,
        discount = %discount_amount,
        "order created from cart"
    );

    detail(conn, user_id, order_id)
}

pub fn list_for_user(conn: &Connection, user_id: &str) -> Result<Vec<Order>, OrderError> {
    Ok(orders::list_user_orders(conn, user_id)?)
}

pub fn detail(conn: &Connection, user_id: &str, order_id: i64) -> Result<OrderDetail, OrderError> {
    let order = orders::get_order(conn, order_id)?
        .filter(|o| o.user_id == user_id)
        .ok_or(OrderError::NotFound)?;
    build_detail(conn, order)
}

/// Public lookup by order number.
pub fn track(conn: &Connection, order_number: &str) -> Result<OrderDetail, OrderError> {
    let order = orders::get_order_by_number(conn, order_number.trim())?.ok_or(OrderError::NotFound)?;
    build_detail(conn, order)
}

pub fn cancel(conn: &Connection, user_id: &str, order_id: i64) -> Result<OrderDetail, OrderError> {
    let order = orders::get_order(conn, order_id)?
        .filter(|o| o.user_id == user_id)
        .ok_or(OrderError::NotFound)?;
    if !order.status.can_cancel() {
        return Err(OrderError::NotCancellable);
    }

    let tx = conn.unchecked_transaction()?;
    if !orders::transition_order(
        &tx,
        order.id,
        &[OrderStatus::Pending, OrderStatus::Confirmed],
        OrderStatus::Cancelled,
    )? {
        return Err(OrderError::NotCancellable);
    }
    orders::insert_tracking(&tx, order.id, OrderStatus::Cancelled, "Order cancelled by customer")?;
    tx.commit()?;

    tracing::info!(order_id = %order.id, "order cancelled");
    detail(conn, user_id, order.id)
}

fn build_detail(conn: &Connection, order: Order) -> Result<OrderDetail, OrderError> {
    Ok(OrderDetail {
        items: orders::list_order_items(conn, order.id)?,
        tracking: orders::list_tracking(conn, order.id)?,
        order,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{catalog, coupons as coupon_repo};
    use crate::services::cart;
    use rust_decimal_macros::dec;

    fn now() -> NaiveDateTime {
        db::parse_timestamp("2025-06-01 12:00:00").unwrap()
    }

    fn shipping() -> CheckoutRequest {
        CheckoutRequest {
            shipping_address: Address {
                full_name: "Wanjiru K".into(),
                city: "Nairobi".into(),
                ..Default::default()
            },
            payment_method: "mpesa".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_checkout_freezes_prices_and_empties_cart() {
        let conn = db::init_db(":memory:").unwrap();
        let oil = catalog::tests::seed_product(&conn, "oil", dec!(800), 10);
        let robe = catalog::tests::seed_product(&conn, "robe", dec!(3000), 10);
        let large = catalog::insert_variant(&conn, robe.id, "Size", "L", dec!(250), 5).unwrap();
        cart::add(&conn, "user-1", oil.id, None, 2).unwrap();
        cart::add(&conn, "user-1", robe.id, Some(large.id), 1).unwrap();

        let placed = checkout(&conn, "user-1", &shipping(), now()).unwrap();
        assert!(placed.order.order_number.starts_with("LD"));
        assert_eq!(placed.order.order_number.len(), 10);
        assert_eq!(placed.order.subtotal, dec!(4850));
        assert_eq!(placed.order.total_amount, dec!(4850));
        assert_eq!(placed.order.tax_amount, Decimal::ZERO);
        assert_eq!(placed.order.billing_address.city, "Nairobi");
        assert_eq!(placed.items.len(), 2);
        assert_eq!(placed.items[1].product_name, format!("{} (Size: L)", robe.name));
        assert_eq!(placed.tracking.len(), 1);
        assert!(cart::view(&conn, "user-1").unwrap().is_empty());

        catalog::update_product_price(&conn, oil.id, dec!(9999)).unwrap();
        let after = detail(&conn, "user-1", placed.order.id).unwrap();
        assert_eq!(after.items[0].unit_price, dec!(800));
        assert_eq!(after.items[0].total_price, dec!(1600));
    }

    #[test]
    fn test_checkout_applies_coupon_once() {
        let conn = db::init_db(":memory:").unwrap();
        let robe = catalog::tests::seed_product(&conn, "robe", dec!(4000), 10);
        coupon_repo::tests::seed_save10(&conn, Some(5));
        cart::add(&conn, "user-1", robe.id, None, 2).unwrap();

        let mut request = shipping();
        request.coupon_code = Some("save10".into());
        let placed = checkout(&conn, "user-1", &request, now()).unwrap();
        assert_eq!(placed.order.discount_amount, dec!(500));
        assert_eq!(placed.order.total_amount, dec!(7500));
        assert_eq!(placed.order.coupon_code.as_deref(), Some("SAVE10"));
        assert_eq!(coupon_repo::find_by_code(&conn, "SAVE10").unwrap().unwrap().used_count, 1);
    }

    #[test]
    fn test_unknown_coupon_aborts_checkout() {
        let conn = db::init_db(":memory:").unwrap();
        let robe = catalog::tests::seed_product(&conn, "robe", dec!(4000), 10);
        cart::add(&conn, "user-1", robe.id, None, 1).unwrap();

        let mut request = shipping();
        request.coupon_code = Some("NOPE".into());
        let err = checkout(&conn, "user-1", &request, now()).unwrap_err();
        assert!(matches!(err, OrderError::Coupon(CouponError::UnknownCode)));
        assert_eq!(cart::view(&conn, "user-1").unwrap().total_items, 1);
        assert!(list_for_user(&conn, "user-1").unwrap().is_empty());
    }

    #[test]
    fn test_empty_cart_rejected() {
        let conn = db::init_db(":memory:").unwrap();
        assert!(matches!(
            checkout(&conn, "user-1", &shipping(), now()),
            Err(OrderError::EmptyCart)
        ));
    }

    #[test]
    fn test_cancel_only_from_pending_or_confirmed() {
        let conn = db::init_db(":memory:").unwrap();
        let oil = catalog::tests::seed_product(&conn, "oil", dec!(800), 10);
        cart::add(&conn, "user-1", oil.id, None, 1).unwrap();
        let placed = checkout(&conn, "user-1", &shipping(), now()).unwrap();

        assert!(matches!(
            cancel(&conn, "user-2", placed.order.id),
            Err(OrderError::NotFound)
        ));

        let cancelled = cancel(&conn, "user-1", placed.order.id).unwrap();
        assert_eq!(cancelled.order.status, OrderStatus::Cancelled);
        assert_eq!(cancelled.tracking.len(), 2);

        assert!(matches!(
            cancel(&conn, "user-1", placed.order.id),
            Err(OrderError::NotCancellable)
        ));

        let tracked = track(&conn, &placed.order.order_number).unwrap();
        assert_eq!(tracked.order.id, placed.order.id);
        assert!(matches!(track(&conn, "LDMISSING"), Err(OrderError::NotFound)));
    }
}
