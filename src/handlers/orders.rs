use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use rust_decimal::Decimal;
use serde::Deserialize;

use super::extract::{CurrentUser, JsonBody};
use crate::errors::AppError;
use crate::models::{Address, Order};
use crate::services::coupons::{self, CouponQuote};
use crate::services::orders::{self, CheckoutRequest, OrderDetail};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct FromCartRequest {
    #[serde(default)]
    pub shipping: Address,
    pub billing: Option<Address>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub payment_method: String,
    pub coupon_code: Option<String>,
}

#[derive(Deserialize)]
pub struct ApplyCouponRequest {
    pub coupon_code: String,
    pub order_amount: Decimal,
}

// GET /api/orders/
pub async fn list_orders(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<Order>>, AppError> {
    let conn = state.conn()?;
    Ok(Json(orders::list_for_user(&conn, &user)?))
}

// POST /api/orders/from-cart/
pub async fn create_from_cart(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    JsonBody(req): JsonBody<FromCartRequest>,
) -> Result<(StatusCode, Json<OrderDetail>), AppError> {
    let request = CheckoutRequest {
        shipping_address: req.shipping,
        billing_address: req.billing,
        notes: req.notes,
        payment_method: req.payment_method,
        coupon_code: req.coupon_code,
    };
    let now = state.config.local_now();
    let conn = state.conn()?;
    let order = orders::checkout(&conn, &user, &request, now)?;
    Ok((StatusCode::CREATED, Json(order)))
}

// POST /api/orders/apply-coupon/
pub async fn apply_coupon(
    State(state): State<Arc<AppState>>,
    JsonBody(req): JsonBody<ApplyCouponRequest>,
) -> Result<Json<CouponQuote>, AppError> {
    let now = state.config.local_now();
    let conn = state.conn()?;
    Ok(Json(coupons::quote(&conn, &req.coupon_code, req.order_amount, now)?))
}

// GET /api/orders/track/:order_number/
pub async fn track_order(
    State(state): State<Arc<AppState>>,
    Path(order_number): Path<String>,
) -> Result<Json<OrderDetail>, AppError> {
    let conn = state.conn()?;
    Ok(Json(orders::track(&conn, &order_number)?))
}

// GET /api/orders/:id/
pub async fn get_order(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<OrderDetail>, AppError> {
    let conn = state.conn()?;
    Ok(Json(orders::detail(&conn, &user, id)?))
}

// POST /api/orders/:id/cancel/
pub async fn cancel_order(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<OrderDetail>, AppError> {
    let conn = state.conn()?;
    Ok(Json(orders::cancel(&conn, &user, id)?))
}
