use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

use super::extract::{CurrentUser, JsonBody};
use crate::errors::AppError;
use crate::models::CartSummary;
use crate::services::cart;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct AddToCartRequest {
    pub product_id: i64,
    pub variant_id: Option<i64>,
    #[serde(default = "one")]
    pub quantity: i64,
}

fn one() -> i64 {
    1
}

#[derive(Deserialize)]
pub struct UpdateCartRequest {
    pub quantity: i64,
}

// GET /api/cart/
pub async fn get_cart(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<CartSummary>, AppError> {
    let conn = state.conn()?;
    Ok(Json(cart::view(&conn, &user)?))
}

// POST /api/cart/add/
pub async fn add_to_cart(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    JsonBody(req): JsonBody<AddToCartRequest>,
) -> Result<Json<CartSummary>, AppError> {
    let conn = state.conn()?;
    Ok(Json(cart::add(&conn, &user, req.product_id, req.variant_id, req.quantity)?))
}

// POST /api/cart/update/:item_id/
pub async fn update_cart_item(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(item_id): Path<i64>,
    JsonBody(req): JsonBody<UpdateCartRequest>,
) -> Result<Json<CartSummary>, AppError> {
    let conn = state.conn()?;
    Ok(Json(cart::update(&conn, &user, item_id, req.quantity)?))
}

// POST /api/cart/remove/:item_id/
pub async fn remove_cart_item(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(item_id): Path<i64>,
) -> Result<Json<CartSummary>, AppError> {
    let conn = state.conn()?;
    Ok(Json(cart::remove(&conn, &user, item_id)?))
}

// POST /api/cart/clear/
pub async fn clear_cart(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<CartSummary>, AppError> {
    let conn = state.conn()?;
    Ok(Json(cart::clear(&conn, &user)?))
}
