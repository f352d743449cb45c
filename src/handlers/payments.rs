use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::extract::{CurrentUser, JsonBody};
use crate::db::payments::{self as payment_repo, PaymentStats};
use crate::errors::AppError;
use crate::models::{Payment, PaymentRefund};
use crate::services::payments::{
    self, CardCharged, CardInitiation, MpesaInitiated, MpesaInitiation, PaymentDetail,
};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct InitiateMpesaRequest {
    pub phone_number: String,
    pub amount: Decimal,
    pub order_id: Option<i64>,
    pub service_order_id: Option<i64>,
    pub description: Option<String>,
}

#[derive(Deserialize)]
pub struct InitiateCardRequest {
    pub card_number: String,
    pub expiry_month: String,
    pub expiry_year: String,
    pub cvv: String,
    pub cardholder_name: String,
    pub amount: Decimal,
    pub order_id: Option<i64>,
    pub service_order_id: Option<i64>,
}

#[derive(Deserialize)]
pub struct RefundRequest {
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub reason: String,
}

#[derive(Serialize)]
pub struct RefundResponse {
    #[serde(flatten)]
    refund: PaymentRefund,
    message: &'static str,
}

// GET /api/payments/
pub async fn list_payments(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<Payment>>, AppError> {
    let conn = state.conn()?;
    Ok(Json(payments::list_for_user(&conn, &user)?))
}

// GET /api/payments/stats/
pub async fn payment_stats(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<PaymentStats>, AppError> {
    let conn = state.conn()?;
    Ok(Json(payment_repo::payment_stats(&conn, Some(&user))?))
}

// POST /api/payments/initiate/mpesa/
pub async fn initiate_mpesa(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    JsonBody(req): JsonBody<InitiateMpesaRequest>,
) -> Result<(StatusCode, Json<MpesaInitiated>), AppError> {
    let request = MpesaInitiation {
        phone_number: req.phone_number,
        amount: req.amount,
        order_id: req.order_id,
        service_order_id: req.service_order_id,
        description: req.description.filter(|d| !d.trim().is_empty()),
    };
    let initiated = payments::initiate_mpesa(&state, &user, &request).await?;
    Ok((StatusCode::CREATED, Json(initiated)))
}

// POST /api/payments/initiate/card/
pub async fn initiate_card(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    JsonBody(req): JsonBody<InitiateCardRequest>,
) -> Result<Json<CardCharged>, AppError> {
    let number: String = req.card_number.chars().filter(|c| !c.is_whitespace()).collect();
    if !number.chars().all(|c| c.is_ascii_digit()) || !(12..=19).contains(&number.len()) {
        return Err(AppError::invalid("card_number", "Card number must have 12 to 19 digits"));
    }
    let request = CardInitiation {
        card_number: number,
        expiry_month: req.expiry_month,
        expiry_year: req.expiry_year,
        cvv: req.cvv,
        cardholder_name: req.cardholder_name,
        amount: req.amount,
        order_id: req.order_id,
        service_order_id: req.service_order_id,
    };
    Ok(Json(payments::initiate_card(&state, &user, &request).await?))
}

// GET /api/payments/:payment_id/
pub async fn get_payment(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(payment_id): Path<String>,
) -> Result<Json<PaymentDetail>, AppError> {
    let conn = state.conn()?;
    Ok(Json(payments::detail(&conn, &user, &payment_id)?))
}

// POST /api/payments/:payment_id/refund/
pub async fn request_refund(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(payment_id): Path<String>,
    JsonBody(req): JsonBody<RefundRequest>,
) -> Result<(StatusCode, Json<RefundResponse>), AppError> {
    let conn = state.conn()?;
    let refund = payments::request_refund(&conn, &user, &payment_id, req.amount, &req.reason)?;
    Ok((
        StatusCode::CREATED,
        Json(RefundResponse {
            refund,
            message: "Refund request submitted successfully",
        }),
    ))
}
