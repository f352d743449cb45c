use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha1::Sha1;

use crate::services::payments::{self, CallbackOutcome};
use crate::state::AppState;

pub const SIGNATURE_HEADER: &str = "x-callback-signature";

/// base64(HMAC-SHA1(secret, body)).
pub fn sign_payload(secret: &str, body: &[u8]) -> Option<String> {
    let mut mac = Hmac::<Sha1>::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

fn verify_signature(secret: &str, signature: &str, body: &[u8]) -> bool {
    let mut mac = match Hmac::<Sha1>::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(body);
    match base64::engine::general_purpose::STANDARD.decode(signature.trim()) {
        Ok(expected) => mac.verify_slice(&expected).is_ok(),
        Err(_) => false,
    }
}

fn accepted() -> Response {
    Json(json!({ "ResultCode": 0, "ResultDesc": "Accepted" })).into_response()
}

// POST /api/payments/webhooks/mpesa/
//
// Daraja retries anything that is not a 200, so once the signature passes
// every outcome (including unparseable bodies) is acknowledged.
pub async fn mpesa_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let secret = &state.config.mpesa.webhook_secret;
    if !secret.is_empty() {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        if signature.is_empty() {
            tracing::warn!("missing X-Callback-Signature header");
            return (StatusCode::FORBIDDEN, "Missing signature").into_response();
        }
        if !verify_signature(secret, signature, &body) {
            tracing::warn!("invalid M-Pesa callback signature");
            return (StatusCode::FORBIDDEN, "Invalid signature").into_response();
        }
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "M-Pesa callback is not valid JSON");
            return accepted();
        }
    };

    let outcome = {
        let conn = match state.db.lock() {
            Ok(c) => c,
            Err(_) => {
                tracing::error!("database mutex poisoned");
                return accepted();
            }
        };
        payments::handle_mpesa_callback(&conn, &payload)
    };

    match outcome {
        Ok(CallbackOutcome::Completed(payment_id)) => {
            tracing::info!(payment_id = %payment_id, "M-Pesa payment completed");
        }
        Ok(CallbackOutcome::Failed(payment_id)) => {
            tracing::info!(payment_id = %payment_id, "M-Pesa payment failed");
        }
        Ok(CallbackOutcome::Duplicate | CallbackOutcome::Unmatched) => {}
        Err(e) => {
            tracing::error!(error = %e, "failed to process M-Pesa callback");
        }
    }

    accepted()
}
