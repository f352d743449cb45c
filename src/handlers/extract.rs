use axum::body::Bytes;
use axum::extract::{FromRequest, FromRequestParts, Request};
use axum::http::header::CONTENT_TYPE;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use chrono::{NaiveDate, NaiveTime};
use serde::de::DeserializeOwned;

use crate::errors::AppError;
use crate::models::{parse_date, parse_time};

/// Caller identity, supplied by the upstream auth layer in `X-User-Id`.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub String);

#[async_trait::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| CurrentUser(v.to_string()))
            .ok_or(AppError::Unauthorized)
    }
}

/// JSON request body whose decode failures are reported as field-level 400s.
pub struct JsonBody<T>(pub T);

#[async_trait::async_trait]
impl<T, S> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_json = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.starts_with("application/json") || ct.contains("+json"))
            .unwrap_or(false);
        if !is_json {
            return Err(AppError::invalid("body", "Expected a JSON request body"));
        }

        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|_| AppError::invalid("body", "Could not read the request body"))?;
        decode_json(&bytes).map(JsonBody)
    }
}

/// Deserializes `bytes`, naming the offending field in the error.
pub fn decode_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, AppError> {
    let de = &mut serde_json::Deserializer::from_slice(bytes);
    serde_path_to_error::deserialize(de).map_err(|err| {
        let path = err.path().to_string();
        let inner = err.into_inner();
        let text = inner.to_string();
        let message = text.split(" at line ").next().unwrap_or(&text);

        // A missing field is reported against its parent, so take the name from the message.
        if let Some(name) = missing_field(message) {
            let field = if path == "." { name.to_string() } else { format!("{path}.{name}") };
            return AppError::invalid(&field, "This field is required");
        }
        if inner.is_syntax() || inner.is_eof() || path == "." {
            return AppError::invalid("body", format!("Malformed JSON: {message}"));
        }
        AppError::invalid(&path, format!("Invalid value: {message}"))
    })
}

fn missing_field(message: &str) -> Option<&str> {
    message
        .strip_prefix("missing field `")
        .and_then(|rest| rest.strip_suffix('`'))
}

pub fn check_auth(headers: &HeaderMap, expected_token: &str) -> Result<(), AppError> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or("");
    if expected_token.is_empty() || token != expected_token {
        return Err(AppError::Unauthorized);
    }
    Ok(())
}

pub fn date_field(field: &str, raw: &str) -> Result<NaiveDate, AppError> {
    parse_date(raw.trim()).map_err(|_| AppError::invalid(field, "Date must be YYYY-MM-DD"))
}

pub fn time_field(field: &str, raw: &str) -> Result<NaiveTime, AppError> {
    parse_time(raw.trim()).map_err(|_| AppError::invalid(field, "Time must be HH:MM"))
}

pub fn required<'a>(field: &str, raw: Option<&'a str>) -> Result<&'a str, AppError> {
    raw.map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::invalid(field, "This field is required"))
}
