use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::bookings::booking_service;
use super::extract::{check_auth, date_field, time_field, JsonBody};
use crate::db::bookings::BookingStats;
use crate::db::orders::OrderStats;
use crate::db::payments::PaymentStats;
use crate::db::{self, catalog, coupons, therapists};
use crate::errors::AppError;
use crate::models::availability::weekday_from_index;
use crate::models::{
    BookingStatus, Category, Coupon, DiscountType, Product, ProductVariant, Service, ServiceAddon,
    Therapist, TherapistAvailability, TimeSlot,
};
use crate::services::booking::BookingDetail;
use crate::services::messaging::{booking_event_message, notify_owner, BookingEvent};
use crate::state::AppState;

/// Unique and foreign-key rejections are the caller's fault.
fn write_error(err: anyhow::Error, what: &str) -> AppError {
    if err
        .downcast_ref::<rusqlite::Error>()
        .is_some_and(db::is_constraint_violation)
    {
        AppError::Conflict(format!("{what} conflicts with an existing record"))
    } else {
        AppError::Internal(err)
    }
}

fn name_field(field: &str, raw: &str) -> Result<String, AppError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::invalid(field, "This field is required"));
    }
    Ok(trimmed.to_string())
}

fn non_negative(field: &str, amount: Decimal) -> Result<Decimal, AppError> {
    if amount < Decimal::ZERO {
        return Err(AppError::invalid(field, "Must not be negative"));
    }
    Ok(amount)
}

fn positive_minutes(field: &str, minutes: i64) -> Result<i64, AppError> {
    if minutes <= 0 {
        return Err(AppError::invalid(field, "Must be greater than zero"));
    }
    Ok(minutes)
}

pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

fn slug_or_name(slug: Option<&str>, name: &str) -> Result<String, AppError> {
    let slug = match slug.map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => s.to_string(),
        None => slugify(name),
    };
    if slug.is_empty() {
        return Err(AppError::invalid("slug", "Could not derive a slug from the name"));
    }
    Ok(slug)
}

/// Accepts `YYYY-MM-DD HH:MM:SS` or a bare date. A bare date means the
/// start of that day, or its last second when `end_of_day` is set.
fn datetime_field(field: &str, raw: &str, end_of_day: bool) -> Result<NaiveDateTime, AppError> {
    let raw = raw.trim();
    if let Ok(ts) = NaiveDateTime::parse_from_str(raw, db::TIMESTAMP_FORMAT) {
        return Ok(ts);
    }
    let date = NaiveDate::parse_from_str(raw, db::DATE_FORMAT)
        .map_err(|_| AppError::invalid(field, "Use YYYY-MM-DD or YYYY-MM-DD HH:MM:SS"))?;
    let time = if end_of_day {
        NaiveTime::from_hms_opt(23, 59, 59)
    } else {
        NaiveTime::from_hms_opt(0, 0, 0)
    };
    Ok(date.and_time(time.unwrap_or_default()))
}

fn booking_status_field(raw: &str) -> Result<BookingStatus, AppError> {
    use BookingStatus::*;
    [Pending, Confirmed, InProgress, Completed, Cancelled, NoShow]
        .into_iter()
        .find(|s| s.as_str() == raw.trim())
        .ok_or_else(|| AppError::invalid("status", format!("Unknown booking status: {raw}")))
}

// ── Catalog ──

#[derive(Deserialize)]
pub struct CreateCategoryRequest {
    pub name: String,
    pub slug: Option<String>,
    #[serde(default)]
    pub description: String,
}

// POST /api/admin/categories/
pub async fn create_category(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    JsonBody(req): JsonBody<CreateCategoryRequest>,
) -> Result<(StatusCode, Json<Category>), AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let name = name_field("name", &req.name)?;
    let slug = slug_or_name(req.slug.as_deref(), &name)?;

    let conn = state.conn()?;
    let category = catalog::insert_category(&conn, &name, &slug, &req.description)
        .map_err(|e| write_error(e, "Category"))?;
    tracing::info!(category_id = %category.id, slug = %category.slug, "category created");
    Ok((StatusCode::CREATED, Json(category)))
}

#[derive(Deserialize)]
pub struct CreateProductRequest {
    pub name: String,
    pub slug: Option<String>,
    #[serde(default)]
    pub description: String,
    pub category_id: Option<i64>,
    pub price: Decimal,
    #[serde(default)]
    pub stock_quantity: i64,
    #[serde(default)]
    pub sku: String,
    #[serde(default)]
    pub is_featured: bool,
}

// POST /api/admin/products/
pub async fn create_product(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    JsonBody(req): JsonBody<CreateProductRequest>,
) -> Result<(StatusCode, Json<Product>), AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let name = name_field("name", &req.name)?;
    let slug = slug_or_name(req.slug.as_deref(), &name)?;
    let price = non_negative("price", req.price)?;
    if req.stock_quantity < 0 {
        return Err(AppError::invalid("stock_quantity", "Must not be negative"));
    }

    let conn = state.conn()?;
    let product = catalog::insert_product(
        &conn,
        &catalog::NewProduct {
            name: &name,
            slug: &slug,
            description: &req.description,
            category_id: req.category_id,
            price,
            stock_quantity: req.stock_quantity,
            sku: req.sku.trim(),
            is_featured: req.is_featured,
        },
    )
    .map_err(|e| write_error(e, "Product"))?;
    tracing::info!(product_id = %product.id, slug = %product.slug, "product created");
    Ok((StatusCode::CREATED, Json(product)))
}

#[derive(Deserialize)]
pub struct CreateVariantRequest {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub price_adjustment: Decimal,
    #[serde(default)]
    pub stock_quantity: i64,
}

// POST /api/admin/products/:id/variants/
pub async fn create_variant(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(product_id): Path<i64>,
    JsonBody(req): JsonBody<CreateVariantRequest>,
) -> Result<(StatusCode, Json<ProductVariant>), AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let name = name_field("name", &req.name)?;
    let value = name_field("value", &req.value)?;
    if req.stock_quantity < 0 {
        return Err(AppError::invalid("stock_quantity", "Must not be negative"));
    }

    let conn = state.conn()?;
    catalog::get_product(&conn, product_id)?
        .ok_or_else(|| AppError::NotFound("Product not found".to_string()))?;
    let variant = catalog::insert_variant(
        &conn,
        product_id,
        &name,
        &value,
        req.price_adjustment,
        req.stock_quantity,
    )
    .map_err(|e| write_error(e, "Variant"))?;
    Ok((StatusCode::CREATED, Json(variant)))
}

// ── Services and therapists ──

#[derive(Deserialize)]
pub struct CreateServiceRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price: Decimal,
    pub duration_minutes: i64,
}

// POST /api/admin/services/
pub async fn create_service(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    JsonBody(req): JsonBody<CreateServiceRequest>,
) -> Result<(StatusCode, Json<Service>), AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let name = name_field("name", &req.name)?;
    let price = non_negative("price", req.price)?;
    let duration = positive_minutes("duration_minutes", req.duration_minutes)?;

    let conn = state.conn()?;
    let service = therapists::insert_service(&conn, &name, &req.description, price, duration)
        .map_err(|e| write_error(e, "Service"))?;
    tracing::info!(service_id = %service.id, "service created");
    Ok((StatusCode::CREATED, Json(service)))
}

// POST /api/admin/addons/
pub async fn create_addon(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    JsonBody(req): JsonBody<CreateServiceRequest>,
) -> Result<(StatusCode, Json<ServiceAddon>), AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let name = name_field("name", &req.name)?;
    let price = non_negative("price", req.price)?;
    if req.duration_minutes < 0 {
        return Err(AppError::invalid("duration_minutes", "Must not be negative"));
    }

    let conn = state.conn()?;
    let addon = therapists::insert_addon(&conn, &name, &req.description, price, req.duration_minutes)
        .map_err(|e| write_error(e, "Add-on"))?;
    Ok((StatusCode::CREATED, Json(addon)))
}

#[derive(Deserialize)]
pub struct CreateTherapistRequest {
    pub name: String,
    #[serde(default)]
    pub bio: String,
}

// POST /api/admin/therapists/
pub async fn create_therapist(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    JsonBody(req): JsonBody<CreateTherapistRequest>,
) -> Result<(StatusCode, Json<Therapist>), AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let name = name_field("name", &req.name)?;

    let conn = state.conn()?;
    let therapist = therapists::insert_therapist(&conn, &name, &req.bio)
        .map_err(|e| write_error(e, "Therapist"))?;
    tracing::info!(therapist_id = %therapist.id, "therapist created");
    Ok((StatusCode::CREATED, Json(therapist)))
}

#[derive(Deserialize)]
pub struct CreateAvailabilityRequest {
    /// 0 = Monday .. 6 = Sunday
    pub day_of_week: i64,
    pub start_time: String,
    pub end_time: String,
}

// POST /api/admin/therapists/:id/availability/
pub async fn create_availability(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(therapist_id): Path<i64>,
    JsonBody(req): JsonBody<CreateAvailabilityRequest>,
) -> Result<(StatusCode, Json<TherapistAvailability>), AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let day = weekday_from_index(req.day_of_week)
        .map_err(|_| AppError::invalid("day_of_week", "Must be 0 (Monday) to 6 (Sunday)"))?;
    let start = time_field("start_time", &req.start_time)?;
    let end = time_field("end_time", &req.end_time)?;
    if start >= end {
        return Err(AppError::invalid("end_time", "End time must be after start time"));
    }

    let conn = state.conn()?;
    therapists::get_therapist(&conn, therapist_id)?
        .ok_or_else(|| AppError::NotFound("Therapist not found".to_string()))?;
    let window = therapists::insert_availability(&conn, therapist_id, day, start, end)
        .map_err(|e| write_error(e, "Availability window"))?;
    Ok((StatusCode::CREATED, Json(window)))
}

#[derive(Deserialize)]
pub struct CreateTimeSlotRequest {
    pub therapist_id: i64,
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    #[serde(default = "blocked_by_default")]
    pub is_blocked: bool,
}

fn blocked_by_default() -> bool {
    true
}

// POST /api/admin/time-slots/
pub async fn create_time_slot(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    JsonBody(req): JsonBody<CreateTimeSlotRequest>,
) -> Result<(StatusCode, Json<TimeSlot>), AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let date = date_field("date", &req.date)?;
    let start = time_field("start_time", &req.start_time)?;
    let end = time_field("end_time", &req.end_time)?;
    if start >= end {
        return Err(AppError::invalid("end_time", "End time must be after start time"));
    }

    let conn = state.conn()?;
    therapists::get_therapist(&conn, req.therapist_id)?
        .ok_or_else(|| AppError::NotFound("Therapist not found".to_string()))?;
    let slot = db::bookings::insert_time_slot(&conn, req.therapist_id, date, start, end, req.is_blocked)
        .map_err(|e| write_error(e, "Time slot"))?;
    tracing::info!(
        therapist_id = %req.therapist_id,
        date = %date,
        blocked = slot.is_blocked,
        "time slot saved"
    );
    Ok((StatusCode::CREATED, Json(slot)))
}

// ── Coupons ──

#[derive(Deserialize)]
pub struct CreateCouponRequest {
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    #[serde(default)]
    pub minimum_order_amount: Decimal,
    pub maximum_discount_amount: Option<Decimal>,
    pub usage_limit: Option<i64>,
    pub valid_from: String,
    pub valid_until: String,
}

// POST /api/admin/coupons/
pub async fn create_coupon(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    JsonBody(req): JsonBody<CreateCouponRequest>,
) -> Result<(StatusCode, Json<Coupon>), AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let code = name_field("code", &req.code)?.to_uppercase();
    if req.discount_value <= Decimal::ZERO {
        return Err(AppError::invalid("discount_value", "Must be greater than zero"));
    }
    if req.discount_type == DiscountType::Percentage && req.discount_value > Decimal::ONE_HUNDRED {
        return Err(AppError::invalid("discount_value", "A percentage cannot exceed 100"));
    }
    let minimum = non_negative("minimum_order_amount", req.minimum_order_amount)?;
    if let Some(cap) = req.maximum_discount_amount {
        non_negative("maximum_discount_amount", cap)?;
    }
    if req.usage_limit.is_some_and(|limit| limit < 1) {
        return Err(AppError::invalid("usage_limit", "Must be at least 1"));
    }
    let valid_from = datetime_field("valid_from", &req.valid_from, false)?;
    let valid_until = datetime_field("valid_until", &req.valid_until, true)?;
    if valid_until < valid_from {
        return Err(AppError::invalid("valid_until", "Must not be before valid_from"));
    }

    let conn = state.conn()?;
    let coupon = coupons::insert_coupon(
        &conn,
        &coupons::NewCoupon {
            code: &code,
            discount_type: req.discount_type,
            discount_value: req.discount_value,
            minimum_order_amount: minimum,
            maximum_discount_amount: req.maximum_discount_amount,
            usage_limit: req.usage_limit,
            valid_from,
            valid_until,
        },
    )
    .map_err(|e| write_error(e, "Coupon"))?;
    tracing::info!(code = %coupon.code, "coupon created");
    Ok((StatusCode::CREATED, Json(coupon)))
}

// ── Bookings ──

#[derive(Deserialize)]
pub struct BookingStatusRequest {
    pub status: String,
}

// POST /api/admin/bookings/:id/status/
pub async fn set_booking_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    JsonBody(req): JsonBody<BookingStatusRequest>,
) -> Result<Json<BookingDetail>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let next = booking_status_field(&req.status)?;
    let now = state.config.local_now();

    let detail = {
        let conn = state.conn()?;
        booking_service(&state).set_status(&conn, id, next, now)?
    };

    if next == BookingStatus::Completed {
        let message = booking_event_message(
            BookingEvent::Completed,
            &detail.booking,
            &detail.service_name,
            &detail.therapist_name,
            &state.config.currency,
        );
        notify_owner(state.messaging.as_ref(), &state.config.owner_phone, &message).await;
    }

    Ok(Json(detail))
}

// ── Dashboard ──

#[derive(Serialize)]
pub struct StatsResponse {
    bookings: BookingStats,
    orders: OrderStats,
    payments: PaymentStats,
}

// GET /api/admin/stats/
pub async fn get_stats(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<StatsResponse>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let conn = state.conn()?;
    Ok(Json(StatsResponse {
        bookings: db::bookings::booking_stats(&conn, None)?,
        orders: db::orders::order_stats(&conn)?,
        payments: db::payments::payment_stats(&conn, None)?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Lavender Body Oil"), "lavender-body-oil");
        assert_eq!(slugify("  Hot & Cold  Stones! "), "hot-cold-stones");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn test_datetime_field_accepts_dates_and_timestamps() {
        let start = datetime_field("valid_from", "2026-01-01", false).unwrap();
        assert_eq!(db::fmt_timestamp(start), "2026-01-01 00:00:00");
        let end = datetime_field("valid_until", "2026-01-31", true).unwrap();
        assert_eq!(db::fmt_timestamp(end), "2026-01-31 23:59:59");
        let exact = datetime_field("valid_from", "2026-01-01 08:30:00", false).unwrap();
        assert_eq!(db::fmt_timestamp(exact), "2026-01-01 08:30:00");
        assert!(datetime_field("valid_from", "01/01/2026", false).is_err());
    }

    #[test]
    fn test_booking_status_field_is_strict() {
        assert_eq!(booking_status_field("in_progress").unwrap(), BookingStatus::InProgress);
        assert_eq!(booking_status_field("no_show").unwrap(), BookingStatus::NoShow);
        assert!(booking_status_field("done").is_err());
    }

    #[test]
    fn test_write_error_maps_constraints_to_conflict() {
        let conn = db::init_db(":memory:").unwrap();
        catalog::insert_category(&conn, "Oils", "oils", "").unwrap();
        let err = catalog::insert_category(&conn, "Oils", "oils", "").unwrap_err();
        assert!(matches!(write_error(err, "Category"), AppError::Conflict(_)));
    }
}
