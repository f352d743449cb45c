use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use super::extract::{date_field, time_field, CurrentUser, JsonBody};
use crate::db::bookings::{self, BookingStats};
use crate::errors::AppError;
use crate::models::{Booking, BookingCancellation, BookingReschedule, CancellationReason};
use crate::services::booking::{BookingDetail, BookingRequest, BookingService, RescheduleRequest};
use crate::services::messaging::{booking_event_message, notify_owner, BookingEvent};
use crate::state::AppState;

pub(crate) fn booking_service(state: &AppState) -> BookingService {
    BookingService::new(state.config.slot_policy, state.config.booking_policy)
}

#[derive(Deserialize)]
pub struct CreateBookingRequest {
    pub service_id: i64,
    pub therapist_id: i64,
    pub booking_date: String,
    pub booking_time: String,
    pub end_time: Option<String>,
    #[serde(default)]
    pub addon_ids: Vec<i64>,
    #[serde(default)]
    pub notes: String,
}

#[derive(Deserialize)]
pub struct CancelBookingRequest {
    #[serde(default)]
    pub reason: CancellationReason,
    #[serde(default)]
    pub description: String,
}

#[derive(Deserialize)]
pub struct RescheduleBookingRequest {
    pub new_date: String,
    pub new_time: String,
    pub new_therapist_id: Option<i64>,
    #[serde(default)]
    pub reason: String,
}

#[derive(Deserialize)]
pub struct ScheduleQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

#[derive(Serialize)]
pub struct ScheduleResponse {
    therapist_id: i64,
    start_date: NaiveDate,
    end_date: NaiveDate,
    bookings: Vec<Booking>,
}

#[derive(Serialize)]
pub struct CancelResponse {
    message: &'static str,
    cancellation: BookingCancellation,
}

#[derive(Serialize)]
pub struct RescheduleResponse {
    message: &'static str,
    reschedule: BookingReschedule,
}

// GET /api/bookings/
pub async fn list_bookings(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<BookingDetail>>, AppError> {
    let now = state.config.local_now();
    let conn = state.conn()?;
    Ok(Json(booking_service(&state).list_for_user(&conn, &user, now)?))
}

// POST /api/bookings/
pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    JsonBody(req): JsonBody<CreateBookingRequest>,
) -> Result<(StatusCode, Json<BookingDetail>), AppError> {
    let request = BookingRequest {
        service_id: req.service_id,
        therapist_id: req.therapist_id,
        booking_date: date_field("booking_date", &req.booking_date)?,
        booking_time: time_field("booking_time", &req.booking_time)?,
        end_time: req
            .end_time
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .map(|t| time_field("end_time", t))
            .transpose()?,
        addon_ids: req.addon_ids,
        notes: req.notes,
    };

    let now = state.config.local_now();
    let detail = {
        let conn = state.conn()?;
        booking_service(&state).create(&conn, &user, &request, now)?
    };

    let message = booking_event_message(
        BookingEvent::Created,
        &detail.booking,
        &detail.service_name,
        &detail.therapist_name,
        &state.config.currency,
    );
    notify_owner(state.messaging.as_ref(), &state.config.owner_phone, &message).await;

    Ok((StatusCode::CREATED, Json(detail)))
}

// GET /api/bookings/stats/
pub async fn booking_stats(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<BookingStats>, AppError> {
    let conn = state.conn()?;
    Ok(Json(bookings::booking_stats(&conn, Some(&user))?))
}

// GET /api/bookings/:id/
pub async fn get_booking(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<BookingDetail>, AppError> {
    let now = state.config.local_now();
    let conn = state.conn()?;
    Ok(Json(booking_service(&state).detail(&conn, id, Some(&user), now)?))
}

// POST /api/bookings/:id/cancel/
pub async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
    JsonBody(req): JsonBody<CancelBookingRequest>,
) -> Result<Json<CancelResponse>, AppError> {
    let now = state.config.local_now();
    let conn = state.conn()?;
    let cancellation =
        booking_service(&state).cancel(&conn, &user, id, req.reason, &req.description, now)?;
    Ok(Json(CancelResponse {
        message: "Booking cancelled successfully",
        cancellation,
    }))
}

// POST /api/bookings/:id/reschedule/
pub async fn reschedule_booking(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
    JsonBody(req): JsonBody<RescheduleBookingRequest>,
) -> Result<(StatusCode, Json<RescheduleResponse>), AppError> {
    let request = RescheduleRequest {
        new_date: date_field("new_date", &req.new_date)?,
        new_time: time_field("new_time", &req.new_time)?,
        new_therapist_id: req.new_therapist_id,
        reason: req.reason,
    };
    let conn = state.conn()?;
    let reschedule = booking_service(&state).request_reschedule(&conn, &user, id, &request)?;
    Ok((
        StatusCode::CREATED,
        Json(RescheduleResponse {
            message: "Reschedule request submitted",
            reschedule,
        }),
    ))
}

// GET /api/bookings/therapist/:id/schedule/?start_date=&end_date=
pub async fn therapist_schedule(
    State(state): State<Arc<AppState>>,
    Path(therapist_id): Path<i64>,
    Query(query): Query<ScheduleQuery>,
) -> Result<Json<ScheduleResponse>, AppError> {
    let start_date = match query.start_date.as_deref() {
        Some(raw) => date_field("start_date", raw)?,
        None => state.config.local_now().date(),
    };
    let end_date = match query.end_date.as_deref() {
        Some(raw) => date_field("end_date", raw)?,
        None => start_date + Duration::days(7),
    };
    if end_date < start_date {
        return Err(AppError::invalid("end_date", "end_date must not be before start_date"));
    }

    let conn = state.conn()?;
    let bookings =
        booking_service(&state).therapist_schedule(&conn, therapist_id, start_date, end_date)?;
    Ok(Json(ScheduleResponse {
        therapist_id,
        start_date,
        end_date,
        bookings,
    }))
}
