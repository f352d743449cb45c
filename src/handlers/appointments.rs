use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::extract::{date_field, required};
use crate::errors::AppError;
use crate::models::Slot;
use crate::services::availability::AvailabilityCalculator;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct SlotsQuery {
    pub date: Option<String>,
    pub therapist_id: Option<String>,
    pub service_id: Option<String>,
}

#[derive(Serialize)]
pub struct SlotsResponse {
    date: NaiveDate,
    therapist_id: i64,
    service_id: i64,
    slots: Vec<Slot>,
}

fn id_field(field: &str, raw: Option<&str>) -> Result<i64, AppError> {
    required(field, raw)?
        .parse()
        .map_err(|_| AppError::invalid(field, "Must be a numeric id"))
}

// GET /api/appointments/available-slots/?date=&therapist_id=&service_id=
pub async fn available_slots(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SlotsQuery>,
) -> Result<Json<SlotsResponse>, AppError> {
    let date = date_field("date", required("date", query.date.as_deref())?)?;
    let therapist_id = id_field("therapist_id", query.therapist_id.as_deref())?;
    let service_id = id_field("service_id", query.service_id.as_deref())?;

    let calculator = AvailabilityCalculator::new(state.config.slot_policy);
    let slots = {
        let conn = state.conn()?;
        calculator.available_slots(&conn, therapist_id, service_id, date)?
    };

    Ok(Json(SlotsResponse {
        date,
        therapist_id,
        service_id,
        slots,
    }))
}
