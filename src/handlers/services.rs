use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

use crate::db::therapists;
use crate::errors::AppError;
use crate::models::{Service, ServiceAddon, Therapist, TherapistAvailability, WeeklySchedule};
use crate::state::AppState;

#[derive(Serialize)]
pub struct ServiceDetail {
    #[serde(flatten)]
    service: Service,
    addons: Vec<ServiceAddon>,
}

#[derive(Serialize)]
pub struct TherapistAvailabilityResponse {
    therapist: Therapist,
    windows: Vec<TherapistAvailability>,
    summary: String,
}

// GET /api/services/
pub async fn list_services(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Service>>, AppError> {
    let conn = state.conn()?;
    Ok(Json(therapists::list_services(&conn)?))
}

// GET /api/services/:id/
pub async fn get_service(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<ServiceDetail>, AppError> {
    let conn = state.conn()?;
    let service = therapists::get_service(&conn, id)?
        .filter(|s| s.is_active)
        .ok_or_else(|| AppError::NotFound("Service not found".into()))?;
    Ok(Json(ServiceDetail {
        service,
        addons: therapists::list_addons(&conn)?,
    }))
}

// GET /api/services/therapists/
pub async fn list_therapists(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Therapist>>, AppError> {
    let conn = state.conn()?;
    Ok(Json(therapists::list_therapists(&conn)?))
}

// GET /api/services/therapists/:id/availability/
pub async fn therapist_availability(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<TherapistAvailabilityResponse>, AppError> {
    let conn = state.conn()?;
    let therapist = therapists::get_therapist(&conn, id)?
        .ok_or_else(|| AppError::NotFound("Therapist not found".into()))?;
    let schedule = WeeklySchedule::new(therapists::list_availability(&conn, id)?);
    let summary = schedule.to_human_readable();
    Ok(Json(TherapistAvailabilityResponse {
        therapist,
        windows: schedule.windows.into_iter().filter(|w| w.is_active).collect(),
        summary,
    }))
}
