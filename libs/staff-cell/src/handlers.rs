// libs/staff-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use chrono::NaiveDate;

use shared_config::AppConfig;
use shared_models::error::AppError;

use crate::models::{SetAvailabilityRequest, StaffError};
use crate::services::eligibility::EligibilityService;

#[derive(Debug, Deserialize)]
pub struct EligibleStaffQuery {
    pub date: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityListQuery {
    pub from_date: Option<NaiveDate>,
}

fn map_staff_error(e: StaffError) -> AppError {
    match e {
        StaffError::NotFound => AppError::NotFound("Staff member not found".to_string()),
        StaffError::ValidationError(msg) => AppError::BadRequest(msg),
        StaffError::DatabaseError(msg) => AppError::Database(msg),
    }
}

/// Doctors selectable for booking on a date.
#[axum::debug_handler]
pub async fn get_eligible_staff(
    State(state): State<Arc<AppConfig>>,
    Query(query): Query<EligibleStaffQuery>,
) -> Result<Json<Value>, AppError> {
    let service = EligibilityService::new(&state);

    let staff = service.eligible_staff(query.date).await.map_err(map_staff_error)?;

    Ok(Json(json!({
        "date": query.date,
        "eligible_staff": staff,
    })))
}

#[axum::debug_handler]
pub async fn list_staff_availability(
    State(state): State<Arc<AppConfig>>,
    Query(query): Query<AvailabilityListQuery>,
) -> Result<Json<Value>, AppError> {
    let service = EligibilityService::new(&state);

    // Default to the clinic-local current date, not UTC.
    let from_date = query.from_date.unwrap_or_else(|| {
        (chrono::Utc::now() + chrono::Duration::minutes(state.clinic_utc_offset_minutes as i64))
            .date_naive()
    });
    let records = service
        .list_staff_availability(from_date)
        .await
        .map_err(map_staff_error)?;

    Ok(Json(json!({ "availability": records })))
}

#[axum::debug_handler]
pub async fn set_staff_availability(
    State(state): State<Arc<AppConfig>>,
    Json(request): Json<SetAvailabilityRequest>,
) -> Result<Json<Value>, AppError> {
    let service = EligibilityService::new(&state);

    let record = service
        .set_staff_availability(request)
        .await
        .map_err(map_staff_error)?;

    Ok(Json(json!({
        "success": true,
        "availability": record,
    })))
}
