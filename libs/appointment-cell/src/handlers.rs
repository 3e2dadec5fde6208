// libs/appointment-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use chrono::{NaiveDate, NaiveTime};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::error::AppError;

use crate::models::{
    AppointmentError, AppointmentSearchQuery, AppointmentStatus, BookAppointmentRequest,
    BookingType, RescheduleAppointmentRequest, UpdateAppointmentStatusRequest,
};
use crate::services::booking::BookingService;

// ==============================================================================
// QUERY PARAMETER STRUCTS
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct AppointmentQueryParams {
    pub patient_id: Option<Uuid>,
    pub staff_id: Option<Uuid>,
    pub status: Option<AppointmentStatus>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    pub limit: Option<i32>,
    pub offset: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct AvailableSlotsQuery {
    pub service_id: Uuid,
    pub date: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct ConflictCheckQuery {
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub staff_id: Option<Uuid>,
}

fn map_appointment_error(e: AppointmentError) -> AppError {
    match e {
        AppointmentError::NotFound => AppError::NotFound("Appointment not found".to_string()),
        AppointmentError::ServiceNotFound => AppError::NotFound("Service not found".to_string()),
        AppointmentError::NotWithinBusinessHours => {
            AppError::BadRequest("Requested time is outside business hours".to_string())
        }
        AppointmentError::SlotNoLongerAvailable => {
            AppError::Conflict("Appointment slot is no longer available".to_string())
        }
        AppointmentError::StaffIneligible => {
            AppError::BadRequest("Selected staff member is not available on that date".to_string())
        }
        AppointmentError::InvalidStatusTransition(from, to) => {
            AppError::BadRequest(format!("Appointment cannot move from {} to {}", from, to))
        }
        AppointmentError::ValidationError(msg) => AppError::ValidationError(msg),
        AppointmentError::DatabaseError(msg) => AppError::Database(msg),
    }
}

// ==============================================================================
// BOOKING HANDLERS
// ==============================================================================

/// Patient-facing online booking.
#[axum::debug_handler]
pub async fn book_appointment(
    State(state): State<Arc<AppConfig>>,
    Json(request): Json<BookAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let booking_service = BookingService::new(&state);

    let appointment = booking_service
        .submit_booking(request, BookingType::Online)
        .await
        .map_err(map_appointment_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment booked successfully"
    })))
}

/// Front-desk walk-in booking; identical validation and conflict rules.
#[axum::debug_handler]
pub async fn book_walk_in_appointment(
    State(state): State<Arc<AppConfig>>,
    Json(request): Json<BookAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let booking_service = BookingService::new(&state);

    let appointment = booking_service
        .submit_booking(request, BookingType::WalkIn)
        .await
        .map_err(map_appointment_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Walk-in appointment booked successfully"
    })))
}

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let booking_service = BookingService::new(&state);

    let appointment = booking_service
        .get_appointment(appointment_id)
        .await
        .map_err(map_appointment_error)?;

    Ok(Json(json!(appointment)))
}

#[axum::debug_handler]
pub async fn search_appointments(
    State(state): State<Arc<AppConfig>>,
    Query(params): Query<AppointmentQueryParams>,
) -> Result<Json<Value>, AppError> {
    let booking_service = BookingService::new(&state);

    let query = AppointmentSearchQuery {
        patient_id: params.patient_id,
        staff_id: params.staff_id,
        status: params.status,
        from_date: params.from_date,
        to_date: params.to_date,
        limit: params.limit,
        offset: params.offset,
    };

    let appointments = booking_service
        .search_appointments(query)
        .await
        .map_err(map_appointment_error)?;

    let count = appointments.len();
    Ok(Json(json!({
        "appointments": appointments,
        "count": count
    })))
}

/// Move an appointment to a new date/time; same validation and conflict
/// rules as a fresh booking.
#[axum::debug_handler]
pub async fn reschedule_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<RescheduleAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let booking_service = BookingService::new(&state);

    let appointment = booking_service
        .reschedule(appointment_id, request)
        .await
        .map_err(map_appointment_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment rescheduled successfully"
    })))
}

/// Staff status actions (confirm, complete, cancel, no-show).
#[axum::debug_handler]
pub async fn update_appointment_status(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<UpdateAppointmentStatusRequest>,
) -> Result<Json<Value>, AppError> {
    let booking_service = BookingService::new(&state);

    let appointment = booking_service
        .update_status(appointment_id, request)
        .await
        .map_err(map_appointment_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment
    })))
}

// ==============================================================================
// AVAILABILITY HANDLERS
// ==============================================================================

/// Bookable start times for a (service, date) pair. An empty list is a
/// normal response, never an error.
#[axum::debug_handler]
pub async fn get_available_slots(
    State(state): State<Arc<AppConfig>>,
    Query(query): Query<AvailableSlotsQuery>,
) -> Result<Json<Value>, AppError> {
    let booking_service = BookingService::new(&state);

    let slots = booking_service
        .available_slots_for(query.service_id, query.date)
        .await
        .map_err(map_appointment_error)?;

    Ok(Json(json!({
        "date": query.date,
        "service_id": query.service_id,
        "available_slots": slots
    })))
}

#[axum::debug_handler]
pub async fn check_conflicts(
    State(state): State<Arc<AppConfig>>,
    Query(query): Query<ConflictCheckQuery>,
) -> Result<Json<Value>, AppError> {
    let booking_service = BookingService::new(&state);

    let is_free = booking_service
        .is_interval_free(query.date, query.start_time, query.end_time, query.staff_id)
        .await
        .map_err(map_appointment_error)?;

    Ok(Json(json!({
        "date": query.date,
        "start_time": query.start_time,
        "end_time": query.end_time,
        "is_free": is_free
    })))
}

// ==============================================================================
// CATALOG HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn list_services(
    State(state): State<Arc<AppConfig>>,
) -> Result<Json<Value>, AppError> {
    let booking_service = BookingService::new(&state);

    let services = booking_service
        .list_services()
        .await
        .map_err(map_appointment_error)?;

    Ok(Json(json!({ "services": services })))
}

#[axum::debug_handler]
pub async fn list_business_hours(
    State(state): State<Arc<AppConfig>>,
) -> Result<Json<Value>, AppError> {
    let booking_service = BookingService::new(&state);

    let windows = booking_service
        .list_business_hours()
        .await
        .map_err(map_appointment_error)?;

    Ok(Json(json!({ "business_hours": windows })))
}
