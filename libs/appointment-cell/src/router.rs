// libs/appointment-cell/src/router.rs
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, patch, post},
};

use shared_config::AppConfig;

use crate::handlers;

pub fn appointment_routes(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/", post(handlers::book_appointment))
        .route("/walk-in", post(handlers::book_walk_in_appointment))
        .route("/search", get(handlers::search_appointments))
        .route("/available-slots", get(handlers::get_available_slots))
        .route("/conflicts/check", get(handlers::check_conflicts))
        .route("/{appointment_id}", get(handlers::get_appointment))
        .route("/{appointment_id}/status", patch(handlers::update_appointment_status))
        .route("/{appointment_id}/reschedule", patch(handlers::reschedule_appointment))
        .with_state(state)
}

/// Read-only reference data the booking UI needs before it can render a
/// form: services and recurring business-hour windows.
pub fn catalog_routes(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/services", get(handlers::list_services))
        .route("/business-hours", get(handlers::list_business_hours))
        .with_state(state)
}
