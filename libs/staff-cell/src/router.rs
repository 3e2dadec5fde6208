// libs/staff-cell/src/router.rs
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};

use shared_config::AppConfig;

use crate::handlers;

pub fn staff_routes(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/eligible", get(handlers::get_eligible_staff))
        .route("/availability", get(handlers::list_staff_availability))
        .route("/availability", post(handlers::set_staff_availability))
        .with_state(state)
}
