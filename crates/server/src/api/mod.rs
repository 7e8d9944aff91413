pub mod library;
pub mod scan;
pub mod socket;

use axum::{
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use crate::state::{AppState, HealthResponse};

pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/library", get(library::get_library))
        .route("/scan", post(scan::start_scan))
        .route("/scan/status", get(scan::scan_status))
        .route("/scan/cancel", post(scan::cancel_scan))
        .route("/socket", get(socket::socket_handler))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}
