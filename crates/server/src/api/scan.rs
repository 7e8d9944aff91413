use axum::{extract::State, http::StatusCode, response::Response, Json};

use crate::state::{AppState, ScanStatusResponse};
use crate::supervisor::{self, SupervisorError};
use crate::utils::{json_error_response, json_status_response};

pub async fn scan_status(State(state): State<AppState>) -> Json<ScanStatusResponse> {
    Json(ScanStatusResponse {
        running: state.relay.is_running(),
        status: state.relay.last_status(),
    })
}

pub async fn start_scan(State(state): State<AppState>) -> Response {
    match supervisor::start_scan(&state).await {
        Ok(()) => json_status_response(StatusCode::ACCEPTED, "started"),
        Err(SupervisorError::AlreadyRunning) => {
            json_error_response(StatusCode::CONFLICT, "scan already running")
        }
        Err(err) => json_error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

pub async fn cancel_scan(State(state): State<AppState>) -> Response {
    if supervisor::cancel_scan(&state).await {
        json_status_response(StatusCode::ACCEPTED, "canceling")
    } else {
        json_error_response(StatusCode::CONFLICT, "no scan running")
    }
}
