use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::state::{ErrorResponse, HealthResponse};

pub fn json_error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

pub fn json_status_response(status: StatusCode, value: &'static str) -> Response {
    (status, Json(HealthResponse { status: value })).into_response()
}
