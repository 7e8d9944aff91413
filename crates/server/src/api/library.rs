use axum::{extract::State, Json};
use common::LibrarySnapshot;

use crate::state::AppState;

/// Last published snapshot. Never reflects a scan that is still running.
pub async fn get_library(State(state): State<AppState>) -> Json<LibrarySnapshot> {
    Json(state.relay.snapshot())
}
