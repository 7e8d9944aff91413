use std::path::PathBuf;
use std::sync::Arc;

use common::ScanStatus;
use serde::Serialize;
use tokio::process::ChildStdin;
use tokio::sync::Mutex;

use crate::relay::BroadcastRelay;

#[derive(Clone)]
pub struct AppState {
    /// Handed to scan workers, which read it fresh on every run.
    pub config_path: PathBuf,
    pub relay: BroadcastRelay,
    /// Control pipe of the running scan worker, if any.
    pub scan_control: Arc<Mutex<Option<ChildStdin>>>,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct ScanStatusResponse {
    pub running: bool,
    pub status: Option<ScanStatus>,
}
