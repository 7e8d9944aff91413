//! `scan-worker` process mode. Stdout carries one JSON message per line;
//! stdin carries control commands.

use std::io::{self, BufRead};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::ScanState;
use library::{IpcBridge, LibraryDb, ScanCoordinator};
use tracing::{debug, error, info, warn};

use crate::config::load_or_create_config;

pub const WORKER_ARG: &str = "scan-worker";
pub const CANCEL_COMMAND: &str = "CANCEL";

pub fn run_scan_worker(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let (config, _) = load_or_create_config(config_path)?;
    let index_path = config.index_path(config_path);
    let settings = config.resolved_scan(config_path);
    info!(
        "Scan worker using index {:?} and {} root(s)",
        index_path,
        settings.paths.len()
    );

    let coordinator = Arc::new(ScanCoordinator::new(
        settings,
        Arc::new(LibraryDb::new(index_path)),
    ));
    watch_control(Arc::clone(&coordinator));

    let bridge = IpcBridge::new(io::stdout());
    match coordinator.run(&bridge) {
        Ok(progress) => {
            info!(
                "Scan worker finished: {:?}, {}/{} files",
                progress.state, progress.files_processed, progress.files_total
            );
            Ok(())
        }
        Err(err) => {
            error!("Scan worker failed: {}", err);
            Err(err.into())
        }
    }
}

/// Cancels on a `CANCEL` line, or when the parent closes stdin.
fn watch_control(coordinator: Arc<ScanCoordinator>) {
    let spawned = thread::Builder::new()
        .name("scan-control".to_string())
        .spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                match line {
                    Ok(line) if line.trim().eq_ignore_ascii_case(CANCEL_COMMAND) => {
                        info!("Cancel received");
                        cancel_once_started(&coordinator);
                        return;
                    }
                    Ok(line) => debug!("Ignoring control line {:?}", line),
                    Err(err) => {
                        warn!("Control channel failed: {}", err);
                        break;
                    }
                }
            }
            debug!("Control channel closed");
            cancel_once_started(&coordinator);
        });
    if let Err(err) = spawned {
        warn!("Failed to watch control channel: {}", err);
    }
}

/// `run` clears stale cancels on entry, so a request that arrives before the
/// run has started waits for it.
fn cancel_once_started(coordinator: &ScanCoordinator) {
    while coordinator.progress().state == ScanState::Idle {
        thread::sleep(Duration::from_millis(10));
    }
    coordinator.cancel();
}
