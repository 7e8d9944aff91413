use std::process::Stdio;

use library::decode_message;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, warn};

use crate::state::AppState;
use crate::worker::{CANCEL_COMMAND, WORKER_ARG};

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("a scan is already running")]
    AlreadyRunning,
    #[error("failed to start scan worker: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("scan worker has no stdout")]
    MissingPipe,
}

/// Launches this executable in worker mode and relays its output.
pub async fn start_scan(state: &AppState) -> Result<(), SupervisorError> {
    if !state.relay.begin_run() {
        return Err(SupervisorError::AlreadyRunning);
    }
    match spawn_worker(state).await {
        Ok(()) => Ok(()),
        Err(err) => {
            state.relay.abort_run();
            Err(err)
        }
    }
}

/// Asks the running worker to stop. Returns `false` when no worker is
/// listening.
pub async fn cancel_scan(state: &AppState) -> bool {
    let mut control = state.scan_control.lock().await;
    let Some(stdin) = control.as_mut() else {
        return false;
    };
    let line = format!("{}\n", CANCEL_COMMAND);
    match stdin.write_all(line.as_bytes()).await {
        Ok(()) => {
            let _ = stdin.flush().await;
            info!("Scan cancel requested");
            true
        }
        Err(err) => {
            warn!("Failed to signal scan worker: {}", err);
            false
        }
    }
}

async fn spawn_worker(state: &AppState) -> Result<(), SupervisorError> {
    let exe = std::env::current_exe()?;
    let mut child = Command::new(exe)
        .arg(WORKER_ARG)
        .arg(&state.config_path)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()?;
    let stdout = child.stdout.take().ok_or(SupervisorError::MissingPipe)?;
    *state.scan_control.lock().await = child.stdin.take();
    info!("Scan worker started (pid {:?})", child.id());

    tokio::spawn(receive_loop(state.clone(), child, stdout));
    Ok(())
}

async fn receive_loop(state: AppState, mut child: Child, stdout: ChildStdout) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match decode_message(&line) {
                    Ok(message) => state.relay.handle(message).await,
                    Err(err) => warn!("Skipping malformed worker line: {}", err),
                }
            }
            Ok(None) => break,
            Err(err) => {
                warn!("Scan worker output failed: {}", err);
                break;
            }
        }
    }

    state.scan_control.lock().await.take();
    match child.wait().await {
        Ok(status) if status.success() => debug!("Scan worker exited"),
        Ok(status) => warn!("Scan worker exited with {}", status),
        Err(err) => warn!("Failed to reap scan worker: {}", err),
    }
    state.relay.finish_run().await;
}
