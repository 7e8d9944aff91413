use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::WorkerMessage;
use library::{EventSink, IpcDeliveryError, LibraryDb, LibraryStore, ScanCoordinator, ScanSettings};
use serde::Deserialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// The subset of the server config this tool needs.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ImportConfig {
    index_path: String,
    scan: ScanSettings,
}

struct LogProgress;

impl EventSink for LogProgress {
    fn deliver(&self, message: &WorkerMessage) -> Result<(), IpcDeliveryError> {
        match message {
            WorkerMessage::Status(status) => info!(
                "{}/{} {}",
                status.processed, status.total, status.current_path
            ),
            WorkerMessage::Done => info!("Scan complete"),
        }
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config_path = env::args()
        .nth(1)
        .or_else(|| env::var("KARAOKE_CONFIG").ok())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.yaml"));
    let contents = fs::read_to_string(&config_path)?;
    let mut config: ImportConfig = serde_yaml::from_str(&contents)?;

    for entry in &mut config.scan.paths {
        entry.path = resolve(&config_path, &entry.path).to_string_lossy().to_string();
    }
    let index_value = if config.index_path.trim().is_empty() {
        "library.redb"
    } else {
        config.index_path.trim()
    };
    let db = LibraryDb::new(resolve(&config_path, index_value));

    let coordinator = ScanCoordinator::new(config.scan, Arc::new(db.clone()));
    let progress = coordinator.run(&LogProgress)?;
    let stats = db.load_library()?.stats();

    println!(
        "Scanned {}/{} files ({:?}): {} artists, {} songs, {} media, {} errors",
        progress.files_processed,
        progress.files_total,
        progress.state,
        stats.artists,
        stats.songs,
        stats.media,
        progress.errors.len()
    );
    for issue in &progress.errors {
        println!("  {}: {}", issue.path, issue.reason);
    }

    Ok(())
}

fn resolve(config_path: &Path, value: &str) -> PathBuf {
    let raw = PathBuf::from(value.trim());
    if raw.is_absolute() {
        return raw;
    }
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .join(raw)
}
