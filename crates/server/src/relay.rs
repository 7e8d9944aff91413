//! Fans worker events out to every connected client session.

use std::sync::Arc;

use common::{ClientEvent, LibrarySnapshot, ScanStatus, WorkerMessage};
use library::LibraryStore;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

pub const RELAY_CAPACITY: usize = 256;

#[derive(Default)]
struct RelayState {
    running: bool,
    awaiting_done: bool,
    last_status: Option<ScanStatus>,
    snapshot: LibrarySnapshot,
}

/// STATUS events pass straight through; the library snapshot is only
/// republished once per run, after DONE, from the committed store.
#[derive(Clone)]
pub struct BroadcastRelay {
    sender: broadcast::Sender<ClientEvent>,
    store: Arc<dyn LibraryStore>,
    state: Arc<RwLock<RelayState>>,
}

impl BroadcastRelay {
    pub fn new(store: Arc<dyn LibraryStore>, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            store,
            state: Arc::new(RwLock::new(RelayState::default())),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.sender.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.state.read().running
    }

    pub fn last_status(&self) -> Option<ScanStatus> {
        self.state.read().last_status.clone()
    }

    pub fn snapshot(&self) -> LibrarySnapshot {
        self.state.read().snapshot.clone()
    }

    /// Seeds the cached snapshot without notifying anyone.
    pub fn set_snapshot(&self, snapshot: LibrarySnapshot) {
        self.state.write().snapshot = snapshot;
    }

    /// Marks a new run as started. Returns `false` if one is in progress.
    pub fn begin_run(&self) -> bool {
        let mut state = self.state.write();
        if state.running {
            return false;
        }
        state.running = true;
        state.awaiting_done = true;
        state.last_status = None;
        true
    }

    /// Backs out of a run that never got a worker.
    pub fn abort_run(&self) {
        let mut state = self.state.write();
        state.running = false;
        state.awaiting_done = false;
    }

    pub async fn handle(&self, message: WorkerMessage) {
        match message {
            WorkerMessage::Status(status) => {
                self.relay_status(status);
            }
            WorkerMessage::Done => {
                if self.take_done() {
                    self.publish_library().await;
                } else {
                    debug!("Ignoring repeated scan completion");
                }
            }
        }
    }

    /// Called once the worker is gone. Publishes the library if the worker
    /// died before reporting completion.
    pub async fn finish_run(&self) {
        if self.take_done() {
            warn!("Scan worker exited without completing; publishing stored library");
            self.publish_library().await;
        }
        self.state.write().running = false;
    }

    fn relay_status(&self, status: ScanStatus) -> bool {
        {
            let mut state = self.state.write();
            if let Some(last) = &state.last_status {
                if status.processed < last.processed {
                    debug!(
                        "Dropping stale scan status ({} < {})",
                        status.processed, last.processed
                    );
                    return false;
                }
            }
            state.last_status = Some(status.clone());
        }
        let _ = self.sender.send(ClientEvent::ScanStatus(status));
        true
    }

    fn take_done(&self) -> bool {
        std::mem::take(&mut self.state.write().awaiting_done)
    }

    async fn publish_library(&self) {
        let store = Arc::clone(&self.store);
        let loaded = tokio::task::spawn_blocking(move || store.load_library()).await;
        let snapshot = match loaded {
            Ok(Ok(graph)) => {
                let stats = graph.stats();
                info!(
                    "Publishing library: {} artists, {} songs",
                    stats.artists, stats.songs
                );
                Some(graph.snapshot())
            }
            Ok(Err(err)) => {
                warn!("Failed to read library after scan: {}", err);
                None
            }
            Err(err) => {
                warn!("Library load task failed: {}", err);
                None
            }
        };

        let _ = self.sender.send(ClientEvent::ScanDone);
        if let Some(snapshot) = snapshot {
            self.state.write().snapshot = snapshot.clone();
            let _ = self.sender.send(ClientEvent::LibraryPush(snapshot));
        }
    }
}
