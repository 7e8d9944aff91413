use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use redb::{CommitError, DatabaseError, StorageError, TableError, TransactionError};
use serde::{Deserialize, Serialize};

pub mod aggregate;
pub mod fingerprint;
pub mod graph;
pub mod ipc;
pub mod parser;
pub mod scan;
pub mod store;
pub mod walk;

pub use aggregate::{LibraryAggregator, ScannedMedia};
pub use fingerprint::{fingerprint, Fingerprint, FingerprintError};
pub use graph::LibraryGraph;
pub use ipc::{decode_message, encode_message, EventSink, IpcBridge, IpcDeliveryError};
pub use parser::{ParseConfigError, ParsedName, TitleParser};
pub use scan::{ParserSettings, ScanCoordinator, ScanSettings};
pub use store::{LibraryDb, LibraryStore, MemoryStore};
pub use walk::{Candidate, DriveEnumerator, PathWalker, SystemDrives, WalkItem};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryStats {
    pub artists: usize,
    pub songs: usize,
    pub media: usize,
}

/// Cooperative cancellation flag shared between the coordinator, its
/// workers and whoever requested the scan.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("db error: {0}")]
    Redb(#[from] redb::Error),
    #[error("bincode error: {0}")]
    Bincode(#[from] Box<bincode::ErrorKind>),
    #[error("library store unavailable: {0}")]
    Unavailable(String),
}

impl From<DatabaseError> for PersistenceError {
    fn from(err: DatabaseError) -> Self {
        PersistenceError::Redb(err.into())
    }
}

impl From<TableError> for PersistenceError {
    fn from(err: TableError) -> Self {
        PersistenceError::Redb(err.into())
    }
}

impl From<TransactionError> for PersistenceError {
    fn from(err: TransactionError) -> Self {
        PersistenceError::Redb(err.into())
    }
}

impl From<StorageError> for PersistenceError {
    fn from(err: StorageError) -> Self {
        PersistenceError::Redb(err.into())
    }
}

impl From<CommitError> for PersistenceError {
    fn from(err: CommitError) -> Self {
        PersistenceError::Redb(err.into())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("a scan is already running")]
    AlreadyRunning,
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("worker pool error: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}
