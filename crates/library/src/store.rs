use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use common::{Artist, Media, Song};
use parking_lot::Mutex;
use redb::{
    Database, DatabaseError, ReadTransaction, ReadableTable, TableDefinition, TableError,
    WriteTransaction,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::graph::LibraryGraph;
use crate::{LibraryStats, PersistenceError};

const INDEX_VERSION: u32 = 1;
const META_VERSION_KEY: &str = "version";
const META_STATS_KEY: &str = "stats";

const META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");
const ARTISTS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("artists");
const SONGS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("songs");
const MEDIA_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("media");

const OPEN_ATTEMPTS: u32 = 40;
const OPEN_BACKOFF: Duration = Duration::from_millis(50);

/// Durable home of the library graph.
pub trait LibraryStore: Send + Sync {
    fn load_library(&self) -> Result<LibraryGraph, PersistenceError>;
    /// Replaces the stored graph atomically: readers see either the old
    /// graph or the new one.
    fn commit_library(&self, graph: &LibraryGraph) -> Result<(), PersistenceError>;
}

/// redb-backed store. The file is shared by the server and the scan
/// worker, so it is opened per operation rather than held.
#[derive(Clone, Debug)]
pub struct LibraryDb {
    path: PathBuf,
}

impl LibraryDb {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn stats(&self) -> Result<LibraryStats, PersistenceError> {
        let db = self.open()?;
        let read_txn = db.begin_read()?;
        let table = match read_txn.open_table(META_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(LibraryStats::default()),
            Err(err) => return Err(err.into()),
        };
        let stats = match table.get(META_STATS_KEY)? {
            Some(value) => decode_value(value.value())?,
            None => LibraryStats::default(),
        };
        Ok(stats)
    }

    fn open(&self) -> Result<Database, PersistenceError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut attempt = 0;
        loop {
            match Database::create(&self.path) {
                Ok(db) => return Ok(db),
                Err(DatabaseError::DatabaseAlreadyOpen) if attempt < OPEN_ATTEMPTS => {
                    attempt += 1;
                    debug!("Library index busy, retrying ({})", attempt);
                    thread::sleep(OPEN_BACKOFF);
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

impl LibraryStore for LibraryDb {
    fn load_library(&self) -> Result<LibraryGraph, PersistenceError> {
        let db = self.open()?;
        let read_txn = db.begin_read()?;

        match read_version(&read_txn)? {
            Some(INDEX_VERSION) => {}
            Some(version) => {
                warn!(
                    "Library index version {} does not match {}, starting empty",
                    version, INDEX_VERSION
                );
                return Ok(LibraryGraph::default());
            }
            None => return Ok(LibraryGraph::default()),
        }

        let mut graph = LibraryGraph::default();
        if let Some(table) = open_optional(read_txn.open_table(ARTISTS_TABLE))? {
            for entry in table.iter()? {
                let (key, value) = entry?;
                let artist: Artist = decode_value(value.value())?;
                graph.artists.insert(key.value(), artist);
            }
        }
        if let Some(table) = open_optional(read_txn.open_table(SONGS_TABLE))? {
            for entry in table.iter()? {
                let (key, value) = entry?;
                let song: Song = decode_value(value.value())?;
                graph.songs.insert(key.value(), song);
            }
        }
        if let Some(table) = open_optional(read_txn.open_table(MEDIA_TABLE))? {
            for entry in table.iter()? {
                let (key, value) = entry?;
                let media: Media = decode_value(value.value())?;
                graph.media.insert(key.value().to_string(), media);
            }
        }
        Ok(graph)
    }

    fn commit_library(&self, graph: &LibraryGraph) -> Result<(), PersistenceError> {
        let db = self.open()?;
        let write_txn = db.begin_write()?;

        clear_table(&write_txn, META_TABLE)?;
        clear_table(&write_txn, ARTISTS_TABLE)?;
        clear_table(&write_txn, SONGS_TABLE)?;
        clear_table(&write_txn, MEDIA_TABLE)?;

        {
            let mut meta_table = write_txn.open_table(META_TABLE)?;
            let mut artists_table = write_txn.open_table(ARTISTS_TABLE)?;
            let mut songs_table = write_txn.open_table(SONGS_TABLE)?;
            let mut media_table = write_txn.open_table(MEDIA_TABLE)?;

            for (id, artist) in &graph.artists {
                let bytes = encode_value(artist)?;
                artists_table.insert(*id, bytes.as_slice())?;
            }
            for (id, song) in &graph.songs {
                let bytes = encode_value(song)?;
                songs_table.insert(*id, bytes.as_slice())?;
            }
            for (path, media) in &graph.media {
                let bytes = encode_value(media)?;
                media_table.insert(path.as_str(), bytes.as_slice())?;
            }

            let version_bytes = encode_value(&INDEX_VERSION)?;
            meta_table.insert(META_VERSION_KEY, version_bytes.as_slice())?;
            let stats_bytes = encode_value(&graph.stats())?;
            meta_table.insert(META_STATS_KEY, stats_bytes.as_slice())?;
        }

        write_txn.commit()?;
        let stats = graph.stats();
        info!(
            "Library committed: {} artists, {} songs, {} media",
            stats.artists, stats.songs, stats.media
        );
        Ok(())
    }
}

/// In-process store for tests and one-shot tools.
#[derive(Debug, Default)]
pub struct MemoryStore {
    graph: Mutex<LibraryGraph>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_graph(graph: LibraryGraph) -> Self {
        Self {
            graph: Mutex::new(graph),
        }
    }

    pub fn graph(&self) -> LibraryGraph {
        self.graph.lock().clone()
    }
}

impl LibraryStore for MemoryStore {
    fn load_library(&self) -> Result<LibraryGraph, PersistenceError> {
        Ok(self.graph.lock().clone())
    }

    fn commit_library(&self, graph: &LibraryGraph) -> Result<(), PersistenceError> {
        *self.graph.lock() = graph.clone();
        Ok(())
    }
}

fn read_version(txn: &ReadTransaction) -> Result<Option<u32>, PersistenceError> {
    let table = match open_optional(txn.open_table(META_TABLE))? {
        Some(table) => table,
        None => return Ok(None),
    };
    let version = match table.get(META_VERSION_KEY)? {
        Some(value) => Some(decode_value(value.value())?),
        None => None,
    };
    Ok(version)
}

fn open_optional<T>(result: Result<T, TableError>) -> Result<Option<T>, PersistenceError> {
    match result {
        Ok(table) => Ok(Some(table)),
        Err(TableError::TableDoesNotExist(_)) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn clear_table<K: redb::RedbKey + 'static>(
    txn: &WriteTransaction,
    table: TableDefinition<K, &[u8]>,
) -> Result<(), PersistenceError> {
    match txn.delete_table(table) {
        Ok(_) => Ok(()),
        Err(TableError::TableDoesNotExist(_)) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn encode_value<T: Serialize>(value: &T) -> Result<Vec<u8>, PersistenceError> {
    Ok(bincode::serialize(value)?)
}

fn decode_value<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, PersistenceError> {
    Ok(bincode::deserialize(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ProviderType;

    fn graph() -> LibraryGraph {
        let mut graph = LibraryGraph::default();
        graph.artists.insert(
            3,
            Artist {
                artist_id: 3,
                name: "Blondie".to_string(),
                song_ids: vec![5],
            },
        );
        graph.songs.insert(
            5,
            Song {
                song_id: 5,
                title: "Call Me".to_string(),
                artist_id: 3,
                duration: 212,
                num_media: 1,
            },
        );
        graph.media.insert(
            "/k/Blondie - Call Me.mp4".to_string(),
            Media {
                media_id: 9,
                song_id: 5,
                path_id: 1,
                path: "/k/Blondie - Call Me.mp4".to_string(),
                provider: ProviderType::LocalFile,
                size_bytes: 1024,
                content_hash: "abc".to_string(),
                duration_seconds: 212,
            },
        );
        graph
    }

    #[test]
    fn missing_index_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let db = LibraryDb::new(dir.path().join("nested").join("library.redb"));
        assert_eq!(db.load_library().unwrap(), LibraryGraph::default());
        assert_eq!(db.stats().unwrap(), LibraryStats::default());
    }

    #[test]
    fn commit_replaces_previous_graph() {
        let dir = tempfile::tempdir().unwrap();
        let db = LibraryDb::new(dir.path().join("library.redb"));

        let first = graph();
        db.commit_library(&first).unwrap();
        assert_eq!(db.load_library().unwrap(), first);

        let mut second = first.clone();
        second.songs.get_mut(&5).unwrap().duration = 213;
        second.media.clear();
        second.media.insert(
            "/k/other.mp4".to_string(),
            Media {
                path: "/k/other.mp4".to_string(),
                ..first.media.values().next().unwrap().clone()
            },
        );
        db.commit_library(&second).unwrap();

        let loaded = LibraryDb::new(db.path()).load_library().unwrap();
        assert_eq!(loaded, second);
        assert!(!loaded.media.contains_key("/k/Blondie - Call Me.mp4"));
        assert_eq!(db.stats().unwrap().media, 1);
    }

    #[test]
    fn memory_store_round_trips() {
        let store = MemoryStore::new();
        store.commit_library(&graph()).unwrap();
        assert_eq!(store.load_library().unwrap(), graph());
        assert_eq!(MemoryStore::with_graph(graph()).graph(), graph());
    }
}
