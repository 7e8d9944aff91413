use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub type ArtistId = u64;
pub type SongId = u64;
pub type MediaId = u64;
pub type PathId = u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderType {
    /// Self-contained audio/video file.
    LocalFile,
    /// Audio track plus a companion timed-graphics (`.cdg`) file.
    CdgPair,
    RemoteProvider,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::LocalFile => "local-file",
            ProviderType::CdgPair => "cdg-pair",
            ProviderType::RemoteProvider => "remote-provider",
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tags read from the file itself. Either field may be missing.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTags {
    pub artist: Option<String>,
    pub title: Option<String>,
}

impl RawTags {
    pub fn is_complete(&self) -> bool {
        non_blank(self.artist.as_deref()) && non_blank(self.title.as_deref())
    }
}

fn non_blank(value: Option<&str>) -> bool {
    value.map(|v| !v.trim().is_empty()).unwrap_or(false)
}

/// A discovered file after fingerprinting, extraction and parsing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFile {
    pub path: String,
    pub provider_type: ProviderType,
    pub size_bytes: u64,
    pub content_hash: String,
    pub duration_seconds: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_tags: Option<RawTags>,
    pub parsed_artist: String,
    pub parsed_title: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artist {
    pub artist_id: ArtistId,
    pub name: String,
    #[serde(default)]
    pub song_ids: Vec<SongId>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Song {
    pub song_id: SongId,
    pub title: String,
    pub artist_id: ArtistId,
    pub duration: u32,
    pub num_media: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Media {
    pub media_id: MediaId,
    pub song_id: SongId,
    pub path_id: PathId,
    pub path: String,
    pub provider: ProviderType,
    pub size_bytes: u64,
    pub content_hash: String,
    pub duration_seconds: u32,
}

/// A configured scan root.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathEntry {
    pub path_id: PathId,
    pub path: String,
    pub priority: i32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replacement {
    pub pattern: String,
    #[serde(default)]
    pub replacement: String,
}

impl Replacement {
    pub fn new(pattern: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            replacement: replacement.into(),
        }
    }

    pub fn strip(pattern: impl Into<String>) -> Self {
        Self::new(pattern, "")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ParseStage {
    PreSplit,
    PostSplit,
    Artist,
    Title,
}

impl fmt::Display for ParseStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParseStage::PreSplit => "preSplit",
            ParseStage::PostSplit => "postSplit",
            ParseStage::Artist => "artist",
            ParseStage::Title => "title",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Replacements {
    pub pre_split: Vec<Replacement>,
    pub post_split: Vec<Replacement>,
    pub artist: Vec<Replacement>,
    pub title: Vec<Replacement>,
}

impl Replacements {
    pub fn stage(&self, stage: ParseStage) -> &[Replacement] {
        match stage {
            ParseStage::PreSplit => &self.pre_split,
            ParseStage::PostSplit => &self.post_split,
            ParseStage::Artist => &self.artist,
            ParseStage::Title => &self.title,
        }
    }
}

/// Rules for deriving artist and title from a file name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ParseConfig {
    pub delimiter: String,
    pub artist_first: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist_override: Option<String>,
    pub replacements: Replacements,
}

impl Default for ParseConfig {
    fn default() -> Self {
        Self {
            delimiter: "-".to_string(),
            artist_first: true,
            artist_override: None,
            replacements: Replacements {
                pre_split: vec![
                    // bracketed text: (Live), [Karaoke], {HD}
                    Replacement::strip(r"\s*[\(\[\{][^\)\]\}]*[\)\]\}]"),
                    Replacement::new("_", " "),
                ],
                post_split: vec![Replacement::new(r"\s{2,}", " ")],
                artist: vec![Replacement::new(r"^(.+),\s*(The|A|An)$", "$2 $1")],
                title: Vec::new(),
            },
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanState {
    Idle,
    Scanning,
    Done,
    Error,
    Canceled,
}

impl ScanState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanState::Done | ScanState::Error | ScanState::Canceled)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileIssue {
    pub path: String,
    pub reason: String,
}

impl FileIssue {
    pub fn new(path: &Path, reason: impl Into<String>) -> Self {
        Self {
            path: path.to_string_lossy().to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanProgress {
    pub state: ScanState,
    pub files_total: usize,
    pub files_processed: usize,
    pub current_path: String,
    pub errors: Vec<FileIssue>,
}

impl Default for ScanProgress {
    fn default() -> Self {
        Self {
            state: ScanState::Idle,
            files_total: 0,
            files_processed: 0,
            current_path: String::new(),
            errors: Vec::new(),
        }
    }
}

impl ScanProgress {
    pub fn status(&self) -> ScanStatus {
        ScanStatus {
            state: self.state,
            processed: self.files_processed,
            total: self.files_total,
            current_path: self.current_path.clone(),
            errors: self.errors.clone(),
        }
    }
}

/// Payload of `SCANNER_WORKER_STATUS`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanStatus {
    pub state: ScanState,
    pub processed: usize,
    pub total: usize,
    pub current_path: String,
    pub errors: Vec<FileIssue>,
}

/// Messages sent from the scan worker process to the main process.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkerMessage {
    #[serde(rename = "SCANNER_WORKER_STATUS")]
    Status(ScanStatus),
    #[serde(rename = "SCANNER_WORKER_DONE")]
    Done,
}

/// `{result, entities}` view of one entity kind.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Normalized<T> {
    pub result: Vec<u64>,
    pub entities: BTreeMap<u64, T>,
}

impl<T> Default for Normalized<T> {
    fn default() -> Self {
        Self {
            result: Vec::new(),
            entities: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibrarySnapshot {
    pub artists: Normalized<Artist>,
    pub songs: Normalized<Song>,
}

/// Events published to every connected client session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ClientEvent {
    #[serde(rename = "SCANNER_WORKER_STATUS")]
    ScanStatus(ScanStatus),
    #[serde(rename = "SCANNER_WORKER_DONE")]
    ScanDone,
    #[serde(rename = "LIBRARY_PUSH")]
    LibraryPush(LibrarySnapshot),
}

/// Lowercased, whitespace-collapsed form used for case-insensitive keys.
pub fn normalize_key(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

pub fn path_string(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

pub fn is_under(path: &str, root: &Path) -> bool {
    PathBuf::from(path).starts_with(root)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_key_folds_case_and_spacing() {
        assert_eq!(normalize_key("  The   Beatles "), "the beatles");
        assert_eq!(normalize_key("ABBA"), normalize_key("abba"));
    }

    #[test]
    fn worker_messages_use_wire_type_names() {
        let status = WorkerMessage::Status(ScanStatus {
            state: ScanState::Scanning,
            processed: 3,
            total: 10,
            current_path: "/music/a.mp4".to_string(),
            errors: vec![FileIssue {
                path: "/music/b.mp4".to_string(),
                reason: "unreadable".to_string(),
            }],
        });
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["type"], "SCANNER_WORKER_STATUS");
        assert_eq!(json["currentPath"], "/music/a.mp4");
        assert_eq!(json["errors"][0]["reason"], "unreadable");

        let done = serde_json::to_string(&WorkerMessage::Done).unwrap();
        assert_eq!(done, r#"{"type":"SCANNER_WORKER_DONE"}"#);
        let back: WorkerMessage = serde_json::from_str(&done).unwrap();
        assert_eq!(back, WorkerMessage::Done);
    }

    #[test]
    fn library_push_wraps_snapshot_in_payload() {
        let mut snapshot = LibrarySnapshot::default();
        snapshot.artists.result.push(1);
        snapshot.artists.entities.insert(
            1,
            Artist {
                artist_id: 1,
                name: "Queen".to_string(),
                song_ids: vec![7],
            },
        );
        let json = serde_json::to_value(ClientEvent::LibraryPush(snapshot)).unwrap();
        assert_eq!(json["type"], "LIBRARY_PUSH");
        assert_eq!(json["payload"]["artists"]["result"][0], 1);
        assert_eq!(json["payload"]["artists"]["entities"]["1"]["name"], "Queen");
        assert_eq!(json["payload"]["artists"]["entities"]["1"]["songIds"][0], 7);
    }

    #[test]
    fn incomplete_tags_are_not_complete() {
        let tags = RawTags {
            artist: Some(" ".to_string()),
            title: Some("Song".to_string()),
        };
        assert!(!tags.is_complete());
    }
}
