use std::path::Path;

use common::{ProviderType, RawTags};
use lofty::error::LoftyError;
use lofty::prelude::{AudioFile, ItemKey, TaggedFileExt};
use tracing::debug;

pub mod mp3;

pub use mp3::{estimate_duration as estimate_mp3_duration, FrameHeader};

/// Duration and tags derived from one media file.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Extraction {
    pub duration_seconds: Option<u32>,
    pub tags: Option<RawTags>,
}

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("tag read failed: {0}")]
    Tags(#[from] LoftyError),
    #[error("not an mpeg audio stream: {0}")]
    Estimate(String),
    #[error("no local metadata for {0} media")]
    Unsupported(ProviderType),
}

/// Capability shared by every per-provider extraction strategy.
pub trait MetadataExtractor: Send + Sync {
    fn name(&self) -> &'static str;
    fn extract(&self, path: &Path) -> Result<Extraction, MetadataError>;
}

/// Reads duration and tags from containers lofty understands.
#[derive(Debug, Default, Clone, Copy)]
pub struct TagReader;

/// MPEG audio: duration from frame headers, tags from ID3 when present.
#[derive(Debug, Default, Clone, Copy)]
pub struct Mp3Estimator;

/// Media that has no local bytes to inspect.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMetadata;

static TAG_READER: TagReader = TagReader;
static MP3_ESTIMATOR: Mp3Estimator = Mp3Estimator;
static NO_METADATA: NoMetadata = NoMetadata;

/// Picks the extraction strategy for a file by provider and extension.
pub fn extractor_for(provider: ProviderType, audio_path: &Path) -> &'static dyn MetadataExtractor {
    match provider {
        ProviderType::RemoteProvider => &NO_METADATA,
        _ if has_extension(audio_path, "mp3") => &MP3_ESTIMATOR,
        _ => &TAG_READER,
    }
}

impl MetadataExtractor for TagReader {
    fn name(&self) -> &'static str {
        "tags"
    }

    fn extract(&self, path: &Path) -> Result<Extraction, MetadataError> {
        let info = read_tags(path)?;
        Ok(Extraction {
            duration_seconds: info.duration_ms.map(ms_to_secs),
            tags: info.tags(),
        })
    }
}

impl MetadataExtractor for Mp3Estimator {
    fn name(&self) -> &'static str {
        "mp3-frames"
    }

    fn extract(&self, path: &Path) -> Result<Extraction, MetadataError> {
        let estimated = mp3::estimate_duration(path);
        let tag_info = match read_tags(path) {
            Ok(info) => Some(info),
            Err(err) => {
                debug!("No readable tags in {:?}: {}", path, err);
                None
            }
        };
        let tags = tag_info.as_ref().and_then(TagInfo::tags);

        let duration_seconds = match estimated {
            Ok(seconds) => Some(seconds.round() as u32),
            Err(err) => match tag_info.as_ref().and_then(|info| info.duration_ms) {
                Some(ms) => Some(ms_to_secs(ms)),
                None => return Err(err),
            },
        };

        Ok(Extraction {
            duration_seconds,
            tags,
        })
    }
}

impl MetadataExtractor for NoMetadata {
    fn name(&self) -> &'static str {
        "none"
    }

    fn extract(&self, _path: &Path) -> Result<Extraction, MetadataError> {
        Err(MetadataError::Unsupported(ProviderType::RemoteProvider))
    }
}

#[derive(Debug, Default, Clone)]
pub struct TagInfo {
    pub artist: Option<String>,
    pub title: Option<String>,
    pub duration_ms: Option<u32>,
}

impl TagInfo {
    /// `None` when the file carries neither an artist nor a title.
    pub fn tags(&self) -> Option<RawTags> {
        if self.artist.is_none() && self.title.is_none() {
            return None;
        }
        Some(RawTags {
            artist: self.artist.clone(),
            title: self.title.clone(),
        })
    }
}

pub fn read_tags(path: &Path) -> Result<TagInfo, MetadataError> {
    let tagged_file = lofty::read_from_path(path)?;
    let properties = tagged_file.properties();

    let mut info = TagInfo::default();

    let duration_ms = properties.duration().as_millis();
    if duration_ms > 0 {
        let clamped = duration_ms.min(u128::from(u32::MAX)) as u32;
        info.duration_ms = Some(clamped);
    }

    if let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
        info.title = tag
            .get_string(&ItemKey::TrackTitle)
            .and_then(clean_tag_value);
        let album_artist = tag
            .get_string(&ItemKey::AlbumArtist)
            .and_then(clean_tag_value);
        let track_artist = tag
            .get_string(&ItemKey::TrackArtist)
            .and_then(clean_tag_value);
        info.artist = track_artist.or(album_artist);
    }

    Ok(info)
}

fn clean_tag_value(value: &str) -> Option<String> {
    let trimmed = value.trim_matches(|c: char| c.is_whitespace() || c == '\0');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn ms_to_secs(ms: u32) -> u32 {
    ms.saturating_add(500) / 1000
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .map(|value| value.to_string_lossy().eq_ignore_ascii_case(ext))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn dispatch_picks_strategy_by_type() {
        let mp3 = PathBuf::from("/k/Artist - Song.MP3");
        let mp4 = PathBuf::from("/k/Artist - Song.mp4");

        assert_eq!(extractor_for(ProviderType::CdgPair, &mp3).name(), "mp3-frames");
        assert_eq!(extractor_for(ProviderType::LocalFile, &mp4).name(), "tags");
        assert_eq!(extractor_for(ProviderType::RemoteProvider, &mp4).name(), "none");
        assert!(matches!(
            extractor_for(ProviderType::RemoteProvider, &mp4).extract(&mp4),
            Err(MetadataError::Unsupported(_))
        ));
    }

    #[test]
    fn tag_reader_fails_on_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.mp4");
        std::fs::write(&path, b"definitely not a container").unwrap();
        assert!(TagReader.extract(&path).is_err());
    }

    #[test]
    fn mp3_estimator_errors_when_nothing_is_readable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noise.mp3");
        std::fs::write(&path, vec![0u8; 2048]).unwrap();
        assert!(Mp3Estimator.extract(&path).is_err());
    }

    #[test]
    fn empty_tag_info_has_no_tags() {
        assert_eq!(TagInfo::default().tags(), None);
        let info = TagInfo {
            artist: None,
            title: Some("Song".to_string()),
            duration_ms: None,
        };
        assert_eq!(info.tags().unwrap().title.as_deref(), Some("Song"));
    }

    #[test]
    fn milliseconds_round_to_nearest_second() {
        assert_eq!(ms_to_secs(1499), 1);
        assert_eq!(ms_to_secs(1500), 2);
        assert_eq!(ms_to_secs(0), 0);
    }
}
