//! Discovery of candidate media under the configured roots.

use std::fs;
use std::path::{Path, PathBuf};

use common::{FileIssue, PathEntry, PathId, ProviderType};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Audio halves of a cdg pair.
pub const CDG_AUDIO_EXTENSIONS: &[&str] = &["mp3", "m4a"];
/// Self-contained karaoke videos.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "m4v", "mkv", "webm", "mov", "avi"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Candidate {
    pub path: PathBuf,
    /// Graphics file of a cdg pair.
    pub companion: Option<PathBuf>,
    pub provider: ProviderType,
    pub path_id: PathId,
    pub priority: i32,
}

impl Candidate {
    /// Files whose bytes make up this media, in hashing order.
    pub fn parts(&self) -> Vec<&Path> {
        let mut parts = vec![self.path.as_path()];
        if let Some(companion) = &self.companion {
            parts.push(companion.as_path());
        }
        parts
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WalkItem {
    File(Candidate),
    Unreadable { path_id: PathId, issue: FileIssue },
}

/// Source of removable-drive mount points.
pub trait DriveEnumerator: Send + Sync {
    fn drive_roots(&self) -> Vec<PathBuf>;
}

/// Mount points of the running host.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemDrives;

impl DriveEnumerator for SystemDrives {
    #[cfg(target_os = "linux")]
    fn drive_roots(&self) -> Vec<PathBuf> {
        let user = std::env::var("USER").unwrap_or_default();
        let mut roots = Vec::new();
        for base in ["/media", "/run/media"] {
            for child in child_dirs(Path::new(base)) {
                let is_user_dir = !user.is_empty()
                    && child.file_name().map(|name| name == user.as_str()).unwrap_or(false);
                if is_user_dir {
                    roots.extend(child_dirs(&child));
                } else {
                    roots.push(child);
                }
            }
        }
        roots.extend(child_dirs(Path::new("/mnt")));
        roots
    }

    #[cfg(target_os = "macos")]
    fn drive_roots(&self) -> Vec<PathBuf> {
        // the boot volume shows up as a symlink to /
        child_dirs(Path::new("/Volumes"))
            .into_iter()
            .filter(|path| {
                fs::read_link(path)
                    .map(|target| target != Path::new("/"))
                    .unwrap_or(true)
            })
            .collect()
    }

    #[cfg(windows)]
    fn drive_roots(&self) -> Vec<PathBuf> {
        let system = std::env::var("SystemDrive")
            .unwrap_or_else(|_| "C:".to_string())
            .to_ascii_uppercase();
        (b'A'..=b'Z')
            .map(|letter| format!("{}:", letter as char))
            .filter(|drive| *drive != system)
            .map(|drive| PathBuf::from(format!("{}\\", drive)))
            .filter(|path| path.is_dir())
            .collect()
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", windows)))]
    fn drive_roots(&self) -> Vec<PathBuf> {
        Vec::new()
    }
}

#[allow(dead_code)]
fn child_dirs(base: &Path) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = match fs::read_dir(base) {
        Ok(entries) => entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect(),
        Err(_) => Vec::new(),
    };
    dirs.sort();
    dirs
}

/// Lazily enumerates candidate media across roots, highest priority first.
#[derive(Clone, Debug, Default)]
pub struct PathWalker {
    roots: Vec<PathEntry>,
}

impl PathWalker {
    pub fn new(mut roots: Vec<PathEntry>) -> Self {
        roots.sort_by(|a, b| b.priority.cmp(&a.priority));
        Self { roots }
    }

    /// Appends every drive the enumerator reports that is not already a
    /// configured root.
    pub fn with_drives(mut self, drives: &dyn DriveEnumerator, priority: i32) -> Self {
        let mut next_id = self.roots.iter().map(|root| root.path_id).max().unwrap_or(0) + 1;
        for drive in drives.drive_roots() {
            let path = drive.to_string_lossy().to_string();
            if self.roots.iter().any(|root| root.path == path) {
                continue;
            }
            debug!("Including removable drive {}", path);
            self.roots.push(PathEntry {
                path_id: next_id,
                path,
                priority,
            });
            next_id += 1;
        }
        self.roots.sort_by(|a, b| b.priority.cmp(&a.priority));
        self
    }

    pub fn roots(&self) -> &[PathEntry] {
        &self.roots
    }

    pub fn walk(&self) -> impl Iterator<Item = WalkItem> + '_ {
        self.roots.iter().flat_map(|root| walk_root(root))
    }
}

fn walk_root(root: &PathEntry) -> impl Iterator<Item = WalkItem> + '_ {
    WalkDir::new(&root.path)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(move |entry| match entry {
            Ok(entry) => {
                if !entry.file_type().is_file() {
                    return None;
                }
                classify(entry.path()).map(|(provider, companion)| {
                    WalkItem::File(Candidate {
                        path: entry.into_path(),
                        companion,
                        provider,
                        path_id: root.path_id,
                        priority: root.priority,
                    })
                })
            }
            Err(err) => {
                let path = err
                    .path()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| PathBuf::from(&root.path));
                warn!("Skipping unreadable path {:?}: {}", path, err);
                Some(WalkItem::Unreadable {
                    path_id: root.path_id,
                    issue: FileIssue::new(&path, err.to_string()),
                })
            }
        })
}

fn classify(path: &Path) -> Option<(ProviderType, Option<PathBuf>)> {
    let name = path.file_name()?.to_string_lossy();
    if name.starts_with("._") {
        return None;
    }
    let ext = path.extension()?.to_string_lossy().to_ascii_lowercase();
    if CDG_AUDIO_EXTENSIONS.contains(&ext.as_str()) {
        return cdg_companion(path).map(|cdg| (ProviderType::CdgPair, Some(cdg)));
    }
    if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        return Some((ProviderType::LocalFile, None));
    }
    None
}

/// Sibling with the same stem and a `cdg` extension in any case.
fn cdg_companion(audio: &Path) -> Option<PathBuf> {
    let exact = audio.with_extension("cdg");
    if exact.is_file() {
        return Some(exact);
    }
    let stem = audio.file_stem()?;
    let mut found: Vec<PathBuf> = fs::read_dir(audio.parent()?)
        .ok()?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_stem() == Some(stem)
                && path
                    .extension()
                    .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case("cdg"))
                    .unwrap_or(false)
        })
        .filter(|path| path.is_file())
        .collect();
    found.sort();
    found.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    struct FixedDrives(Vec<PathBuf>);

    impl DriveEnumerator for FixedDrives {
        fn drive_roots(&self) -> Vec<PathBuf> {
            self.0.clone()
        }
    }

    fn entry(path_id: PathId, path: &Path, priority: i32) -> PathEntry {
        PathEntry {
            path_id,
            path: path.to_string_lossy().to_string(),
            priority,
        }
    }

    fn files(walker: &PathWalker) -> Vec<Candidate> {
        walker
            .walk()
            .filter_map(|item| match item {
                WalkItem::File(candidate) => Some(candidate),
                WalkItem::Unreadable { .. } => None,
            })
            .collect()
    }

    #[test]
    fn pairs_audio_with_cdg_and_skips_orphans() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("A - One.mp3"), b"audio").unwrap();
        fs::write(dir.path().join("A - One.cdg"), b"graphics").unwrap();
        fs::write(dir.path().join("B - Two.mp3"), b"lonely audio").unwrap();
        fs::write(dir.path().join("C - Three.mkv"), b"video").unwrap();
        fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let walker = PathWalker::new(vec![entry(1, dir.path(), 0)]);
        let found = files(&walker);

        assert_eq!(found.len(), 2);
        assert_eq!(found[0].provider, ProviderType::CdgPair);
        assert_eq!(found[0].companion, Some(dir.path().join("A - One.cdg")));
        assert_eq!(found[0].parts().len(), 2);
        assert_eq!(found[1].provider, ProviderType::LocalFile);
        assert!(found[1].path.ends_with("C - Three.mkv"));
    }

    #[test]
    fn companion_extension_case_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("A - One.MP3"), b"audio").unwrap();
        fs::write(dir.path().join("A - One.cDg"), b"graphics").unwrap();

        let walker = PathWalker::new(vec![entry(1, dir.path(), 0)]);
        let found = files(&walker);

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].provider, ProviderType::CdgPair);
        let companion = found[0].companion.as_ref().unwrap();
        assert!(companion
            .extension()
            .unwrap()
            .to_string_lossy()
            .eq_ignore_ascii_case("cdg"));
    }

    #[test]
    fn walks_roots_by_priority() {
        let low = tempfile::tempdir().unwrap();
        let high = tempfile::tempdir().unwrap();
        fs::write(low.path().join("x.mp4"), b"low").unwrap();
        fs::write(high.path().join("y.mp4"), b"high").unwrap();

        let walker = PathWalker::new(vec![entry(1, low.path(), 1), entry(2, high.path(), 5)]);
        let found = files(&walker);
        assert_eq!(found[0].path_id, 2);
        assert_eq!(found[0].priority, 5);
        assert_eq!(found[1].path_id, 1);
    }

    #[test]
    fn missing_root_is_reported_not_fatal() {
        let good = tempfile::tempdir().unwrap();
        fs::write(good.path().join("x.webm"), b"v").unwrap();
        let missing = good.path().join("does-not-exist");

        let walker = PathWalker::new(vec![entry(1, &missing, 0), entry(2, good.path(), 0)]);
        let items: Vec<WalkItem> = walker.walk().collect();

        assert!(items
            .iter()
            .any(|item| matches!(item, WalkItem::Unreadable { path_id: 1, .. })));
        assert!(items
            .iter()
            .any(|item| matches!(item, WalkItem::File(c) if c.path_id == 2)));
    }

    #[test]
    fn removable_drives_get_fresh_ids_and_priority() {
        let configured = tempfile::tempdir().unwrap();
        let drive = tempfile::tempdir().unwrap();
        let drives = FixedDrives(vec![drive.path().to_path_buf(), configured.path().to_path_buf()]);

        let walker = PathWalker::new(vec![entry(7, configured.path(), 3)]).with_drives(&drives, -1);
        let roots = walker.roots();
        assert_eq!(roots.len(), 2);
        assert_eq!(roots[0].path_id, 7);
        assert_eq!(roots[1].path_id, 8);
        assert_eq!(roots[1].priority, -1);
    }
}
