use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{
    path_string, FileIssue, MediaFile, ParseConfig, PathEntry, PathId, ProviderType, RawTags,
    ScanProgress, ScanState, WorkerMessage,
};
use metadata::extractor_for;
use parking_lot::Mutex;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::aggregate::{LibraryAggregator, ScannedMedia};
use crate::fingerprint::{fingerprint, FingerprintError, DEFAULT_CHUNK_SIZE};
use crate::ipc::EventSink;
use crate::parser::{ParsedName, TitleParser};
use crate::store::LibraryStore;
use crate::walk::{Candidate, DriveEnumerator, PathWalker, SystemDrives, WalkItem};
use crate::{CancelToken, ScanError};

const MAX_DEFAULT_WORKERS: usize = 4;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    pub paths: Vec<PathEntry>,
    pub include_removable: bool,
    pub removable_priority: i32,
    pub workers: usize,
    pub status_interval_ms: u64,
    pub chunk_size: usize,
    pub unattributed_artist: String,
    pub parsers: ParserSettings,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            include_removable: false,
            removable_priority: -1,
            workers: 0,
            status_interval_ms: 250,
            chunk_size: DEFAULT_CHUNK_SIZE,
            unattributed_artist: "Unknown Artist".to_string(),
            parsers: ParserSettings::default(),
        }
    }
}

impl ScanSettings {
    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(MAX_DEFAULT_WORKERS)
    }
}

/// File-name parsing rules, with optional per-provider overrides.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserSettings {
    pub default: ParseConfig,
    pub providers: BTreeMap<ProviderType, ParseConfig>,
}

impl ParserSettings {
    pub fn for_provider(&self, provider: ProviderType) -> &ParseConfig {
        self.providers.get(&provider).unwrap_or(&self.default)
    }
}

struct CompiledParsers {
    default: TitleParser,
    providers: BTreeMap<ProviderType, TitleParser>,
}

impl CompiledParsers {
    fn new(settings: &ParserSettings) -> Self {
        let (default, errors) = TitleParser::compile(&settings.default);
        let mut error_count = errors.len();
        let providers = settings
            .providers
            .iter()
            .map(|(provider, config)| {
                let (parser, errors) = TitleParser::compile(config);
                error_count += errors.len();
                (*provider, parser)
            })
            .collect();
        if error_count > 0 {
            warn!("{} parse rule(s) failed to compile", error_count);
        }
        Self { default, providers }
    }

    fn for_provider(&self, provider: ProviderType) -> &TitleParser {
        self.providers.get(&provider).unwrap_or(&self.default)
    }
}

struct FileContext<'a> {
    parsers: &'a CompiledParsers,
    chunk_size: usize,
    cancel: &'a CancelToken,
    unattributed_artist: &'a str,
}

enum FileOutcome {
    Finished {
        path: String,
        media: Option<ScannedMedia>,
        issues: Vec<FileIssue>,
    },
    Canceled {
        path: String,
    },
}

/// Drives one scan at a time: walk, process files on a bounded pool, fold
/// results into the library and commit it.
pub struct ScanCoordinator {
    settings: ScanSettings,
    store: Arc<dyn LibraryStore>,
    drives: Box<dyn DriveEnumerator>,
    progress: Mutex<ScanProgress>,
    cancel: CancelToken,
}

impl ScanCoordinator {
    pub fn new(settings: ScanSettings, store: Arc<dyn LibraryStore>) -> Self {
        Self {
            settings,
            store,
            drives: Box::new(SystemDrives),
            progress: Mutex::new(ScanProgress::default()),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_drives(mut self, drives: Box<dyn DriveEnumerator>) -> Self {
        self.drives = drives;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn progress(&self) -> ScanProgress {
        self.progress.lock().clone()
    }

    /// Hands out the finished run's progress and returns to `idle`.
    pub fn acknowledge(&self) -> Option<ScanProgress> {
        let mut progress = self.progress.lock();
        if !progress.state.is_terminal() {
            return None;
        }
        let finished = std::mem::take(&mut *progress);
        self.cancel.reset();
        Some(finished)
    }

    /// Starts from any non-running state. A cancel issued before this call
    /// does not carry into the new run.
    pub fn run(&self, sink: &dyn EventSink) -> Result<ScanProgress, ScanError> {
        {
            let mut progress = self.progress.lock();
            if progress.state == ScanState::Scanning {
                return Err(ScanError::AlreadyRunning);
            }
            self.cancel.reset();
            *progress = ScanProgress {
                state: ScanState::Scanning,
                ..ScanProgress::default()
            };
        }
        let started = Instant::now();
        let mut reporter = StatusReporter::new(sink, self.settings.status_interval_ms);

        let prior = match self.store.load_library() {
            Ok(graph) => graph,
            Err(err) => {
                error!("Failed to load library: {}", err);
                return Err(self.fail(&mut reporter, err.into()));
            }
        };

        let pool = match rayon::ThreadPoolBuilder::new()
            .num_threads(self.settings.worker_count())
            .thread_name(|index| format!("scan-worker-{}", index))
            .build()
        {
            Ok(pool) => pool,
            Err(err) => {
                error!("Failed to start scan workers: {}", err);
                return Err(self.fail(&mut reporter, err.into()));
            }
        };

        let parsers = CompiledParsers::new(&self.settings.parsers);
        let mut walker = PathWalker::new(self.settings.paths.clone());
        if self.settings.include_removable {
            walker = walker.with_drives(self.drives.as_ref(), self.settings.removable_priority);
        }
        info!("Library scan started over {} root(s)", walker.roots().len());

        let (candidates, failed_roots) = self.collect(&walker);
        self.progress.lock().files_total = candidates.len();
        reporter.emit(&self.progress());

        let mut aggregator = LibraryAggregator::new(prior);
        let context = FileContext {
            parsers: &parsers,
            chunk_size: self.settings.chunk_size,
            cancel: &self.cancel,
            unattributed_artist: &self.settings.unattributed_artist,
        };

        let (tx, rx) = mpsc::channel::<FileOutcome>();
        std::thread::scope(|scope| {
            let pool = &pool;
            let candidates = &candidates;
            let context = &context;
            scope.spawn(move || {
                pool.install(|| {
                    candidates.par_iter().for_each_with(tx, |tx, candidate| {
                        if context.cancel.is_canceled() {
                            return;
                        }
                        let _ = tx.send(process_file(candidate, context));
                    });
                });
            });

            for outcome in rx {
                if let Some(media) = self.record(outcome) {
                    aggregator.add(media);
                }
                reporter.maybe_emit(&self.progress());
            }
        });

        let canceled = self.cancel.is_canceled();
        let prunable = if canceled {
            Vec::new()
        } else {
            prune_roots(walker.roots(), &failed_roots)
        };
        let graph = aggregator.build(&prunable);

        if let Err(err) = self.store.commit_library(&graph) {
            error!("Failed to commit library, discarding scan results: {}", err);
            return Err(self.fail(&mut reporter, err.into()));
        }

        let state = if canceled {
            ScanState::Canceled
        } else {
            ScanState::Done
        };
        let progress = self.finish(&mut reporter, state);
        info!(
            "Library scan {:?} in {:.2?}: {}/{} files, {} songs, {} error(s)",
            state,
            started.elapsed(),
            progress.files_processed,
            progress.files_total,
            graph.songs.len(),
            progress.errors.len()
        );
        Ok(progress)
    }

    fn collect(&self, walker: &PathWalker) -> (Vec<Candidate>, HashSet<PathId>) {
        let mut candidates = Vec::new();
        let mut failed_roots = HashSet::new();
        for item in walker.walk() {
            if self.cancel.is_canceled() {
                debug!("Scan canceled during discovery");
                break;
            }
            match item {
                WalkItem::File(candidate) => candidates.push(candidate),
                WalkItem::Unreadable { path_id, issue } => {
                    failed_roots.insert(path_id);
                    self.progress.lock().errors.push(issue);
                }
            }
        }
        (candidates, failed_roots)
    }

    fn record(&self, outcome: FileOutcome) -> Option<ScannedMedia> {
        match outcome {
            FileOutcome::Canceled { path } => {
                debug!("Abandoned {} after cancel", path);
                None
            }
            FileOutcome::Finished {
                path,
                media,
                issues,
            } => {
                let mut progress = self.progress.lock();
                progress.files_processed += 1;
                progress.current_path = path;
                progress.errors.extend(issues);
                media
            }
        }
    }

    fn fail(&self, reporter: &mut StatusReporter<'_>, err: ScanError) -> ScanError {
        self.finish(reporter, ScanState::Error);
        err
    }

    fn finish(&self, reporter: &mut StatusReporter<'_>, state: ScanState) -> ScanProgress {
        let progress = {
            let mut progress = self.progress.lock();
            progress.state = state;
            progress.clone()
        };
        reporter.emit(&progress);
        if let Err(err) = reporter.done() {
            error!("Failed to deliver scan completion: {}", err);
        }
        progress
    }
}

/// Rate-limits STATUS delivery. Lost STATUS messages are only logged.
struct StatusReporter<'a> {
    sink: &'a dyn EventSink,
    interval: Duration,
    last: Option<Instant>,
}

impl<'a> StatusReporter<'a> {
    fn new(sink: &'a dyn EventSink, interval_ms: u64) -> Self {
        Self {
            sink,
            interval: Duration::from_millis(interval_ms),
            last: None,
        }
    }

    fn maybe_emit(&mut self, progress: &ScanProgress) {
        let due = self
            .last
            .map(|last| last.elapsed() >= self.interval)
            .unwrap_or(true);
        if due {
            self.emit(progress);
        }
    }

    fn emit(&mut self, progress: &ScanProgress) {
        debug!(
            "Scan progress {}/{}",
            progress.files_processed, progress.files_total
        );
        if let Err(err) = self.sink.deliver(&WorkerMessage::Status(progress.status())) {
            warn!("Dropped scan status: {}", err);
        }
        self.last = Some(Instant::now());
    }

    fn done(&self) -> Result<(), crate::IpcDeliveryError> {
        self.sink.deliver(&WorkerMessage::Done)
    }
}

fn process_file(candidate: &Candidate, context: &FileContext<'_>) -> FileOutcome {
    let path = path_string(&candidate.path);
    let mut issues = Vec::new();

    let print = match fingerprint(&candidate.parts(), context.chunk_size, context.cancel) {
        Ok(print) => print,
        Err(FingerprintError::Canceled) => return FileOutcome::Canceled { path },
        Err(err) => {
            warn!("Skipping {}: {}", path, err);
            issues.push(FileIssue::new(&candidate.path, err.to_string()));
            return FileOutcome::Finished {
                path,
                media: None,
                issues,
            };
        }
    };

    let extractor = extractor_for(candidate.provider, &candidate.path);
    let (duration_seconds, raw_tags) = match extractor.extract(&candidate.path) {
        Ok(extraction) => {
            let duration = extraction.duration_seconds.unwrap_or(0);
            if duration == 0 {
                warn!("No duration for {}", path);
                issues.push(FileIssue::new(&candidate.path, "duration unavailable"));
            }
            (duration, extraction.tags)
        }
        Err(err) => {
            warn!("Metadata extraction failed for {}: {}", path, err);
            issues.push(FileIssue::new(&candidate.path, err.to_string()));
            (0, None)
        }
    };

    let parser = context.parsers.for_provider(candidate.provider);
    let parsed = parser.parse(&file_stem(&candidate.path));
    let (mut artist, mut title) = credit(&parsed, raw_tags.as_ref(), parser.has_override());
    if artist.is_empty() {
        debug!(
            "No artist for {}, filing under {}",
            path, context.unattributed_artist
        );
        artist = context.unattributed_artist.to_string();
    }
    if title.is_empty() {
        title = file_stem(&candidate.path);
    }

    let file = MediaFile {
        path: path.clone(),
        provider_type: candidate.provider,
        size_bytes: print.size_bytes,
        content_hash: print.content_hash,
        duration_seconds,
        raw_tags,
        parsed_artist: parsed.artist,
        parsed_title: parsed.title,
    };

    FileOutcome::Finished {
        path,
        media: Some(ScannedMedia {
            file,
            path_id: candidate.path_id,
            priority: candidate.priority,
            artist,
            title,
        }),
        issues,
    }
}

/// Roots whose unseen media may be dropped: those that walked cleanly and
/// do not contain a root that failed.
fn prune_roots(roots: &[PathEntry], failed: &HashSet<PathId>) -> Vec<PathBuf> {
    let failed_paths: Vec<PathBuf> = roots
        .iter()
        .filter(|root| failed.contains(&root.path_id))
        .map(|root| PathBuf::from(&root.path))
        .collect();
    roots
        .iter()
        .map(|root| PathBuf::from(&root.path))
        .filter(|root| !failed_paths.iter().any(|bad| bad.starts_with(root)))
        .collect()
}

/// Artist and title for a file: complete tags win unless the parser forces
/// an artist, in which case tags may still supply the title.
fn credit(parsed: &ParsedName, tags: Option<&RawTags>, has_override: bool) -> (String, String) {
    let tag = |value: Option<&String>| {
        value
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };
    match tags {
        Some(tags) if has_override => (
            parsed.artist.clone(),
            tag(tags.title.as_ref()).unwrap_or_else(|| parsed.title.clone()),
        ),
        Some(tags) if tags.is_complete() => (
            tag(tags.artist.as_ref()).unwrap_or_default(),
            tag(tags.title.as_ref()).unwrap_or_default(),
        ),
        _ => (parsed.artist.clone(), parsed.title.clone()),
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(artist: &str, title: &str) -> ParsedName {
        ParsedName {
            artist: artist.to_string(),
            title: title.to_string(),
        }
    }

    fn tags(artist: Option<&str>, title: Option<&str>) -> RawTags {
        RawTags {
            artist: artist.map(str::to_string),
            title: title.map(str::to_string),
        }
    }

    #[test]
    fn complete_tags_beat_the_file_name() {
        let from_tags = tags(Some(" Tag Artist "), Some("Tag Title"));
        assert_eq!(
            credit(&parsed("File", "Name"), Some(&from_tags), false),
            ("Tag Artist".to_string(), "Tag Title".to_string())
        );
    }

    #[test]
    fn partial_tags_fall_back_to_parse() {
        let partial = tags(None, Some("Tag Title"));
        assert_eq!(
            credit(&parsed("File", "Name"), Some(&partial), false),
            ("File".to_string(), "Name".to_string())
        );
        assert_eq!(
            credit(&parsed("File", "Name"), None, false),
            ("File".to_string(), "Name".to_string())
        );
    }

    #[test]
    fn override_keeps_artist_but_takes_tag_title() {
        let full = tags(Some("Tag Artist"), Some("Tag Title"));
        assert_eq!(
            credit(&parsed("Override", "Name"), Some(&full), true),
            ("Override".to_string(), "Tag Title".to_string())
        );
        let untitled = tags(Some("Tag Artist"), None);
        assert_eq!(
            credit(&parsed("Override", "Name"), Some(&untitled), true),
            ("Override".to_string(), "Name".to_string())
        );
    }

    #[test]
    fn provider_parsers_fall_back_to_default() {
        let mut settings = ParserSettings::default();
        settings.providers.insert(
            ProviderType::CdgPair,
            ParseConfig {
                artist_first: false,
                ..ParseConfig::default()
            },
        );
        assert!(!settings.for_provider(ProviderType::CdgPair).artist_first);
        assert!(settings.for_provider(ProviderType::LocalFile).artist_first);
    }

    #[test]
    fn failed_child_root_shields_its_parent_from_pruning() {
        let roots = vec![
            PathEntry {
                path_id: 1,
                path: "/media".to_string(),
                priority: 0,
            },
            PathEntry {
                path_id: 2,
                path: "/media/usb".to_string(),
                priority: 1,
            },
            PathEntry {
                path_id: 3,
                path: "/other".to_string(),
                priority: 0,
            },
        ];
        let failed: HashSet<PathId> = [2].into_iter().collect();
        assert_eq!(prune_roots(&roots, &failed), vec![PathBuf::from("/other")]);
        assert_eq!(prune_roots(&roots, &HashSet::new()).len(), 3);
    }

    #[test]
    fn settings_fill_missing_fields() {
        let settings: ScanSettings = serde_json::from_str(r#"{"workers": 2}"#).unwrap();
        assert_eq!(settings.worker_count(), 2);
        assert_eq!(settings.status_interval_ms, 250);
        assert_eq!(settings.unattributed_artist, "Unknown Artist");
        assert!(ScanSettings::default().worker_count() <= MAX_DEFAULT_WORKERS);
    }
}
