//! Folds per-file scan results into the library graph.
//!
//! Results may arrive in any order. Everything order-sensitive (conflict
//! resolution, id assignment, display names) is decided in [`LibraryAggregator::build`]
//! over sorted keys, so the same set of inputs always yields the same graph.

use std::cmp::{Ordering, Reverse};
use std::collections::BTreeMap;
use std::path::PathBuf;

use common::{
    is_under, normalize_key, Artist, ArtistId, Media, MediaFile, MediaId, PathId, Song, SongId,
};
use tracing::debug;

use crate::graph::LibraryGraph;

/// One processed file together with its resolved credit.
#[derive(Clone, Debug, PartialEq)]
pub struct ScannedMedia {
    pub file: MediaFile,
    pub path_id: PathId,
    pub priority: i32,
    pub artist: String,
    pub title: String,
}

impl ScannedMedia {
    /// Higher priority wins, then the lexicographically smaller path.
    fn rank(&self) -> (Reverse<i32>, &str) {
        (Reverse(self.priority), self.file.path.as_str())
    }

    fn outranks(&self, other: &ScannedMedia) -> bool {
        self.rank().cmp(&other.rank()) == Ordering::Less
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum SongKey {
    Existing(SongId),
    New { artist: String, title: String },
}

#[derive(Debug, Default)]
pub struct LibraryAggregator {
    prior: LibraryGraph,
    pending: BTreeMap<String, ScannedMedia>,
}

impl LibraryAggregator {
    pub fn new(prior: LibraryGraph) -> Self {
        Self {
            prior,
            pending: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn add(&mut self, media: ScannedMedia) {
        match self.pending.get(&media.file.path) {
            Some(existing) if !media.outranks(existing) => {}
            _ => {
                self.pending.insert(media.file.path.clone(), media);
            }
        }
    }

    /// Merges pending results into the prior graph. Prior media under any of
    /// `prune_roots` that were not seen in this scan are removed, then songs
    /// left without media and artists left without songs.
    pub fn build(self, prune_roots: &[PathBuf]) -> LibraryGraph {
        let LibraryAggregator { prior, pending } = self;

        // content hash -> song it was filed under previously
        let mut claimed: BTreeMap<&str, SongId> = BTreeMap::new();
        for media in prior.media.values() {
            if !prior.songs.contains_key(&media.song_id) {
                continue;
            }
            claimed
                .entry(media.content_hash.as_str())
                .and_modify(|id| *id = (*id).min(media.song_id))
                .or_insert(media.song_id);
        }
        let prior_media_ids: BTreeMap<&str, MediaId> = prior
            .media
            .iter()
            .map(|(path, media)| (path.as_str(), media.media_id))
            .collect();

        let mut graph = prior.clone();
        graph.media.retain(|path, _| {
            !pending.contains_key(path) && !prune_roots.iter().any(|root| is_under(path, root))
        });

        let mut artist_index: BTreeMap<String, ArtistId> = graph
            .artists
            .values()
            .map(|artist| (normalize_key(&artist.name), artist.artist_id))
            .collect();
        let mut song_index: BTreeMap<(ArtistId, String), SongId> = graph
            .songs
            .values()
            .map(|song| ((song.artist_id, normalize_key(&song.title)), song.song_id))
            .collect();

        let mut by_hash: BTreeMap<&str, Vec<&ScannedMedia>> = BTreeMap::new();
        for media in pending.values() {
            by_hash
                .entry(media.file.content_hash.as_str())
                .or_default()
                .push(media);
        }

        let mut groups: BTreeMap<SongKey, Vec<&ScannedMedia>> = BTreeMap::new();
        for (hash, mut items) in by_hash {
            items.sort_by(|a, b| a.rank().cmp(&b.rank()));
            let winner = items[0];
            let key = match claimed.get(hash) {
                Some(song_id) => SongKey::Existing(*song_id),
                None => {
                    let artist = normalize_key(&winner.artist);
                    let title = normalize_key(&winner.title);
                    let existing = artist_index
                        .get(&artist)
                        .and_then(|artist_id| song_index.get(&(*artist_id, title.clone())));
                    match existing {
                        Some(song_id) => SongKey::Existing(*song_id),
                        None => SongKey::New { artist, title },
                    }
                }
            };
            groups.entry(key).or_default().extend(items);
        }

        // display casing of a new artist comes from its best-ranked contributor
        let mut artist_names: BTreeMap<String, &ScannedMedia> = BTreeMap::new();
        for (key, items) in &groups {
            if let SongKey::New { artist, .. } = key {
                for item in items.iter().copied() {
                    let slot = artist_names.entry(artist.clone()).or_insert(item);
                    if item.outranks(*slot) {
                        *slot = item;
                    }
                }
            }
        }

        let mut next_artist = graph.next_artist_id();
        let mut next_song = graph.next_song_id();
        let mut next_media = graph.next_media_id().max(
            prior_media_ids
                .values()
                .max()
                .map(|id| id + 1)
                .unwrap_or(1),
        );

        for (key, mut items) in groups {
            items.sort_by(|a, b| a.rank().cmp(&b.rank()));
            let winner = items[0];

            let song_id = match key {
                SongKey::Existing(song_id) => {
                    if let Some(song) = graph.songs.get_mut(&song_id) {
                        if winner.file.duration_seconds > 0 {
                            song.duration = winner.file.duration_seconds;
                        }
                    }
                    song_id
                }
                SongKey::New { artist, title } => {
                    let artist_id = match artist_index.get(&artist) {
                        Some(artist_id) => *artist_id,
                        None => {
                            let artist_id = next_artist;
                            next_artist += 1;
                            let name = artist_names
                                .get(&artist)
                                .map(|media| media.artist.trim().to_string())
                                .unwrap_or_else(|| winner.artist.trim().to_string());
                            debug!("New artist {} ({})", name, artist_id);
                            graph.artists.insert(
                                artist_id,
                                Artist {
                                    artist_id,
                                    name,
                                    song_ids: Vec::new(),
                                },
                            );
                            artist_index.insert(artist.clone(), artist_id);
                            artist_id
                        }
                    };
                    let song_id = next_song;
                    next_song += 1;
                    graph.songs.insert(
                        song_id,
                        Song {
                            song_id,
                            title: winner.title.trim().to_string(),
                            artist_id,
                            duration: winner.file.duration_seconds,
                            num_media: 0,
                        },
                    );
                    song_index.insert((artist_id, title), song_id);
                    song_id
                }
            };

            for item in items {
                let media_id = match prior_media_ids.get(item.file.path.as_str()) {
                    Some(media_id) => *media_id,
                    None => {
                        let media_id = next_media;
                        next_media += 1;
                        media_id
                    }
                };
                graph.media.insert(
                    item.file.path.clone(),
                    Media {
                        media_id,
                        song_id,
                        path_id: item.path_id,
                        path: item.file.path.clone(),
                        provider: item.file.provider_type,
                        size_bytes: item.file.size_bytes,
                        content_hash: item.file.content_hash.clone(),
                        duration_seconds: item.file.duration_seconds,
                    },
                );
            }
        }

        relink(&mut graph);
        graph
    }
}

/// Recomputes media counts and artist song lists, dropping anything that
/// ended up empty.
fn relink(graph: &mut LibraryGraph) {
    for song in graph.songs.values_mut() {
        song.num_media = 0;
    }
    for media in graph.media.values() {
        if let Some(song) = graph.songs.get_mut(&media.song_id) {
            song.num_media += 1;
        }
    }
    graph.songs.retain(|_, song| song.num_media > 0);
    let songs = &graph.songs;
    graph.media.retain(|_, media| songs.contains_key(&media.song_id));

    let mut by_artist: BTreeMap<ArtistId, Vec<(String, SongId)>> = BTreeMap::new();
    for song in graph.songs.values() {
        by_artist
            .entry(song.artist_id)
            .or_default()
            .push((normalize_key(&song.title), song.song_id));
    }
    graph.artists.retain(|artist_id, _| by_artist.contains_key(artist_id));
    for artist in graph.artists.values_mut() {
        let mut songs = by_artist.remove(&artist.artist_id).unwrap_or_default();
        songs.sort();
        artist.song_ids = songs.into_iter().map(|(_, id)| id).collect();
    }
    // songs whose artist vanished from the prior graph
    let artists = &graph.artists;
    graph.songs.retain(|_, song| artists.contains_key(&song.artist_id));
    let songs = &graph.songs;
    graph.media.retain(|_, media| songs.contains_key(&media.song_id));
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ProviderType;

    fn scanned(path: &str, hash: &str, artist: &str, title: &str, priority: i32) -> ScannedMedia {
        ScannedMedia {
            file: MediaFile {
                path: path.to_string(),
                provider_type: ProviderType::LocalFile,
                size_bytes: 10,
                content_hash: hash.to_string(),
                duration_seconds: 180,
                raw_tags: None,
                parsed_artist: artist.to_string(),
                parsed_title: title.to_string(),
            },
            path_id: 1,
            priority,
            artist: artist.to_string(),
            title: title.to_string(),
        }
    }

    fn build(items: Vec<ScannedMedia>, prior: LibraryGraph) -> LibraryGraph {
        let mut aggregator = LibraryAggregator::new(prior);
        for item in items {
            aggregator.add(item);
        }
        aggregator.build(&[PathBuf::from("/k")])
    }

    #[test]
    fn songs_group_case_insensitively() {
        let graph = build(
            vec![
                scanned("/k/a.mp4", "h1", "Queen", "Under Pressure", 0),
                scanned("/k/b.mp4", "h2", "QUEEN", "under  pressure", 0),
                scanned("/k/c.mp4", "h3", "Queen", "Bicycle Race", 0),
            ],
            LibraryGraph::default(),
        );
        assert_eq!(graph.artists.len(), 1);
        assert_eq!(graph.songs.len(), 2);
        let pressure = graph.songs.values().find(|s| s.title == "Under Pressure").unwrap();
        assert_eq!(pressure.num_media, 2);
        assert!(graph.is_consistent());
    }

    #[test]
    fn duplicate_content_is_one_song_with_two_media() {
        let graph = build(
            vec![
                scanned("/k/x/Song.mp4", "same", "Artist", "Song", 0),
                scanned("/k/y/Other Name.mp4", "same", "Someone", "Else", 0),
            ],
            LibraryGraph::default(),
        );
        assert_eq!(graph.songs.len(), 1);
        assert_eq!(graph.media.len(), 2);
        let song = graph.songs.values().next().unwrap();
        assert_eq!(song.num_media, 2);
        // smallest path wins the tie
        assert_eq!(song.title, "Song");
        assert_eq!(graph.artists.values().next().unwrap().name, "Artist");
    }

    #[test]
    fn priority_decides_conflicting_duplicates() {
        let graph = build(
            vec![
                scanned("/k/a.mp4", "same", "Low", "Low Title", 0),
                scanned("/k/b.mp4", "same", "High", "High Title", 9),
            ],
            LibraryGraph::default(),
        );
        let song = graph.songs.values().next().unwrap();
        assert_eq!(song.title, "High Title");
    }

    #[test]
    fn insertion_order_does_not_matter() {
        let items = vec![
            scanned("/k/1.mp4", "h1", "The Band", "One", 0),
            scanned("/k/2.mp4", "h2", "the band", "Two", 0),
            scanned("/k/3.mp4", "h1", "Other", "Uno", 2),
            scanned("/k/4.mp4", "h4", "Solo", "Four", 1),
        ];
        let mut reversed = items.clone();
        reversed.reverse();

        let forward = build(items, LibraryGraph::default());
        let backward = build(reversed, LibraryGraph::default());
        assert_eq!(forward, backward);
    }

    #[test]
    fn rescan_keeps_ids_and_prunes_missing() {
        let first = build(
            vec![
                scanned("/k/a.mp4", "h1", "A", "One", 0),
                scanned("/k/b.mp4", "h2", "B", "Two", 0),
            ],
            LibraryGraph::default(),
        );
        let again = build(
            vec![
                scanned("/k/a.mp4", "h1", "A", "One", 0),
                scanned("/k/b.mp4", "h2", "B", "Two", 0),
            ],
            first.clone(),
        );
        assert_eq!(first, again);

        let pruned = build(vec![scanned("/k/b.mp4", "h2", "B", "Two", 0)], first.clone());
        assert_eq!(pruned.songs.len(), 1);
        assert_eq!(pruned.artists.len(), 1);
        let kept = pruned.songs.values().next().unwrap();
        assert_eq!(Some(kept), first.songs.get(&kept.song_id));
    }

    #[test]
    fn moved_file_keeps_its_song() {
        let first = build(vec![scanned("/k/a.mp4", "h1", "A", "One", 0)], LibraryGraph::default());
        let song_id = *first.songs.keys().next().unwrap();

        let moved = build(
            vec![scanned("/k/sub/renamed.mp4", "h1", "Other", "Name", 0)],
            first,
        );
        assert_eq!(moved.songs.len(), 1);
        assert_eq!(moved.songs.get(&song_id).unwrap().title, "One");
        assert_eq!(moved.media.values().next().unwrap().path, "/k/sub/renamed.mp4");
    }

    #[test]
    fn unpruned_roots_keep_unseen_media() {
        let first = build(vec![scanned("/k/a.mp4", "h1", "A", "One", 0)], LibraryGraph::default());
        let mut aggregator = LibraryAggregator::new(first.clone());
        aggregator.add(scanned("/k/b.mp4", "h2", "B", "Two", 0));
        let graph = aggregator.build(&[]);
        assert_eq!(graph.songs.len(), 2);
        assert!(graph.media.contains_key("/k/a.mp4"));
    }

    #[test]
    fn same_path_keeps_best_ranked_result() {
        let mut aggregator = LibraryAggregator::new(LibraryGraph::default());
        aggregator.add(scanned("/k/a.mp4", "h1", "A", "Low", 0));
        aggregator.add(scanned("/k/a.mp4", "h1", "A", "High", 3));
        aggregator.add(scanned("/k/a.mp4", "h1", "A", "Later", 3));
        assert_eq!(aggregator.len(), 1);
        let graph = aggregator.build(&[]);
        assert_eq!(graph.songs.values().next().unwrap().title, "High");
    }
}
