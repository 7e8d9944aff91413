use std::collections::BTreeMap;

use common::{normalize_key, Artist, ArtistId, LibrarySnapshot, Media, MediaId, Normalized, Song, SongId};
use serde::{Deserialize, Serialize};

use crate::LibraryStats;

/// The persisted artist/song/media graph. Media are keyed by file path.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryGraph {
    pub artists: BTreeMap<ArtistId, Artist>,
    pub songs: BTreeMap<SongId, Song>,
    pub media: BTreeMap<String, Media>,
}

impl LibraryGraph {
    pub fn stats(&self) -> LibraryStats {
        LibraryStats {
            artists: self.artists.len(),
            songs: self.songs.len(),
            media: self.media.len(),
        }
    }

    pub fn next_artist_id(&self) -> ArtistId {
        self.artists.keys().next_back().map(|id| id + 1).unwrap_or(1)
    }

    pub fn next_song_id(&self) -> SongId {
        self.songs.keys().next_back().map(|id| id + 1).unwrap_or(1)
    }

    pub fn next_media_id(&self) -> MediaId {
        self.media
            .values()
            .map(|media| media.media_id)
            .max()
            .map(|id| id + 1)
            .unwrap_or(1)
    }

    pub fn artist_by_name(&self, name: &str) -> Option<&Artist> {
        let key = normalize_key(name);
        self.artists
            .values()
            .find(|artist| normalize_key(&artist.name) == key)
    }


    /// Every song references an existing artist and counts its media, and
    /// every artist lists exactly its songs.
    pub fn is_consistent(&self) -> bool {
        let mut counts: BTreeMap<SongId, u32> = BTreeMap::new();
        for media in self.media.values() {
            if !self.songs.contains_key(&media.song_id) {
                return false;
            }
            *counts.entry(media.song_id).or_default() += 1;
        }
        let songs_ok = self.songs.values().all(|song| {
            self.artists.contains_key(&song.artist_id)
                && counts.get(&song.song_id).copied().unwrap_or(0) == song.num_media
        });
        let artists_ok = self.artists.values().all(|artist| {
            let mut expected: Vec<SongId> = self
                .songs
                .values()
                .filter(|song| song.artist_id == artist.artist_id)
                .map(|song| song.song_id)
                .collect();
            let mut listed = artist.song_ids.clone();
            expected.sort_unstable();
            listed.sort_unstable();
            expected == listed
        });
        songs_ok && artists_ok
    }

    /// Client view: artists by name, songs by title, and no song whose
    /// artist is missing.
    pub fn snapshot(&self) -> LibrarySnapshot {
        let songs: BTreeMap<SongId, Song> = self
            .songs
            .iter()
            .filter(|(_, song)| self.artists.contains_key(&song.artist_id))
            .map(|(id, song)| (*id, song.clone()))
            .collect();

        let artists: BTreeMap<ArtistId, Artist> = self
            .artists
            .iter()
            .map(|(id, artist)| {
                let mut artist = artist.clone();
                artist.song_ids.retain(|song_id| songs.contains_key(song_id));
                (*id, artist)
            })
            .collect();

        let mut artist_order: Vec<(String, ArtistId)> = artists
            .values()
            .map(|artist| (normalize_key(&artist.name), artist.artist_id))
            .collect();
        artist_order.sort();

        let artist_key = |artist_id: ArtistId| {
            artists
                .get(&artist_id)
                .map(|artist| normalize_key(&artist.name))
                .unwrap_or_default()
        };
        let mut song_order: Vec<(String, String, SongId)> = songs
            .values()
            .map(|song| (normalize_key(&song.title), artist_key(song.artist_id), song.song_id))
            .collect();
        song_order.sort();

        LibrarySnapshot {
            artists: Normalized {
                result: artist_order.into_iter().map(|(_, id)| id).collect(),
                entities: artists,
            },
            songs: Normalized {
                result: song_order.into_iter().map(|(_, _, id)| id).collect(),
                entities: songs,
            },
        }
    }
}
