//! In-memory track table — the engine's read-only view of the library.
//!
//! Tracks are keyed by a stable integer id. Iteration is always in id
//! order so every downstream computation is deterministic for a given
//! input.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::facets::{self, Facets};

/// A single library track with raw tag fields plus derived facets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub id: i64,
    pub title: String,
    pub artist: String,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub bpm: Option<f64>,
    /// Raw key string as tagged; normalized lazily via `camelot`.
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    /// File path or external identifier — opaque to the engine.
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub comment: String,

    /// Facets derived from `comment`; recomputed whenever the comment changes.
    #[serde(skip)]
    pub facets: Facets,
}

impl Track {
    pub fn new(id: i64, title: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            artist: artist.into(),
            album: None,
            bpm: None,
            key: None,
            year: None,
            location: None,
            comment: String::new(),
            facets: Facets::default(),
        }
    }

    /// Replace the comment and recompute derived facets.
    pub fn set_comment(&mut self, comment: impl Into<String>) {
        self.comment = comment.into();
        self.facets = facets::parse_comment(&self.comment);
    }
}

/// Id-ordered track table. Read-only during a pipeline run.
#[derive(Debug, Default, Clone)]
pub struct TrackTable {
    tracks: BTreeMap<i64, Track>,
}

impl TrackTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from deserialized tracks, computing facets for each.
    pub fn from_tracks(tracks: Vec<Track>) -> Self {
        let mut table = Self::new();
        for mut t in tracks {
            t.facets = facets::parse_comment(&t.comment);
            table.tracks.insert(t.id, t);
        }
        table
    }

    pub fn insert(&mut self, mut track: Track) {
        track.facets = facets::parse_comment(&track.comment);
        self.tracks.insert(track.id, track);
    }

    pub fn get(&self, id: i64) -> Option<&Track> {
        self.tracks.get(&id)
    }

    pub fn contains(&self, id: i64) -> bool {
        self.tracks.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// All tracks in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }

    /// Filter a candidate id list down to ids present in the table,
    /// preserving the caller's ordering.
    pub fn filter_known<'a>(&self, ids: impl IntoIterator<Item = &'a i64>) -> Vec<i64> {
        ids.into_iter()
            .copied()
            .filter(|id| self.tracks.contains_key(id))
            .collect()
    }

    /// Re-derive facets for every track. Idempotent; only needed if
    /// comments were mutated without going through `set_comment`.
    pub fn reparse_comments(&mut self) {
        for track in self.tracks.values_mut() {
            track.facets = facets::parse_comment(&track.comment);
        }
    }
}
