//! Weighted faceted search over the track table.
//!
//! Each facet in the query contributes a fixed number of points per match;
//! totals are normalized against the maximum attainable for that query so
//! scores are comparable across queries.

use serde::Serialize;

use crate::library::{Track, TrackTable};

const GENRE_WEIGHT: f64 = 3.0;
const LOCATION_WEIGHT: f64 = 2.0;
const BPM_WEIGHT: f64 = 2.0;
const MOOD_WEIGHT: f64 = 1.5;
const DESCRIPTOR_WEIGHT: f64 = 1.5;
const ERA_WEIGHT: f64 = 1.5;
const YEAR_WEIGHT: f64 = 1.0;

/// A faceted query. Empty lists / None bounds are ignored.
#[derive(Debug, Clone, Default)]
pub struct FacetQuery {
    pub genres: Vec<String>,
    pub mood: Vec<String>,
    pub descriptors: Vec<String>,
    pub location: Vec<String>,
    pub era: Vec<String>,
    pub bpm_min: Option<f64>,
    pub bpm_max: Option<f64>,
    pub year_min: Option<i32>,
    pub year_max: Option<i32>,
    /// Case-insensitive substring over title, artist, comment, album.
    pub text_search: Option<String>,
}

impl FacetQuery {
    fn has_bpm_range(&self) -> bool {
        self.bpm_min.is_some() || self.bpm_max.is_some()
    }

    fn has_year_range(&self) -> bool {
        self.year_min.is_some() || self.year_max.is_some()
    }

    /// Maximum attainable score for this query (the normalization base).
    fn max_possible(&self) -> f64 {
        let mut max = 0.0;
        max += GENRE_WEIGHT * self.genres.len() as f64;
        max += MOOD_WEIGHT * self.mood.len() as f64;
        max += DESCRIPTOR_WEIGHT * self.descriptors.len() as f64;
        max += LOCATION_WEIGHT * self.location.len() as f64;
        max += ERA_WEIGHT * self.era.len() as f64;
        if self.has_bpm_range() {
            max += BPM_WEIGHT;
        }
        if self.has_year_range() {
            max += YEAR_WEIGHT;
        }
        max
    }
}

/// Which query values a track matched, facet by facet.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct MatchedFacets {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub genres: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub mood: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub descriptors: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub location: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub era: Vec<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub bpm: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub year: bool,
}

/// One scored search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub id: i64,
    /// Normalized to 0..1, rounded to 4 decimals.
    pub score: f64,
    pub matched: MatchedFacets,
}

/// Score all tracks against the query and return hits with
/// `score >= min_score`, sorted by score descending, capped at `max_results`.
pub fn scored_search(
    table: &TrackTable,
    query: &FacetQuery,
    min_score: f64,
    max_results: usize,
) -> Vec<SearchHit> {
    let max_possible = query.max_possible();
    if max_possible == 0.0 {
        return Vec::new();
    }

    let mut results: Vec<SearchHit> = table
        .iter()
        .filter_map(|track| {
            let (score, matched) = score_track(track, query);
            if score <= 0.0 {
                return None;
            }
            let normalized = round4(score / max_possible);
            if normalized < min_score {
                return None;
            }
            Some(SearchHit {
                id: track.id,
                score: normalized,
                matched,
            })
        })
        .collect();

    // Stable sort keeps id order among ties, so output is deterministic.
    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    results.truncate(max_results);
    results
}

fn score_track(track: &Track, query: &FacetQuery) -> (f64, MatchedFacets) {
    let mut score = 0.0;
    let mut matched = MatchedFacets::default();
    let facets = &track.facets;

    // Genres: equality against either genre slot.
    let g1 = facets.genre1.to_lowercase();
    let g2 = facets.genre2.to_lowercase();
    for g in &query.genres {
        let gl = g.to_lowercase();
        if gl == g1 || gl == g2 {
            score += GENRE_WEIGHT;
            matched.genres.push(g.clone());
        }
    }

    // Mood / descriptor / location / era: substring containment.
    let mood_val = facets.mood.to_lowercase();
    for kw in &query.mood {
        if mood_val.contains(&kw.to_lowercase()) {
            score += MOOD_WEIGHT;
            matched.mood.push(kw.clone());
        }
    }

    let desc_val = facets.descriptors.to_lowercase();
    for kw in &query.descriptors {
        if desc_val.contains(&kw.to_lowercase()) {
            score += DESCRIPTOR_WEIGHT;
            matched.descriptors.push(kw.clone());
        }
    }

    let loc_val = facets.location.to_lowercase();
    for loc in &query.location {
        if loc_val.contains(&loc.to_lowercase()) {
            score += LOCATION_WEIGHT;
            matched.location.push(loc.clone());
        }
    }

    let era_val = facets.era.to_lowercase();
    for era in &query.era {
        if era_val.contains(&era.to_lowercase()) {
            score += ERA_WEIGHT;
            matched.era.push(era.clone());
        }
    }

    // BPM range: inclusive, either bound may be absent.
    if query.has_bpm_range() {
        if let Some(bpm) = track.bpm {
            let mut in_range = bpm > 0.0;
            if let Some(lo) = query.bpm_min {
                in_range = in_range && bpm >= lo;
            }
            if let Some(hi) = query.bpm_max {
                in_range = in_range && bpm <= hi;
            }
            if in_range {
                score += BPM_WEIGHT;
                matched.bpm = true;
            }
        }
    }

    // Year range: same shape.
    if query.has_year_range() {
        if let Some(year) = track.year {
            let mut in_range = year > 0;
            if let Some(lo) = query.year_min {
                in_range = in_range && year >= lo;
            }
            if let Some(hi) = query.year_max {
                in_range = in_range && year <= hi;
            }
            if in_range {
                score += YEAR_WEIGHT;
                matched.year = true;
            }
        }
    }

    // Free text acts as a gate, not a score contribution.
    if let Some(text) = query.text_search.as_deref() {
        let text = text.trim().to_lowercase();
        if !text.is_empty() && !text_matches(track, &text) {
            return (0.0, MatchedFacets::default());
        }
    }

    (score, matched)
}

fn text_matches(track: &Track, needle: &str) -> bool {
    track.title.to_lowercase().contains(needle)
        || track.artist.to_lowercase().contains(needle)
        || track.comment.to_lowercase().contains(needle)
        || track
            .album
            .as_deref()
            .is_some_and(|a| a.to_lowercase().contains(needle))
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::Track;

    fn table() -> TrackTable {
        let mut table = TrackTable::new();
        let mut t1 = Track::new(1, "Strings of Life", "Rhythim Is Rhythim");
        t1.bpm = Some(122.0);
        t1.year = Some(1987);
        t1.set_comment("House; Techno; driving, uplifting; euphoric; Detroit, late 1980s.");
        table.insert(t1);

        let mut t2 = Track::new(2, "Phylyps Trak", "Basic Channel");
        t2.bpm = Some(120.0);
        t2.set_comment("Dub Techno; ; cavernous; hypnotic; Berlin, early 1990s.");
        table.insert(t2);

        let mut t3 = Track::new(3, "Untitled", "Unknown");
        t3.set_comment("");
        table.insert(t3);
        table
    }

    fn genre_query(genres: &[&str]) -> FacetQuery {
        FacetQuery {
            genres: genres.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_query_returns_nothing() {
        let hits = scored_search(&table(), &FacetQuery::default(), 0.0, 10);
        assert!(hits.is_empty());
    }

    #[test]
    fn test_genre_match_either_slot() {
        let hits = scored_search(&table(), &genre_query(&["techno"]), 0.0, 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 1);
        assert_eq!(hits[0].score, 1.0);
        assert_eq!(hits[0].matched.genres, vec!["techno"]);
    }

    #[test]
    fn test_score_normalization() {
        // Two genres queried, one matched → 3.0 / 6.0.
        let hits = scored_search(&table(), &genre_query(&["House", "Ambient"]), 0.0, 10);
        assert_eq!(hits[0].score, 0.5);
    }

    #[test]
    fn test_adding_matching_facet_increases_score() {
        let base = FacetQuery {
            genres: vec!["House".into()],
            ..Default::default()
        };
        let richer = FacetQuery {
            genres: vec!["House".into()],
            mood: vec!["euphoric".into()],
            ..Default::default()
        };
        let s1 = scored_search(&table(), &base, 0.0, 10)[0].score;
        let s2 = scored_search(&table(), &richer, 0.0, 10)[0].score;
        // Both facets hit: absolute points grow 3.0 → 4.5 of max 4.5.
        assert_eq!(s1, 1.0);
        assert_eq!(s2, 1.0);
        // Against a track matching only the genre the score drops below 1.
        let partial = FacetQuery {
            genres: vec!["Dub Techno".into()],
            mood: vec!["euphoric".into()],
            ..Default::default()
        };
        let hits = scored_search(&table(), &partial, 0.0, 10);
        assert_eq!(hits[0].id, 2);
        assert!(hits[0].score < 1.0);
    }

    #[test]
    fn test_bpm_range_bounds() {
        let q = FacetQuery {
            bpm_min: Some(121.0),
            bpm_max: None,
            ..Default::default()
        };
        let hits = scored_search(&table(), &q, 0.0, 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 1);
        assert!(hits[0].matched.bpm);
    }

    #[test]
    fn test_min_score_filter() {
        let q = FacetQuery {
            genres: vec!["House".into(), "Ambient".into(), "Jazz".into()],
            ..Default::default()
        };
        // Track 1 scores 3.0/9.0 = 0.3333 — below a 0.5 floor.
        let hits = scored_search(&table(), &q, 0.5, 10);
        assert!(hits.is_empty());
        let hits = scored_search(&table(), &q, 0.3, 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].score, 0.3333);
    }

    #[test]
    fn test_text_search_gates_results() {
        let q = FacetQuery {
            genres: vec!["Techno".into()],
            text_search: Some("basic channel".into()),
            ..Default::default()
        };
        // Track 1 matches the genre but fails the text gate.
        let hits = scored_search(&table(), &q, 0.0, 10);
        assert!(hits.is_empty());
    }

    #[test]
    fn test_max_results_truncation() {
        let q = FacetQuery {
            mood: vec!["o".into()],
            ..Default::default()
        };
        let hits = scored_search(&table(), &q, 0.0, 1);
        assert_eq!(hits.len(), 1);
    }
}
