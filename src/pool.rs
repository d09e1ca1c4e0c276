//! Pool analysis — statistical profile of a candidate track pool.
//!
//! Pure and synchronous: aggregates BPM/key/facet distributions and
//! cross-references the pool against any supplied trees. No LLM involved.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::camelot::normalize_camelot;
use crate::error::EngineError;
use crate::facets::tokenize;
use crate::library::TrackTable;
use crate::trees::{Tree, TreeKind, walk_leaves};

const BPM_BUCKET_SIZE: f64 = 5.0;
const TOP_FACET_VALUES: usize = 20;
const TOP_LOCATIONS: usize = 10;
const TOP_KEYS: usize = 24;
const TOP_LEAF_HITS: usize = 10;

/// A counted facet value.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ValueCount {
    pub value: String,
    pub count: usize,
}

/// One histogram bucket.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BpmBucket {
    pub bpm_range: String,
    pub count: usize,
}

/// BPM distribution over the pool.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BpmStats {
    pub min: f64,
    pub max: f64,
    pub median: f64,
    pub mean: f64,
    pub histogram: Vec<BpmBucket>,
}

/// A tree leaf overlapping the pool.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LeafHit {
    pub leaf_id: String,
    pub leaf_title: String,
    pub overlap_count: usize,
    pub total_in_leaf: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lineage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub genre_context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scene_context: Option<String>,
}

/// Structured profile of a track pool.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolProfile {
    pub track_count: usize,
    pub tracks_with_bpm: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bpm: Option<BpmStats>,
    pub keys: Vec<ValueCount>,
    pub genres: Vec<ValueCount>,
    pub moods: Vec<ValueCount>,
    pub descriptors: Vec<ValueCount>,
    pub locations: Vec<ValueCount>,
    pub eras: Vec<ValueCount>,
    pub tree_context: BTreeMap<String, Vec<LeafHit>>,
}

/// Analyze a track pool and produce its profile.
///
/// `track_ids` are filtered to ids present in the table; an empty result
/// is an error (the caller enforces the minimum pool size separately).
pub fn analyze_pool(
    table: &TrackTable,
    track_ids: &[i64],
    trees: &BTreeMap<TreeKind, Tree>,
) -> Result<PoolProfile, EngineError> {
    let valid_ids = table.filter_known(track_ids);
    if valid_ids.is_empty() {
        return Err(EngineError::InsufficientPool {
            got: 0,
            min: crate::MIN_POOL_SIZE,
        });
    }

    let tracks: Vec<_> = valid_ids.iter().filter_map(|id| table.get(*id)).collect();

    // BPM distribution
    let bpms: Vec<f64> = tracks.iter().filter_map(|t| t.bpm).collect();
    let bpm_stats = bpm_statistics(&bpms);

    // Key distribution
    let mut key_counts: HashMap<String, usize> = HashMap::new();
    for t in &tracks {
        if let Some(key) = t.key.as_deref().and_then(normalize_camelot) {
            *key_counts.entry(key.to_string()).or_default() += 1;
        }
    }

    // Genres from both slots
    let mut genre_counts: HashMap<String, usize> = HashMap::new();
    for t in &tracks {
        for g in [&t.facets.genre1, &t.facets.genre2] {
            if !g.is_empty() {
                *genre_counts.entry(g.clone()).or_default() += 1;
            }
        }
    }

    // Mood and descriptor vocabularies, tokenized
    let mut mood_counts: HashMap<String, usize> = HashMap::new();
    let mut desc_counts: HashMap<String, usize> = HashMap::new();
    for t in &tracks {
        for token in tokenize(&t.facets.mood) {
            *mood_counts.entry(token).or_default() += 1;
        }
        for token in tokenize(&t.facets.descriptors) {
            *desc_counts.entry(token).or_default() += 1;
        }
    }

    // Locations and eras, whole values
    let mut loc_counts: HashMap<String, usize> = HashMap::new();
    let mut era_counts: HashMap<String, usize> = HashMap::new();
    for t in &tracks {
        if !t.facets.location.is_empty() {
            *loc_counts.entry(t.facets.location.clone()).or_default() += 1;
        }
        if !t.facets.era.is_empty() {
            *era_counts.entry(t.facets.era.clone()).or_default() += 1;
        }
    }

    Ok(PoolProfile {
        track_count: valid_ids.len(),
        tracks_with_bpm: bpms.len(),
        bpm: bpm_stats,
        keys: top_counts(key_counts, TOP_KEYS),
        genres: top_counts(genre_counts, TOP_FACET_VALUES),
        moods: top_counts(mood_counts, TOP_FACET_VALUES),
        descriptors: top_counts(desc_counts, TOP_FACET_VALUES),
        locations: top_counts(loc_counts, TOP_LOCATIONS),
        eras: top_counts(era_counts, TOP_LOCATIONS),
        tree_context: lookup_tree_context(&valid_ids, trees),
    })
}

fn bpm_statistics(bpms: &[f64]) -> Option<BpmStats> {
    if bpms.is_empty() {
        return None;
    }
    let mut sorted = bpms.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let min = sorted[0];
    let max = sorted[sorted.len() - 1];
    let median = sorted[sorted.len() / 2];
    let mean = sorted.iter().sum::<f64>() / sorted.len() as f64;
    Some(BpmStats {
        min: round1(min),
        max: round1(max),
        median: round1(median),
        mean: round1(mean),
        histogram: bpm_histogram(&sorted),
    })
}

fn bpm_histogram(bpms: &[f64]) -> Vec<BpmBucket> {
    let min = bpms.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = bpms.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let lo = ((min / BPM_BUCKET_SIZE).floor() * BPM_BUCKET_SIZE) as i64;
    let hi = (((max / BPM_BUCKET_SIZE).floor() + 1.0) * BPM_BUCKET_SIZE) as i64;

    let mut counts: HashMap<i64, usize> = HashMap::new();
    for &bpm in bpms {
        let bucket = ((bpm / BPM_BUCKET_SIZE).floor() * BPM_BUCKET_SIZE) as i64;
        *counts.entry(bucket).or_default() += 1;
    }

    let step = BPM_BUCKET_SIZE as i64;
    (lo..=hi)
        .step_by(step as usize)
        .map(|b| BpmBucket {
            bpm_range: format!("{}-{}", b, b + step),
            count: counts.get(&b).copied().unwrap_or(0),
        })
        .collect()
}

/// Sort counts descending, ties by value for determinism, keep the top N.
fn top_counts(counts: HashMap<String, usize>, n: usize) -> Vec<ValueCount> {
    let mut out: Vec<ValueCount> = counts
        .into_iter()
        .map(|(value, count)| ValueCount { value, count })
        .collect();
    out.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value)));
    out.truncate(n);
    out
}

fn lookup_tree_context(
    pool_ids: &[i64],
    trees: &BTreeMap<TreeKind, Tree>,
) -> BTreeMap<String, Vec<LeafHit>> {
    let pool: std::collections::HashSet<i64> = pool_ids.iter().copied().collect();
    let mut context = BTreeMap::new();

    for (kind, tree) in trees {
        let mut hits: Vec<LeafHit> = walk_leaves(tree)
            .into_iter()
            .filter_map(|leaf| {
                let overlap = leaf.track_ids.iter().filter(|id| pool.contains(id)).count();
                if overlap == 0 {
                    return None;
                }
                Some(LeafHit {
                    leaf_id: leaf.id.to_string(),
                    leaf_title: leaf.title.to_string(),
                    overlap_count: overlap,
                    total_in_leaf: leaf.track_ids.len(),
                    lineage: leaf.lineage.map(str::to_string),
                    category: leaf.category.map(str::to_string),
                    genre_context: leaf.genre_context.map(str::to_string),
                    scene_context: leaf.scene_context.map(str::to_string),
                })
            })
            .collect();

        hits.sort_by(|a, b| b.overlap_count.cmp(&a.overlap_count));
        hits.truncate(TOP_LEAF_HITS);
        context.insert(kind.as_str().to_string(), hits);
    }

    context
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}
