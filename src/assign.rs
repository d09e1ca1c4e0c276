//! Track-to-act assignment — weighted scoring matrix, greedy best-fit,
//! overflow rebalancing, and LLM adjudication of borderline calls.

use std::collections::HashMap;

use rayon::prelude::*;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::facets::tokenize;
use crate::library::{Track, TrackTable};
use crate::llm::{self, Llm, Tier};
use crate::narrative::Act;

const BPM_WEIGHT: f64 = 0.30;
const MOOD_WEIGHT: f64 = 0.30;
const GENRE_WEIGHT: f64 = 0.25;
const DESCRIPTOR_WEIGHT: f64 = 0.15;

/// Max tracks submitted for borderline review.
const BORDERLINE_CAP: usize = 30;
/// Top-2 scores closer than this fraction of the top score are borderline.
const BORDERLINE_MARGIN: f64 = 0.10;
/// Rebalance gives up after this many passes even if still moving tracks.
const MAX_REBALANCE_PASSES: usize = 3;

/// Per-act track lists: `assignments[act_idx]` holds `(track_id, score)`
/// sorted by score descending. Every scored track lives in exactly one act.
pub type ActAssignments = Vec<Vec<(i64, f64)>>;

/// The full score matrix in pool order: one row per track, one column per act.
pub struct ScoreMatrix {
    rows: Vec<(i64, Vec<f64>)>,
    by_id: HashMap<i64, Vec<f64>>,
}

impl ScoreMatrix {
    pub fn scores_for(&self, track_id: i64) -> Option<&[f64]> {
        self.by_id.get(&track_id).map(Vec::as_slice)
    }

    pub fn rows(&self) -> &[(i64, Vec<f64>)] {
        &self.rows
    }
}

/// Score every pool track against every act. Pure and parallel.
pub fn score_pool(table: &TrackTable, track_ids: &[i64], acts: &[Act]) -> ScoreMatrix {
    let valid = table.filter_known(track_ids);
    let rows: Vec<(i64, Vec<f64>)> = valid
        .par_iter()
        .filter_map(|&id| {
            let track = table.get(id)?;
            let scores = acts.iter().map(|act| score_track_for_act(track, act)).collect();
            Some((id, scores))
        })
        .collect();
    let by_id = rows.iter().map(|(id, s)| (*id, s.clone())).collect();
    ScoreMatrix { rows, by_id }
}

/// Score a single track against one act's criteria. Returns 0.0..=1.0.
///
/// Each component only enters the weight denominator when it is
/// applicable: guidance lists must be non-empty, and the BPM component
/// needs both a track BPM and an act range.
pub fn score_track_for_act(track: &Track, act: &Act) -> f64 {
    let mut score = 0.0;
    let mut weights_total = 0.0;

    // BPM fit: 1.0 at the range center, quadratic decay outward.
    if let (Some(bpm), &[lo, hi]) = (track.bpm, act.bpm_range.as_slice()) {
        let center = (lo + hi) / 2.0;
        let spread = ((hi - lo) / 2.0).max(5.0);
        let dist = (bpm - center).abs();
        let bpm_score = (1.0 - (dist / (spread * 2.0)).powi(2)).max(0.0);
        score += bpm_score * BPM_WEIGHT;
        weights_total += BPM_WEIGHT;
    }

    // Mood alignment: Jaccard of tokenized mood sets.
    let mood_targets: std::collections::HashSet<String> =
        act.mood_targets.iter().map(|m| m.to_lowercase()).collect();
    if !mood_targets.is_empty() {
        let track_moods = tokenize(&track.facets.mood);
        if !track_moods.is_empty() {
            let overlap = mood_targets.intersection(&track_moods).count();
            let union = mood_targets.union(&track_moods).count().max(1);
            score += (overlap as f64 / union as f64) * MOOD_WEIGHT;
        }
        weights_total += MOOD_WEIGHT;
    }

    // Genre match: fraction of the guidance list the track covers.
    let genre_guidance: std::collections::HashSet<String> =
        act.genre_guidance.iter().map(|g| g.to_lowercase()).collect();
    if !genre_guidance.is_empty() {
        let mut track_genres = std::collections::HashSet::new();
        for g in [&track.facets.genre1, &track.facets.genre2] {
            let g = g.trim().to_lowercase();
            if !g.is_empty() {
                track_genres.insert(g);
            }
        }
        if !track_genres.is_empty() {
            let overlap = genre_guidance.intersection(&track_genres).count();
            score += (overlap as f64 / genre_guidance.len() as f64) * GENRE_WEIGHT;
        }
        weights_total += GENRE_WEIGHT;
    }

    // Descriptor match: same shape, tokenized.
    let desc_guidance: std::collections::HashSet<String> = act
        .descriptor_guidance
        .iter()
        .map(|d| d.to_lowercase())
        .collect();
    if !desc_guidance.is_empty() {
        let track_descs = tokenize(&track.facets.descriptors);
        if !track_descs.is_empty() {
            let overlap = desc_guidance.intersection(&track_descs).count();
            score += (overlap as f64 / desc_guidance.len() as f64) * DESCRIPTOR_WEIGHT;
        }
        weights_total += DESCRIPTOR_WEIGHT;
    }

    if weights_total > 0.0 {
        score / weights_total
    } else {
        0.0
    }
}

/// Assign each track to its highest-scoring act; ties go to the first act.
pub fn greedy_assign(matrix: &ScoreMatrix, act_count: usize) -> ActAssignments {
    let mut assignments: ActAssignments = vec![Vec::new(); act_count];
    for (tid, scores) in matrix.rows() {
        let mut best_idx = 0;
        let mut best_score = f64::NEG_INFINITY;
        for (idx, &s) in scores.iter().enumerate() {
            if s > best_score {
                best_score = s;
                best_idx = idx;
            }
        }
        assignments[best_idx].push((*tid, best_score));
    }
    sort_by_score(&mut assignments);
    assignments
}

/// Redistribute tracks from over-subscribed acts (>2× target) to
/// under-subscribed ones (<0.5× target). At most three passes; stops
/// early once a pass moves nothing.
pub fn rebalance(
    assignments: &mut ActAssignments,
    acts: &[Act],
    matrix: &ScoreMatrix,
    cancel: &CancellationToken,
) {
    for _ in 0..MAX_REBALANCE_PASSES {
        if cancel.is_cancelled() {
            break;
        }
        let mut moved = 0usize;

        for act_idx in 0..acts.len() {
            let target = acts[act_idx].target_track_count.max(1) as usize;
            if assignments[act_idx].len() <= target * 2 {
                continue;
            }

            let under: Vec<usize> = (0..acts.len())
                .filter(|&i| {
                    i != act_idx
                        && (assignments[i].len() as f64)
                            < acts[i].target_track_count.max(1) as f64 * 0.5
                })
                .collect();
            if under.is_empty() {
                continue;
            }

            // Keep the top 2× target; everything below is a relocation candidate.
            let excess: Vec<(i64, f64)> = assignments[act_idx][target * 2..].to_vec();
            for (tid, _) in excess {
                let Some(scores) = matrix.scores_for(tid) else {
                    continue;
                };
                let best_alt = under
                    .iter()
                    .map(|&i| (i, scores[i]))
                    .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
                if let Some((alt_idx, alt_score)) = best_alt {
                    assignments[act_idx].retain(|(t, _)| *t != tid);
                    assignments[alt_idx].push((tid, alt_score));
                    moved += 1;
                }
            }
        }

        if moved == 0 {
            break;
        }
    }
    sort_by_score(assignments);
}

/// A track whose top two act scores are within the borderline margin.
#[derive(Debug, Clone)]
pub struct BorderlineTrack {
    pub track_id: i64,
    pub assigned_act: Option<usize>,
    /// Up to three `(act_idx, score)` candidates, best first.
    pub top_acts: Vec<(usize, f64)>,
}

/// Collect tracks scoring nearly equally across acts, capped for review.
pub fn find_borderline(matrix: &ScoreMatrix, assignments: &ActAssignments) -> Vec<BorderlineTrack> {
    let mut assigned_act: HashMap<i64, usize> = HashMap::new();
    for (act_idx, tracks) in assignments.iter().enumerate() {
        for (tid, _) in tracks {
            assigned_act.insert(*tid, act_idx);
        }
    }

    let mut borderline = Vec::new();
    for (tid, scores) in matrix.rows() {
        let mut sorted: Vec<(usize, f64)> = scores.iter().copied().enumerate().collect();
        sorted.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        if sorted.len() < 2 {
            continue;
        }
        let (top, second) = (sorted[0].1, sorted[1].1);
        if top > 0.0 && (top - second) / top < BORDERLINE_MARGIN {
            borderline.push(BorderlineTrack {
                track_id: *tid,
                assigned_act: assigned_act.get(tid).copied(),
                top_acts: sorted.into_iter().take(3).collect(),
            });
            if borderline.len() >= BORDERLINE_CAP {
                break;
            }
        }
    }
    borderline
}

/// Ask the mechanical tier to adjudicate borderline assignments and apply
/// bounds-checked reassignments. Failure here is non-fatal: the prior
/// assignment stands.
pub async fn review_borderlines(
    table: &TrackTable,
    borderline: &[BorderlineTrack],
    acts: &[Act],
    assignments: &mut ActAssignments,
    matrix: &ScoreMatrix,
    llm: &dyn Llm,
) {
    let track_info: Vec<_> = borderline
        .iter()
        .filter_map(|b| {
            let track = table.get(b.track_id)?;
            Some(json!({
                "track_id": b.track_id,
                "title": &track.title,
                "artist": &track.artist,
                "bpm": track.bpm.map(|v| (v * 10.0).round() / 10.0),
                "mood": &track.facets.mood,
                "genre1": &track.facets.genre1,
                "genre2": &track.facets.genre2,
                "currently_assigned_act": b.assigned_act,
                "candidate_acts": b.top_acts.iter().map(|(idx, s)| json!({
                    "act_idx": idx,
                    "score": (s * 1000.0).round() / 1000.0,
                })).collect::<Vec<_>>(),
            }))
        })
        .collect();

    let act_summaries: Vec<_> = acts
        .iter()
        .enumerate()
        .map(|(i, a)| {
            json!({
                "index": i,
                "name": &a.name,
                "mood_targets": &a.mood_targets,
                "bpm_range": &a.bpm_range,
                "energy_level": a.energy_level,
            })
        })
        .collect();

    let payload = json!({
        "task": "review_borderline_assignments",
        "instructions": "These tracks scored nearly equally across multiple acts. \
For each track, decide which act is the BEST fit based on the \
track's mood, genre, and BPM relative to the act's targets. \
Consider the overall set narrative — where would this track \
serve the story best?",
        "acts": act_summaries,
        "borderline_tracks": track_info,
        "response_format": {
            "reassignments": [{"track_id": 123, "new_act_idx": 2}]
        },
    });
    let user_prompt = match serde_json::to_string_pretty(&payload) {
        Ok(p) => p,
        Err(e) => {
            log::warn!("Borderline prompt serialization failed (non-fatal): {e}");
            return;
        }
    };

    let response =
        match llm::call_json(llm, Tier::Mechanical, crate::narrative::SYSTEM_PROMPT, &user_prompt, 2048)
            .await
        {
            Ok(r) => r,
            Err(e) => {
                log::warn!("LLM borderline review failed (non-fatal): {e}");
                return;
            }
        };

    let reassignments = response
        .get("reassignments")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();

    for r in reassignments {
        let (Some(tid), Some(new_act)) = (
            r.get("track_id").and_then(|v| v.as_i64()),
            r.get("new_act_idx").and_then(|v| v.as_i64()),
        ) else {
            continue;
        };
        if new_act < 0 || new_act as usize >= acts.len() {
            continue;
        }
        let new_act = new_act as usize;
        // The moved track keeps its real score against the destination act,
        // so later selection ranks it honestly.
        let score = matrix
            .scores_for(tid)
            .map(|s| s[new_act])
            .unwrap_or(0.5);
        for act_tracks in assignments.iter_mut() {
            act_tracks.retain(|(t, _)| *t != tid);
        }
        assignments[new_act].push((tid, score));
        log::info!("Borderline reassignment: track {tid} -> act {new_act}");
    }

    sort_by_score(assignments);
}

fn sort_by_score(assignments: &mut ActAssignments) {
    for tracks in assignments.iter_mut() {
        tracks.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    }
}
