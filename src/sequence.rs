//! Selection and sequencing — pick a diverse subset per act, order it for
//! flow, and run the whole-set LLM review.

use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::assign::ActAssignments;
use crate::camelot::{CamelotKey, bpm_bucket, camelot_distance, normalize_camelot};
use crate::library::TrackTable;
use crate::llm::{self, Llm, Tier};
use crate::narrative::{Act, Direction};

/// Max swaps accepted from the sequence review.
const MAX_SWAPS: usize = 3;
/// BPM bucket width for diversity checks within an act.
const DIVERSITY_BUCKET: f64 = 3.0;
/// Distance charged when either side of a transition has no key.
const UNKNOWN_KEY_DISTANCE: f64 = 6.0;

/// A track in the final play order.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OrderedTrack {
    pub track_id: i64,
    pub act_idx: usize,
    pub act_name: String,
    pub title: String,
    pub artist: String,
    pub bpm: Option<f64>,
    pub key: Option<String>,
    pub mood: String,
    pub genre1: String,
}

/// Select and order tracks for every act. Returns None if cancelled.
pub fn select_and_order(
    table: &TrackTable,
    assignments: &ActAssignments,
    acts: &[Act],
    cancel: &CancellationToken,
) -> Option<Vec<OrderedTrack>> {
    let mut ordered_tracks = Vec::new();

    for (act_idx, act) in acts.iter().enumerate() {
        if cancel.is_cancelled() {
            return None;
        }
        let candidates = assignments.get(act_idx).map(Vec::as_slice).unwrap_or(&[]);
        let target = act.target_track_count.max(1) as usize;

        let selected = select_diverse_tracks(table, candidates, target);
        let ordered = order_within_act(table, &selected, act.direction);

        for tid in ordered {
            let Some(track) = table.get(tid) else { continue };
            ordered_tracks.push(OrderedTrack {
                track_id: tid,
                act_idx,
                act_name: act.name.clone(),
                title: track.title.clone(),
                artist: track.artist.clone(),
                bpm: track.bpm.map(|b| (b * 10.0).round() / 10.0),
                key: track.key.clone(),
                mood: track.facets.mood.clone(),
                genre1: track.facets.genre1.clone(),
            });
        }
    }

    Some(ordered_tracks)
}

/// Walk score-ranked candidates, skipping tracks that would pile onto an
/// already-used BPM bucket or a key already selected twice — but only once
/// half the target is filled, so small acts never starve. Backfills from
/// the skipped tracks if diversity left gaps.
pub fn select_diverse_tracks(
    table: &TrackTable,
    candidates: &[(i64, f64)],
    target: usize,
) -> Vec<i64> {
    if candidates.len() <= target {
        return candidates.iter().map(|(tid, _)| *tid).collect();
    }

    let mut selected: Vec<i64> = Vec::new();
    let mut used_buckets: std::collections::HashSet<i64> = std::collections::HashSet::new();
    let mut key_counts: std::collections::HashMap<CamelotKey, usize> =
        std::collections::HashMap::new();

    for (tid, _) in candidates {
        if selected.len() >= target {
            break;
        }
        let Some(track) = table.get(*tid) else { continue };
        let bucket = track.bpm.map(|b| bpm_bucket(b, DIVERSITY_BUCKET));
        let key = track.key.as_deref().and_then(normalize_camelot);
        let past_half = selected.len() as f64 > target as f64 * 0.5;

        if past_half {
            if let Some(b) = bucket {
                if used_buckets.contains(&b) {
                    continue;
                }
            }
            if let Some(k) = key {
                if key_counts.get(&k).copied().unwrap_or(0) >= 2 {
                    continue;
                }
            }
        }

        selected.push(*tid);
        if let Some(b) = bucket {
            used_buckets.insert(b);
        }
        if let Some(k) = key {
            *key_counts.entry(k).or_default() += 1;
        }
    }

    // Fill any remaining slots from untaken candidates in score order.
    let mut remaining = candidates
        .iter()
        .map(|(tid, _)| *tid)
        .filter(|tid| !selected.contains(tid))
        .collect::<Vec<_>>()
        .into_iter();
    while selected.len() < target {
        match remaining.next() {
            Some(tid) => selected.push(tid),
            None => break,
        }
    }

    selected
}

/// Order tracks within an act: BPM sort in the act's direction, then a
/// greedy key-adjacency refinement biased toward preserving BPM order.
pub fn order_within_act(table: &TrackTable, track_ids: &[i64], direction: Direction) -> Vec<i64> {
    if track_ids.len() <= 1 {
        return track_ids.to_vec();
    }

    struct Info {
        id: i64,
        bpm: f64,
        key: Option<CamelotKey>,
    }

    let mut tracks: Vec<Info> = track_ids
        .iter()
        .filter_map(|&id| {
            let t = table.get(id)?;
            Some(Info {
                id,
                bpm: t.bpm.unwrap_or(0.0),
                key: t.key.as_deref().and_then(normalize_camelot),
            })
        })
        .collect();

    // Steady and varied fall back to ascending.
    match direction {
        Direction::Descending => {
            tracks.sort_by(|a, b| b.bpm.partial_cmp(&a.bpm).unwrap_or(std::cmp::Ordering::Equal))
        }
        _ => tracks.sort_by(|a, b| a.bpm.partial_cmp(&b.bpm).unwrap_or(std::cmp::Ordering::Equal)),
    }

    let mut iter = tracks.into_iter();
    let Some(first) = iter.next() else {
        return Vec::new();
    };
    let mut remaining: Vec<Info> = iter.collect();
    let mut ordered = vec![first];

    while !remaining.is_empty() {
        let last_key = ordered.last().and_then(|t| t.key);
        let mut best_idx = 0;
        let mut best_cost = f64::INFINITY;
        for (i, t) in remaining.iter().enumerate() {
            let dist = match (last_key, t.key) {
                (Some(a), Some(b)) => f64::from(camelot_distance(a, b)),
                _ => UNKNOWN_KEY_DISTANCE,
            };
            // The index bias keeps the BPM sort as a tiebreaker.
            let cost = dist + i as f64 * 0.5;
            if cost < best_cost {
                best_cost = cost;
                best_idx = i;
            }
        }
        ordered.push(remaining.remove(best_idx));
    }

    ordered.into_iter().map(|t| t.id).collect()
}

/// Creative-tier review of the full sequence; applies up to three
/// bounds-checked position swaps. Failure is non-fatal.
pub async fn review_sequence(ordered_tracks: &mut [OrderedTrack], acts: &[Act], llm: &dyn Llm) {
    let tracklist: Vec<_> = ordered_tracks
        .iter()
        .enumerate()
        .map(|(i, t)| {
            json!({
                "position": i + 1,
                "track_id": t.track_id,
                "title": &t.title,
                "artist": &t.artist,
                "bpm": t.bpm,
                "key": &t.key,
                "mood": &t.mood,
                "act": &t.act_name,
            })
        })
        .collect();

    let act_summaries: Vec<_> = acts
        .iter()
        .map(|a| json!({"name": &a.name, "pct": a.pct}))
        .collect();

    let payload = json!({
        "task": "review_track_sequence",
        "instructions": "Review this DJ set tracklist for flow and narrative coherence. \
Check for:\n\
1. Jarring BPM jumps between consecutive tracks (>5 BPM = flag)\n\
2. Poor transitions between acts (mood/energy mismatch)\n\
3. Key clashes between consecutive tracks\n\n\
Suggest up to 3 swaps to improve flow. Each swap moves a track \
to a different position. Only suggest swaps that meaningfully \
improve the set — if the sequence is already good, return empty swaps.",
        "acts": act_summaries,
        "tracklist": tracklist,
        "response_format": {
            "assessment": "string — brief assessment of the sequence quality",
            "swaps": [{
                "from_position": 5,
                "to_position": 8,
                "reason": "why this swap improves the set"
            }]
        },
    });
    let user_prompt = match serde_json::to_string_pretty(&payload) {
        Ok(p) => p,
        Err(e) => {
            log::warn!("Sequence review prompt serialization failed (non-fatal): {e}");
            return;
        }
    };

    let response =
        match llm::call_json(llm, Tier::Creative, crate::narrative::SYSTEM_PROMPT, &user_prompt, 2048)
            .await
        {
            Ok(r) => r,
            Err(e) => {
                log::warn!("LLM sequence review failed (non-fatal): {e}");
                return;
            }
        };

    let swaps = response
        .get("swaps")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();

    for swap in swaps.iter().take(MAX_SWAPS) {
        let from = swap.get("from_position").and_then(|v| v.as_i64()).unwrap_or(0) - 1;
        let to = swap.get("to_position").and_then(|v| v.as_i64()).unwrap_or(0) - 1;
        if from < 0 || to < 0 {
            continue;
        }
        let (from, to) = (from as usize, to as usize);
        if from < ordered_tracks.len() && to < ordered_tracks.len() {
            ordered_tracks.swap(from, to);
            log::info!(
                "Sequence swap: pos {} <-> {}: {}",
                from + 1,
                to + 1,
                swap.get("reason").and_then(|v| v.as_str()).unwrap_or("")
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::Track;

    fn track(id: i64, bpm: Option<f64>, key: Option<&str>) -> Track {
        let mut t = Track::new(id, format!("T{id}"), "A");
        t.bpm = bpm;
        t.key = key.map(str::to_string);
        t
    }

    fn table(tracks: Vec<Track>) -> TrackTable {
        let mut table = TrackTable::new();
        for t in tracks {
            table.insert(t);
        }
        table
    }

    #[test]
    fn test_select_all_when_under_target() {
        let table = table(vec![track(1, Some(120.0), None), track(2, Some(121.0), None)]);
        let candidates = vec![(1, 0.9), (2, 0.8)];
        assert_eq!(select_diverse_tracks(&table, &candidates, 5), vec![1, 2]);
    }

    #[test]
    fn test_select_skips_duplicate_bucket_past_half() {
        // Six candidates in the same 3-BPM bucket, target 4: once half the
        // target is selected the duplicates are skipped, then backfilled.
        let tracks: Vec<Track> = (1..=6).map(|i| track(i, Some(120.0), None)).collect();
        let table = table(tracks);
        let candidates: Vec<(i64, f64)> = (1..=6).map(|i| (i, 1.0 - i as f64 * 0.01)).collect();
        let selected = select_diverse_tracks(&table, &candidates, 4);
        assert_eq!(selected.len(), 4);
        // Highest-scoring tracks win the backfill.
        assert_eq!(selected, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_select_prefers_diverse_bpm() {
        let table = table(vec![
            track(1, Some(120.0), None),
            track(2, Some(120.5), None), // same bucket as 1
            track(3, Some(126.0), None),
            track(4, Some(120.9), None), // same bucket as 1
            track(5, Some(132.0), None),
        ]);
        let candidates = vec![(1, 0.9), (2, 0.85), (3, 0.8), (4, 0.7), (5, 0.6)];
        let selected = select_diverse_tracks(&table, &candidates, 4);
        // Past the half mark, 4 repeats an already-used bucket and is
        // skipped in favor of 5's fresh one.
        assert_eq!(selected, vec![1, 2, 3, 5]);
    }

    #[test]
    fn test_select_limits_key_repeats() {
        let table = table(vec![
            track(1, Some(100.0), Some("8A")),
            track(2, Some(110.0), Some("9A")),
            track(3, Some(120.0), Some("8A")),
            track(4, Some(130.0), Some("8A")),
            track(5, Some(140.0), Some("10A")),
        ]);
        let candidates = vec![(1, 0.9), (2, 0.85), (3, 0.8), (4, 0.7), (5, 0.6)];
        let selected = select_diverse_tracks(&table, &candidates, 4);
        // The third 8A lands past the half mark and is skipped.
        assert_eq!(selected, vec![1, 2, 3, 5]);
    }

    #[test]
    fn test_order_ascending_bpm() {
        let table = table(vec![
            track(1, Some(130.0), None),
            track(2, Some(110.0), None),
            track(3, Some(120.0), None),
        ]);
        let ordered = order_within_act(&table, &[1, 2, 3], Direction::Ascending);
        assert_eq!(ordered, vec![2, 3, 1]);
    }

    #[test]
    fn test_order_descending_bpm() {
        let table = table(vec![
            track(1, Some(130.0), None),
            track(2, Some(110.0), None),
            track(3, Some(120.0), None),
        ]);
        let ordered = order_within_act(&table, &[1, 2, 3], Direction::Descending);
        assert_eq!(ordered, vec![1, 3, 2]);
    }

    #[test]
    fn test_order_key_refinement_prefers_adjacent() {
        // Equal BPMs leave the key walk in charge: from 8A the wheel
        // neighbors win over the far key.
        let table = table(vec![
            track(1, Some(120.0), Some("8A")),
            track(2, Some(120.0), Some("3A")),
            track(3, Some(120.0), Some("9A")),
        ]);
        let ordered = order_within_act(&table, &[1, 2, 3], Direction::Ascending);
        assert_eq!(ordered, vec![1, 3, 2]);
    }

    #[test]
    fn test_order_single_track() {
        let table = table(vec![track(1, Some(120.0), None)]);
        assert_eq!(order_within_act(&table, &[1], Direction::Ascending), vec![1]);
    }

    fn ordered(n: usize) -> Vec<OrderedTrack> {
        (0..n)
            .map(|i| OrderedTrack {
                track_id: i as i64,
                act_idx: 0,
                act_name: "A".into(),
                title: format!("T{i}"),
                artist: "X".into(),
                bpm: Some(120.0),
                key: None,
                mood: String::new(),
                genre1: String::new(),
            })
            .collect()
    }

    fn acts() -> Vec<Act> {
        vec![Act {
            name: "A".into(),
            pct: [0, 100],
            target_track_count: 4,
            bpm_range: vec![100.0, 140.0],
            energy_level: 5,
            mood_targets: vec![],
            genre_guidance: vec![],
            descriptor_guidance: vec![],
            direction: Direction::Ascending,
            transition_note: String::new(),
            color: "#888888".into(),
        }]
    }

    #[tokio::test]
    async fn test_review_applies_bounded_swaps() {
        use crate::llm::testing::ScriptedLlm;
        let mut tracks = ordered(5);
        let llm = ScriptedLlm::new(vec![Ok(r#"{
            "assessment": "decent",
            "swaps": [
                {"from_position": 1, "to_position": 3, "reason": "flow"},
                {"from_position": 2, "to_position": 99, "reason": "out of bounds"},
                {"from_position": 4, "to_position": 5, "reason": "ending"},
                {"from_position": 1, "to_position": 2, "reason": "fourth swap ignored"}
            ]
        }"#
        .to_string())]);
        review_sequence(&mut tracks, &acts(), &llm).await;
        // Swap 1<->3 and 4<->5 applied; out-of-bounds and fourth swap ignored.
        let ids: Vec<i64> = tracks.iter().map(|t| t.track_id).collect();
        assert_eq!(ids, vec![2, 1, 0, 4, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_review_soft_failure_leaves_order() {
        use crate::llm::testing::ScriptedLlm;
        let mut tracks = ordered(3);
        let before = tracks.clone();
        let llm = ScriptedLlm::new(vec![
            Err("down".to_string()),
            Err("down".to_string()),
            Err("down".to_string()),
        ]);
        review_sequence(&mut tracks, &acts(), &llm).await;
        assert_eq!(tracks, before);
    }
}
