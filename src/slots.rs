//! Slot types and the BPM-ladder slot-fill capability.
//!
//! A slot is three minutes of the set: one selected track plus
//! alternatives at each level of the fixed BPM ladder, so a set can be
//! re-pitched live without losing its narrative position.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::camelot::BPM_LEVELS;
use crate::library::TrackTable;
use crate::trees::TreeKind;

/// A track candidate within a set slot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackOption {
    pub id: i64,
    pub title: String,
    pub artist: String,
    pub bpm: Option<f64>,
    pub key: Option<String>,
    pub year: Option<i32>,
    /// Target BPM bucket this option was picked for (60, 70, … 150).
    pub bpm_level: Option<i32>,
}

/// Where a slot's tracks come from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SlotSource {
    Playlist {
        id: String,
        name: String,
    },
    TreeNode {
        id: String,
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        tree_type: Option<TreeKind>,
    },
    Autoset {
        id: String,
        name: String,
    },
    Adhoc {
        id: String,
        name: String,
    },
}

/// A single slot in a DJ set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SetSlot {
    pub id: String,
    pub source: SlotSource,
    /// One entry per BPM level; `None` where no candidate fits.
    pub tracks: Vec<Option<TrackOption>>,
    #[serde(rename = "selectedTrackIndex")]
    pub selected_track_index: usize,
}

/// The slot-fill capability: pick one candidate per BPM level from a
/// source pool. Implementations must be idempotent and re-entrant.
pub trait SlotFill: Send + Sync {
    fn fill(
        &self,
        table: &TrackTable,
        source_track_ids: &[i64],
        used_track_ids: &HashSet<i64>,
        anchor_track_id: Option<i64>,
    ) -> Vec<Option<TrackOption>>;
}

/// Default ladder filler: the anchor claims its nearest level first, then
/// each open level takes the closest unused track within a widening
/// tolerance (±5, ±10, ±15 BPM).
#[derive(Debug, Default)]
pub struct BpmLadderFill;

impl SlotFill for BpmLadderFill {
    fn fill(
        &self,
        table: &TrackTable,
        source_track_ids: &[i64],
        used_track_ids: &HashSet<i64>,
        anchor_track_id: Option<i64>,
    ) -> Vec<Option<TrackOption>> {
        // Pool of available tracks with BPMs; the anchor stays eligible
        // even when it appears in the used set.
        let pool: Vec<(i64, f64)> = source_track_ids
            .iter()
            .filter(|&&id| !used_track_ids.contains(&id) || anchor_track_id == Some(id))
            .filter_map(|&id| table.get(id).and_then(|t| t.bpm.map(|b| (id, b))))
            .collect();

        let mut assigned: Vec<Option<i64>> = vec![None; BPM_LEVELS.len()];
        let mut used_in_slot: HashSet<i64> = HashSet::new();

        if let Some(anchor) = anchor_track_id {
            if let Some(&(_, anchor_bpm)) = pool.iter().find(|(id, _)| *id == anchor) {
                let best_level = (0..BPM_LEVELS.len())
                    .min_by(|&a, &b| {
                        let da = (BPM_LEVELS[a] - anchor_bpm).abs();
                        let db = (BPM_LEVELS[b] - anchor_bpm).abs();
                        da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
                    })
                    .unwrap_or(0);
                assigned[best_level] = Some(anchor);
                used_in_slot.insert(anchor);
            }
        }

        for (i, &level) in BPM_LEVELS.iter().enumerate() {
            if assigned[i].is_some() {
                continue;
            }
            let mut best: Option<(i64, f64)> = None;
            for tolerance in [5.0, 10.0, 15.0] {
                for &(id, bpm) in &pool {
                    if used_in_slot.contains(&id) {
                        continue;
                    }
                    let dist = (bpm - level).abs();
                    if dist <= tolerance && best.is_none_or(|(_, d)| dist < d) {
                        best = Some((id, dist));
                    }
                }
                if best.is_some() {
                    break;
                }
            }
            if let Some((id, _)) = best {
                assigned[i] = Some(id);
                used_in_slot.insert(id);
            }
        }

        assigned
            .into_iter()
            .enumerate()
            .map(|(i, id)| id.and_then(|id| track_option(table, id, BPM_LEVELS[i] as i32)))
            .collect()
    }
}

fn track_option(table: &TrackTable, id: i64, bpm_level: i32) -> Option<TrackOption> {
    let t = table.get(id)?;
    Some(TrackOption {
        id,
        title: t.title.clone(),
        artist: t.artist.clone(),
        bpm: t.bpm.map(|b| (b * 10.0).round() / 10.0),
        key: t.key.clone(),
        year: t.year,
        bpm_level: Some(bpm_level),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::Track;

    fn track(id: i64, bpm: Option<f64>) -> Track {
        let mut t = Track::new(id, format!("T{id}"), "A");
        t.bpm = bpm;
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
    fn test_fill_is_ladder_shaped() {
        let table = table(vec![
            track(1, Some(62.0)),
            track(2, Some(98.0)),
            track(3, Some(121.0)),
        ]);
        let result = BpmLadderFill.fill(&table, &[1, 2, 3], &HashSet::new(), None);
        assert_eq!(result.len(), 10);
        // Levels fill in ladder order: 60 takes 62, then 90 reaches 98
        // within ±10 and 110 reaches 121 within ±15.
        assert_eq!(result[0].as_ref().unwrap().id, 1);
        assert_eq!(result[3].as_ref().unwrap().id, 2);
        assert_eq!(result[5].as_ref().unwrap().id, 3);
        assert!(result[9].is_none());
    }

    #[test]
    fn test_anchor_claims_nearest_level() {
        let table = table(vec![track(1, Some(118.0)), track(2, Some(119.0))]);
        let result = BpmLadderFill.fill(&table, &[1, 2], &HashSet::new(), Some(2));
        // Anchor 119 takes the 120 level even though track 1 is also close.
        let level_120 = result[6].as_ref().unwrap();
        assert_eq!(level_120.id, 2);
        assert_eq!(level_120.bpm_level, Some(120));
    }

    #[test]
    fn test_anchor_survives_used_set() {
        let table = table(vec![track(1, Some(120.0))]);
        let used: HashSet<i64> = [1].into_iter().collect();
        let result = BpmLadderFill.fill(&table, &[1], &used, Some(1));
        assert_eq!(result[6].as_ref().unwrap().id, 1);
    }

    #[test]
    fn test_used_tracks_excluded() {
        let table = table(vec![track(1, Some(120.0)), track(2, Some(121.0))]);
        let used: HashSet<i64> = [1].into_iter().collect();
        let result = BpmLadderFill.fill(&table, &[1, 2], &used, None);
        assert_eq!(result[6].as_ref().unwrap().id, 2);
    }

    #[test]
    fn test_progressive_tolerance() {
        // 73 BPM is outside ±5 and ±10 of level 60 but inside ±15, so the
        // 60 level claims it before 70 gets a turn.
        let table = table(vec![track(1, Some(73.0))]);
        let result = BpmLadderFill.fill(&table, &[1], &HashSet::new(), None);
        assert_eq!(result[0].as_ref().unwrap().id, 1);
        assert!(result[1].is_none());
    }

    #[test]
    fn test_no_bpm_tracks_ignored() {
        let table = table(vec![track(1, None)]);
        let result = BpmLadderFill.fill(&table, &[1], &HashSet::new(), None);
        assert!(result.iter().all(Option::is_none));
    }

    #[test]
    fn test_slot_source_serialization() {
        let source = SlotSource::Autoset {
            id: "act-2".into(),
            name: "Peak".into(),
        };
        let json = serde_json::to_value(&source).unwrap();
        assert_eq!(json["type"], "autoset");
        assert_eq!(json["id"], "act-2");
    }

    #[test]
    fn test_slot_serialization_field_names() {
        let slot = SetSlot {
            id: "autoset-slot-0".into(),
            source: SlotSource::Adhoc {
                id: "x".into(),
                name: "y".into(),
            },
            tracks: vec![None],
            selected_track_index: 0,
        };
        let json = serde_json::to_value(&slot).unwrap();
        assert!(json.get("selectedTrackIndex").is_some());
    }
}
