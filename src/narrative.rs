//! Narrative planning — the single creative LLM call that turns a pool
//! profile plus a phase skeleton into a set narrative and per-phase acts.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::EngineError;
use crate::llm::{self, Llm, Tier};
use crate::phases::PhaseProfile;
use crate::pool::{LeafHit, PoolProfile};
use crate::TARGET_SET_SLOTS;

/// System prompt shared by every pipeline LLM call.
pub(crate) const SYSTEM_PROMPT: &str = "You are a world-class DJ and music programmer with deep understanding of \
set dramaturgy — how DJ sets tell stories through energy, mood, and genre \
progression. You understand the four layers of set construction:\n\
1. Technical compatibility (BPM, key)\n\
2. Emotional semantics (mood, energy, groove feel)\n\
3. Temporal dramaturgy (tension, release, pacing over time)\n\
4. Cultural narrative (genre journeys, scene references)\n\n\
You must respond with valid JSON only. No markdown, no code fences, no \
additional text before or after the JSON.";

/// BPM ordering direction within an act.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Ascending,
    Descending,
    #[default]
    Steady,
    /// Catch-all: unrecognized directions order the same as ascending.
    #[serde(other)]
    Varied,
}

/// One act of the planned set — a phase slice with musical targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Act {
    pub name: String,
    #[serde(default)]
    pub pct: [u32; 2],
    #[serde(default)]
    pub target_track_count: u32,
    #[serde(default)]
    pub bpm_range: Vec<f64>,
    #[serde(default = "default_energy")]
    pub energy_level: i64,
    #[serde(default)]
    pub mood_targets: Vec<String>,
    #[serde(default)]
    pub genre_guidance: Vec<String>,
    #[serde(default)]
    pub descriptor_guidance: Vec<String>,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default)]
    pub transition_note: String,
    #[serde(default = "default_color")]
    pub color: String,
}

fn default_energy() -> i64 {
    5
}

fn default_color() -> String {
    "#888888".to_string()
}

/// The planner's output: prose narrative plus one act per phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrativeArc {
    pub narrative: String,
    pub acts: Vec<Act>,
}

/// Generate the narrative arc for a pool under a phase profile.
///
/// Exactly one creative-tier call. Structural fields (pct, color, act
/// names, target counts) are trusted from the phase profile, not the LLM.
pub async fn generate_narrative_arc(
    pool_profile: &PoolProfile,
    phase_profile: &PhaseProfile,
    llm: &dyn Llm,
) -> Result<NarrativeArc, EngineError> {
    let phases = &phase_profile.phases;

    let phase_skeleton: Vec<_> = phases
        .iter()
        .map(|p| {
            json!({
                "name": &p.name,
                "pct": p.pct,
                "description": &p.desc,
                "target_track_count": p.slot_share(TARGET_SET_SLOTS),
            })
        })
        .collect();

    let payload = json!({
        "task": "generate_narrative_arc",
        "instructions": "You are programming a 2-hour DJ set from the track pool described below. \
The set follows the given phase structure. Your job is to:\n\
1. Write a 'narrative' — a 2-3 paragraph story describing the emotional \
and musical journey this set will take, specific to the music available.\n\
2. For each phase, define an 'act' with specific criteria calibrated to \
THIS pool's actual data ranges (not generic advice).\n\n\
IMPORTANT: BPM targets, mood targets, and genre guidance must be drawn \
from the actual pool statistics provided. Don't invent moods or genres \
that aren't in the pool.",
        "pool_profile": {
            "track_count": pool_profile.track_count,
            "bpm": &pool_profile.bpm,
            "genres": pool_profile.genres.iter().take(15).collect::<Vec<_>>(),
            "moods": pool_profile.moods.iter().take(15).collect::<Vec<_>>(),
            "descriptors": pool_profile.descriptors.iter().take(15).collect::<Vec<_>>(),
            "locations": pool_profile.locations.iter().take(10).collect::<Vec<_>>(),
            "eras": pool_profile.eras.iter().take(10).collect::<Vec<_>>(),
            "tree_context": summarize_tree_context(pool_profile),
        },
        "phase_structure": phase_skeleton,
        "response_format": {
            "narrative": "string — 2-3 paragraphs describing the set's journey",
            "acts": [{
                "name": "phase name (must match phase_structure)",
                "pct": [0, 15],
                "target_track_count": 6,
                "bpm_range": [90, 105],
                "energy_level": "1-10 integer",
                "mood_targets": ["list of mood keywords from pool"],
                "genre_guidance": ["list of genres to favor"],
                "descriptor_guidance": ["list of descriptors to favor"],
                "direction": "ascending|descending|steady|varied",
                "transition_note": "how to transition INTO this act",
            }],
        },
    });
    let user_prompt = serde_json::to_string_pretty(&payload)
        .map_err(|e| EngineError::LlmContract(e.to_string()))?;

    let response = llm::call_json(llm, Tier::Creative, SYSTEM_PROMPT, &user_prompt, 4096)
        .await
        .map_err(|e| EngineError::LlmContract(e.to_string()))?;

    let narrative = response
        .get("narrative")
        .and_then(|v| v.as_str())
        .ok_or_else(|| EngineError::LlmContract("response missing 'narrative' field".to_string()))?
        .to_string();
    let acts_value = response
        .get("acts")
        .cloned()
        .ok_or_else(|| EngineError::LlmContract("response missing 'acts' field".to_string()))?;

    let mut acts: Vec<Act> = serde_json::from_value(acts_value)
        .map_err(|e| EngineError::LlmContract(format!("malformed acts: {e}")))?;

    if acts.len() != phases.len() {
        return Err(EngineError::LlmContract(format!(
            "expected {} acts, got {}",
            phases.len(),
            acts.len()
        )));
    }

    for (act, phase) in acts.iter_mut().zip(phases) {
        act.name = phase.name.clone();
        act.pct = phase.pct;
        act.color = phase.color.clone();
        if act.target_track_count == 0 {
            act.target_track_count = phase.slot_share(TARGET_SET_SLOTS);
        }
    }

    Ok(NarrativeArc { narrative, acts })
}

/// Compress tree context for the prompt: top five hits per tree with only
/// the fields worth tokens.
fn summarize_tree_context(pool_profile: &PoolProfile) -> serde_json::Value {
    let mut summary = serde_json::Map::new();
    for (tree_type, hits) in &pool_profile.tree_context {
        if hits.is_empty() {
            continue;
        }
        let entries: Vec<_> = hits.iter().take(5).map(summarize_hit).collect();
        summary.insert(tree_type.clone(), json!(entries));
    }
    serde_json::Value::Object(summary)
}

fn summarize_hit(hit: &LeafHit) -> serde_json::Value {
    let mut entry = serde_json::Map::new();
    entry.insert("title".into(), json!(hit.leaf_title));
    entry.insert("overlap".into(), json!(hit.overlap_count));
    if let Some(v) = &hit.genre_context {
        entry.insert("genre_context".into(), json!(v));
    }
    if let Some(v) = &hit.scene_context {
        entry.insert("scene_context".into(), json!(v));
    }
    if let Some(v) = &hit.lineage {
        entry.insert("lineage".into(), json!(v));
    }
    if let Some(v) = &hit.category {
        entry.insert("category".into(), json!(v));
    }
    serde_json::Value::Object(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedLlm;
    use crate::phases::{BuiltinProfiles, PhaseProfiles};

    fn classic() -> PhaseProfile {
        BuiltinProfiles.get("classic_arc").unwrap()
    }

    fn acts_json(n: usize) -> String {
        let act = r#"{
            "name": "x", "pct": [1, 2], "target_track_count": 6,
            "bpm_range": [100, 120], "energy_level": 5,
            "mood_targets": ["dark"], "genre_guidance": ["Techno"],
            "descriptor_guidance": ["driving"], "direction": "ascending",
            "transition_note": "ease in"
        }"#;
        let acts: Vec<&str> = (0..n).map(|_| act).collect();
        format!(r#"{{"narrative": "A journey.", "acts": [{}]}}"#, acts.join(","))
    }

    #[tokio::test]
    async fn test_structural_fields_overwritten() {
        let llm = ScriptedLlm::new(vec![Ok(acts_json(5))]);
        let arc = generate_narrative_arc(&PoolProfile::default(), &classic(), &llm)
            .await
            .unwrap();
        assert_eq!(arc.narrative, "A journey.");
        assert_eq!(arc.acts.len(), 5);
        // pct/color/name come from the profile regardless of what the LLM said
        assert_eq!(arc.acts[0].name, "Warm-Up");
        assert_eq!(arc.acts[0].pct, [0, 15]);
        assert_eq!(arc.acts[0].color, "#777777");
        assert_eq!(arc.acts[2].pct, [40, 75]);
    }

    #[tokio::test]
    async fn test_missing_narrative_is_contract_error() {
        let llm = ScriptedLlm::new(vec![Ok(r#"{"acts": []}"#.to_string())]);
        let err = generate_narrative_arc(&PoolProfile::default(), &classic(), &llm)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::LlmContract(_)));
    }

    #[tokio::test]
    async fn test_act_count_mismatch_is_contract_error() {
        let llm = ScriptedLlm::new(vec![Ok(acts_json(3))]);
        let err = generate_narrative_arc(&PoolProfile::default(), &classic(), &llm)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::LlmContract(_)));
    }

    #[tokio::test]
    async fn test_prompt_carries_phase_skeleton() {
        let llm = ScriptedLlm::new(vec![Ok(acts_json(5))]);
        generate_narrative_arc(&PoolProfile::default(), &classic(), &llm)
            .await
            .unwrap();
        let calls = llm.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, Tier::Creative);
        let prompt: serde_json::Value = serde_json::from_str(&calls[0].1).unwrap();
        let skeleton = prompt["phase_structure"].as_array().unwrap();
        assert_eq!(skeleton.len(), 5);
        assert_eq!(skeleton[0]["name"], "Warm-Up");
        // 15% of 40 slots
        assert_eq!(skeleton[0]["target_track_count"], 6);
    }

    #[tokio::test]
    async fn test_zero_target_count_backfilled() {
        let response = r#"{"narrative": "n", "acts": [
            {"name": "a", "direction": "steady"},
            {"name": "b", "direction": "steady"},
            {"name": "c", "direction": "steady"},
            {"name": "d", "direction": "steady"},
            {"name": "e", "direction": "steady"}
        ]}"#;
        let llm = ScriptedLlm::new(vec![Ok(response.to_string())]);
        let arc = generate_narrative_arc(&PoolProfile::default(), &classic(), &llm)
            .await
            .unwrap();
        assert_eq!(arc.acts[0].target_track_count, 6);
        assert_eq!(arc.acts[2].target_track_count, 14); // Peak: 35% of 40
    }

    #[test]
    fn test_direction_parses_unknown_as_varied() {
        let d: Direction = serde_json::from_str(r#""sideways""#).unwrap();
        assert_eq!(d, Direction::Varied);
        let d: Direction = serde_json::from_str(r#""descending""#).unwrap();
        assert_eq!(d, Direction::Descending);
    }
}
