//! Phase profiles — named energy-arc templates for set building.
//!
//! A profile divides the set timeline into contiguous percentage slices.
//! Six built-in profiles ship with the engine; lookups go through the
//! `PhaseProfiles` capability so callers can layer custom profiles on top.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// One phase in a set's energy arc.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Phase {
    pub name: String,
    /// `[start_pct, end_pct]` — phases tile 0..100 contiguously.
    pub pct: [u32; 2],
    pub desc: String,
    /// Hex `#RRGGBB`.
    pub color: String,
}

impl Phase {
    /// Number of set slots this phase's share of the timeline works out to.
    /// Never zero — a sliver phase still deserves one track.
    pub fn slot_share(&self, total_slots: u32) -> u32 {
        let span = (self.pct[1] - self.pct[0]) as f64;
        ((total_slots as f64 * span / 100.0).round() as u32).max(1)
    }
}

/// Named energy arc template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseProfile {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub is_default: bool,
    pub phases: Vec<Phase>,
}

/// Lookup capability for phase profiles.
pub trait PhaseProfiles: Send + Sync {
    fn get(&self, id: &str) -> Option<PhaseProfile>;
    fn list(&self) -> Vec<PhaseProfile>;
}

/// The built-in read-only profile set.
#[derive(Debug, Default)]
pub struct BuiltinProfiles;

impl PhaseProfiles for BuiltinProfiles {
    fn get(&self, id: &str) -> Option<PhaseProfile> {
        builtin_profiles().iter().find(|p| p.id == id).cloned()
    }

    fn list(&self) -> Vec<PhaseProfile> {
        builtin_profiles().to_vec()
    }
}

/// Validate a phases list: non-empty names, well-formed colors, and a
/// contiguous 0→100 tiling with no gaps or overlap.
pub fn validate_phases(phases: &[Phase]) -> Result<(), String> {
    static HEX_RE: OnceLock<Regex> = OnceLock::new();
    let hex_re = HEX_RE.get_or_init(|| Regex::new(r"^#[0-9a-fA-F]{6}$").unwrap());

    if phases.is_empty() {
        return Err("At least one phase is required".to_string());
    }
    for (i, p) in phases.iter().enumerate() {
        if p.name.trim().is_empty() {
            return Err(format!("Phase {} is missing a name", i + 1));
        }
        if p.pct[0] >= p.pct[1] {
            return Err(format!("Phase '{}' start must be less than end", p.name));
        }
        if !hex_re.is_match(&p.color) {
            return Err(format!("Phase '{}' has invalid color (need #RRGGBB)", p.name));
        }
    }
    if phases[0].pct[0] != 0 {
        return Err("First phase must start at 0%".to_string());
    }
    if phases[phases.len() - 1].pct[1] != 100 {
        return Err("Last phase must end at 100%".to_string());
    }
    for pair in phases.windows(2) {
        if pair[0].pct[1] != pair[1].pct[0] {
            return Err(format!(
                "Gap or overlap between '{}' and '{}'",
                pair[0].name, pair[1].name
            ));
        }
    }
    Ok(())
}

fn phase(name: &str, pct: [u32; 2], desc: &str, color: &str) -> Phase {
    Phase {
        name: name.to_string(),
        pct,
        desc: desc.to_string(),
        color: color.to_string(),
    }
}

fn profile(id: &str, name: &str, description: &str, phases: Vec<Phase>) -> PhaseProfile {
    PhaseProfile {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        is_default: true,
        phases,
    }
}

/// The six built-in arcs.
pub fn builtin_profiles() -> &'static [PhaseProfile] {
    static PROFILES: OnceLock<Vec<PhaseProfile>> = OnceLock::new();
    PROFILES.get_or_init(|| {
        vec![
            profile(
                "classic_arc",
                "Classic Arc",
                "The standard DJ set arc — warm up, build, peak, wind down, outro. Suits festival headlines and standard club nights.",
                vec![
                    phase("Warm-Up", [0, 15], "Slower BPM, spacious tracks, clearer grooves. Build curiosity rather than intensity. Let people settle in and find their space on the floor.", "#777777"),
                    phase("Build", [15, 40], "Gradually layer in bigger basslines, more recognizable hooks, tighter percussion. The crowd starts to commit — longer blends, more rhythmic drive.", "#999999"),
                    phase("Peak", [40, 75], "Full throttle — your biggest, most powerful tunes. Fewer risks, more crowd-pleasers. Sustained high energy with minor dips for tension and release.", "#CCCCCC"),
                    phase("Wind-Down", [75, 90], "Ease off the intensity without losing the thread. Still quality selections but less relentless — transition from peak aggression to something more reflective.", "#999999"),
                    phase("Outro", [90, 100], "Cool the room with deeper, mellower selections. Let the crowd breathe and provide a graceful handoff. One or two signature tracks to close.", "#777777"),
                ],
            ),
            profile(
                "double_peak",
                "Double Peak",
                "Two distinct peaks with a valley between. The strategic reset makes the second peak feel even more powerful. Suits extended club sets and progressive/trance.",
                vec![
                    phase("Opening Build", [0, 15], "Quick but tasteful ramp-up. Establish groove and intent faster than a classic arc — you have two peaks to deliver. Set the sonic palette early.", "#888888"),
                    phase("First Peak", [15, 35], "First high-energy plateau but hold something back. Big tracks, driving rhythms, but not maximum intensity — save your best ammunition for the second peak.", "#BBBBBB"),
                    phase("Valley", [35, 50], "Deliberate pull-back into deeper, more hypnotic territory. Let the crowd breathe and reset expectations. Play selectors' tracks — build new tension from the bottom.", "#777777"),
                    phase("Second Build", [50, 65], "Rebuild from the valley. The crowd knows what's coming and the anticipation is electric. Can ramp faster than the first build — tighter mixes, rising energy.", "#AAAAAA"),
                    phase("Main Peak", [65, 85], "The real climax — exceed the first peak in every way. Maximum energy, biggest tracks, the set's defining moment. This is what they'll remember.", "#CCCCCC"),
                    phase("Cool-Down", [85, 100], "Relatively rapid but smooth descent. The crowd has been through a journey — give them emotional resolution. Warm, satisfying tracks that say 'thank you'.", "#888888"),
                ],
            ),
            profile(
                "slow_burn",
                "Slow Burn",
                "Continuous ascent that never drops back. Patient and hypnotic — the crowd doesn't realise how deep they are until they check the clock. Suits deep/melodic and late-night sets.",
                vec![
                    phase("Foundation", [0, 25], "Minimal and atmospheric, almost ambient-adjacent. Establish a deep groove and sense of space. Pads, subtle percussion, long blends. Let the room fill naturally.", "#777777"),
                    phase("Development", [25, 50], "Introduce more defined rhythmic elements. Basslines become prominent, melodies appear but stay understated. Each track adds one layer — never subtract.", "#999999"),
                    phase("Deepening", [50, 75], "The groove is now undeniable. Driving but still deep — layered, complex arrangements. The crowd is locked in a trance-like state. No sudden moves.", "#BBBBBB"),
                    phase("Culmination", [75, 100], "The full realisation of everything built before. Not aggressive peak energy — more like maximum depth and richness. Powerful but never harsh. End at intensity, no wind-down.", "#CCCCCC"),
                ],
            ),
            profile(
                "opening_set",
                "Opening Set",
                "Restraint is an art form. Energy climbs but never reaches headliner territory. Ends at what would be a classic arc's \"build\" phase. Suits warm-up and support slots.",
                vec![
                    phase("Ambient Welcome", [0, 20], "People are arriving, finding friends, getting drinks. Background-appropriate but with taste and intention. Atmospheric textures, no heavy bass yet.", "#666666"),
                    phase("Groove Establish", [20, 45], "Introduce a clear pulse. The empty dance floor should start to feel inviting. Low-key rhythms, gentle basslines — make standing near the speakers feel right.", "#888888"),
                    phase("Gentle Build", [45, 75], "People are starting to sway. More defined tracks, tasteful selections that hint at the night's direction without going there yet. Never peak — always suggest.", "#AAAAAA"),
                    phase("Handoff", [75, 100], "Sustained warm plateau where you pass the baton. The headliner should be able to pick up seamlessly and take it higher. Never exceed the ceiling — leave room.", "#999999"),
                ],
            ),
            profile(
                "closing_set",
                "Closing Set",
                "Inherit a hot room and guide people down without killing the vibe. The descent should feel like a choice, not a disappointment. Suits end-of-night and sunrise sets.",
                vec![
                    phase("Takeover", [0, 10], "Match the outgoing DJ's energy seamlessly. The crowd should not feel a drop-off. High intensity, confident track selection — prove you belong here.", "#CCCCCC"),
                    phase("Sustained Heat", [10, 30], "Maintain high energy but begin subtle shifts — deeper bass, longer breakdowns, slightly less frantic percussion. Still dancing hard, but the mood is turning.", "#BBBBBB"),
                    phase("Graceful Descent", [30, 60], "The core transition. Move from peak-time bangers to deeper, more emotive selections. Melodies over aggression. The crowd shifts from jumping to swaying.", "#999999"),
                    phase("Afterglow", [60, 85], "Deep, warm, reflective — the kind of music that sounds perfect at 4am. Emotional resonance over dancefloor impact. Reward the people who stayed.", "#777777"),
                    phase("Wind-Down", [85, 100], "Near-ambient, beautiful closure. The last few tracks that say 'the night is over and it was beautiful.' End with one recognisable, emotive track as a full stop.", "#666666"),
                ],
            ),
            profile(
                "marathon",
                "Marathon",
                "Repeating waves with a rising tide. Human energy can't sustain a single arc over 4+ hours, so each wave is a mini-arc. Suits B2B, all-night, and 4hr+ sets.",
                vec![
                    phase("Settling In", [0, 10], "Set the tone for a long journey. The crowd knows they're in for the long haul. Eclectic, interesting, groove-forward — show your range and earn their trust early.", "#777777"),
                    phase("Wave 1", [10, 30], "First full build-and-release cycle. Take it up, let it breathe at the top, then pull back. Tests the crowd's range and establishes the wave pattern.", "#999999"),
                    phase("Wave 2", [30, 55], "Second cycle goes higher than the first. More intense peak, slightly shorter valley. The crowd trusts you now — they'll follow you into deeper territory.", "#AAAAAA"),
                    phase("Wave 3", [55, 75], "The biggest wave — maximum energy reached here. This is the set's true peak zone. Your best tracks, tightest mixing, most electric moments.", "#CCCCCC"),
                    phase("Wave 4", [75, 90], "One more push, but the ceiling is lower than wave 3. High quality, crowd-pleasing selections that acknowledge fatigue is real. Keep it joyful, not punishing.", "#BBBBBB"),
                    phase("Resolution", [90, 100], "Bring it home. The crowd has been through a marathon together — end with feeling and resolution, not a whimper. Emotive closers that honour the journey.", "#888888"),
                ],
            ),
        ]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_are_valid() {
        for profile in builtin_profiles() {
            validate_phases(&profile.phases)
                .unwrap_or_else(|e| panic!("profile '{}': {e}", profile.id));
        }
    }

    #[test]
    fn test_builtin_lookup() {
        let profiles = BuiltinProfiles;
        let classic = profiles.get("classic_arc").unwrap();
        assert_eq!(classic.phases.len(), 5);
        assert_eq!(classic.phases[0].pct, [0, 15]);
        assert_eq!(classic.phases[4].pct, [90, 100]);
        assert!(profiles.get("nonexistent").is_none());
        assert_eq!(profiles.list().len(), 6);
    }

    #[test]
    fn test_slot_share_sums_near_total() {
        // Σ target counts across a profile is within ±|phases| of the total.
        let total = crate::TARGET_SET_SLOTS;
        for profile in builtin_profiles() {
            let sum: u32 = profile.phases.iter().map(|p| p.slot_share(total)).sum();
            let tolerance = profile.phases.len() as i64;
            assert!(
                (i64::from(sum) - i64::from(total)).abs() <= tolerance,
                "profile '{}' sums to {sum}",
                profile.id
            );
        }
    }

    #[test]
    fn test_slot_share_floor() {
        let sliver = phase("Sliver", [0, 1], "", "#777777");
        assert_eq!(sliver.slot_share(40), 1);
    }

    #[test]
    fn test_validate_rejects_gap() {
        let phases = vec![
            phase("A", [0, 40], "", "#777777"),
            phase("B", [50, 100], "", "#888888"),
        ];
        assert!(validate_phases(&phases).unwrap_err().contains("Gap or overlap"));
    }

    #[test]
    fn test_validate_rejects_bad_bounds() {
        let phases = vec![phase("A", [5, 100], "", "#777777")];
        assert!(validate_phases(&phases).is_err());

        let phases = vec![phase("A", [0, 90], "", "#777777")];
        assert!(validate_phases(&phases).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_color() {
        let phases = vec![phase("A", [0, 100], "", "red")];
        assert!(validate_phases(&phases).unwrap_err().contains("color"));
    }

    #[test]
    fn test_validate_rejects_inverted_pct() {
        let phases = vec![phase("A", [50, 50], "", "#777777")];
        assert!(validate_phases(&phases).is_err());
    }
}
