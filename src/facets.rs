//! Comment facet parsing and genre normalization.
//!
//! Tag comments follow a semicolon-delimited convention:
//! `G1; G2; descriptors; mood; location, era.` — segments may be missing
//! from the right. Parsing never fails; absent segments leave empty
//! strings.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

/// Parsed facet fields for a single track comment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Facets {
    pub genre1: String,
    pub genre2: String,
    pub descriptors: String,
    pub mood: String,
    pub location: String,
    pub era: String,
}

/// Fixed genre alias table (lowercase alias → canonical form).
fn genre_alias(key: &str) -> Option<&'static str> {
    match key {
        "hip hop" | "hip-hop" => Some("Hip-Hop"),
        "r & b" | "r&b" | "rnb" => Some("R&B"),
        "drum & bass" | "drum and bass" | "dnb" | "d&b" => Some("Drum & Bass"),
        _ => None,
    }
}

/// Normalize a genre string for consistent grouping.
/// Known aliases fold to canonical forms; everything else passes through trimmed.
pub fn normalize_genre(genre: &str) -> String {
    let g = genre.trim();
    if g.is_empty() {
        return String::new();
    }
    match genre_alias(&g.to_lowercase()) {
        Some(canonical) => canonical.to_string(),
        None => g.to_string(),
    }
}

// Era suffix on the location segment: "..., late 1990s." / "circa 2010"
static ERA_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i),?\s*(early|mid|late|circa)[\s-]+(\d{4}s?(?:\s*[-–]\s*\d{4}s?)?)\s*\.?\s*$")
        .unwrap()
});

// Mood/descriptor strings split on commas, slashes, ampersands, and "and".
static TOKEN_SPLIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[,/&]+|\band\b").unwrap());

/// Parse a semi-structured comment string into facets.
///
/// Deterministic and idempotent; a malformed comment degrades to empty
/// fields rather than erroring.
pub fn parse_comment(comment: &str) -> Facets {
    let mut facets = Facets::default();
    if comment.trim().is_empty() {
        return facets;
    }

    let parts: Vec<&str> = comment.split(';').map(str::trim).collect();

    let mut location_era = String::new();
    if !parts.is_empty() {
        facets.genre1 = normalize_genre(parts[0]);
    }
    if parts.len() >= 2 {
        facets.genre2 = normalize_genre(parts[1]);
    }
    if parts.len() >= 5 {
        facets.descriptors = parts[2].to_string();
        facets.mood = parts[3].to_string();
        location_era = parts[4].trim_end_matches('.').to_string();
    } else if parts.len() == 4 {
        facets.descriptors = parts[2].to_string();
        location_era = parts[3].trim_end_matches('.').to_string();
    } else if parts.len() == 3 {
        facets.descriptors = parts[2].trim_end_matches('.').to_string();
    }

    if !location_era.is_empty() {
        if let Some(m) = ERA_RE.captures(&location_era) {
            let full = m.get(0).unwrap();
            facets.era = format!("{} {}", &m[1], &m[2]).trim().to_string();
            facets.location = location_era[..full.start()]
                .trim()
                .trim_end_matches(',')
                .trim()
                .to_string();
        } else if let Some(pos) = location_era.rfind(',') {
            facets.location = location_era[..pos].trim().to_string();
            facets.era = location_era[pos + 1..]
                .trim()
                .trim_end_matches('.')
                .to_string();
        } else {
            facets.location = location_era;
        }
    }

    facets
}

/// Split a mood or descriptor string into lowercase tokens.
/// Tokens of 2 chars or fewer are dropped (articles, stray letters).
pub fn tokenize(value: &str) -> HashSet<String> {
    TOKEN_SPLIT_RE
        .split(value)
        .map(|t| t.trim().to_lowercase())
        .filter(|t| t.len() > 2)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_comment() {
        let f = parse_comment("House; Techno; driving, hypnotic; dark and moody; Detroit, early 1990s.");
        assert_eq!(f.genre1, "House");
        assert_eq!(f.genre2, "Techno");
        assert_eq!(f.descriptors, "driving, hypnotic");
        assert_eq!(f.mood, "dark and moody");
        assert_eq!(f.location, "Detroit");
        assert_eq!(f.era, "early 1990s");
    }

    #[test]
    fn test_parse_era_without_comma() {
        let f = parse_comment("Dub; ; spacious; heavy; Kingston late 1970s");
        assert_eq!(f.location, "Kingston");
        assert_eq!(f.era, "late 1970s");
    }

    #[test]
    fn test_parse_location_comma_fallback() {
        // No era keyword — split at the last comma
        let f = parse_comment("Disco; Funk; glittery; joyful; New York, NY.");
        assert_eq!(f.location, "New York");
        assert_eq!(f.era, "NY");
    }

    #[test]
    fn test_parse_location_only() {
        let f = parse_comment("Garage; ; shuffled; moody; London.");
        assert_eq!(f.location, "London");
        assert_eq!(f.era, "");
    }

    #[test]
    fn test_parse_three_segments() {
        let f = parse_comment("Ambient; Drone; glacial pads.");
        assert_eq!(f.genre1, "Ambient");
        assert_eq!(f.genre2, "Drone");
        assert_eq!(f.descriptors, "glacial pads");
        assert_eq!(f.mood, "");
        assert_eq!(f.location, "");
    }

    #[test]
    fn test_parse_single_segment() {
        let f = parse_comment("Techno");
        assert_eq!(f.genre1, "Techno");
        assert_eq!(f.genre2, "");
    }

    #[test]
    fn test_parse_empty() {
        assert_eq!(parse_comment(""), Facets::default());
        assert_eq!(parse_comment("   "), Facets::default());
    }

    #[test]
    fn test_parse_idempotent() {
        let c = "House; Techno; driving; dark; Berlin, mid 2000s.";
        assert_eq!(parse_comment(c), parse_comment(c));
    }

    #[test]
    fn test_genre_aliases() {
        assert_eq!(normalize_genre("hip hop"), "Hip-Hop");
        assert_eq!(normalize_genre("Hip-Hop"), "Hip-Hop");
        assert_eq!(normalize_genre("HIP HOP"), "Hip-Hop");
        assert_eq!(normalize_genre("d&b"), "Drum & Bass");
        assert_eq!(normalize_genre("drum and bass"), "Drum & Bass");
        assert_eq!(normalize_genre("rnb"), "R&B");
    }

    #[test]
    fn test_genre_passthrough() {
        assert_eq!(normalize_genre("  Acid House  "), "Acid House");
        assert_eq!(normalize_genre(""), "");
    }

    #[test]
    fn test_tokenize() {
        let tokens = tokenize("dark and moody, hypnotic/driving");
        assert!(tokens.contains("dark"));
        assert!(tokens.contains("moody"));
        assert!(tokens.contains("hypnotic"));
        assert!(tokens.contains("driving"));
        assert!(!tokens.contains("and"));
    }

    #[test]
    fn test_tokenize_drops_short() {
        let tokens = tokenize("up, at, it, lush");
        assert_eq!(tokens.len(), 1);
        assert!(tokens.contains("lush"));
    }

    #[test]
    fn test_tokenize_empty() {
        assert!(tokenize("").is_empty());
    }
}
