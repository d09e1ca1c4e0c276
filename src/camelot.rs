//! Camelot wheel geometry and BPM bucketing.
//!
//! Keys live on a 12-position ring: `1A..12A` (minor) and `1B..12B`
//! (major). Adjacent numbers mix; A↔B at the same number is the relative
//! major/minor swap.

use regex::Regex;
use std::sync::LazyLock;

/// The fixed BPM ladder used for slot alternatives (one candidate per level).
pub const BPM_LEVELS: [f64; 10] = [60.0, 70.0, 80.0, 90.0, 100.0, 110.0, 120.0, 130.0, 140.0, 150.0];

/// A normalized Camelot key: number 1..=12 plus letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CamelotKey {
    pub number: u8,
    pub letter: KeyLetter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyLetter {
    /// Minor (A side of the wheel).
    A,
    /// Major (B side of the wheel).
    B,
}

impl std::fmt::Display for CamelotKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let letter = match self.letter {
            KeyLetter::A => 'A',
            KeyLetter::B => 'B',
        };
        write!(f, "{}{}", self.number, letter)
    }
}

static KEY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d{1,2})([MmABab])$").unwrap());

/// Normalize key strings: `10M` → `10B`, `9m` → `9A`. Already-Camelot
/// passes through. Invalid input returns None.
pub fn normalize_camelot(key_str: &str) -> Option<CamelotKey> {
    let key_str = key_str.trim();
    let caps = KEY_RE.captures(key_str)?;
    let number: u8 = caps[1].parse().ok()?;
    if !(1..=12).contains(&number) {
        return None;
    }
    let letter = match &caps[2] {
        "M" | "B" | "b" => KeyLetter::B,
        _ => KeyLetter::A,
    };
    Some(CamelotKey { number, letter })
}

/// Integer distance on the Camelot wheel (0 = same). Crossing letters adds 1.
pub fn camelot_distance(k1: CamelotKey, k2: CamelotKey) -> u32 {
    let diff = (i32::from(k1.number) - i32::from(k2.number)).unsigned_abs();
    let num_diff = diff.min(12 - diff);
    let letter_diff = if k1.letter == k2.letter { 0 } else { 1 };
    num_diff + letter_diff
}

/// True if two keys are mix-compatible: same key, ±1 number on the same
/// letter, or the relative major/minor (same number, other letter).
pub fn camelot_compatible(k1: CamelotKey, k2: CamelotKey) -> bool {
    if k1 == k2 {
        return true;
    }
    if k1.letter == k2.letter {
        let diff = (i32::from(k1.number) - i32::from(k2.number)).unsigned_abs();
        if diff == 1 || diff == 11 {
            return true;
        }
    }
    k1.number == k2.number && k1.letter != k2.letter
}

/// BPM bucket for diversity checks: floor to a multiple of `size`.
pub fn bpm_bucket(bpm: f64, size: f64) -> i64 {
    ((bpm / size).floor() * size) as i64
}
