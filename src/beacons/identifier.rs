//! Blink-code beacon identification
//!
//! Each beacon blinks a fixed-length pattern over the alphabet `*` (bright)
//! and `.` (dim). A blob's most recent `L` brightness samples are binarized
//! against the midpoint of their range and matched, at any phase offset,
//! against the pattern table. The first matching table entry wins.

use std::collections::VecDeque;

use super::ids::ZeroBasedBeaconId;
use crate::error::BeaconTableError;

const BRIGHT: char = '*';
const DIM: char = '.';

/// Minimum max-min brightness spread for a blob to count as a blinking LED
pub const MIN_BRIGHTNESS_DIFFERENCE: f32 = 0.3;

/// Result of one identification step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identification {
    pub id: ZeroBasedBeaconId,

    /// Whether the newest sample was above threshold; `None` when the
    /// window was too short or too flat to decide.
    pub last_bright: Option<bool>,
}

/// Anything that can turn a brightness history into a beacon id.
pub trait LedIdentifier: Send + Sync {
    /// Number of samples needed to identify a beacon
    fn length(&self) -> usize;

    /// Trim `brightnesses` to the most recent `length()` samples and
    /// identify them. With `keep_id`, an already identified `current` id is
    /// returned unchanged once the window has enough contrast.
    fn get_id(
        &self,
        current: ZeroBasedBeaconId,
        brightnesses: &mut VecDeque<f32>,
        keep_id: bool,
    ) -> Identification;
}

fn is_valid_pattern(pattern: &str) -> bool {
    !pattern.is_empty() && pattern.chars().all(|c| c == BRIGHT || c == DIM)
}

/// Pattern-table identifier with rotation-invariant matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternIdentifier {
    length: usize,

    /// Each valid pattern stored doubled (minus its final char) so a
    /// substring search covers every phase offset; `None` marks a disabled
    /// entry that keeps its index.
    patterns: Vec<Option<String>>,
}

impl PatternIdentifier {
    /// Build from a pattern table.
    ///
    /// # Panics
    /// If two valid patterns differ in length.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Self {
        match Self::try_new(patterns) {
            Ok(identifier) => identifier,
            Err(e) => panic!("invalid beacon pattern table: {}", e),
        }
    }

    pub fn try_new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, BeaconTableError> {
        let length = patterns
            .iter()
            .map(AsRef::as_ref)
            .find(|p| is_valid_pattern(p))
            .map(str::len)
            .unwrap_or(0);

        let mut table = Vec::with_capacity(patterns.len());
        for (index, pattern) in patterns.iter().map(AsRef::as_ref).enumerate() {
            if !is_valid_pattern(pattern) {
                table.push(None);
                continue;
            }
            if pattern.len() != length {
                return Err(BeaconTableError::LengthMismatch {
                    index,
                    expected: length,
                    found: pattern.len(),
                });
            }
            let mut doubled = String::with_capacity(2 * length);
            doubled.push_str(pattern);
            doubled.push_str(&pattern[..length - 1]);
            table.push(Some(doubled));
        }

        Ok(Self {
            length,
            patterns: table,
        })
    }

    /// Number of table entries, disabled ones included
    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_disabled(&self, index: usize) -> bool {
        matches!(self.patterns.get(index), Some(None) | None)
    }

    /// Identify a window of exactly `length()` samples (oldest first).
    pub fn identify(
        &self,
        window: &[f32],
        current: ZeroBasedBeaconId,
        keep_id: bool,
    ) -> Identification {
        let insufficient = Identification {
            id: ZeroBasedBeaconId::INSUFFICIENT_DATA,
            last_bright: None,
        };
        if window.is_empty() || window.len() < self.length {
            return insufficient;
        }
        if self.length == 0 {
            return Identification {
                id: ZeroBasedBeaconId::NO_PATTERN_RECOGNIZED,
                last_bright: None,
            };
        }
        let window = &window[window.len() - self.length..];

        let (min, max) = window
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &b| (lo.min(b), hi.max(b)));
        if max - min <= MIN_BRIGHTNESS_DIFFERENCE {
            return Identification {
                id: ZeroBasedBeaconId::INSUFFICIENT_CONTRAST,
                last_bright: None,
            };
        }

        let threshold = (min + max) / 2.0;
        let last_bright = window.last().map(|&b| b >= threshold);

        if keep_id && current.is_identified() {
            return Identification {
                id: current,
                last_bright,
            };
        }

        let bits: String = window
            .iter()
            .map(|&b| if b >= threshold { BRIGHT } else { DIM })
            .collect();

        let id = self
            .patterns
            .iter()
            .position(|p| p.as_deref().map_or(false, |doubled| doubled.contains(&bits)))
            .map(ZeroBasedBeaconId::from_index)
            .unwrap_or(ZeroBasedBeaconId::NO_PATTERN_RECOGNIZED);

        Identification { id, last_bright }
    }
}

impl LedIdentifier for PatternIdentifier {
    fn length(&self) -> usize {
        self.length
    }

    fn get_id(
        &self,
        current: ZeroBasedBeaconId,
        brightnesses: &mut VecDeque<f32>,
        keep_id: bool,
    ) -> Identification {
        if brightnesses.len() < self.length || brightnesses.is_empty() {
            return Identification {
                id: ZeroBasedBeaconId::INSUFFICIENT_DATA,
                last_bright: None,
            };
        }
        if self.length > 0 {
            while brightnesses.len() > self.length {
                brightnesses.pop_front();
            }
        }
        self.identify(brightnesses.make_contiguous(), current, keep_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beacons::ids::IdentifyOutcome;
    use crate::beacons::patterns::HDK_SENSOR0_ORIGINAL_PATTERNS;

    fn samples(pattern: &str) -> Vec<f32> {
        pattern
            .chars()
            .map(|c| if c == '*' { 0.9 } else { 0.1 })
            .collect()
    }

    fn rotated(pattern: &str, by: usize) -> String {
        let n = by % pattern.len();
        format!("{}{}", &pattern[n..], &pattern[..n])
    }

    #[test]
    fn test_insufficient_data() {
        let identifier = PatternIdentifier::new(&["*..*", "**.."]);
        let mut history: VecDeque<f32> = vec![0.9, 0.1, 0.1].into();
        let result = identifier.get_id(ZeroBasedBeaconId::default(), &mut history, false);
        assert_eq!(result.id.outcome(), IdentifyOutcome::InsufficientData);
        assert_eq!(result.last_bright, None);
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn test_insufficient_contrast() {
        let identifier = PatternIdentifier::new(&["*..*", "**.."]);
        let mut history: VecDeque<f32> = vec![0.5, 0.6, 0.55, 0.7].into();
        let result = identifier.get_id(ZeroBasedBeaconId::default(), &mut history, false);
        assert_eq!(result.id, ZeroBasedBeaconId::INSUFFICIENT_CONTRAST);
    }

    #[test]
    fn test_no_pattern_recognized() {
        let identifier = PatternIdentifier::new(&["*...", "**.."]);
        let mut history: VecDeque<f32> = samples("*.*.").into();
        let result = identifier.get_id(ZeroBasedBeaconId::default(), &mut history, false);
        assert_eq!(result.id, ZeroBasedBeaconId::NO_PATTERN_RECOGNIZED);
        assert_eq!(result.last_bright, Some(false));
    }

    #[test]
    fn test_history_is_trimmed_to_pattern_length() {
        let identifier = PatternIdentifier::new(&["*...", "**.."]);
        let mut history: VecDeque<f32> = vec![0.5, 0.5, 0.9, 0.9, 0.1, 0.1].into();
        let result = identifier.get_id(ZeroBasedBeaconId::default(), &mut history, false);
        assert_eq!(history.len(), 4);
        assert_eq!(result.id, ZeroBasedBeaconId(1));
    }

    #[test]
    fn test_rotation_invariance_on_hdk_table() {
        let identifier = PatternIdentifier::new(HDK_SENSOR0_ORIGINAL_PATTERNS);
        assert_eq!(identifier.length(), 16);
        for (index, pattern) in HDK_SENSOR0_ORIGINAL_PATTERNS.iter().enumerate().take(5) {
            for shift in 0..16 {
                let window = samples(&rotated(pattern, shift));
                let result = identifier.identify(&window, ZeroBasedBeaconId::default(), false);
                assert_eq!(result.id, ZeroBasedBeaconId::from_index(index), "pattern {} shift {}", index, shift);
            }
        }
    }

    #[test]
    fn test_end_to_end_first_entry() {
        // ..*.....*...*... starting at its first bright sample
        let identifier = PatternIdentifier::new(HDK_SENSOR0_ORIGINAL_PATTERNS);
        let mut history: VecDeque<f32> = VecDeque::new();
        let cycle = samples(&rotated(HDK_SENSOR0_ORIGINAL_PATTERNS[0], 2));
        assert_eq!(&cycle[..3], &[0.9, 0.1, 0.1]);
        let mut id = ZeroBasedBeaconId::default();
        for &b in cycle.iter().cycle().take(40) {
            history.push_back(b);
            id = identifier.get_id(id, &mut history, false).id;
        }
        assert_eq!(id, ZeroBasedBeaconId(0));
    }

    #[test]
    fn test_identify_is_deterministic() {
        let identifier = PatternIdentifier::new(HDK_SENSOR0_ORIGINAL_PATTERNS);
        let window = samples(HDK_SENSOR0_ORIGINAL_PATTERNS[7]);
        let first = identifier.identify(&window, ZeroBasedBeaconId::default(), false);
        for _ in 0..10 {
            assert_eq!(identifier.identify(&window, ZeroBasedBeaconId::default(), false), first);
        }
    }

    #[test]
    fn test_keep_id_is_sticky() {
        let identifier = PatternIdentifier::new(&["*...", "**.."]);
        let window = samples("**..");
        let kept = identifier.identify(&window, ZeroBasedBeaconId(0), true);
        assert_eq!(kept.id, ZeroBasedBeaconId(0));
        assert_eq!(kept.last_bright, Some(false));
        let fresh = identifier.identify(&window, ZeroBasedBeaconId(0), false);
        assert_eq!(fresh.id, ZeroBasedBeaconId(1));
        // Sentinels are never kept
        let from_sentinel = identifier.identify(&window, ZeroBasedBeaconId::NO_PATTERN_RECOGNIZED, true);
        assert_eq!(from_sentinel.id, ZeroBasedBeaconId(1));
    }

    #[test]
    fn test_disabled_entries_are_skipped() {
        let identifier = PatternIdentifier::new(&["X**..", "", "**..", "*..."]);
        assert_eq!(identifier.pattern_count(), 4);
        assert!(identifier.is_disabled(0));
        assert!(identifier.is_disabled(1));
        assert!(!identifier.is_disabled(2));
        let result = identifier.identify(&samples(".**."), ZeroBasedBeaconId::default(), false);
        assert_eq!(result.id, ZeroBasedBeaconId(2));
    }

    #[test]
    fn test_first_match_by_table_order() {
        let identifier = PatternIdentifier::new(&["*..*", "**.."]);
        // "**.." is a rotation of both entries
        let result = identifier.identify(&samples("**.."), ZeroBasedBeaconId::default(), false);
        assert_eq!(result.id, ZeroBasedBeaconId(0));
    }

    #[test]
    #[should_panic(expected = "invalid beacon pattern table")]
    fn test_mismatched_lengths_panic() {
        let _ = PatternIdentifier::new(&["*...", "**..."]);
    }

    #[test]
    fn test_try_new_reports_mismatch() {
        let err = PatternIdentifier::try_new(&["*...", "X", "**..."]).unwrap_err();
        assert!(matches!(err, BeaconTableError::LengthMismatch { index: 2, expected: 4, found: 5 }));
    }

    #[test]
    fn test_empty_table() {
        let identifier = PatternIdentifier::new::<&str>(&[]);
        assert_eq!(identifier.length(), 0);
        let mut history: VecDeque<f32> = vec![0.1, 0.9].into();
        let result = identifier.get_id(ZeroBasedBeaconId::default(), &mut history, false);
        assert_eq!(result.id, ZeroBasedBeaconId::NO_PATTERN_RECOGNIZED);
    }
}
