//! Beacon identifiers
//!
//! Identified beacons have non-negative zero-based ids. Negative values are
//! sentinels describing why a blob is not (yet) identified; they pass
//! through the zero/one-based conversions unchanged.

use serde::{Deserialize, Serialize};
use std::fmt;

/// No identifier attached, or not enough samples collected yet
pub const SENTINEL_INSUFFICIENT_DATA: i32 = -1;
/// Brightness range too small to be a blinking LED
pub const SENTINEL_INSUFFICIENT_CONTRAST: i32 = -2;
/// Enough data and contrast, but the blink code matched nothing
pub const SENTINEL_NO_PATTERN_RECOGNIZED: i32 = -3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ZeroBasedBeaconId(pub i32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OneBasedBeaconId(pub i32);

/// Typed view of an identification result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdentifyOutcome {
    InsufficientData,
    InsufficientContrast,
    NoPatternRecognized,
    Identified(usize),
}

impl ZeroBasedBeaconId {
    pub const INSUFFICIENT_DATA: Self = Self(SENTINEL_INSUFFICIENT_DATA);
    pub const INSUFFICIENT_CONTRAST: Self = Self(SENTINEL_INSUFFICIENT_CONTRAST);
    pub const NO_PATTERN_RECOGNIZED: Self = Self(SENTINEL_NO_PATTERN_RECOGNIZED);

    pub fn from_index(index: usize) -> Self {
        Self(index as i32)
    }

    pub fn is_identified(self) -> bool {
        self.0 >= 0
    }

    /// Index into a beacon table, only for identified beacons
    pub fn as_index(self) -> Option<usize> {
        usize::try_from(self.0).ok()
    }

    pub fn to_one_based(self) -> OneBasedBeaconId {
        if self.0 < 0 {
            OneBasedBeaconId(self.0)
        } else {
            OneBasedBeaconId(self.0 + 1)
        }
    }

    pub fn outcome(self) -> IdentifyOutcome {
        match self.0 {
            SENTINEL_INSUFFICIENT_CONTRAST => IdentifyOutcome::InsufficientContrast,
            SENTINEL_NO_PATTERN_RECOGNIZED => IdentifyOutcome::NoPatternRecognized,
            id if id >= 0 => IdentifyOutcome::Identified(id as usize),
            _ => IdentifyOutcome::InsufficientData,
        }
    }
}

impl Default for ZeroBasedBeaconId {
    fn default() -> Self {
        Self::INSUFFICIENT_DATA
    }
}

impl OneBasedBeaconId {
    pub fn is_identified(self) -> bool {
        self.0 > 0
    }

    pub fn to_zero_based(self) -> ZeroBasedBeaconId {
        if self.0 < 0 {
            ZeroBasedBeaconId(self.0)
        } else {
            ZeroBasedBeaconId(self.0 - 1)
        }
    }

    pub fn as_index(self) -> Option<usize> {
        self.to_zero_based().as_index()
    }
}

impl From<ZeroBasedBeaconId> for OneBasedBeaconId {
    fn from(id: ZeroBasedBeaconId) -> Self {
        id.to_one_based()
    }
}

impl From<OneBasedBeaconId> for ZeroBasedBeaconId {
    fn from(id: OneBasedBeaconId) -> Self {
        id.to_zero_based()
    }
}

impl fmt::Display for ZeroBasedBeaconId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.outcome() {
            IdentifyOutcome::Identified(i) => write!(f, "beacon #{}", i),
            other => write!(f, "{:?}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinels_pass_through_conversion() {
        for id in [
            ZeroBasedBeaconId::INSUFFICIENT_DATA,
            ZeroBasedBeaconId::INSUFFICIENT_CONTRAST,
            ZeroBasedBeaconId::NO_PATTERN_RECOGNIZED,
        ] {
            assert_eq!(id.to_one_based().0, id.0);
            assert_eq!(id.to_one_based().to_zero_based(), id);
            assert!(!id.is_identified());
            assert_eq!(id.as_index(), None);
        }
    }

    #[test]
    fn test_identified_conversion() {
        let zero = ZeroBasedBeaconId::from_index(0);
        assert_eq!(OneBasedBeaconId::from(zero), OneBasedBeaconId(1));
        assert!(OneBasedBeaconId(1).is_identified());
        assert_eq!(OneBasedBeaconId(34).as_index(), Some(33));
        assert_eq!(ZeroBasedBeaconId::from(OneBasedBeaconId(5)), ZeroBasedBeaconId(4));
    }

    #[test]
    fn test_outcome() {
        assert_eq!(ZeroBasedBeaconId(-1).outcome(), IdentifyOutcome::InsufficientData);
        assert_eq!(ZeroBasedBeaconId(-2).outcome(), IdentifyOutcome::InsufficientContrast);
        assert_eq!(ZeroBasedBeaconId(-3).outcome(), IdentifyOutcome::NoPatternRecognized);
        assert_eq!(ZeroBasedBeaconId(7).outcome(), IdentifyOutcome::Identified(7));
        assert_eq!(ZeroBasedBeaconId::default(), ZeroBasedBeaconId::INSUFFICIENT_DATA);
    }
}
