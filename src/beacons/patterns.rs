//! Known blink-code tables for the OSVR HDK
//!
//! Sensor 0 is the face plate, sensor 1 the back plate. The "original"
//! tables come from the design documentation; the as-built tables were
//! measured on production units and use a leading `X` to disable beacons
//! that do not blink reliably.

use serde::{Deserialize, Serialize};

use super::identifier::PatternIdentifier;

/// Face plate, design documentation (LED 7..40 overall)
pub const HDK_SENSOR0_ORIGINAL_PATTERNS: &[&str] = &[
    "..*.....*...*...", //  7  1
    "...*......*...*.", //  8  2
    ".......*...*...*", //  9  3
    "......*...*..*..", // 10  4
    ".......*....*..*", // 11  5
    "..*.....*..*....", // 12  6
    "....*......*..*.", // 13  7
    "....*..*....*...", // 14  8
    "..*...*........*", // 15  9
    "........*..*..*.", // 16 10
    "..*..*.*........", // 17 11
    "....*...*.*.....", // 18 12
    "...*.*........*.", // 19 13
    "...*.....*.*....", // 20 14
    "....*.*......*..", // 21 15
    "*.......*.*.....", // 22 16
    ".*........*.*...", // 23 17
    ".*.........*.*..", // 24 18
    "....*.*..*......", // 25 19
    ".*.*.*..........", // 26 20
    ".........*.**...", // 27 21
    "**...........*..", // 28 22
    ".*...**.........", // 29 23
    ".........*....**", // 30 24
    "..*.....**......", // 31 25
    "*......**.......", // 32 26
    "...*.......**...", // 33 27
    "...**.....*.....", // 34 28
    ".**....*........", // 35 29
    "....**...*......", // 36 30
    "*...........**..", // 37 31
    "......**.*......", // 38 32
    ".............***", // 39 33
    "..........*.....", // 40 34
];

/// Back plate, design documentation (LED 1..6 overall)
pub const HDK_SENSOR1_ORIGINAL_PATTERNS: &[&str] = &[
    "***...*........*", // 1
    "...****..*......", // 2
    "*.*..........***", // 3
    "**...........***", // 4
    "*....*....*.....", // 5
    "...*....*...*...", // 6
];

/// Face plate, as built
pub const HDK_SENSOR0_PATTERNS: &[&str] = &[
    "X.**....*........", //  5
    "X....**...*......", //  6
    ".*...**.........",  //  3
    ".........*....**",  //  4
    "..*.....**......",  //  1
    "*......**.......",  //  2
    "....*.*..*......",  // 10
    ".*.*.*..........",  //  8
    ".........*.**...",  //  9
    "X**...........*..", //  7
    "....*.*......*..",  // 11
    "X*.......*.*.....", // 28
    "X.*........*.*...", // 27
    "X.*.........*.*..", // 25
    "..*..*.*........",  // 15
    "....*...*.*.....",  // 16
    "...*.*........*.",  // 17
    "...*.....*.*....",  // 18
    "....*......*..*.",  // 19
    "....*..*....*...",  // 20
    "X..*...*........*", // 21
    "........*..*..*.",  // 22
    ".......*...*...*",  // 23
    "......*...*..*..",  // 24
    ".......*....*..*",  // 14
    "..*.....*..*....",  // 26
    "*....*....*.....",  // 13
    "...*....*...*...",  // 12
    "..*.....*...*...",  // 29
    "...*......*...*.",  // 30
    "***...*........*",  // 31
    "...****..*......",  // 32
    "*.*..........***",  // 33
    "**...........***",  // 34
];

/// Back plate, as built
pub const HDK_SENSOR1_PATTERNS: &[&str] = &[
    "X............**..", // 37, never turns on in production
    "......**.*......",  // 38
    ".............***",  // 39
    "X..........*.....", // 40, never turns on in production
    "...*.......**...",  // 33
    "...**.....*.....",  // 34
];

/// Named beacon tables selectable from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternTable {
    HdkSensor0,
    HdkSensor1,
    /// Sensor 0 followed by sensor 1, as one id space
    HdkUnified,
    HdkSensor0Original,
    HdkSensor1Original,
}

impl PatternTable {
    pub fn patterns(self) -> Vec<&'static str> {
        match self {
            PatternTable::HdkSensor0 => HDK_SENSOR0_PATTERNS.to_vec(),
            PatternTable::HdkSensor1 => HDK_SENSOR1_PATTERNS.to_vec(),
            PatternTable::HdkUnified => HDK_SENSOR0_PATTERNS
                .iter()
                .chain(HDK_SENSOR1_PATTERNS.iter())
                .copied()
                .collect(),
            PatternTable::HdkSensor0Original => HDK_SENSOR0_ORIGINAL_PATTERNS.to_vec(),
            PatternTable::HdkSensor1Original => HDK_SENSOR1_ORIGINAL_PATTERNS.to_vec(),
        }
    }

    pub fn identifier(self) -> PatternIdentifier {
        PatternIdentifier::new(&self.patterns())
    }
}

/// Identifier for one HDK sensor; `None` for sensors other than 0 and 1.
pub fn create_hdk_identifier(sensor: u8) -> Option<PatternIdentifier> {
    match sensor {
        0 => Some(PatternTable::HdkSensor0.identifier()),
        1 => Some(PatternTable::HdkSensor1.identifier()),
        _ => None,
    }
}

/// Identifier using the design-documentation tables, as used for simulated input
pub fn create_hdk_identifier_simulated(sensor: u8) -> Option<PatternIdentifier> {
    match sensor {
        0 => Some(PatternTable::HdkSensor0Original.identifier()),
        1 => Some(PatternTable::HdkSensor1Original.identifier()),
        _ => None,
    }
}
