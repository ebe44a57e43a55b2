//! LED beacon identification from temporal blink codes

pub mod identifier;
pub mod ids;
pub mod led;
pub mod patterns;

pub use identifier::{Identification, LedIdentifier, PatternIdentifier, MIN_BRIGHTNESS_DIFFERENCE};
pub use ids::{IdentifyOutcome, OneBasedBeaconId, ZeroBasedBeaconId};
pub use led::{Led, MAX_NOVELTY};
pub use patterns::{create_hdk_identifier, create_hdk_identifier_simulated, PatternTable};
