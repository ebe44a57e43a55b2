//! Server configuration (JSON)
//!
//! Every field has a default, so an empty object `{}` is a valid config.
//! CLI flags in the server binary override individual values afterwards.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::beacons::{PatternIdentifier, PatternTable};
use crate::error::ConfigError;
use crate::filters::process::{
    DEFAULT_DAMPING, DEFAULT_ORIENTATION_DAMPING, DEFAULT_ORIENTATION_NOISE,
    DEFAULT_POSITION_DAMPING, DEFAULT_POSITION_NOISE,
};
use crate::filters::{
    KalmanFilter, PoseConstantVelocity, PoseDampedConstantVelocity,
    PoseSeparatelyDampedConstantVelocity, PoseState,
};
use crate::ipc::options::{DEFAULT_ALIGNMENT, DEFAULT_ENTRIES, DEFAULT_ENTRY_SIZE};
use crate::ipc::RingBufferOptions;
use crate::tracking::TrackingFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessModelKind {
    ConstantVelocity,
    Damped,
    SeparatelyDamped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub process_model: ProcessModelKind,
    /// Velocity retained per second, damped model
    pub damping: f64,
    pub position_damping: f64,
    pub orientation_damping: f64,
    pub position_noise: f64,
    pub orientation_noise: f64,
    /// Step used when a timestamp does not advance [s]
    pub min_dt: f64,
    /// Reset the filter when its contents become NaN/Inf
    pub reset_on_invalid: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            process_model: ProcessModelKind::SeparatelyDamped,
            damping: DEFAULT_DAMPING,
            position_damping: DEFAULT_POSITION_DAMPING,
            orientation_damping: DEFAULT_ORIENTATION_DAMPING,
            position_noise: DEFAULT_POSITION_NOISE,
            orientation_noise: DEFAULT_ORIENTATION_NOISE,
            min_dt: 1e-4,
            reset_on_invalid: true,
        }
    }
}

impl FilterConfig {
    /// Fresh filter at the default state using this configuration
    pub fn build_filter(&self) -> TrackingFilter {
        let state = PoseState::new();
        match self.process_model {
            ProcessModelKind::ConstantVelocity => {
                let process =
                    PoseConstantVelocity::with_noise(self.position_noise, self.orientation_noise);
                TrackingFilter::ConstantVelocity(KalmanFilter::new(process, state))
            }
            ProcessModelKind::Damped => {
                let mut process = PoseDampedConstantVelocity::with_damping(self.damping);
                process
                    .constant_velocity_mut()
                    .set_noise_autocorrelation_uniform(self.position_noise, self.orientation_noise);
                TrackingFilter::Damped(KalmanFilter::new(process, state))
            }
            ProcessModelKind::SeparatelyDamped => {
                let mut process = PoseSeparatelyDampedConstantVelocity::with_damping(
                    self.position_damping,
                    self.orientation_damping,
                );
                process
                    .constant_velocity_mut()
                    .set_noise_autocorrelation_uniform(self.position_noise, self.orientation_noise);
                TrackingFilter::SeparatelyDamped(KalmanFilter::new(process, state))
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("damping", self.damping),
            ("position_damping", self.position_damping),
            ("orientation_damping", self.orientation_damping),
        ] {
            if !(value > 0.0 && value < 1.0) {
                return Err(ConfigError::Invalid(format!(
                    "filter.{} must be in (0, 1), got {}",
                    name, value
                )));
            }
        }
        if !(self.position_noise > 0.0 && self.orientation_noise > 0.0) {
            return Err(ConfigError::Invalid(
                "filter noise autocorrelations must be positive".to_string(),
            ));
        }
        if !(self.min_dt > 0.0 && self.min_dt.is_finite()) {
            return Err(ConfigError::Invalid(format!(
                "filter.min_dt must be positive, got {}",
                self.min_dt
            )));
        }
        Ok(())
    }
}

/// Which beacon table to load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeaconTableChoice {
    HdkSensor0,
    HdkSensor1,
    HdkUnified,
    HdkSensor0Original,
    HdkSensor1Original,
    /// Use `BeaconConfig::patterns`
    Custom,
}

impl BeaconTableChoice {
    fn builtin(self) -> Option<PatternTable> {
        match self {
            BeaconTableChoice::HdkSensor0 => Some(PatternTable::HdkSensor0),
            BeaconTableChoice::HdkSensor1 => Some(PatternTable::HdkSensor1),
            BeaconTableChoice::HdkUnified => Some(PatternTable::HdkUnified),
            BeaconTableChoice::HdkSensor0Original => Some(PatternTable::HdkSensor0Original),
            BeaconTableChoice::HdkSensor1Original => Some(PatternTable::HdkSensor1Original),
            BeaconTableChoice::Custom => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeaconConfig {
    pub table: BeaconTableChoice,
    pub patterns: Vec<String>,
    /// Keep a previously identified id while its pattern still matches
    pub keep_ids: bool,
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self {
            table: BeaconTableChoice::HdkSensor0,
            patterns: Vec::new(),
            keep_ids: true,
        }
    }
}

impl BeaconConfig {
    /// The selected table as owned strings
    pub fn pattern_strings(&self) -> Vec<String> {
        match self.table.builtin() {
            Some(table) => table.patterns().into_iter().map(str::to_string).collect(),
            None => self.patterns.clone(),
        }
    }

    pub fn build_identifier(&self) -> Result<PatternIdentifier, ConfigError> {
        PatternIdentifier::try_new(&self.pattern_strings())
            .map_err(|e| ConfigError::Invalid(format!("beacons.patterns: {}", e)))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.table == BeaconTableChoice::Custom && self.patterns.is_empty() {
            return Err(ConfigError::Invalid(
                "beacons.table is custom but beacons.patterns is empty".to_string(),
            ));
        }
        self.build_identifier().map(|_| ())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RingBufferConfig {
    pub name: String,
    pub alignment: usize,
    pub entries: usize,
    pub entry_size: usize,
    pub backend: u8,
}

impl Default for RingBufferConfig {
    fn default() -> Self {
        Self {
            name: "vr-camera".to_string(),
            alignment: DEFAULT_ALIGNMENT,
            entries: DEFAULT_ENTRIES,
            entry_size: DEFAULT_ENTRY_SIZE,
            backend: 0,
        }
    }
}

impl RingBufferConfig {
    pub fn options(&self) -> RingBufferOptions {
        RingBufferOptions::new(&self.name)
            .with_alignment(self.alignment)
            .with_entries(self.entries)
            .with_entry_size(self.entry_size)
            .with_backend(self.backend)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Reports buffered between the acquisition thread and the run loop
    pub channel_capacity: usize,
    pub frame_rate_hz: f64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1,
            frame_rate_hz: 60.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub filter: FilterConfig,
    pub beacons: BeaconConfig,
    pub ring_buffer: RingBufferConfig,
    pub device: DeviceConfig,
}

impl ServerConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Parse and validate
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: ServerConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.filter.validate()?;
        self.beacons.validate()?;
        if self.device.channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "device.channel_capacity must be at least 1".to_string(),
            ));
        }
        if !(self.device.frame_rate_hz > 0.0 && self.device.frame_rate_hz.is_finite()) {
            return Err(ConfigError::Invalid(format!(
                "device.frame_rate_hz must be positive, got {}",
                self.device.frame_rate_hz
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_is_default() {
        let cfg = ServerConfig::from_json_str("{}").unwrap();
        assert_eq!(cfg, ServerConfig::default());
        assert_eq!(cfg.ring_buffer.name, "vr-camera");
        assert_eq!(cfg.ring_buffer.entries, 16);
        assert_eq!(cfg.ring_buffer.entry_size, 65536);
        assert_eq!(cfg.device.channel_capacity, 1);
        assert!(cfg.filter.reset_on_invalid);
        assert!(cfg.beacons.keep_ids);
    }

    #[test]
    fn test_partial_sections() {
        let cfg = ServerConfig::from_json_str(
            r#"{"filter": {"process_model": "damped", "damping": 0.5},
                "ring_buffer": {"alignment": 20}}"#,
        )
        .unwrap();
        assert_eq!(cfg.filter.process_model, ProcessModelKind::Damped);
        assert!((cfg.filter.damping - 0.5).abs() < f64::EPSILON);
        assert!((cfg.filter.min_dt - 1e-4).abs() < f64::EPSILON);
        assert_eq!(cfg.ring_buffer.options().alignment(), 32);
        assert!(matches!(cfg.filter.build_filter(), TrackingFilter::Damped(_)));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            ServerConfig::from_json_str(r#"{"filter": {"damping": 1.5}}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ServerConfig::from_json_str(r#"{"device": {"channel_capacity": 0}}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ServerConfig::from_json_str(r#"{"beacons": {"table": "custom"}}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ServerConfig::from_json_str("{not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_custom_patterns() {
        let cfg = ServerConfig::from_json_str(
            r#"{"beacons": {"table": "custom", "patterns": ["*...", "**.."]}}"#,
        )
        .unwrap();
        assert_eq!(cfg.beacons.build_identifier().unwrap().pattern_count(), 2);

        let bad = BeaconConfig {
            table: BeaconTableChoice::Custom,
            patterns: vec!["*...".to_string(), "**...".to_string()],
            keep_ids: true,
        };
        assert!(bad.build_identifier().is_err());
    }

    #[test]
    fn test_builtin_tables() {
        let cfg = BeaconConfig {
            table: BeaconTableChoice::HdkUnified,
            ..BeaconConfig::default()
        };
        assert_eq!(cfg.build_identifier().unwrap().pattern_count(), 40);
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            ServerConfig::load("/nonexistent/vr_runtime_core.json"),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_serde_roundtrip() {
        let mut cfg = ServerConfig::default();
        cfg.filter.process_model = ProcessModelKind::ConstantVelocity;
        cfg.ring_buffer.name = "cam".to_string();
        let json = serde_json::to_string(&cfg).unwrap();
        assert_eq!(ServerConfig::from_json_str(&json).unwrap(), cfg);
    }
}
