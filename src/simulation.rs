//! Synthetic blinking-beacon camera
//!
//! Renders a rigid target carrying blinking LEDs as seen by a pinhole camera
//! looking down +Z. Used by the server when no hardware is present and by
//! the end-to-end tests.

use std::f64::consts::TAU;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use nalgebra::Vector3;
use parking_lot::Mutex;

use crate::beacons::{PatternTable, ZeroBasedBeaconId};
use crate::device_token::{CameraFrame, DeviceReport, DeviceToken, ReportKind};
use crate::error::RegistryError;
use crate::ipc::FrameMetadata;
use crate::registry::Plugin;
use crate::tracking::BeaconLayout;
use crate::types::LedMeasurement;

const BRIGHT: f32 = 0.9;
const DIM: f32 = 0.2;

#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticScene {
    /// Beacon patterns; disabled entries (leading `X`) are not rendered
    pub patterns: Vec<String>,
    pub layout: BeaconLayout,
    pub focal_length_px: f64,
    pub image_size: (u16, u16),
    /// Target center at rest, camera frame [m]
    pub rest_position: Vector3<f64>,
    /// Lateral sway amplitude [m]
    pub sway: f64,
    pub sway_hz: f64,
}

impl SyntheticScene {
    /// Back plate of the HDK (six beacons on a hexagon) at 0.6 m
    pub fn hdk_back_plate() -> Self {
        let patterns: Vec<String> = PatternTable::HdkSensor1Original
            .patterns()
            .into_iter()
            .map(str::to_string)
            .collect();
        let positions = (0..patterns.len())
            .map(|i| {
                let a = TAU * i as f64 / patterns.len() as f64;
                Some(Vector3::new(0.1 * a.cos(), 0.1 * a.sin(), 0.0))
            })
            .collect();
        Self {
            patterns,
            layout: BeaconLayout::new(positions),
            focal_length_px: 150.0,
            image_size: (160, 120),
            rest_position: Vector3::new(0.0, 0.0, 0.6),
            sway: 0.02,
            sway_hz: 0.25,
        }
    }

    /// One beacon per pattern on a square grid with 5 cm pitch, at 0.6 m
    pub fn from_patterns(patterns: Vec<String>) -> Self {
        let cols = (patterns.len() as f64).sqrt().ceil().max(1.0) as usize;
        let rows = (patterns.len() + cols - 1) / cols.max(1);
        let pitch = 0.05;
        let x0 = -(cols as f64 - 1.0) * pitch / 2.0;
        let y0 = -(rows as f64 - 1.0) * pitch / 2.0;
        let positions = (0..patterns.len())
            .map(|i| {
                let (r, c) = (i / cols, i % cols);
                Some(Vector3::new(x0 + c as f64 * pitch, y0 + r as f64 * pitch, 0.0))
            })
            .collect();
        Self {
            patterns,
            layout: BeaconLayout::new(positions),
            ..Self::hdk_back_plate()
        }
    }

    /// Target position at time `t`
    pub fn position_at(&self, t: f64) -> Vector3<f64> {
        let phase = TAU * self.sway_hz * t;
        self.rest_position + Vector3::new(self.sway * phase.sin(), 0.5 * self.sway * phase.cos(), 0.0)
    }

    /// Blob list for frame `index` at `fps`
    pub fn blobs(&self, index: u64, fps: f64) -> Vec<LedMeasurement> {
        let t = index as f64 / fps;
        let center = self.position_at(t);
        let (w, h) = (self.image_size.0 as u32, self.image_size.1 as u32);
        self.patterns
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.starts_with('X') && !p.is_empty())
            .filter_map(|(i, pattern)| {
                let model = self.layout.position(ZeroBasedBeaconId::from_index(i))?;
                let p = center + model;
                if p.z <= 0.0 {
                    return None;
                }
                let u = w as f64 / 2.0 + self.focal_length_px * p.x / p.z;
                let v = h as f64 / 2.0 + self.focal_length_px * p.y / p.z;
                let bit = pattern.as_bytes()[(index % pattern.len() as u64) as usize];
                let brightness = if bit == b'*' { BRIGHT } else { DIM };
                Some(LedMeasurement::new(u as f32, v as f32, brightness, (w, h)))
            })
            .collect()
    }

    /// Grayscale image with a 3x3 spot per blob
    pub fn render(&self, blobs: &[LedMeasurement]) -> Vec<u8> {
        let (w, h) = (self.image_size.0 as i64, self.image_size.1 as i64);
        let mut image = vec![0u8; (w * h) as usize];
        for blob in blobs {
            let (cx, cy) = (blob.location.0.round() as i64, blob.location.1.round() as i64);
            let value = (blob.brightness.clamp(0.0, 1.0) * 255.0) as u8;
            for y in (cy - 1)..=(cy + 1) {
                for x in (cx - 1)..=(cx + 1) {
                    if (0..w).contains(&x) && (0..h).contains(&y) {
                        image[(y * w + x) as usize] = value;
                    }
                }
            }
        }
        image
    }

    pub fn frame(&self, index: u64, fps: f64) -> CameraFrame {
        let blobs = self.blobs(index, fps);
        CameraFrame {
            metadata: FrameMetadata {
                width: self.image_size.0,
                height: self.image_size.1,
                channels: 1,
                depth: 1,
                timestamp_us: (index as f64 * 1e6 / fps).round() as i64,
            },
            image: self.render(&blobs),
            blobs,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimStats {
    pub frames_generated: u64,
}

/// Plugin exposing one synthetic camera
pub struct SyntheticCameraPlugin {
    scene: Arc<SyntheticScene>,
    frame_rate_hz: f64,
    channel_capacity: usize,
    /// Stop after this many frames; unlimited when `None`
    frame_limit: Option<u64>,
    stats: Arc<Mutex<SimStats>>,
    detected: bool,
}

impl SyntheticCameraPlugin {
    pub const NAME: &'static str = "synthetic_camera";

    pub fn new(scene: SyntheticScene, frame_rate_hz: f64, channel_capacity: usize) -> Self {
        Self {
            scene: Arc::new(scene),
            frame_rate_hz,
            channel_capacity,
            frame_limit: None,
            stats: Arc::new(Mutex::new(SimStats::default())),
            detected: false,
        }
    }

    pub fn with_frame_limit(mut self, frames: u64) -> Self {
        self.frame_limit = Some(frames);
        self
    }

    pub fn scene(&self) -> &SyntheticScene {
        &self.scene
    }

    pub fn stats_handle(&self) -> Arc<Mutex<SimStats>> {
        Arc::clone(&self.stats)
    }

    fn spawn_device(&self) -> DeviceToken {
        let scene = Arc::clone(&self.scene);
        let stats = Arc::clone(&self.stats);
        let fps = self.frame_rate_hz;
        let period = Duration::from_secs_f64(1.0 / fps);
        let limit = self.frame_limit;
        let start = Instant::now();
        let mut index: u64 = 0;
        let mut pending: Option<DeviceReport> = None;

        DeviceToken::spawn(Self::NAME, self.channel_capacity, move || {
            if let Some(report) = pending.take() {
                return Some(report);
            }
            if limit.is_some_and(|l| index >= l) {
                return None;
            }
            let due = start + period.mul_f64(index as f64);
            let now = Instant::now();
            if due > now {
                thread::sleep(due - now);
            }

            let timestamp = index as f64 / fps;
            let frame = scene.frame(index, fps);
            index += 1;
            stats.lock().frames_generated = index;

            pending = Some(DeviceReport {
                sensor: 1,
                timestamp,
                kind: ReportKind::AngularVelocity {
                    value: Vector3::zeros(),
                    variance: Vector3::repeat(1e-4),
                },
            });
            Some(DeviceReport {
                sensor: 0,
                timestamp,
                kind: ReportKind::Camera(frame),
            })
        })
    }
}

impl Plugin for SyntheticCameraPlugin {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn hardware_detect(&mut self) -> Result<Vec<DeviceToken>, RegistryError> {
        if self.detected {
            return Ok(Vec::new());
        }
        if !(self.frame_rate_hz > 0.0 && self.frame_rate_hz.is_finite()) {
            return Err(RegistryError::PluginFailed {
                name: Self::NAME.to_string(),
                reason: format!("invalid frame rate {}", self.frame_rate_hz),
            });
        }
        self.detected = true;
        Ok(vec![self.spawn_device()])
    }

    fn update(&mut self) -> Result<(), RegistryError> {
        Ok(())
    }

    fn shutdown(&mut self) {
        log::info!(
            "[SIM] Generated {} frames",
            self.stats.lock().frames_generated
        );
    }
}
