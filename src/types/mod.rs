pub mod linalg;

pub use linalg::*;

use serde::{Deserialize, Serialize};

/// Filtered pose as reported to consumers (and serialized on the wire)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PoseSnapshot {
    /// Position in room frame [meters]
    pub position: (f64, f64, f64),

    /// Quaternion (w, x, y, z) representing orientation
    pub orientation: (f64, f64, f64, f64),

    /// Linear velocity [m/s]
    pub linear_velocity: (f64, f64, f64),

    /// Body-frame angular velocity [rad/s]
    pub angular_velocity: (f64, f64, f64),

    /// Covariance trace for uncertainty
    pub covariance_trace: f64,
}

/// A single 2D blob sample as seen by the camera for one frame
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LedMeasurement {
    /// Blob centroid in image pixels
    pub location: (f32, f32),

    /// Normalized blob brightness
    pub brightness: f32,

    /// Image dimensions (width, height) in pixels
    pub image_size: (u32, u32),
}

impl LedMeasurement {
    pub fn new(x: f32, y: f32, brightness: f32, image_size: (u32, u32)) -> Self {
        Self {
            location: (x, y),
            brightness,
            image_size,
        }
    }

    pub fn distance_squared_to(&self, other: (f32, f32)) -> f32 {
        let dx = self.location.0 - other.0;
        let dy = self.location.1 - other.1;
        dx * dx + dy * dy
    }
}
