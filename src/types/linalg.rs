//! Linear algebra type system for the pose filters
//!
//! Provides compile-time dimension checking and clean type aliases
//! for the Kalman filter states, process models and measurements.

use nalgebra::{Matrix3, SMatrix, SVector, Vector3};

// ===== State Dimensions =====
pub const POSE_STATE_DIM: usize = 12;
pub const ORIENTATION_STATE_DIM: usize = 6;

// ===== Pose State Layout =====
pub const POSITION_INDEX: usize = 0;          // (x, y, z) meters
pub const ORIENTATION_INDEX: usize = 3;       // incremental rotation vector
pub const LINEAR_VELOCITY_INDEX: usize = 6;   // (vx, vy, vz) m/s
pub const ANGULAR_VELOCITY_INDEX: usize = 9;  // body rates, rad/s

// ===== Measurement Dimensions =====
pub const MEASURE_DIM_POSITION: usize = 3;
pub const MEASURE_DIM_ORIENTATION: usize = 3;
pub const MEASURE_DIM_ANGULAR_VELOCITY: usize = 3;

// ===== 12-State Pose Filter Types =====
pub type PoseStateVec = SVector<f64, POSE_STATE_DIM>;
pub type PoseStateMat = SMatrix<f64, POSE_STATE_DIM, POSE_STATE_DIM>;

// ===== 6-State Orientation Filter Types =====
pub type OrientationStateVec = SVector<f64, ORIENTATION_STATE_DIM>;
pub type OrientationStateMat = SMatrix<f64, ORIENTATION_STATE_DIM, ORIENTATION_STATE_DIM>;

// Measurement types
pub type MeasurementVec3 = Vector3<f64>;
pub type MeasurementNoise3 = Matrix3<f64>;

// Jacobian types
pub type PoseJacobian3 = SMatrix<f64, 3, POSE_STATE_DIM>; // 3×12

/// Per-axis noise autocorrelation for the 6 independently modeled axes
/// (3 translational followed by 3 rotational)
pub type NoiseAutocorrelation = SVector<f64, 6>;
