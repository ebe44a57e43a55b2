//! 12-Dimensional pose state
//!
//! State Vector (12D):
//! [0-2]:   Position (X, Y, Z) in room frame (meters)
//! [3-5]:   Incremental orientation (rotation vector relative to the cached quaternion)
//! [6-8]:   Linear velocity (Vx, Vy, Vz) (m/s)
//! [9-11]:  Angular velocity in body frame (rad/s)
//!
//! The true orientation is `cached * exp(incremental)`. Whenever the
//! increment is folded into the cache the represented orientation is
//! unchanged and the increment returns to zero.

use nalgebra::{UnitQuaternion, Vector3};

use super::kalman::{FilterState, RotationalState};
use crate::math;
use crate::types::{
    PoseSnapshot, PoseStateMat, PoseStateVec, ANGULAR_VELOCITY_INDEX, LINEAR_VELOCITY_INDEX,
    ORIENTATION_INDEX, POSE_STATE_DIM, POSITION_INDEX,
};

/// Initial variance on every state dimension
pub const DEFAULT_INITIAL_VARIANCE: f64 = 10.0;

#[derive(Clone, Debug, PartialEq)]
pub struct PoseState {
    /// State vector [12D]
    state: PoseStateVec,

    /// Covariance matrix [12x12]
    error_covariance: PoseStateMat,

    /// Cached orientation the incremental rotation is relative to
    orientation: UnitQuaternion<f64>,
}

impl PoseState {
    /// Zero state at the identity orientation with a broad prior
    pub fn new() -> Self {
        Self::with_covariance(PoseStateMat::identity() * DEFAULT_INITIAL_VARIANCE)
    }

    pub fn with_covariance(error_covariance: PoseStateMat) -> Self {
        Self {
            state: PoseStateVec::zeros(),
            error_covariance,
            orientation: UnitQuaternion::identity(),
        }
    }

    fn segment(&self, index: usize) -> Vector3<f64> {
        self.state.fixed_rows::<3>(index).into_owned()
    }

    fn set_segment(&mut self, index: usize, value: &Vector3<f64>) {
        self.state.fixed_rows_mut::<3>(index).copy_from(value);
    }

    pub fn position(&self) -> Vector3<f64> {
        self.segment(POSITION_INDEX)
    }

    pub fn set_position(&mut self, position: &Vector3<f64>) {
        self.set_segment(POSITION_INDEX, position);
    }

    pub fn incremental_orientation(&self) -> Vector3<f64> {
        self.segment(ORIENTATION_INDEX)
    }

    pub fn set_incremental_orientation(&mut self, increment: &Vector3<f64>) {
        self.set_segment(ORIENTATION_INDEX, increment);
    }

    pub fn velocity(&self) -> Vector3<f64> {
        self.segment(LINEAR_VELOCITY_INDEX)
    }

    pub fn set_velocity(&mut self, velocity: &Vector3<f64>) {
        self.set_segment(LINEAR_VELOCITY_INDEX, velocity);
    }

    pub fn angular_velocity(&self) -> Vector3<f64> {
        self.segment(ANGULAR_VELOCITY_INDEX)
    }

    pub fn set_angular_velocity(&mut self, angular_velocity: &Vector3<f64>) {
        self.set_segment(ANGULAR_VELOCITY_INDEX, angular_velocity);
    }

    pub fn cached_orientation(&self) -> &UnitQuaternion<f64> {
        &self.orientation
    }

    pub fn orientation(&self) -> UnitQuaternion<f64> {
        self.orientation * math::exp(&self.incremental_orientation())
    }

    /// Set the orientation outright, clearing the increment
    pub fn set_orientation(&mut self, orientation: UnitQuaternion<f64>) {
        self.orientation = orientation;
        self.set_incremental_orientation(&Vector3::zeros());
    }

    /// Fold the incremental rotation into the cached quaternion.
    pub fn externalize_rotation(&mut self) {
        self.orientation = self.orientation();
        self.orientation.renormalize();
        self.set_incremental_orientation(&Vector3::zeros());
    }

    /// Snapshot for reporting
    pub fn snapshot(&self) -> PoseSnapshot {
        let p = self.position();
        let q = self.orientation();
        let v = self.velocity();
        let w = self.angular_velocity();
        PoseSnapshot {
            position: (p.x, p.y, p.z),
            orientation: (q.w, q.i, q.j, q.k),
            linear_velocity: (v.x, v.y, v.z),
            angular_velocity: (w.x, w.y, w.z),
            covariance_trace: self.error_covariance.trace(),
        }
    }
}

impl Default for PoseState {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterState<POSE_STATE_DIM> for PoseState {
    fn state_vector(&self) -> PoseStateVec {
        self.state
    }

    fn set_state_vector(&mut self, state: PoseStateVec) {
        self.state = state;
    }

    fn error_covariance(&self) -> &PoseStateMat {
        &self.error_covariance
    }

    fn set_error_covariance(&mut self, covariance: PoseStateMat) {
        self.error_covariance = covariance;
    }

    fn post_correct(&mut self) {
        self.externalize_rotation();
    }
}

impl RotationalState<POSE_STATE_DIM> for PoseState {
    const ORIENTATION_INDEX: usize = ORIENTATION_INDEX;
    const ANGULAR_VELOCITY_INDEX: usize = ANGULAR_VELOCITY_INDEX;

    fn incremental_orientation(&self) -> Vector3<f64> {
        PoseState::incremental_orientation(self)
    }

    fn angular_velocity(&self) -> Vector3<f64> {
        PoseState::angular_velocity(self)
    }

    fn orientation(&self) -> UnitQuaternion<f64> {
        PoseState::orientation(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_default_state() {
        let state = PoseState::default();
        assert_eq!(state.position(), Vector3::zeros());
        assert_eq!(state.orientation(), UnitQuaternion::identity());
        assert_eq!(state.error_covariance().trace(), 120.0);
    }

    #[test]
    fn test_externalize_preserves_orientation() {
        let mut state = PoseState::new();
        state.set_orientation(math::exp(&Vector3::new(0.3, 0.0, 0.1)));
        state.set_incremental_orientation(&Vector3::new(0.0, 0.4, -0.2));
        let before = state.orientation();

        state.externalize_rotation();

        assert_eq!(state.incremental_orientation(), Vector3::zeros());
        assert!(math::angular_distance(&before, &state.orientation()) < 1e-12);
    }

    #[test]
    fn test_segment_accessors() {
        let mut state = PoseState::new();
        state.set_position(&Vector3::new(1.0, 2.0, 3.0));
        state.set_velocity(&Vector3::new(4.0, 5.0, 6.0));
        state.set_angular_velocity(&Vector3::new(7.0, 8.0, 9.0));
        let x = state.state_vector();
        assert_eq!(x[0], 1.0);
        assert_eq!(x[6], 4.0);
        assert_eq!(x[11], 9.0);
    }

    #[test]
    fn test_snapshot() {
        let mut state = PoseState::new();
        state.set_position(&Vector3::new(0.5, 0.0, -1.0));
        let snap = state.snapshot();
        assert_eq!(snap.position, (0.5, 0.0, -1.0));
        assert_relative_eq!(snap.orientation.0, 1.0);
        assert_relative_eq!(snap.covariance_trace, 120.0);
    }
}
