//! 6-Dimensional orientation-only state for IMU-only devices
//!
//! [0-2]: Incremental orientation (rotation vector relative to the cached quaternion)
//! [3-5]: Angular velocity in body frame (rad/s)

use nalgebra::{UnitQuaternion, Vector3};

use super::kalman::{FilterState, RotationalState};
use super::pose_state::DEFAULT_INITIAL_VARIANCE;
use crate::math;
use crate::types::{OrientationStateMat, OrientationStateVec, ORIENTATION_STATE_DIM};

const INCREMENT_INDEX: usize = 0;
const RATE_INDEX: usize = 3;

#[derive(Clone, Debug, PartialEq)]
pub struct OrientationState {
    state: OrientationStateVec,
    error_covariance: OrientationStateMat,
    orientation: UnitQuaternion<f64>,
}

impl OrientationState {
    pub fn new() -> Self {
        Self {
            state: OrientationStateVec::zeros(),
            error_covariance: OrientationStateMat::identity() * DEFAULT_INITIAL_VARIANCE,
            orientation: UnitQuaternion::identity(),
        }
    }

    pub fn incremental_orientation(&self) -> Vector3<f64> {
        self.state.fixed_rows::<3>(INCREMENT_INDEX).into_owned()
    }

    pub fn set_incremental_orientation(&mut self, increment: &Vector3<f64>) {
        self.state.fixed_rows_mut::<3>(INCREMENT_INDEX).copy_from(increment);
    }

    pub fn angular_velocity(&self) -> Vector3<f64> {
        self.state.fixed_rows::<3>(RATE_INDEX).into_owned()
    }

    pub fn set_angular_velocity(&mut self, angular_velocity: &Vector3<f64>) {
        self.state.fixed_rows_mut::<3>(RATE_INDEX).copy_from(angular_velocity);
    }

    pub fn cached_orientation(&self) -> &UnitQuaternion<f64> {
        &self.orientation
    }

    pub fn orientation(&self) -> UnitQuaternion<f64> {
        self.orientation * math::exp(&self.incremental_orientation())
    }

    pub fn set_orientation(&mut self, orientation: UnitQuaternion<f64>) {
        self.orientation = orientation;
        self.set_incremental_orientation(&Vector3::zeros());
    }

    pub fn externalize_rotation(&mut self) {
        self.orientation = self.orientation();
        self.orientation.renormalize();
        self.set_incremental_orientation(&Vector3::zeros());
    }
}

impl Default for OrientationState {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterState<ORIENTATION_STATE_DIM> for OrientationState {
    fn state_vector(&self) -> OrientationStateVec {
        self.state
    }

    fn set_state_vector(&mut self, state: OrientationStateVec) {
        self.state = state;
    }

    fn error_covariance(&self) -> &OrientationStateMat {
        &self.error_covariance
    }

    fn set_error_covariance(&mut self, covariance: OrientationStateMat) {
        self.error_covariance = covariance;
    }

    fn post_correct(&mut self) {
        self.externalize_rotation();
    }
}

impl RotationalState<ORIENTATION_STATE_DIM> for OrientationState {
    const ORIENTATION_INDEX: usize = INCREMENT_INDEX;
    const ANGULAR_VELOCITY_INDEX: usize = RATE_INDEX;

    fn incremental_orientation(&self) -> Vector3<f64> {
        OrientationState::incremental_orientation(self)
    }

    fn angular_velocity(&self) -> Vector3<f64> {
        OrientationState::angular_velocity(self)
    }

    fn orientation(&self) -> UnitQuaternion<f64> {
        OrientationState::orientation(self)
    }
}
