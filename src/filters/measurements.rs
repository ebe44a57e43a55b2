//! Measurement models: absolute orientation, absolute position and angular velocity
//!
//! Each measurement is plain data (observation plus noise covariance) and
//! computes its residual and Jacobian purely from the current estimate.

use nalgebra::{Matrix3, SMatrix, UnitQuaternion, Vector3};

use super::kalman::{Measurement, RotationalState};
use super::pose_state::PoseState;
use crate::math;
use crate::types::{
    MeasurementNoise3, MeasurementVec3, PoseJacobian3, MEASURE_DIM_ANGULAR_VELOCITY,
    MEASURE_DIM_ORIENTATION, MEASURE_DIM_POSITION, POSE_STATE_DIM, POSITION_INDEX,
};

/// Observed orientation with covariance in rotation-vector space.
///
/// The residual is the body-frame rotation vector taking the predicted
/// orientation to the observed one, `ln(q_pred⁻¹ · q_obs)`, which is
/// `ln(q_obs · q_pred⁻¹)` rotated into the predicted body frame.
#[derive(Clone, Debug, PartialEq)]
pub struct AbsoluteOrientationMeasurement {
    pub orientation: UnitQuaternion<f64>,
    pub covariance: MeasurementNoise3,
}

impl AbsoluteOrientationMeasurement {
    pub fn new(orientation: UnitQuaternion<f64>, covariance: MeasurementNoise3) -> Self {
        Self {
            orientation,
            covariance,
        }
    }

    /// Same variance on every rotation axis
    pub fn with_variance(orientation: UnitQuaternion<f64>, variance: f64) -> Self {
        Self::new(orientation, Matrix3::identity() * variance)
    }
}

impl<S, const N: usize> Measurement<S, N, MEASURE_DIM_ORIENTATION> for AbsoluteOrientationMeasurement
where
    S: RotationalState<N>,
{
    fn residual(&self, state: &S) -> MeasurementVec3 {
        let predicted = state.orientation();
        math::ln(&(predicted.inverse() * self.orientation))
    }

    fn jacobian(&self, state: &S) -> SMatrix<f64, MEASURE_DIM_ORIENTATION, N> {
        let mut h = SMatrix::<f64, MEASURE_DIM_ORIENTATION, N>::zeros();
        h.fixed_view_mut::<3, 3>(0, S::ORIENTATION_INDEX)
            .copy_from(&math::right_jacobian(&state.incremental_orientation()));
        h
    }

    fn covariance(&self, _state: &S) -> MeasurementNoise3 {
        self.covariance
    }
}

/// Observed position in room frame.
#[derive(Clone, Debug, PartialEq)]
pub struct AbsolutePositionMeasurement {
    pub position: Vector3<f64>,
    pub covariance: MeasurementNoise3,
}

impl AbsolutePositionMeasurement {
    /// Per-axis variance (diagonal covariance)
    pub fn new(position: Vector3<f64>, variance: Vector3<f64>) -> Self {
        Self::with_covariance(position, Matrix3::from_diagonal(&variance))
    }

    pub fn with_covariance(position: Vector3<f64>, covariance: MeasurementNoise3) -> Self {
        Self {
            position,
            covariance,
        }
    }
}

impl Measurement<PoseState, POSE_STATE_DIM, MEASURE_DIM_POSITION> for AbsolutePositionMeasurement {
    fn residual(&self, state: &PoseState) -> MeasurementVec3 {
        self.position - state.position()
    }

    fn jacobian(&self, _state: &PoseState) -> PoseJacobian3 {
        let mut h = PoseJacobian3::zeros();
        h.fixed_view_mut::<3, 3>(0, POSITION_INDEX)
            .copy_from(&Matrix3::identity());
        h
    }

    fn covariance(&self, _state: &PoseState) -> MeasurementNoise3 {
        self.covariance
    }
}

/// Observed body-frame angular velocity, e.g. from a gyroscope.
#[derive(Clone, Debug, PartialEq)]
pub struct AngularVelocityMeasurement {
    pub angular_velocity: Vector3<f64>,
    pub covariance: MeasurementNoise3,
}

impl AngularVelocityMeasurement {
    pub fn new(angular_velocity: Vector3<f64>, variance: Vector3<f64>) -> Self {
        Self {
            angular_velocity,
            covariance: Matrix3::from_diagonal(&variance),
        }
    }
}

impl<S, const N: usize> Measurement<S, N, MEASURE_DIM_ANGULAR_VELOCITY> for AngularVelocityMeasurement
where
    S: RotationalState<N>,
{
    fn residual(&self, state: &S) -> MeasurementVec3 {
        self.angular_velocity - state.angular_velocity()
    }

    fn jacobian(&self, _state: &S) -> SMatrix<f64, MEASURE_DIM_ANGULAR_VELOCITY, N> {
        let mut h = SMatrix::<f64, MEASURE_DIM_ANGULAR_VELOCITY, N>::zeros();
        h.fixed_view_mut::<3, 3>(0, S::ANGULAR_VELOCITY_INDEX)
            .copy_from(&Matrix3::identity());
        h
    }

    fn covariance(&self, _state: &S) -> MeasurementNoise3 {
        self.covariance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::kalman::{FilterState, KalmanFilter};
    use crate::filters::orientation_state::OrientationState;
    use crate::filters::process::{OrientationConstantVelocity, PoseConstantVelocity};
    use approx::assert_relative_eq;

    #[test]
    fn test_orientation_residual_zero_when_consistent() {
        let mut state = PoseState::new();
        let q = math::exp(&Vector3::new(0.1, 0.2, 0.3));
        state.set_orientation(q);
        let meas = AbsoluteOrientationMeasurement::with_variance(q, 1e-4);
        let r: MeasurementVec3 = meas.residual(&state);
        assert!(r.norm() < 1e-12);
    }

    #[test]
    fn test_orientation_residual_is_body_frame() {
        let mut state = PoseState::new();
        let base = math::exp(&Vector3::new(0.0, 0.0, std::f64::consts::FRAC_PI_2));
        state.set_orientation(base);
        let offset = Vector3::new(0.05, 0.0, 0.0);
        let meas = AbsoluteOrientationMeasurement::with_variance(base * math::exp(&offset), 1e-4);
        let r: MeasurementVec3 = meas.residual(&state);
        assert_relative_eq!(r, offset, epsilon = 1e-12);
    }

    #[test]
    fn test_orientation_jacobian_placement() {
        let state = PoseState::new();
        let meas = AbsoluteOrientationMeasurement::with_variance(UnitQuaternion::identity(), 1.0);
        let h: PoseJacobian3 = meas.jacobian(&state);
        assert_eq!(h.fixed_view::<3, 3>(0, 3).into_owned(), Matrix3::identity());
        assert_eq!(h.fixed_view::<3, 3>(0, 0).into_owned(), Matrix3::zeros());
        assert_eq!(h.fixed_view::<3, 6>(0, 6).into_owned(), SMatrix::<f64, 3, 6>::zeros());
    }

    #[test]
    fn test_orientation_correction_moves_toward_observation() {
        let mut filter = KalmanFilter::new(PoseConstantVelocity::new(), PoseState::new());
        let target = math::exp(&Vector3::new(0.0, 0.4, 0.0));
        let meas = AbsoluteOrientationMeasurement::with_variance(target, 1e-6);

        for _ in 0..10 {
            filter.predict(0.01);
            filter.correct(&meas);
        }
        assert!(math::angular_distance(&filter.state().orientation(), &target) < 1e-3);
        assert_eq!(filter.state().incremental_orientation(), Vector3::zeros());
    }

    #[test]
    fn test_position_measurement() {
        let mut state = PoseState::new();
        state.set_position(&Vector3::new(1.0, 1.0, 1.0));
        let meas = AbsolutePositionMeasurement::new(Vector3::new(1.5, 0.5, 1.0), Vector3::repeat(0.01));
        assert_relative_eq!(meas.residual(&state), Vector3::new(0.5, -0.5, 0.0));
        assert_eq!(meas.covariance(&state), Matrix3::identity() * 0.01);
        let h = meas.jacobian(&state);
        assert_eq!(h.fixed_view::<3, 3>(0, 0).into_owned(), Matrix3::identity());
    }

    #[test]
    fn test_angular_velocity_on_orientation_state() {
        let mut filter = KalmanFilter::new(OrientationConstantVelocity::new(), OrientationState::new());
        let gyro = AngularVelocityMeasurement::new(Vector3::new(0.0, 0.0, 1.0), Vector3::repeat(1e-4));

        for _ in 0..20 {
            filter.predict(0.01);
            assert!(filter.correct(&gyro));
        }
        assert!((filter.state().angular_velocity().z - 1.0).abs() < 0.01);
        assert!(filter.state().orientation().angle() > 0.0);
        assert!(filter.state().error_covariance().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_angular_velocity_jacobian_on_pose_state() {
        let state = PoseState::new();
        let gyro = AngularVelocityMeasurement::new(Vector3::zeros(), Vector3::repeat(1.0));
        let h: PoseJacobian3 = gyro.jacobian(&state);
        assert_eq!(h.fixed_view::<3, 3>(0, 9).into_owned(), Matrix3::identity());
        assert_eq!(h.sum(), 3.0);
    }
}
