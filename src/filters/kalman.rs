//! Generic Kalman predict/correct engine
//!
//! The engine is parameterized by a process model (which owns the state
//! type) and accepts any measurement that can produce a residual, a
//! Jacobian and a covariance against that state.
//!
//! Predict:  x ← f(x, dt),  P ← A·P·Aᵀ + Q
//! Correct:  S = H·P·Hᵀ + R,  K = P·Hᵀ·S⁻¹,  Δx = K·r,  P ← (I − K·H)·P
//!
//! The engine never raises errors: a correction whose state delta is not
//! finite can be cancelled, and the result of `correct` reports whether the
//! correction was applied.

use nalgebra::{SMatrix, SVector, UnitQuaternion, Vector3};

/// A filter state: a state vector plus its error covariance.
pub trait FilterState<const N: usize>: Clone {
    fn state_vector(&self) -> SVector<f64, N>;

    fn set_state_vector(&mut self, state: SVector<f64, N>);

    fn error_covariance(&self) -> &SMatrix<f64, N, N>;

    fn set_error_covariance(&mut self, covariance: SMatrix<f64, N, N>);

    /// Hook run once a correction has been applied to the state vector.
    fn post_correct(&mut self) {}
}

/// A state carrying an incremental orientation relative to a cached
/// quaternion, plus a body-frame angular velocity.
pub trait RotationalState<const N: usize>: FilterState<N> {
    /// Offset of the incremental rotation vector within the state vector
    const ORIENTATION_INDEX: usize;

    /// Offset of the angular velocity within the state vector
    const ANGULAR_VELOCITY_INDEX: usize;

    fn incremental_orientation(&self) -> Vector3<f64>;

    fn angular_velocity(&self) -> Vector3<f64>;

    /// Full orientation: cached quaternion composed with the increment
    fn orientation(&self) -> UnitQuaternion<f64>;
}

/// How a state evolves over a time step.
///
/// Models are stateless apart from their tuning parameters and assume
/// `dt > 0`; callers clamp non-positive steps before predicting.
pub trait ProcessModel<const N: usize> {
    type State: FilterState<N>;

    /// Linearized state transition `A` evaluated at `state`
    fn state_transition_matrix(&self, state: &Self::State, dt: f64) -> SMatrix<f64, N, N>;

    /// Sampled process noise covariance `Q` for a step of `dt`
    fn process_noise(&self, dt: f64) -> SMatrix<f64, N, N>;

    /// Advance the state vector only; the covariance is left untouched.
    fn predict_state(&self, state: &Self::State, dt: f64) -> Self::State;

    /// Predicted state (with propagated covariance) and the process noise
    /// that was added.
    fn predict(&self, state: &Self::State, dt: f64) -> (Self::State, SMatrix<f64, N, N>) {
        let a = self.state_transition_matrix(state, dt);
        let q = self.process_noise(dt);
        let mut predicted = self.predict_state(state, dt);
        predicted.set_error_covariance(a * state.error_covariance() * a.transpose() + q);
        (predicted, q)
    }
}

/// An observation of an `M`-dimensional quantity related to an
/// `N`-dimensional state `S`.
pub trait Measurement<S, const N: usize, const M: usize>
where
    S: FilterState<N>,
{
    /// Observed minus predicted, in measurement space
    fn residual(&self, state: &S) -> SVector<f64, M>;

    /// Linear map from a state perturbation to the predicted measurement
    fn jacobian(&self, state: &S) -> SMatrix<f64, M, N>;

    /// Measurement noise covariance `R`
    fn covariance(&self, state: &S) -> SMatrix<f64, M, M>;
}

/// Kalman filter owning a process model and the state it evolves.
#[derive(Clone)]
pub struct KalmanFilter<P: ProcessModel<N>, const N: usize> {
    process: P,
    state: P::State,
}

impl<P: ProcessModel<N>, const N: usize> KalmanFilter<P, N> {
    pub fn new(process: P, state: P::State) -> Self {
        Self { process, state }
    }

    /// Predict step: advance the state by `dt` seconds
    pub fn predict(&mut self, dt: f64) {
        let (predicted, _) = self.process.predict(&self.state, dt);
        self.state = predicted;
    }

    /// Compute a correction without applying it yet
    pub fn begin_correction<Meas, const M: usize>(
        &mut self,
        meas: &Meas,
    ) -> CorrectionInProgress<'_, P, N, M>
    where
        Meas: Measurement<P::State, N, M>,
    {
        CorrectionInProgress::new(self, meas)
    }

    /// Apply a measurement; returns false if the correction was not finite
    /// and therefore discarded.
    pub fn correct<Meas, const M: usize>(&mut self, meas: &Meas) -> bool
    where
        Meas: Measurement<P::State, N, M>,
    {
        self.begin_correction(meas).finish(true)
    }

    pub fn state(&self) -> &P::State {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut P::State {
        &mut self.state
    }

    /// Replace the state, e.g. after external corruption was detected
    pub fn set_state(&mut self, state: P::State) {
        self.state = state;
    }

    pub fn process_model(&self) -> &P {
        &self.process
    }

    pub fn process_model_mut(&mut self) -> &mut P {
        &mut self.process
    }
}

/// A computed but not yet applied correction.
#[must_use = "a correction does nothing until `finish` is called"]
pub struct CorrectionInProgress<'a, P: ProcessModel<N>, const N: usize, const M: usize> {
    filter: &'a mut KalmanFilter<P, N>,

    /// Innovation covariance `S = H·P·Hᵀ + R`
    pub innovation_covariance: SMatrix<f64, M, M>,

    /// Kalman gain `K = P·Hᵀ·S⁻¹`
    pub kalman_gain: SMatrix<f64, N, M>,

    /// State correction `Δx = K·r`
    pub delta_x: SVector<f64, N>,

    /// Corrected, symmetrized error covariance
    pub new_covariance: SMatrix<f64, N, N>,

    /// Whether every element of `delta_x` is finite
    pub state_correction_finite: bool,
}

impl<'a, P: ProcessModel<N>, const N: usize, const M: usize> CorrectionInProgress<'a, P, N, M> {
    fn new<Meas>(filter: &'a mut KalmanFilter<P, N>, meas: &Meas) -> Self
    where
        Meas: Measurement<P::State, N, M>,
    {
        let state = &filter.state;
        let p = *state.error_covariance();
        let h = meas.jacobian(state);
        let residual = meas.residual(state);

        let pht = p * h.transpose();
        let s = h * pht + meas.covariance(state);

        let (kalman_gain, delta_x, new_covariance) = match invert_innovation(&s) {
            Some(s_inv) => {
                let k = pht * s_inv;
                let dx = k * residual;
                let corrected = p - k * h * p;
                (k, dx, (corrected + corrected.transpose()) * 0.5)
            }
            None => (
                SMatrix::<f64, N, M>::from_element(f64::NAN),
                SVector::<f64, N>::from_element(f64::NAN),
                p,
            ),
        };

        let state_correction_finite = delta_x.iter().all(|v| v.is_finite());

        Self {
            filter,
            innovation_covariance: s,
            kalman_gain,
            delta_x,
            new_covariance,
            state_correction_finite,
        }
    }

    /// Apply the correction. With `cancel_if_not_finite`, a non-finite
    /// state delta leaves the filter untouched and false is returned.
    pub fn finish(self, cancel_if_not_finite: bool) -> bool {
        if cancel_if_not_finite && !self.state_correction_finite {
            log::warn!("[KF] Discarding correction with non-finite state delta");
            return false;
        }

        let state = &mut self.filter.state;
        let corrected = state.state_vector() + self.delta_x;
        state.set_state_vector(corrected);
        state.set_error_covariance(self.new_covariance);
        state.post_correct();
        true
    }
}

/// `S⁻¹` via Cholesky, falling back to a general inverse
fn invert_innovation<const M: usize>(s: &SMatrix<f64, M, M>) -> Option<SMatrix<f64, M, M>> {
    let s = *s;
    match s.cholesky() {
        Some(chol) => Some(chol.inverse()),
        None => s.try_inverse(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::guard::{covariance_is_valid, state_contents_valid};
    use crate::filters::measurements::{AbsoluteOrientationMeasurement, AbsolutePositionMeasurement};
    use crate::filters::pose_state::PoseState;
    use crate::filters::process::{PoseConstantVelocity, PoseDampedConstantVelocity};
    use crate::types::{PoseStateMat, POSE_STATE_DIM};
    use nalgebra::Matrix3;

    fn assert_no_nans<S: RotationalState<N>, const N: usize>(state: &S, context: &str) {
        assert!(state_contents_valid(state), "invalid state after {}", context);
    }

    fn identity_orientation() -> AbsoluteOrientationMeasurement {
        AbsoluteOrientationMeasurement::new(UnitQuaternion::identity(), Matrix3::identity() * 1e-5)
    }

    #[test]
    fn test_constant_velocity_orientation_no_nans() {
        let mut filter = KalmanFilter::new(PoseConstantVelocity::new(), PoseState::new());
        assert_no_nans(filter.state(), "construction");
        let meas = identity_orientation();

        for i in 0..100 {
            filter.predict(0.1);
            assert_no_nans(filter.state(), &format!("predict {}", i));
            assert!(filter.correct(&meas));
            assert_no_nans(filter.state(), &format!("correct {}", i));
        }
    }

    #[test]
    fn test_damped_orientation_and_position_no_nans() {
        let mut filter = KalmanFilter::new(PoseDampedConstantVelocity::new(), PoseState::new());
        let ori = identity_orientation();
        let at_origin = AbsolutePositionMeasurement::new(Vector3::zeros(), Vector3::repeat(7e-6));
        let at_ones =
            AbsolutePositionMeasurement::new(Vector3::new(1.0, 1.0, 1.0), Vector3::repeat(7e-6));

        for i in 0..100 {
            filter.predict(0.1);
            assert_no_nans(filter.state(), &format!("predict {}", i));
            assert!(filter.correct(&ori));
            let pos = if i % 2 == 0 { &at_origin } else { &at_ones };
            assert!(filter.correct(pos));
            assert_no_nans(filter.state(), &format!("correct {}", i));
        }
    }

    #[test]
    fn test_covariance_symmetric_after_every_correct() {
        let mut filter = KalmanFilter::new(PoseConstantVelocity::new(), PoseState::new());
        let target = crate::math::exp(&Vector3::new(0.2, -0.1, 0.3));
        let meas = AbsoluteOrientationMeasurement::new(target, Matrix3::identity() * 1e-3);

        for _ in 0..50 {
            filter.predict(1.0 / 60.0);
            assert!(filter.correct(&meas));
            let p = filter.state().error_covariance();
            assert!((p - p.transpose()).norm() < 1e-12);
            assert!(covariance_is_valid(p, 1e-9));
        }
    }

    #[test]
    fn test_predict_grows_covariance() {
        let mut filter = KalmanFilter::new(PoseConstantVelocity::new(), PoseState::new());
        let before = filter.state().error_covariance().trace();
        filter.predict(0.5);
        assert!(filter.state().error_covariance().trace() > before);
    }

    #[test]
    fn test_position_converges_to_measurement() {
        let mut filter = KalmanFilter::new(PoseConstantVelocity::new(), PoseState::new());
        let target = Vector3::new(0.5, 1.5, -2.0);
        let meas = AbsolutePositionMeasurement::new(target, Vector3::repeat(1e-4));

        for _ in 0..30 {
            filter.predict(0.01);
            filter.correct(&meas);
        }
        assert!((filter.state().position() - target).norm() < 0.01);
    }

    #[test]
    fn test_begin_correction_exposes_gain() {
        let mut filter = KalmanFilter::new(PoseConstantVelocity::new(), PoseState::new());
        let meas = AbsolutePositionMeasurement::new(Vector3::new(1.0, 0.0, 0.0), Vector3::repeat(10.0));
        let correction = filter.begin_correction(&meas);
        assert!(correction.state_correction_finite);
        // P = 10·I and R = 10·I gives a gain of one half on position
        assert!((correction.kalman_gain[(0, 0)] - 0.5).abs() < 1e-12);
        assert!((correction.delta_x[0] - 0.5).abs() < 1e-12);
        assert!(correction.finish(true));
        assert!((filter.state().position().x - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_non_finite_correction_is_cancelled() {
        let mut state = PoseState::new();
        state.set_error_covariance(PoseStateMat::zeros());
        let mut filter = KalmanFilter::new(PoseConstantVelocity::new(), state);
        // Singular innovation covariance: zero prior and zero noise
        let meas = AbsolutePositionMeasurement::with_covariance(Vector3::new(1.0, 0.0, 0.0), Matrix3::zeros());

        let correction = filter.begin_correction(&meas);
        assert!(!correction.state_correction_finite);
        assert!(!correction.finish(true));
        assert_eq!(filter.state().position(), Vector3::zeros());
    }

    #[test]
    fn test_filter_recovers_after_external_reset() {
        let mut filter = KalmanFilter::new(PoseConstantVelocity::new(), PoseState::new());
        let mut corrupted = filter.state().clone();
        let mut x = corrupted.state_vector();
        x[0] = f64::NAN;
        corrupted.set_state_vector(x);
        filter.set_state(corrupted);
        assert!(!state_contents_valid(filter.state()));

        filter.set_state(PoseState::new());
        filter.predict(0.1);
        assert!(filter.correct(&identity_orientation()));
        assert!(state_contents_valid(filter.state()));
        assert_eq!(filter.state().state_vector().len(), POSE_STATE_DIM);
    }
}
