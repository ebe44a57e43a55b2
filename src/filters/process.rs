//! Constant-velocity process models
//!
//! Position integrates linear velocity, the incremental orientation
//! integrates body-frame angular velocity through the exponential map, and
//! velocities are held constant (or decayed, for the damped variants).
//!
//! Process noise follows the discrete white-noise-acceleration model of
//! Welch & Bishop: for each modeled axis with autocorrelation μ,
//!
//!   Q[pos,pos] = μ·dt³/3,  Q[pos,vel] = μ·dt²/2,  Q[vel,vel] = μ·dt

use nalgebra::{Matrix3, Vector3};

use super::kalman::ProcessModel;
use super::orientation_state::OrientationState;
use super::pose_state::PoseState;
use crate::math::{self, SINGULARITY_MARGIN};
use crate::types::{
    NoiseAutocorrelation, OrientationStateMat, PoseStateMat, LINEAR_VELOCITY_INDEX,
    ORIENTATION_STATE_DIM, POSE_STATE_DIM,
};

pub const DEFAULT_POSITION_NOISE: f64 = 0.01;
pub const DEFAULT_ORIENTATION_NOISE: f64 = 0.1;
pub const DEFAULT_DAMPING: f64 = 0.1;
pub const DEFAULT_POSITION_DAMPING: f64 = 0.3;
pub const DEFAULT_ORIENTATION_DAMPING: f64 = 0.01;

/// Damping factors must lie strictly between 0 and 1
fn damping_valid(damping: f64) -> bool {
    damping > 0.0 && damping < 1.0
}

/// Fraction of velocity retained after `dt` seconds
fn attenuation(damping: f64, dt: f64) -> f64 {
    damping.powf(dt)
}

fn default_noise() -> NoiseAutocorrelation {
    NoiseAutocorrelation::new(
        DEFAULT_POSITION_NOISE,
        DEFAULT_POSITION_NOISE,
        DEFAULT_POSITION_NOISE,
        DEFAULT_ORIENTATION_NOISE,
        DEFAULT_ORIENTATION_NOISE,
        DEFAULT_ORIENTATION_NOISE,
    )
}

/// Integrate an incremental orientation by a body-frame rate, folding the
/// increment into the cache when it nears the edge of the map.
fn integrate_rotation(increment: &Vector3<f64>, rate: &Vector3<f64>, dt: f64) -> (Vector3<f64>, bool) {
    let next = math::compose(increment, &(rate * dt));
    let needs_externalize = next.norm() > std::f64::consts::PI - SINGULARITY_MARGIN;
    (next, needs_externalize)
}

// ===== 12D Pose Models =====

/// Constant-velocity model over the 12D pose state.
#[derive(Clone, Debug, PartialEq)]
pub struct PoseConstantVelocity {
    noise: NoiseAutocorrelation,
}

impl PoseConstantVelocity {
    pub fn new() -> Self {
        Self {
            noise: default_noise(),
        }
    }

    pub fn with_noise(position_noise: f64, orientation_noise: f64) -> Self {
        let mut model = Self::new();
        model.set_noise_autocorrelation_uniform(position_noise, orientation_noise);
        model
    }

    pub fn noise_autocorrelation(&self) -> &NoiseAutocorrelation {
        &self.noise
    }

    pub fn set_noise_autocorrelation(&mut self, noise: NoiseAutocorrelation) {
        self.noise = noise;
    }

    pub fn set_noise_autocorrelation_uniform(&mut self, position_noise: f64, orientation_noise: f64) {
        self.noise = NoiseAutocorrelation::new(
            position_noise,
            position_noise,
            position_noise,
            orientation_noise,
            orientation_noise,
            orientation_noise,
        );
    }

    /// State transition: identity with `dt` coupling each derivative into
    /// its quantity
    pub fn transition(dt: f64) -> PoseStateMat {
        let mut a = PoseStateMat::identity();
        a.fixed_view_mut::<6, 6>(0, 6)
            .copy_from(&(nalgebra::SMatrix::<f64, 6, 6>::identity() * dt));
        a
    }

    fn sampled_noise(&self, dt: f64) -> PoseStateMat {
        let dt2 = dt * dt;
        let dt3 = dt2 * dt;
        let mut q = PoseStateMat::zeros();
        for i in 0..6 {
            let j = i + 6;
            let mu = self.noise[i];
            q[(i, i)] = mu * dt3 / 3.0;
            q[(i, j)] = mu * dt2 / 2.0;
            q[(j, i)] = mu * dt2 / 2.0;
            q[(j, j)] = mu * dt;
        }
        q
    }

    fn advance(state: &PoseState, dt: f64) -> PoseState {
        let mut next = state.clone();
        next.set_position(&(state.position() + state.velocity() * dt));

        let (increment, externalize) =
            integrate_rotation(&state.incremental_orientation(), &state.angular_velocity(), dt);
        next.set_incremental_orientation(&increment);
        if externalize {
            next.externalize_rotation();
        }
        next
    }
}

impl Default for PoseConstantVelocity {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessModel<POSE_STATE_DIM> for PoseConstantVelocity {
    type State = PoseState;

    fn state_transition_matrix(&self, _state: &PoseState, dt: f64) -> PoseStateMat {
        Self::transition(dt)
    }

    fn process_noise(&self, dt: f64) -> PoseStateMat {
        self.sampled_noise(dt)
    }

    fn predict_state(&self, state: &PoseState, dt: f64) -> PoseState {
        Self::advance(state, dt)
    }
}

/// Damped transition: velocity rows scaled by their attenuation
fn damped_transition(dt: f64, linear: f64, angular: f64) -> PoseStateMat {
    let mut a = PoseConstantVelocity::transition(dt);
    a.fixed_view_mut::<3, 3>(LINEAR_VELOCITY_INDEX, LINEAR_VELOCITY_INDEX)
        .copy_from(&(Matrix3::identity() * linear));
    a.fixed_view_mut::<3, 3>(LINEAR_VELOCITY_INDEX + 3, LINEAR_VELOCITY_INDEX + 3)
        .copy_from(&(Matrix3::identity() * angular));
    a
}

fn damp_velocities(state: &mut PoseState, linear: f64, angular: f64) {
    let v = state.velocity() * linear;
    let w = state.angular_velocity() * angular;
    state.set_velocity(&v);
    state.set_angular_velocity(&w);
}

/// Constant velocity with both velocities decayed by a single damping factor.
#[derive(Clone, Debug, PartialEq)]
pub struct PoseDampedConstantVelocity {
    inner: PoseConstantVelocity,
    damping: f64,
}

impl PoseDampedConstantVelocity {
    pub fn new() -> Self {
        Self {
            inner: PoseConstantVelocity::new(),
            damping: DEFAULT_DAMPING,
        }
    }

    pub fn with_damping(damping: f64) -> Self {
        let mut model = Self::new();
        model.set_damping(damping);
        model
    }

    pub fn damping(&self) -> f64 {
        self.damping
    }

    /// Returns false (keeping the previous value) unless `0 < damping < 1`.
    pub fn set_damping(&mut self, damping: f64) -> bool {
        if !damping_valid(damping) {
            log::warn!("[KF] Ignoring damping {} outside (0, 1)", damping);
            return false;
        }
        self.damping = damping;
        true
    }

    pub fn constant_velocity(&self) -> &PoseConstantVelocity {
        &self.inner
    }

    pub fn constant_velocity_mut(&mut self) -> &mut PoseConstantVelocity {
        &mut self.inner
    }
}

impl Default for PoseDampedConstantVelocity {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessModel<POSE_STATE_DIM> for PoseDampedConstantVelocity {
    type State = PoseState;

    fn state_transition_matrix(&self, _state: &PoseState, dt: f64) -> PoseStateMat {
        let atten = attenuation(self.damping, dt);
        damped_transition(dt, atten, atten)
    }

    fn process_noise(&self, dt: f64) -> PoseStateMat {
        self.inner.sampled_noise(dt)
    }

    fn predict_state(&self, state: &PoseState, dt: f64) -> PoseState {
        let atten = attenuation(self.damping, dt);
        let mut next = PoseConstantVelocity::advance(state, dt);
        damp_velocities(&mut next, atten, atten);
        next
    }
}

/// Constant velocity with separate linear and angular damping factors.
#[derive(Clone, Debug, PartialEq)]
pub struct PoseSeparatelyDampedConstantVelocity {
    inner: PoseConstantVelocity,
    position_damping: f64,
    orientation_damping: f64,
}

impl PoseSeparatelyDampedConstantVelocity {
    pub fn new() -> Self {
        Self {
            inner: PoseConstantVelocity::new(),
            position_damping: DEFAULT_POSITION_DAMPING,
            orientation_damping: DEFAULT_ORIENTATION_DAMPING,
        }
    }

    pub fn with_damping(position_damping: f64, orientation_damping: f64) -> Self {
        let mut model = Self::new();
        model.set_position_damping(position_damping);
        model.set_orientation_damping(orientation_damping);
        model
    }

    pub fn position_damping(&self) -> f64 {
        self.position_damping
    }

    pub fn orientation_damping(&self) -> f64 {
        self.orientation_damping
    }

    pub fn set_position_damping(&mut self, damping: f64) -> bool {
        if !damping_valid(damping) {
            log::warn!("[KF] Ignoring position damping {} outside (0, 1)", damping);
            return false;
        }
        self.position_damping = damping;
        true
    }

    pub fn set_orientation_damping(&mut self, damping: f64) -> bool {
        if !damping_valid(damping) {
            log::warn!("[KF] Ignoring orientation damping {} outside (0, 1)", damping);
            return false;
        }
        self.orientation_damping = damping;
        true
    }

    pub fn constant_velocity_mut(&mut self) -> &mut PoseConstantVelocity {
        &mut self.inner
    }
}

impl Default for PoseSeparatelyDampedConstantVelocity {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessModel<POSE_STATE_DIM> for PoseSeparatelyDampedConstantVelocity {
    type State = PoseState;

    fn state_transition_matrix(&self, _state: &PoseState, dt: f64) -> PoseStateMat {
        damped_transition(
            dt,
            attenuation(self.position_damping, dt),
            attenuation(self.orientation_damping, dt),
        )
    }

    fn process_noise(&self, dt: f64) -> PoseStateMat {
        self.inner.sampled_noise(dt)
    }

    fn predict_state(&self, state: &PoseState, dt: f64) -> PoseState {
        let mut next = PoseConstantVelocity::advance(state, dt);
        damp_velocities(
            &mut next,
            attenuation(self.position_damping, dt),
            attenuation(self.orientation_damping, dt),
        );
        next
    }
}

// ===== 6D Orientation Model =====

/// Constant angular velocity over the orientation-only state.
#[derive(Clone, Debug, PartialEq)]
pub struct OrientationConstantVelocity {
    noise: f64,
}

impl OrientationConstantVelocity {
    pub fn new() -> Self {
        Self {
            noise: DEFAULT_ORIENTATION_NOISE,
        }
    }

    pub fn with_noise(noise: f64) -> Self {
        Self { noise }
    }

    pub fn noise_autocorrelation(&self) -> f64 {
        self.noise
    }
}

impl Default for OrientationConstantVelocity {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessModel<ORIENTATION_STATE_DIM> for OrientationConstantVelocity {
    type State = OrientationState;

    fn state_transition_matrix(&self, _state: &OrientationState, dt: f64) -> OrientationStateMat {
        let mut a = OrientationStateMat::identity();
        a.fixed_view_mut::<3, 3>(0, 3)
            .copy_from(&(Matrix3::identity() * dt));
        a
    }

    fn process_noise(&self, dt: f64) -> OrientationStateMat {
        let dt2 = dt * dt;
        let mut q = OrientationStateMat::zeros();
        for i in 0..3 {
            let j = i + 3;
            q[(i, i)] = self.noise * dt2 * dt / 3.0;
            q[(i, j)] = self.noise * dt2 / 2.0;
            q[(j, i)] = self.noise * dt2 / 2.0;
            q[(j, j)] = self.noise * dt;
        }
        q
    }

    fn predict_state(&self, state: &OrientationState, dt: f64) -> OrientationState {
        let mut next = state.clone();
        let (increment, externalize) =
            integrate_rotation(&state.incremental_orientation(), &state.angular_velocity(), dt);
        next.set_incremental_orientation(&increment);
        if externalize {
            next.externalize_rotation();
        }
        next
    }
}
