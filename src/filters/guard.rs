//! Contents-valid checks for filter state
//!
//! The filter itself never checks for numerical blow-up; the tracking
//! driver runs these after each step and decides what to do.

use nalgebra::{SMatrix, SVector, UnitQuaternion};
use serde::{Deserialize, Serialize};

use super::kalman::{FilterState, RotationalState};

/// Relative asymmetry allowed in a covariance matrix
pub const DEFAULT_SYMMETRY_TOLERANCE: f64 = 1e-9;

/// Allowed deviation of a cached quaternion from unit norm
const QUATERNION_NORM_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterHealth {
    Valid,
    /// State vector or orientation contains NaN/Inf (or a non-unit quaternion)
    InvalidState,
    /// Covariance contains NaN/Inf, is asymmetric or has a negative variance
    InvalidCovariance,
}

pub fn vector_is_finite<const N: usize>(v: &SVector<f64, N>) -> bool {
    v.iter().all(|x| x.is_finite())
}

pub fn quaternion_is_valid(q: &UnitQuaternion<f64>) -> bool {
    q.coords.iter().all(|x| x.is_finite())
        && (q.coords.norm() - 1.0).abs() < QUATERNION_NORM_TOLERANCE
}

/// Finite, symmetric (relative to its own magnitude) and with a
/// non-negative diagonal.
pub fn covariance_is_valid<const N: usize>(p: &SMatrix<f64, N, N>, tolerance: f64) -> bool {
    if !p.iter().all(|x| x.is_finite()) {
        return false;
    }
    let scale = p.amax().max(1.0);
    if (p - p.transpose()).amax() > tolerance * scale {
        return false;
    }
    p.diagonal().iter().all(|&d| d >= -tolerance * scale)
}

pub fn check_state<S, const N: usize>(state: &S) -> FilterHealth
where
    S: RotationalState<N>,
{
    if !vector_is_finite(&state.state_vector()) || !quaternion_is_valid(&state.orientation()) {
        return FilterHealth::InvalidState;
    }
    if !covariance_is_valid(state.error_covariance(), DEFAULT_SYMMETRY_TOLERANCE) {
        return FilterHealth::InvalidCovariance;
    }
    FilterHealth::Valid
}

pub fn state_contents_valid<S, const N: usize>(state: &S) -> bool
where
    S: RotationalState<N>,
{
    check_state(state) == FilterHealth::Valid
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::pose_state::PoseState;
    use crate::types::PoseStateMat;

    #[test]
    fn test_default_state_is_valid() {
        assert_eq!(check_state(&PoseState::new()), FilterHealth::Valid);
    }

    #[test]
    fn test_nan_in_state_detected() {
        let mut state = PoseState::new();
        let mut x = state.state_vector();
        x[4] = f64::INFINITY;
        state.set_state_vector(x);
        assert_eq!(check_state(&state), FilterHealth::InvalidState);
    }

    #[test]
    fn test_asymmetric_covariance_detected() {
        let mut state = PoseState::new();
        let mut p = PoseStateMat::identity();
        p[(0, 5)] = 0.5;
        state.set_error_covariance(p);
        assert_eq!(check_state(&state), FilterHealth::InvalidCovariance);
    }

    #[test]
    fn test_nan_covariance_detected() {
        let mut p = PoseStateMat::identity();
        p[(2, 2)] = f64::NAN;
        assert!(!covariance_is_valid(&p, DEFAULT_SYMMETRY_TOLERANCE));
    }

    #[test]
    fn test_negative_variance_detected() {
        let mut p = PoseStateMat::identity();
        p[(1, 1)] = -0.5;
        assert!(!covariance_is_valid(&p, DEFAULT_SYMMETRY_TOLERANCE));
    }
}
