//! Quaternion exponential map
//!
//! Rotation vectors are full-angle: the direction is the rotation axis and
//! the norm is the rotation angle in radians. `exp` maps such a vector to a
//! unit quaternion, `ln` maps back.

use nalgebra::{convert, Matrix3, Quaternion, RealField, UnitQuaternion, Vector3};

/// Scalar types the exponential map is defined over, with the cutoffs
/// below which the series expansions are used.
pub trait ExpMapScalar: RealField + Copy {
    /// Angle below which `sin(θ/2)/θ` is evaluated by its Taylor series
    /// (about the fourth root of machine epsilon).
    const SINC_TAYLOR_CUTOFF: Self;

    /// Vector-part norm below which `ln` uses the `φ/sin(φ)` series.
    const LN_TAYLOR_CUTOFF: Self;
}

impl ExpMapScalar for f64 {
    const SINC_TAYLOR_CUTOFF: f64 = 1e-13;
    const LN_TAYLOR_CUTOFF: f64 = 1e-4;
}

impl ExpMapScalar for f32 {
    const SINC_TAYLOR_CUTOFF: f32 = 1e-6;
    const LN_TAYLOR_CUTOFF: f32 = 1e-2;
}

/// Margin below π at which a rotation vector is considered close to the
/// singular shell of the map.
pub const SINGULARITY_MARGIN: f64 = 1e-2;

#[inline]
fn lit<T: ExpMapScalar>(value: f64) -> T {
    convert(value)
}

/// Map a rotation vector to a unit quaternion.
pub fn exp<T: ExpMapScalar>(v: &Vector3<T>) -> UnitQuaternion<T> {
    let theta = v.norm();
    let half = theta * lit::<T>(0.5);

    let k = if theta < T::SINC_TAYLOR_CUTOFF {
        // sin(θ/2)/θ ≈ 1/2 - θ²/48
        lit::<T>(0.5) - theta * theta / lit::<T>(48.0)
    } else {
        half.sin() / theta
    };

    UnitQuaternion::new_normalize(Quaternion::new(half.cos(), v.x * k, v.y * k, v.z * k))
}

/// Map a unit quaternion to the rotation vector of norm at most π.
///
/// `q` and `-q` map to the same vector.
pub fn ln<T: ExpMapScalar>(q: &UnitQuaternion<T>) -> Vector3<T> {
    let mut w = q.w;
    let mut vec = q.imag();
    if w < T::zero() {
        w = -w;
        vec = -vec;
    }

    let n = vec.norm();
    let phi = n.atan2(w);

    let scale = if n < T::LN_TAYLOR_CUTOFF {
        // φ/sin(φ) ≈ 1 + φ²/6 + 7φ⁴/360 + 31φ⁶/15120
        let p2 = phi * phi;
        T::one()
            + p2 / lit::<T>(6.0)
            + p2 * p2 * lit::<T>(7.0 / 360.0)
            + p2 * p2 * p2 * lit::<T>(31.0 / 15120.0)
    } else {
        phi / n
    };

    vec * (scale * lit::<T>(2.0))
}

/// Replace a rotation vector whose norm is close to π with the equivalent
/// vector of norm `‖v‖ - 2π` along the same axis.
pub fn avoid_singularities<T: ExpMapScalar>(v: &Vector3<T>) -> Vector3<T> {
    let n = v.norm();
    if n > T::pi() - lit::<T>(SINGULARITY_MARGIN) {
        v * (T::one() - T::two_pi() / n)
    } else {
        *v
    }
}

/// Rotation vector of `exp(a) * exp(b)`.
pub fn compose<T: ExpMapScalar>(a: &Vector3<T>, b: &Vector3<T>) -> Vector3<T> {
    ln(&(exp(a) * exp(b)))
}

/// Cross-product matrix `[v]×`
pub fn skew_symmetric<T: ExpMapScalar>(v: &Vector3<T>) -> Matrix3<T> {
    Matrix3::new(
        T::zero(),
        -v.z,
        v.y,
        v.z,
        T::zero(),
        -v.x,
        -v.y,
        v.x,
        T::zero(),
    )
}

/// SO(3) right Jacobian: `exp(v + δ) ≈ exp(v) * exp(Jr(v) δ)` for small δ.
pub fn right_jacobian<T: ExpMapScalar>(v: &Vector3<T>) -> Matrix3<T> {
    let theta = v.norm();
    let k = skew_symmetric(v);
    let k2 = k * k;

    if theta < lit::<T>(1e-5) {
        return Matrix3::identity() - k * lit::<T>(0.5) + k2 * lit::<T>(1.0 / 6.0);
    }

    let theta2 = theta * theta;
    let a = (T::one() - theta.cos()) / theta2;
    let b = (theta - theta.sin()) / (theta2 * theta);
    Matrix3::identity() - k * a + k2 * b
}

/// Angle in radians between two orientations
pub fn angular_distance<T: ExpMapScalar>(a: &UnitQuaternion<T>, b: &UnitQuaternion<T>) -> T {
    ln(&(a.inverse() * b)).norm()
}
