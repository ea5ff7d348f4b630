use crate::{FrameId, FrameVector};
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Mul;

/// Orientation quaternion tagged with the frame its axis components are
/// expressed in. Scalar-first storage: `[w, x, y, z]`.
///
/// A frame's state orientation `q` maps child components into parent
/// components by the active rotation `v_parent = q v_child q⁻¹`, so
/// [`FrameQuaternion::rotate`] carries a vector child→parent and
/// [`FrameQuaternion::rotate_conjugated`] parent→child.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameQuaternion {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub frame: Option<FrameId>,
}

impl FrameQuaternion {
    pub fn new(frame: FrameId, w: f64, x: f64, y: f64, z: f64) -> Self {
        Self {
            w,
            x,
            y,
            z,
            frame: Some(frame),
        }
    }

    /// Identity rotation in the given frame.
    pub fn identity(frame: FrameId) -> Self {
        Self::new(frame, 1.0, 0.0, 0.0, 0.0)
    }

    pub fn conjugate(&self) -> FrameQuaternion {
        FrameQuaternion {
            w: self.w,
            x: -self.x,
            y: -self.y,
            z: -self.z,
            frame: self.frame,
        }
    }

    pub fn dot(&self, other: &FrameQuaternion) -> f64 {
        self.w * other.w + self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn magnitude(&self) -> f64 {
        self.dot(self).sqrt()
    }

    /// Returns the normalized quaternion. A zero-magnitude quaternion is
    /// treated as already normalized (magnitude 1), so integration steps
    /// never divide by zero.
    pub fn normalize(&self) -> FrameQuaternion {
        let mut mag = self.magnitude();
        if mag == 0.0 {
            mag = 1.0;
        }
        FrameQuaternion {
            w: self.w / mag,
            x: self.x / mag,
            y: self.y / mag,
            z: self.z / mag,
            frame: self.frame,
        }
    }

    /// Hamilton product `self ⊗ rhs` as raw components, frame taken from
    /// `self`.
    fn hamilton(&self, rhs: &FrameQuaternion) -> FrameQuaternion {
        FrameQuaternion {
            w: self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
            x: self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            y: self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            z: self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
            frame: self.frame,
        }
    }

    /// `self ⊗ rhs⁻¹` (for unit quaternions the conjugate is the inverse).
    pub fn multiply_conjugated(&self, rhs: &FrameQuaternion) -> FrameQuaternion {
        self.hamilton(&rhs.conjugate())
    }

    /// Scales all components; only meaningful while integrating or
    /// interpolating, where quaternions are treated as plain 4-vectors.
    pub fn scale(&self, scalar: f64) -> FrameQuaternion {
        FrameQuaternion {
            w: self.w * scalar,
            x: self.x * scalar,
            y: self.y * scalar,
            z: self.z * scalar,
            frame: self.frame,
        }
    }

    /// `self + other * scalar` componentwise (integration helper).
    pub fn multiply_and_add(&self, other: &FrameQuaternion, scalar: f64) -> FrameQuaternion {
        debug_assert_eq!(self.frame, other.frame);
        FrameQuaternion {
            w: self.w + other.w * scalar,
            x: self.x + other.x * scalar,
            y: self.y + other.y * scalar,
            z: self.z + other.z * scalar,
            frame: self.frame,
        }
    }

    /// Rotates raw components by the active rotation `q v q⁻¹`
    /// (child components into the quaternion's own frame).
    pub fn rotate_raw(&self, v: &Vector3<f64>) -> Vector3<f64> {
        // t = q ⊗ [0, v]
        let t0 = -self.x * v.x - self.y * v.y - self.z * v.z;
        let t1 = self.w * v.x + self.y * v.z - self.z * v.y;
        let t2 = self.w * v.y - self.x * v.z + self.z * v.x;
        let t3 = self.w * v.z + self.x * v.y - self.y * v.x;
        // result = t ⊗ q⁻¹
        Vector3::new(
            -t0 * self.x + t1 * self.w - t2 * self.z + t3 * self.y,
            -t0 * self.y + t1 * self.z + t2 * self.w - t3 * self.x,
            -t0 * self.z - t1 * self.y + t2 * self.x + t3 * self.w,
        )
    }

    /// Rotates raw components by the conjugate, `q⁻¹ v q`
    /// (the quaternion's own frame into child components).
    pub fn rotate_conjugated_raw(&self, v: &Vector3<f64>) -> Vector3<f64> {
        self.conjugate().rotate_raw(v)
    }

    /// Rotates a vector child→parent; the result lives in the quaternion's
    /// frame with the vector's level.
    pub fn rotate(&self, v: &FrameVector) -> FrameVector {
        let mut out = *v;
        out.raw = self.rotate_raw(&v.raw);
        out.frame = self.frame;
        out
    }

    /// Rotates a vector parent→child.
    pub fn rotate_conjugated(&self, v: &FrameVector) -> FrameVector {
        let mut out = *v;
        out.raw = self.rotate_conjugated_raw(&v.raw);
        out.frame = self.frame;
        out
    }

    /// The equivalent active rotation matrix (`R v_child = v_parent`).
    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        let (w, x, y, z) = (self.w, self.x, self.y, self.z);
        Matrix3::new(
            w * w + x * x - y * y - z * z,
            2.0 * (x * y - w * z),
            2.0 * (x * z + w * y),
            2.0 * (x * y + w * z),
            w * w - x * x + y * y - z * z,
            2.0 * (y * z - w * x),
            2.0 * (x * z - w * y),
            2.0 * (y * z + w * x),
            w * w - x * x - y * y + z * z,
        )
    }

    /// Quaternion for intrinsic roll-pitch-yaw (x-y-z) Euler angles,
    /// in radians.
    pub fn from_euler(frame: FrameId, roll: f64, pitch: f64, yaw: f64) -> Self {
        let c1 = (roll * 0.5).cos();
        let c2 = (pitch * 0.5).cos();
        let c3 = (yaw * 0.5).cos();
        let s1 = (roll * 0.5).sin();
        let s2 = (pitch * 0.5).sin();
        let s3 = (yaw * 0.5).sin();

        Self::new(
            frame,
            c1 * c2 * c3 + s1 * s2 * s3,
            s1 * c2 * c3 - c1 * s2 * s3,
            c1 * s2 * c3 + s1 * c2 * s3,
            c1 * c2 * s3 - s1 * s2 * c3,
        )
    }

    /// Roll-pitch-yaw Euler angles in radians. The pitch-axis sine is
    /// clamped into [-1, 1] against rounding at gimbal lock.
    pub fn to_euler(&self) -> (f64, f64, f64) {
        let (q0, q1, q2, q3) = (self.w, self.x, self.y, self.z);

        let sine = (2.0 * (q0 * q2 - q3 * q1)).clamp(-1.0, 1.0);
        let roll = (2.0 * q0 * q1 + 2.0 * q2 * q3).atan2(1.0 - 2.0 * q1 * q1 - 2.0 * q2 * q2);
        let pitch = sine.asin();
        let yaw = (2.0 * q0 * q3 + 2.0 * q1 * q2).atan2(1.0 - 2.0 * q2 * q2 - 2.0 * q3 * q3);
        (roll, pitch, yaw)
    }

    /// Rotation of `angle` radians about a unit `axis`.
    pub fn from_axis_angle(frame: FrameId, axis: Vector3<f64>, angle: f64) -> Self {
        let half = angle * 0.5;
        let s = half.sin();
        Self::new(frame, half.cos(), s * axis.x, s * axis.y, s * axis.z)
    }
}

impl Mul for FrameQuaternion {
    type Output = FrameQuaternion;

    /// Hamilton product `self ⊗ rhs`; composition of active rotations, so
    /// `(a * b).rotate(v) == a.rotate(b.rotate(v))`.
    fn mul(self, rhs: FrameQuaternion) -> FrameQuaternion {
        self.hamilton(&rhs)
    }
}

impl fmt::Display for FrameQuaternion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:.6}; {:.6}, {:.6}, {:.6}]",
            self.w, self.x, self.y, self.z
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::Rng;
    use std::f64::consts::PI;

    const TOL: f64 = 1e-12;
    const F: FrameId = FrameId::new(0);

    fn random_unit(rng: &mut impl Rng) -> FrameQuaternion {
        FrameQuaternion::new(
            F,
            rng.random_range(-1.0..1.0),
            rng.random_range(-1.0..1.0),
            rng.random_range(-1.0..1.0),
            rng.random_range(-1.0..1.0),
        )
        .normalize()
    }

    #[test]
    fn test_multiply_conjugated_is_identity() {
        let mut rng = rand::rng();
        for _ in 0..32 {
            let q = random_unit(&mut rng);
            let i = q.multiply_conjugated(&q);
            assert_abs_diff_eq!(i.w, 1.0, epsilon = TOL);
            assert_abs_diff_eq!(i.x, 0.0, epsilon = TOL);
            assert_abs_diff_eq!(i.y, 0.0, epsilon = TOL);
            assert_abs_diff_eq!(i.z, 0.0, epsilon = TOL);
        }
    }

    #[test]
    fn test_multiplication_associative() {
        let mut rng = rand::rng();
        for _ in 0..32 {
            let a = random_unit(&mut rng);
            let b = random_unit(&mut rng);
            let c = random_unit(&mut rng);
            let lhs = (a * b) * c;
            let rhs = a * (b * c);
            assert_abs_diff_eq!(lhs.w, rhs.w, epsilon = TOL);
            assert_abs_diff_eq!(lhs.x, rhs.x, epsilon = TOL);
            assert_abs_diff_eq!(lhs.y, rhs.y, epsilon = TOL);
            assert_abs_diff_eq!(lhs.z, rhs.z, epsilon = TOL);
        }
    }

    #[test]
    fn test_rotate_quarter_turn_about_z() {
        let q = FrameQuaternion::from_axis_angle(F, Vector3::z(), PI / 2.0);
        let v = q.rotate_raw(&Vector3::x());
        assert_abs_diff_eq!(v.x, 0.0, epsilon = TOL);
        assert_abs_diff_eq!(v.y, 1.0, epsilon = TOL);
        assert_abs_diff_eq!(v.z, 0.0, epsilon = TOL);

        let back = q.rotate_conjugated_raw(&v);
        assert_abs_diff_eq!(back.x, 1.0, epsilon = TOL);
        assert_abs_diff_eq!(back.y, 0.0, epsilon = TOL);
    }

    #[test]
    fn test_rotation_matrix_matches_rotate() {
        let mut rng = rand::rng();
        for _ in 0..16 {
            let q = random_unit(&mut rng);
            let v = Vector3::new(
                rng.random_range(-5.0..5.0),
                rng.random_range(-5.0..5.0),
                rng.random_range(-5.0..5.0),
            );
            let a = q.rotate_raw(&v);
            let b = q.rotation_matrix() * v;
            assert_abs_diff_eq!(a.x, b.x, epsilon = 1e-10);
            assert_abs_diff_eq!(a.y, b.y, epsilon = 1e-10);
            assert_abs_diff_eq!(a.z, b.z, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_euler_round_trip() {
        let q = FrameQuaternion::from_euler(F, 0.3, -0.4, 1.2);
        let (roll, pitch, yaw) = q.to_euler();
        assert_abs_diff_eq!(roll, 0.3, epsilon = 1e-10);
        assert_abs_diff_eq!(pitch, -0.4, epsilon = 1e-10);
        assert_abs_diff_eq!(yaw, 1.2, epsilon = 1e-10);
    }

    #[test]
    fn test_euler_single_axis_matches_axis_angle() {
        let qe = FrameQuaternion::from_euler(F, PI / 4.0, 0.0, 0.0);
        let qa = FrameQuaternion::from_axis_angle(F, Vector3::x(), PI / 4.0);
        assert_abs_diff_eq!(qe.w, qa.w, epsilon = TOL);
        assert_abs_diff_eq!(qe.x, qa.x, epsilon = TOL);
    }

    #[test]
    fn test_normalize_zero_magnitude() {
        let q = FrameQuaternion::new(F, 0.0, 0.0, 0.0, 0.0);
        let n = q.normalize();
        assert_abs_diff_eq!(n.w, 0.0, epsilon = TOL);
        assert!(n.w.is_finite());
    }

    #[test]
    fn test_composition_order() {
        // a then b applied to v: b.rotate(a.rotate(v)) == (b*a).rotate(v)
        let a = FrameQuaternion::from_axis_angle(F, Vector3::z(), PI / 2.0);
        let b = FrameQuaternion::from_axis_angle(F, Vector3::x(), PI / 2.0);
        let v = Vector3::y();
        let step = b.rotate_raw(&a.rotate_raw(&v));
        let composed = (b * a).rotate_raw(&v);
        assert_abs_diff_eq!(step.x, composed.x, epsilon = TOL);
        assert_abs_diff_eq!(step.y, composed.y, epsilon = TOL);
        assert_abs_diff_eq!(step.z, composed.z, epsilon = TOL);
    }
}
