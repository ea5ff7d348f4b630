use crate::{DerivativeLevel, FrameId};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A point or velocity attached to a [`FrameVector`], with its own frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FramePoint {
    pub raw: Vector3<f64>,
    pub frame: FrameId,
}

/// A three-component vector tagged with its coordinate frame and physical
/// kind.
///
/// A vector may additionally carry the point it acts at (`position_in`) and
/// the velocity of that point (`velocity_in`), each expressed in their own
/// frame. These drive the transport terms when the vector is converted
/// between rotating frames: "this force acts at point P moving at velocity
/// V in frame F".
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameVector {
    pub raw: Vector3<f64>,
    pub level: DerivativeLevel,
    pub frame: Option<FrameId>,
    pub position_in: Option<FramePoint>,
    pub velocity_in: Option<FramePoint>,
}

impl Default for FrameVector {
    fn default() -> Self {
        Self {
            raw: Vector3::zeros(),
            level: DerivativeLevel::Position,
            frame: None,
            position_in: None,
            velocity_in: None,
        }
    }
}

impl FrameVector {
    /// Creates a vector in the given frame, clearing any attachments.
    pub fn new(level: DerivativeLevel, frame: FrameId, x: f64, y: f64, z: f64) -> Self {
        Self {
            raw: Vector3::new(x, y, z),
            level,
            frame: Some(frame),
            position_in: None,
            velocity_in: None,
        }
    }

    /// Zero vector of the given kind.
    pub fn zero(level: DerivativeLevel, frame: FrameId) -> Self {
        Self::new(level, frame, 0.0, 0.0, 0.0)
    }

    pub fn from_raw(level: DerivativeLevel, frame: FrameId, raw: Vector3<f64>) -> Self {
        Self {
            raw,
            level,
            frame: Some(frame),
            position_in: None,
            velocity_in: None,
        }
    }

    /// The point this vector acts at, as a position vector.
    pub fn position_vector(&self) -> Option<FrameVector> {
        self.position_in.map(|p| FrameVector {
            raw: p.raw,
            level: DerivativeLevel::Position,
            frame: Some(p.frame),
            position_in: None,
            velocity_in: None,
        })
    }

    /// Attaches the point this vector acts at.
    pub fn set_position_vector(&mut self, position: &FrameVector) {
        debug_assert_eq!(position.level, DerivativeLevel::Position);
        self.position_in = position.frame.map(|frame| FramePoint {
            raw: position.raw,
            frame,
        });
    }

    /// The velocity of the point this vector acts at.
    pub fn velocity_vector(&self) -> Option<FrameVector> {
        self.velocity_in.map(|v| FrameVector {
            raw: v.raw,
            level: DerivativeLevel::Velocity,
            frame: Some(v.frame),
            position_in: None,
            velocity_in: None,
        })
    }

    /// Attaches the velocity of the point this vector acts at.
    pub fn set_velocity_vector(&mut self, velocity: &FrameVector) {
        debug_assert_eq!(velocity.level, DerivativeLevel::Velocity);
        self.velocity_in = velocity.frame.map(|frame| FramePoint {
            raw: velocity.raw,
            frame,
        });
    }

    pub fn magnitude(&self) -> f64 {
        self.raw.magnitude()
    }

    /// Sum in the frame of `self`. Both operands must already share a frame
    /// and a level; the kernel's conversion routine brings them together.
    pub fn add(&self, other: &FrameVector) -> FrameVector {
        debug_assert_eq!(self.level, other.level);
        debug_assert_eq!(self.frame, other.frame);
        FrameVector {
            raw: self.raw + other.raw,
            level: self.level,
            frame: self.frame,
            position_in: None,
            velocity_in: None,
        }
    }

    /// Difference in the frame of `self`.
    pub fn subtract(&self, other: &FrameVector) -> FrameVector {
        debug_assert_eq!(self.level, other.level);
        debug_assert_eq!(self.frame, other.frame);
        FrameVector {
            raw: self.raw - other.raw,
            level: self.level,
            frame: self.frame,
            position_in: None,
            velocity_in: None,
        }
    }

    /// Cross product with derivative-level promotion.
    pub fn cross(&self, other: &FrameVector) -> FrameVector {
        debug_assert_eq!(self.frame, other.frame);
        FrameVector {
            raw: self.raw.cross(&other.raw),
            level: DerivativeLevel::cross(self.level, other.level),
            frame: self.frame,
            position_in: None,
            velocity_in: None,
        }
    }

    pub fn dot(&self, other: &FrameVector) -> f64 {
        debug_assert_eq!(self.frame, other.frame);
        self.raw.dot(&other.raw)
    }

    /// Scales the components, keeping level, frame and attachments.
    pub fn scale(&self, scalar: f64) -> FrameVector {
        FrameVector {
            raw: self.raw * scalar,
            ..*self
        }
    }

    /// Normalized direction of this vector; a zero vector stays zero.
    pub fn normalize(&self) -> FrameVector {
        let mag = self.raw.magnitude();
        let raw = if mag == 0.0 {
            Vector3::zeros()
        } else {
            self.raw / mag
        };
        FrameVector {
            raw,
            level: DerivativeLevel::Direction,
            frame: self.frame,
            position_in: None,
            velocity_in: None,
        }
    }

    /// `self + other * scalar`, in the frame and level of `self`.
    pub fn multiply_and_add(&self, other: &FrameVector, scalar: f64) -> FrameVector {
        debug_assert_eq!(self.level, other.level);
        debug_assert_eq!(self.frame, other.frame);
        FrameVector {
            raw: self.raw + other.raw * scalar,
            level: self.level,
            frame: self.frame,
            position_in: None,
            velocity_in: None,
        }
    }

    /// `self + other * dt`, where `other` is one derivative level above
    /// `self` (an acceleration integrates onto a velocity).
    pub fn multiply_by_time_and_add(&self, other: &FrameVector, delta_time: f64) -> FrameVector {
        debug_assert_eq!(self.level, other.level.integrated());
        debug_assert_eq!(self.frame, other.frame);
        FrameVector {
            raw: self.raw + other.raw * delta_time,
            level: self.level,
            frame: self.frame,
            position_in: None,
            velocity_in: None,
        }
    }

    /// Re-tags the physical kind without touching the components.
    pub fn with_level(&self, level: DerivativeLevel) -> FrameVector {
        FrameVector { level, ..*self }
    }
}

impl fmt::Display for FrameVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:.6}, {:.6}, {:.6}]",
            self.raw.x, self.raw.y, self.raw.z
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const TOL: f64 = 1e-12;
    const F: FrameId = FrameId::new(0);

    #[test]
    fn test_cross_promotes_omega_r_to_velocity() {
        let w = FrameVector::new(DerivativeLevel::AngularVelocity, F, 0.0, 0.0, 1.0);
        let r = FrameVector::new(DerivativeLevel::Position, F, 1.0, 0.0, 0.0);
        let v = w.cross(&r);
        assert_eq!(v.level, DerivativeLevel::Velocity);
        assert_abs_diff_eq!(v.raw.y, 1.0, epsilon = TOL);

        let a = w.cross(&v);
        assert_eq!(a.level, DerivativeLevel::Acceleration);
        assert_abs_diff_eq!(a.raw.x, -1.0, epsilon = TOL);
    }

    #[test]
    fn test_cross_promotes_alpha_r_to_acceleration() {
        let alpha = FrameVector::new(DerivativeLevel::AngularAcceleration, F, 0.0, 0.0, 2.0);
        let r = FrameVector::new(DerivativeLevel::Position, F, 1.0, 0.0, 0.0);
        let a = alpha.cross(&r);
        assert_eq!(a.level, DerivativeLevel::Acceleration);
        assert_abs_diff_eq!(a.raw.y, 2.0, epsilon = TOL);
    }

    #[test]
    fn test_force_cross_position_is_torque() {
        let force = FrameVector::new(DerivativeLevel::Force, F, 0.0, 10.0, 0.0);
        let r = FrameVector::new(DerivativeLevel::Position, F, 2.0, 0.0, 0.0);
        let t = r.cross(&force);
        assert_eq!(t.level, DerivativeLevel::Torque);
        assert_abs_diff_eq!(t.raw.z, 20.0, epsilon = TOL);
    }

    #[test]
    fn test_normalize_is_direction() {
        let v = FrameVector::new(DerivativeLevel::Velocity, F, 3.0, 0.0, 4.0);
        let n = v.normalize();
        assert_eq!(n.level, DerivativeLevel::Direction);
        assert_abs_diff_eq!(n.magnitude(), 1.0, epsilon = TOL);
    }

    #[test]
    fn test_normalize_zero_stays_zero() {
        let v = FrameVector::zero(DerivativeLevel::Velocity, F);
        let n = v.normalize();
        assert_abs_diff_eq!(n.magnitude(), 0.0, epsilon = TOL);
    }

    #[test]
    fn test_multiply_by_time_demotes_level() {
        let v = FrameVector::new(DerivativeLevel::Velocity, F, 1.0, 0.0, 0.0);
        let a = FrameVector::new(DerivativeLevel::Acceleration, F, 0.0, 2.0, 0.0);
        let v1 = v.multiply_by_time_and_add(&a, 0.5);
        assert_eq!(v1.level, DerivativeLevel::Velocity);
        assert_abs_diff_eq!(v1.raw.x, 1.0, epsilon = TOL);
        assert_abs_diff_eq!(v1.raw.y, 1.0, epsilon = TOL);
    }

    #[test]
    fn test_scale_keeps_attachments() {
        let mut force = FrameVector::new(DerivativeLevel::Force, F, 1.0, 0.0, 0.0);
        force.set_position_vector(&FrameVector::new(
            DerivativeLevel::Position,
            F,
            0.0,
            1.0,
            0.0,
        ));
        let scaled = force.scale(2.0);
        assert!(scaled.position_in.is_some());
        assert_abs_diff_eq!(scaled.raw.x, 2.0, epsilon = TOL);
        // Derived quantities drop the attachment
        let summed = scaled.add(&FrameVector::zero(DerivativeLevel::Force, F));
        assert!(summed.position_in.is_none());
    }
}
