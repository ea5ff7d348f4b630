//! Frame-tagged algebra for the vessel-dynamics kernel.
//!
//! Every vector and quaternion carries the identity of the coordinate frame
//! its components are expressed in, and every vector carries a derivative
//! level describing its physical kind (position, velocity, force, ...).
//! The level controls how the vector transforms between non-inertial frames
//! and how cross products promote their result (`ω × r` is a velocity).
//!
//! This crate holds the value types and same-frame arithmetic only. The
//! transport-theorem conversion between frames needs access to the frame
//! tree and lives with the kernel that owns it.

mod quaternion;
mod state;
mod tensor;
mod vector;

pub use quaternion::FrameQuaternion;
pub use state::{StateDerivative, StateVector};
pub use tensor::Tensor;
pub use vector::{FramePoint, FrameVector};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Numerical epsilon used for clamping and symmetry checks.
pub const EPS: f64 = 1e-15;

/// Handle to a coordinate frame inside a simulation system.
///
/// Handles index an arena owned by the system; a handle is only meaningful
/// together with the system that issued it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameId(u32);

impl FrameId {
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame#{}", self.0)
    }
}

/// Physical kind of a vector.
///
/// `Direction` and `Force` are distinct variants even though both transform
/// by rotation alone; the promotion rules below are authoritative.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DerivativeLevel {
    #[default]
    Position,
    Velocity,
    Acceleration,
    AngularVelocity,
    AngularAcceleration,
    Direction,
    Force,
    Torque,
}

impl DerivativeLevel {
    /// Result level of `a × b`.
    ///
    /// Promotions: `ω × r → v`, `ω × v → a`, `α × r → a`, `F × r → T`,
    /// `T × r → F`. Any other combination keeps the left operand's level.
    pub fn cross(a: DerivativeLevel, b: DerivativeLevel) -> DerivativeLevel {
        use DerivativeLevel::*;
        match (a, b) {
            (AngularVelocity, Position) | (Position, AngularVelocity) => Velocity,
            (AngularVelocity, Velocity) | (Velocity, AngularVelocity) => Acceleration,
            (AngularAcceleration, Position) | (Position, AngularAcceleration) => Acceleration,
            (Force, Position) | (Position, Force) => Torque,
            (Torque, Position) | (Position, Torque) => Force,
            _ => a,
        }
    }

    /// Level of this quantity integrated over time (`a·dt` is a velocity).
    /// Quantities without a time integral keep their level.
    pub fn integrated(self) -> DerivativeLevel {
        use DerivativeLevel::*;
        match self {
            Velocity => Position,
            Acceleration => Velocity,
            AngularAcceleration => AngularVelocity,
            other => other,
        }
    }
}
