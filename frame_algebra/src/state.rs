use crate::{DerivativeLevel, FrameId, FrameQuaternion, FrameVector};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Complete motion state of a frame, expressed in its parent's frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateVector {
    /// MJD-style time stamp of this state.
    pub time: f64,
    pub position: FrameVector,
    pub velocity: FrameVector,
    pub acceleration: FrameVector,
    pub orientation: FrameQuaternion,
    pub angular_velocity: FrameVector,
    pub angular_acceleration: FrameVector,
}

impl StateVector {
    /// Empty state in the given frame: all vectors zero, identity
    /// orientation, time zero.
    pub fn new(frame: Option<FrameId>) -> Self {
        let vec = |level| FrameVector {
            raw: Vector3::zeros(),
            level,
            frame,
            position_in: None,
            velocity_in: None,
        };
        Self {
            time: 0.0,
            position: vec(DerivativeLevel::Position),
            velocity: vec(DerivativeLevel::Velocity),
            acceleration: vec(DerivativeLevel::Acceleration),
            orientation: FrameQuaternion {
                w: 1.0,
                x: 0.0,
                y: 0.0,
                z: 0.0,
                frame,
            },
            angular_velocity: vec(DerivativeLevel::AngularVelocity),
            angular_acceleration: vec(DerivativeLevel::AngularAcceleration),
        }
    }

    /// The frame this state is expressed in.
    pub fn frame(&self) -> Option<FrameId> {
        self.position.frame
    }

    /// `self + v * scalar` componentwise, quaternion included (used when
    /// blending whole states, not for time propagation).
    pub fn multiply_and_add(&self, v: &StateVector, scalar: f64) -> StateVector {
        StateVector {
            time: self.time,
            position: self.position.multiply_and_add(&v.position, scalar),
            velocity: self.velocity.multiply_and_add(&v.velocity, scalar),
            acceleration: self.acceleration.multiply_and_add(&v.acceleration, scalar),
            orientation: self.orientation.multiply_and_add(&v.orientation, scalar),
            angular_velocity: self
                .angular_velocity
                .multiply_and_add(&v.angular_velocity, scalar),
            angular_acceleration: self
                .angular_acceleration
                .multiply_and_add(&v.angular_acceleration, scalar),
        }
    }

    /// Propagates this state by `delta_time` seconds using the derivative.
    ///
    /// Position integrates the derivative's velocity, velocity the
    /// derivative's acceleration; accelerations are taken over directly.
    /// The orientation uses the quaternion kinematic update
    /// `q' = q + ½·Δt·[0, ω] ⊗ q` with the derivative's angular velocity,
    /// followed by renormalization. Time advances by `Δt/86400` days.
    pub fn multiply_by_time_and_add(
        &self,
        derivative: &StateDerivative,
        delta_time: f64,
    ) -> StateVector {
        let velocity = self
            .velocity
            .multiply_by_time_and_add(&derivative.acceleration, delta_time);
        let position = self
            .position
            .multiply_by_time_and_add(&derivative.velocity, delta_time);
        let angular_velocity = self
            .angular_velocity
            .multiply_by_time_and_add(&derivative.angular_acceleration, delta_time);

        let q = &self.orientation;
        let w = &derivative.angular_velocity.raw;
        let omega = FrameQuaternion {
            w: 0.0,
            x: w.x,
            y: w.y,
            z: w.z,
            frame: q.frame,
        };
        let orientation = q
            .multiply_and_add(&(omega * *q), delta_time * 0.5)
            .normalize();

        StateVector {
            time: self.time + delta_time / 86400.0,
            position,
            velocity,
            acceleration: derivative.acceleration,
            orientation,
            angular_velocity,
            angular_acceleration: derivative.angular_acceleration,
        }
    }

    /// Linear blend between two states, `t` clamped to [0, 1]; `t = 0`
    /// returns `a`, `t = 1` returns `b`. The orientation is lerped and
    /// renormalized.
    pub fn interpolate(a: &StateVector, b: &StateVector, t: f64) -> StateVector {
        let t = t.clamp(0.0, 1.0);
        let s = 1.0 - t;
        StateVector {
            time: a.time * s + b.time * t,
            position: a.position.scale(s).multiply_and_add(&b.position, t),
            velocity: a.velocity.scale(s).multiply_and_add(&b.velocity, t),
            acceleration: a.acceleration.scale(s).multiply_and_add(&b.acceleration, t),
            orientation: a
                .orientation
                .scale(s)
                .multiply_and_add(&b.orientation, t)
                .normalize(),
            angular_velocity: a
                .angular_velocity
                .scale(s)
                .multiply_and_add(&b.angular_velocity, t),
            angular_acceleration: a
                .angular_acceleration
                .scale(s)
                .multiply_and_add(&b.angular_acceleration, t),
        }
    }
}

/// Derivative of a state vector, as returned by an object's integrate
/// callback.
///
/// `force` and `torque` are the alternative return channel: a child body
/// reports its contribution to the parent instead of (or in addition to)
/// its own accelerations.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateDerivative {
    pub velocity: FrameVector,
    pub acceleration: FrameVector,
    pub angular_velocity: FrameVector,
    pub angular_acceleration: FrameVector,
    pub force: FrameVector,
    pub torque: FrameVector,
}

impl StateDerivative {
    /// Zero derivative in the given frame.
    pub fn new(frame: Option<FrameId>) -> Self {
        let vec = |level| FrameVector {
            raw: Vector3::zeros(),
            level,
            frame,
            position_in: None,
            velocity_in: None,
        };
        Self {
            velocity: vec(DerivativeLevel::Velocity),
            acceleration: vec(DerivativeLevel::Acceleration),
            angular_velocity: vec(DerivativeLevel::AngularVelocity),
            angular_acceleration: vec(DerivativeLevel::AngularAcceleration),
            force: vec(DerivativeLevel::Force),
            torque: vec(DerivativeLevel::Torque),
        }
    }

    /// `self + v * scalar` componentwise.
    pub fn multiply_and_add(&self, v: &StateDerivative, scalar: f64) -> StateDerivative {
        StateDerivative {
            velocity: self.velocity.multiply_and_add(&v.velocity, scalar),
            acceleration: self.acceleration.multiply_and_add(&v.acceleration, scalar),
            angular_velocity: self
                .angular_velocity
                .multiply_and_add(&v.angular_velocity, scalar),
            angular_acceleration: self
                .angular_acceleration
                .multiply_and_add(&v.angular_acceleration, scalar),
            force: self.force.multiply_and_add(&v.force, scalar),
            torque: self.torque.multiply_and_add(&v.torque, scalar),
        }
    }
}
