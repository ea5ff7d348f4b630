//! Transport of vectors and quaternions between coordinate frames.
//!
//! Conversion between a parent and its direct child is a "short"
//! conversion driven by the child's state. The general case climbs both
//! sides of the tree to the lowest common ancestor by cached depth and
//! chains short conversions, with the walk bounded by
//! [`MAX_CONVERT_DEPTH`].
//!
//! A short conversion computes all correction terms in the parent frame.
//! Going child→parent the components are rotated first and corrections are
//! added; going parent→child the corrections are subtracted first and the
//! rotation into the child is applied last. Per derivative level, for a
//! point P against a child frame with origin Q:
//!
//! ```text
//! r_P/a = r_P/b + r_Q/a
//! v_P/a = v_P/b + v_Q/a + ω_b/a × r_P/b
//! a_P/a = a_P/b + a_Q/a + α_b/a × r_P/b + ω × (ω × r_P/b) + 2 ω × v_P/b
//! ```
//!
//! Directions, forces, torques and angular rates transform by rotation
//! alone. A vector without an attached acting point is treated as located
//! at the child origin with zero relative velocity.

use crate::error::{Error, Result};
use crate::object::ObjectRef;
use crate::system::System;
use frame_algebra::{DerivativeLevel, FrameId, FrameQuaternion, FrameVector, StateVector};
use nalgebra::Vector3;

/// Maximum distance between two frames for a runtime conversion walk.
pub const MAX_CONVERT_DEPTH: usize = 32;

impl System {
    /// Converts a vector into the target frame, applying the non-inertial
    /// transport terms appropriate to its derivative level.
    pub fn convert_vector(&self, v: &FrameVector, target: FrameId) -> Result<FrameVector> {
        let vframe = v
            .frame
            .ok_or(Error::BadParameter("vector has no coordinate frame"))?;
        if vframe == target {
            return Ok(*v);
        }
        if self.parent_of(target)? == Some(vframe) || self.parent_of(vframe)? == Some(target) {
            return self.short_convert_vector(v, target);
        }
        self.walk(vframe, target, v, &|vector, step| {
            self.short_convert_vector(vector, step)
        })
    }

    /// Converts a quaternion into the target frame. Attitude transports by
    /// composition with the chain of frame orientations; there are no
    /// non-inertial terms.
    pub fn convert_quaternion(
        &self,
        q: &FrameQuaternion,
        target: FrameId,
    ) -> Result<FrameQuaternion> {
        let qframe = q
            .frame
            .ok_or(Error::BadParameter("quaternion has no coordinate frame"))?;
        if qframe == target {
            return Ok(*q);
        }
        if self.parent_of(target)? == Some(qframe) || self.parent_of(qframe)? == Some(target) {
            return self.short_convert_quaternion(q, target);
        }
        self.walk(qframe, target, q, &|quaternion, step| {
            self.short_convert_quaternion(quaternion, step)
        })
    }

    /// Components of a vector expressed in the target frame.
    pub fn vector_components(&self, v: &FrameVector, target: FrameId) -> Result<Vector3<f64>> {
        Ok(self.convert_vector(v, target)?.raw)
    }

    /// Generic lowest-common-ancestor walk shared by vector and
    /// quaternion conversion. `short` performs one parent/child step.
    fn walk<T: Copy>(
        &self,
        from: FrameId,
        target: FrameId,
        value: &T,
        short: &dyn Fn(&T, FrameId) -> Result<T>,
    ) -> Result<T> {
        fn unrelated() -> Error {
            Error::BadState("frames do not share a common ancestor")
        }

        let mut current = *value;
        let mut current_frame = from;
        let mut current_level = self.depth_of(from)?;
        let mut target_frame = target;
        let mut target_level = self.depth_of(target)?;

        let step_up = |this: &mut T, frame: &mut FrameId| -> Result<()> {
            let parent = self.parent_of(*frame)?.ok_or_else(unrelated)?;
            *this = short(this, parent)?;
            *frame = parent;
            Ok(())
        };

        // 1. Climb the value to the target's level
        while current_level > target_level {
            step_up(&mut current, &mut current_frame)?;
            current_level -= 1;
        }
        if current_frame == target_frame {
            return Ok(current);
        }

        // 2. Climb the target side to the value's level, remembering the
        // path for the descent
        let mut track: Vec<FrameId> = Vec::with_capacity(MAX_CONVERT_DEPTH);
        track.push(target_frame);
        while target_level > current_level {
            target_frame = self.parent_of(target_frame)?.ok_or_else(unrelated)?;
            track.push(target_frame);
            target_level -= 1;
            if track.len() > MAX_CONVERT_DEPTH {
                return Err(unrelated());
            }
        }

        // 3. Climb both sides until they hang off the same parent
        while self.parent_of(target_frame)? != self.parent_of(current_frame)? {
            step_up(&mut current, &mut current_frame)?;
            target_frame = self.parent_of(target_frame)?.ok_or_else(unrelated)?;
            track.push(target_frame);
            if track.len() > MAX_CONVERT_DEPTH {
                return Err(unrelated());
            }
        }

        // 4. Step into the common parent, then descend the recorded path
        if self.parent_of(current_frame)?.is_some() {
            step_up(&mut current, &mut current_frame)?;
        } else {
            // Both frames are at root level: they must be the same root
            let top = track.pop().ok_or(Error::Internal("conversion track empty"))?;
            if top != current_frame {
                return Err(unrelated());
            }
        }
        while let Some(step) = track.pop() {
            current = short(&current, step)?;
        }
        Ok(current)
    }

    /// Resolves which of (`v.frame`, `target`) is the child and returns
    /// the child's state as seen by the calling thread.
    fn short_setup(&self, from: FrameId, target: FrameId) -> Result<(StateVector, bool)> {
        let (child, target_is_child) = if self.parent_of(target)? == Some(from) {
            (target, true)
        } else if self.parent_of(from)? == Some(target) {
            (from, false)
        } else {
            return Err(Error::BadState("frames are not parent and child"));
        };
        let child_object: ObjectRef = self.resolve(child)?;
        let state = child_object.state_for_current_thread();
        Ok((state, target_is_child))
    }

    fn short_convert_vector(&self, v: &FrameVector, target: FrameId) -> Result<FrameVector> {
        let from = v
            .frame
            .ok_or(Error::BadParameter("vector has no coordinate frame"))?;
        let (child_state, target_is_child) = self.short_setup(from, target)?;
        let orientation = child_state.orientation;
        let parent = if target_is_child { from } else { target };

        // Rotate child components into the parent before corrections
        let mut out = *v;
        if !target_is_child {
            out.raw = orientation.rotate_raw(&v.raw);
        }

        // The acting point of the vector relative to the child origin,
        // expressed in the parent frame
        let offset_in_parent = || -> Result<Vector3<f64>> {
            match v.position_vector() {
                Some(position) => {
                    let in_parent = self.convert_vector(&position, parent)?;
                    Ok(in_parent.raw - child_state.position.raw)
                }
                None => Ok(Vector3::zeros()),
            }
        };

        match v.level {
            DerivativeLevel::Direction
            | DerivativeLevel::AngularVelocity
            | DerivativeLevel::AngularAcceleration
            | DerivativeLevel::Force
            | DerivativeLevel::Torque => {}
            DerivativeLevel::Position => {
                if target_is_child {
                    out.raw -= child_state.position.raw;
                } else {
                    out.raw += child_state.position.raw;
                }
            }
            DerivativeLevel::Velocity => {
                let offset = offset_in_parent()?;
                let omega = child_state.angular_velocity.raw;
                let extra = child_state.velocity.raw + omega.cross(&offset);
                if target_is_child {
                    out.raw -= extra;
                } else {
                    out.raw += extra;
                }
            }
            DerivativeLevel::Acceleration => {
                let offset = offset_in_parent()?;
                let point_velocity = match v.velocity_vector() {
                    Some(velocity) => self.convert_vector(&velocity, parent)?.raw,
                    None => Vector3::zeros(),
                };
                let omega = child_state.angular_velocity.raw;
                let alpha = child_state.angular_acceleration.raw;

                let extra = child_state.acceleration.raw
                    + alpha.cross(&offset)
                    + omega.cross(&omega.cross(&offset))
                    + 2.0 * omega.cross(&point_velocity);
                if target_is_child {
                    out.raw -= extra;
                } else {
                    out.raw += extra;
                }
            }
        }

        // Rotate into the child after corrections
        if target_is_child {
            out.raw = orientation.rotate_conjugated_raw(&out.raw);
        }
        out.frame = Some(target);
        out.level = v.level;

        // Re-express the acting point and its velocity in the target frame
        if let Some(position) = v.position_vector() {
            out.set_position_vector(&self.convert_vector(&position, target)?);
        }
        if let Some(velocity) = v.velocity_vector() {
            out.set_velocity_vector(&self.convert_vector(&velocity, target)?);
        }
        Ok(out)
    }

    fn short_convert_quaternion(
        &self,
        q: &FrameQuaternion,
        target: FrameId,
    ) -> Result<FrameQuaternion> {
        let from = q
            .frame
            .ok_or(Error::BadParameter("quaternion has no coordinate frame"))?;
        let (child_state, target_is_child) = self.short_setup(from, target)?;
        let orientation = child_state.orientation;

        let mut out = if target_is_child {
            orientation.conjugate() * *q
        } else {
            orientation * *q
        };
        out.frame = Some(target);
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Geographic helpers around a spherical body
    // ------------------------------------------------------------------

    /// Expresses a position as spherical geographic coordinates around an
    /// object: `(latitude°, longitude°, altitude)`. For `planet`-typed
    /// objects with a `radius` variable, the altitude is height above the
    /// sphere surface. The full ellipsoid treatment lives in the geodesy
    /// helpers.
    pub fn vector_to_geographic(
        &self,
        object: &ObjectRef,
        v: &FrameVector,
    ) -> Result<(f64, f64, f64)> {
        let components = self.vector_components(v, object.id())?;
        let (x, y, z) = (components.x, components.y, components.z);
        let r = (x * x + y * y + z * z).sqrt() + frame_algebra::EPS;

        let radius = if object.check_type("planet").is_ok() {
            object.float_value("radius").unwrap_or(0.0)
        } else {
            0.0
        };

        let longitude = y.atan2(x).to_degrees();
        let latitude = (z / r).asin().to_degrees();
        Ok((latitude, longitude, r - radius))
    }

    /// Builds a position vector from spherical geographic coordinates
    /// around an object (degrees, altitude above the surface for
    /// planets).
    pub fn vector_from_geographic(
        &self,
        object: &ObjectRef,
        latitude: f64,
        longitude: f64,
        altitude: f64,
    ) -> Result<FrameVector> {
        let radius = if object.check_type("planet").is_ok() {
            object.float_value("radius").unwrap_or(0.0)
        } else {
            0.0
        };
        let r = altitude + radius;
        let (lat, lon) = (latitude.to_radians(), longitude.to_radians());
        Ok(FrameVector::new(
            DerivativeLevel::Position,
            object.id(),
            r * lon.cos() * lat.cos(),
            r * lon.sin() * lat.cos(),
            r * lat.sin(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::Rng;
    use std::f64::consts::PI;

    fn frame(system: &System, parent: &ObjectRef, state: StateVector) -> ObjectRef {
        let object = system.create_object(Some(parent)).unwrap();
        object.set_state_vector(&state).unwrap();
        system.initialize_object(&object, true).unwrap();
        object
    }

    fn plain_state(parent: &ObjectRef) -> StateVector {
        StateVector::new(Some(parent.id()))
    }

    #[test]
    fn test_same_frame_is_copy() {
        let system = System::new();
        let root = system.root();
        let v = FrameVector::new(DerivativeLevel::Position, root.id(), 1.0, 2.0, 3.0);
        let out = system.convert_vector(&v, root.id()).unwrap();
        assert_eq!(out, v);
    }

    #[test]
    fn test_static_frames_preserve_components_exactly() {
        // No relative motion, no rotation: only the frame tag changes
        let system = System::new();
        let root = system.root();
        let mut state = plain_state(&root);
        state.position.raw = Vector3::new(10.0, -4.0, 2.5);
        let child = frame(&system, &root, state);

        let v = FrameVector::new(DerivativeLevel::Velocity, root.id(), 0.125, -8.0, 3.5);
        let in_child = system.convert_vector(&v, child.id()).unwrap();
        assert_eq!(in_child.raw, v.raw);
        assert_eq!(in_child.frame, Some(child.id()));

        let direction = FrameVector::new(DerivativeLevel::Direction, root.id(), 1.0, 0.0, 0.0);
        let converted = system.convert_vector(&direction, child.id()).unwrap();
        assert_eq!(converted.raw, direction.raw);
    }

    #[test]
    fn test_position_offset_between_frames() {
        let system = System::new();
        let root = system.root();
        let mut state = plain_state(&root);
        state.position.raw = Vector3::new(100.0, 0.0, 0.0);
        let child = frame(&system, &root, state);

        let p = FrameVector::new(DerivativeLevel::Position, root.id(), 101.0, 2.0, 0.0);
        let in_child = system.convert_vector(&p, child.id()).unwrap();
        assert_abs_diff_eq!(in_child.raw.x, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(in_child.raw.y, 2.0, epsilon = 1e-12);

        let back = system.convert_vector(&in_child, root.id()).unwrap();
        assert_abs_diff_eq!(back.raw.x, 101.0, epsilon = 1e-12);
    }

    #[test]
    fn test_rotated_frame_position() {
        let system = System::new();
        let root = system.root();
        let mut state = plain_state(&root);
        state.orientation =
            FrameQuaternion::from_axis_angle(root.id(), Vector3::z(), PI / 2.0);
        let child = frame(&system, &root, state);

        // Child x-axis points along parent y-axis
        let p = FrameVector::new(DerivativeLevel::Position, child.id(), 1.0, 0.0, 0.0);
        let in_root = system.convert_vector(&p, root.id()).unwrap();
        assert_abs_diff_eq!(in_root.raw.x, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(in_root.raw.y, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_transport_theorem_rotating_frame() {
        // Frame B rotates about the root z-axis at 1 rad/s. A point at
        // rest at (1,0,0): its velocity seen from B is (0,-1,0) and its
        // acceleration is the centripetal (-1,0,0).
        let system = System::new();
        let root = system.root();
        let mut state = plain_state(&root);
        state.angular_velocity.raw = Vector3::new(0.0, 0.0, 1.0);
        let rotating = frame(&system, &root, state);

        let mut velocity = FrameVector::zero(DerivativeLevel::Velocity, root.id());
        velocity.set_position_vector(&FrameVector::new(
            DerivativeLevel::Position,
            root.id(),
            1.0,
            0.0,
            0.0,
        ));
        let v_in_b = system.convert_vector(&velocity, rotating.id()).unwrap();
        assert_abs_diff_eq!(v_in_b.raw.x, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(v_in_b.raw.y, -1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(v_in_b.raw.z, 0.0, epsilon = 1e-12);

        let mut acceleration = FrameVector::zero(DerivativeLevel::Acceleration, root.id());
        acceleration.set_position_vector(&FrameVector::new(
            DerivativeLevel::Position,
            root.id(),
            1.0,
            0.0,
            0.0,
        ));
        acceleration.set_velocity_vector(&v_in_b);
        let a_in_b = system.convert_vector(&acceleration, rotating.id()).unwrap();
        assert_abs_diff_eq!(a_in_b.raw.x, -1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(a_in_b.raw.y, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(a_in_b.raw.z, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_moving_frame_velocity() {
        let system = System::new();
        let root = system.root();
        let mut state = plain_state(&root);
        state.velocity.raw = Vector3::new(5.0, 0.0, 0.0);
        let moving = frame(&system, &root, state);

        let at_rest = FrameVector::zero(DerivativeLevel::Velocity, root.id());
        let seen = system.convert_vector(&at_rest, moving.id()).unwrap();
        assert_abs_diff_eq!(seen.raw.x, -5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_round_trip_through_siblings() {
        let mut rng = rand::rng();
        let system = System::new();
        let root = system.root();

        let random_state = |rng: &mut rand::rngs::ThreadRng| {
            let mut state = StateVector::new(Some(root.id()));
            for component in [
                &mut state.position,
                &mut state.velocity,
                &mut state.angular_velocity,
            ] {
                component.raw = Vector3::new(
                    rng.random_range(-10.0..10.0),
                    rng.random_range(-10.0..10.0),
                    rng.random_range(-10.0..10.0),
                );
            }
            state.orientation = FrameQuaternion::new(
                root.id(),
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
            )
            .normalize();
            state
        };

        let a = frame(&system, &root, random_state(&mut rng));
        let b = frame(&system, &root, random_state(&mut rng));
        // Nested frame under b
        let mut nested_state = random_state(&mut rng);
        nested_state.position.frame = Some(b.id());
        nested_state.velocity.frame = Some(b.id());
        nested_state.acceleration.frame = Some(b.id());
        nested_state.orientation.frame = Some(b.id());
        nested_state.angular_velocity.frame = Some(b.id());
        nested_state.angular_acceleration.frame = Some(b.id());
        let c = frame(&system, &b, nested_state);

        for level in [
            DerivativeLevel::Position,
            DerivativeLevel::Velocity,
            DerivativeLevel::Direction,
            DerivativeLevel::Force,
        ] {
            for _ in 0..8 {
                let v = FrameVector::new(
                    level,
                    a.id(),
                    rng.random_range(-100.0..100.0),
                    rng.random_range(-100.0..100.0),
                    rng.random_range(-100.0..100.0),
                );
                let there = system.convert_vector(&v, c.id()).unwrap();
                let back = system.convert_vector(&there, a.id()).unwrap();
                let scale = v.magnitude().max(1.0);
                assert_abs_diff_eq!(back.raw.x, v.raw.x, epsilon = 1e-10 * scale);
                assert_abs_diff_eq!(back.raw.y, v.raw.y, epsilon = 1e-10 * scale);
                assert_abs_diff_eq!(back.raw.z, v.raw.z, epsilon = 1e-10 * scale);
            }
        }
    }

    #[test]
    fn test_quaternion_conversion_composes_orientation() {
        let system = System::new();
        let root = system.root();
        let mut state = plain_state(&root);
        state.orientation =
            FrameQuaternion::from_axis_angle(root.id(), Vector3::z(), PI / 2.0);
        let child = frame(&system, &root, state);

        // Identity attitude in the child reads as the child's orientation
        // in the root
        let identity = FrameQuaternion::identity(child.id());
        let in_root = system.convert_quaternion(&identity, root.id()).unwrap();
        assert_abs_diff_eq!(in_root.w, (PI / 4.0).cos(), epsilon = 1e-12);
        assert_abs_diff_eq!(in_root.z, (PI / 4.0).sin(), epsilon = 1e-12);

        let back = system.convert_quaternion(&in_root, child.id()).unwrap();
        assert_abs_diff_eq!(back.w, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(back.z, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_unrelated_roots_fail() {
        let system = System::new();
        let orphan_a = system.create_object(None).unwrap();
        system.initialize_object(&orphan_a, true).unwrap();
        let orphan_b = system.create_object(None).unwrap();
        system.initialize_object(&orphan_b, true).unwrap();

        let v = FrameVector::new(DerivativeLevel::Position, orphan_a.id(), 1.0, 0.0, 0.0);
        assert!(system.convert_vector(&v, orphan_b.id()).is_err());
    }

    #[test]
    fn test_geographic_round_trip_spherical() {
        let system = System::new();
        let root = system.root();
        let planet = system.create_object(Some(&root)).unwrap();
        planet.set_type("planet").unwrap();
        let radius = planet
            .add_variable("radius", crate::variable::VariableType::Float)
            .unwrap();
        radius.set_float(6.378145e6).unwrap();
        system.initialize_object(&planet, true).unwrap();

        let (lat, lon, alt) = (37.5, -122.25, 12000.0);
        let position = system
            .vector_from_geographic(&planet, lat, lon, alt)
            .unwrap();
        let (lat2, lon2, alt2) = system.vector_to_geographic(&planet, &position).unwrap();
        assert_abs_diff_eq!(lat2, lat, epsilon = 1e-9);
        assert_abs_diff_eq!(lon2, lon, epsilon = 1e-9);
        assert_abs_diff_eq!(alt2, alt, epsilon = 1e-3);
    }
}
