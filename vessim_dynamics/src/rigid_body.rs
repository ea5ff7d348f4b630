//! Rigid-body accumulator.
//!
//! Claims `vessel`, `rigid_body` and `static_body` objects that declare a
//! `mass` variable. Each solve recomputes the composite totals over the
//! body and its children (mass, center of mass, inertia tensor with the
//! parallel-axis shift, and the inverse inertia tensor); each integrate
//! composes child forces and torques about the center of mass and turns
//! them into translational and angular accelerations through Newton's and
//! Euler's equations.
//!
//! Variables maintained on the body:
//!
//! | name           | content                                  |
//! |----------------|------------------------------------------|
//! | `total_mass`   | body plus children                       |
//! | `total_dmass`  | first derivative of total mass           |
//! | `total_cm`     | composite center of mass (body frame)    |
//! | `total_dcm`    | first derivative of the center of mass   |
//! | `total_i{x,y,z}`     | composite inertia tensor rows      |
//! | `total_inv_i{x,y,z}` | inverse inertia tensor rows        |

use frame_algebra::{DerivativeLevel, FrameVector, StateDerivative, Tensor, EPS};
use log::debug;
use std::sync::Arc;
use vessim::{Claim, ObjectRef, Result, Solver, StateVector, System, VariableRef, VariableType};

use crate::environment;

/// Solver state attached to each claimed body.
struct RigidBodyData {
    is_static: bool,
    total_mass: VariableRef,
    total_dmass: VariableRef,
    total_cm: VariableRef,
    total_dcm: VariableRef,
    total_ix: VariableRef,
    total_iy: VariableRef,
    total_iz: VariableRef,
    total_inv_ix: VariableRef,
    total_inv_iy: VariableRef,
    total_inv_iz: VariableRef,
}

pub struct RigidBody;

impl RigidBody {
    /// Composite inertia tensor contribution of one child, rotated into
    /// the body frame and shifted by the parallel-axis theorem.
    fn child_inertia(
        system: &System,
        body: &ObjectRef,
        child: &ObjectRef,
        mass: f64,
    ) -> Result<Option<Tensor>> {
        let child_state = child.state_vector();

        let rows = match (
            child.get_variable("total_ix"),
            child.get_variable("total_iy"),
            child.get_variable("total_iz"),
        ) {
            (Ok(ix), Ok(iy), Ok(iz)) => [ix.get_vector()?, iy.get_vector()?, iz.get_vector()?],
            _ => match (
                child.get_variable("jx"),
                child.get_variable("jy"),
                child.get_variable("jz"),
            ) {
                (Ok(jx), Ok(jy), Ok(jz)) => [
                    jx.get_vector()?.scale(mass),
                    jy.get_vector()?.scale(mass),
                    jz.get_vector()?.scale(mass),
                ],
                _ => return Ok(None),
            },
        };

        // Rotate the child tensor into the body's axes
        let mut tensor = Tensor::from_rows(rows[0], rows[1], rows[2]).rotate(&child_state.orientation);

        // Parallel-axis shift by the child position in the body frame
        let offset = system
            .convert_vector(&child_state.position, body.id())
            .map(|p| p.raw)
            .unwrap_or(child_state.position.raw);
        let d = offset.norm_squared();
        tensor.rows[0].raw.x += mass * (d - offset.x * offset.x);
        tensor.rows[0].raw.y -= mass * offset.x * offset.y;
        tensor.rows[0].raw.z -= mass * offset.x * offset.z;
        tensor.rows[1].raw.x -= mass * offset.y * offset.x;
        tensor.rows[1].raw.y += mass * (d - offset.y * offset.y);
        tensor.rows[1].raw.z -= mass * offset.y * offset.z;
        tensor.rows[2].raw.x -= mass * offset.z * offset.x;
        tensor.rows[2].raw.y -= mass * offset.z * offset.y;
        tensor.rows[2].raw.z += mass * (d - offset.z * offset.z);
        Ok(Some(tensor))
    }
}

impl Solver for RigidBody {
    fn on_initialize(&self, _system: &System, object: &ObjectRef) -> Result<Claim> {
        let is_static = match () {
            _ if object.check_type("vessel").is_ok() => false,
            _ if object.check_type("rigid_body").is_ok() => false,
            _ if object.check_type("static_body").is_ok() => true,
            _ => return Ok(Claim::Ignore),
        };
        if object.get_variable("mass").is_err() {
            return Ok(Claim::Ignore);
        }

        let vector = |name: &str, level: DerivativeLevel| -> Result<VariableRef> {
            let variable = object.add_variable(name, VariableType::Vector)?;
            variable.set_vector(&FrameVector::zero(level, object.id()))?;
            Ok(variable)
        };

        let data = RigidBodyData {
            is_static,
            total_mass: object.add_variable("total_mass", VariableType::Float)?,
            total_dmass: object.add_variable("total_dmass", VariableType::Float)?,
            total_cm: vector("total_cm", DerivativeLevel::Position)?,
            total_dcm: vector("total_dcm", DerivativeLevel::Velocity)?,
            total_ix: vector("total_ix", DerivativeLevel::Position)?,
            total_iy: vector("total_iy", DerivativeLevel::Position)?,
            total_iz: vector("total_iz", DerivativeLevel::Position)?,
            total_inv_ix: vector("total_inv_ix", DerivativeLevel::Position)?,
            total_inv_iy: vector("total_inv_iy", DerivativeLevel::Position)?,
            total_inv_iz: vector("total_inv_iz", DerivativeLevel::Position)?,
        };
        object.set_solverdata(Arc::new(data))?;
        Ok(Claim::Claimed)
    }

    /// Recomputes composite mass, center of mass and inertia.
    fn on_solve(&self, system: &System, object: &ObjectRef, delta_time: f64) -> Result<()> {
        let data: Arc<RigidBodyData> = object.solverdata()?;

        // Children update their own totals (and masses) first
        for child in system.children(object) {
            if let Err(error) = system.solve_object(&child, delta_time) {
                debug!("child '{}' solve failed: {error}", child.name());
            }
        }

        let own_mass = object.get_variable("mass")?.get_float()?;
        let mut total_mass = own_mass;
        let mut center = object.get_variable("cm")?.get_vector()?.raw;

        // I = j * mass for the body itself
        let mut inertia = Tensor::from_rows(
            object.get_variable("jx")?.get_vector()?.scale(own_mass),
            object.get_variable("jy")?.get_vector()?.scale(own_mass),
            object.get_variable("jz")?.get_vector()?.scale(own_mass),
        );

        for child in system.children(object) {
            let child_mass = child
                .float_value("total_mass")
                .or_else(|| child.float_value("mass"));
            let Some(child_mass) = child_mass else {
                continue;
            };

            let Some(child_tensor) = Self::child_inertia(system, object, &child, child_mass)?
            else {
                continue;
            };
            for i in 0..3 {
                inertia.rows[i].raw += child_tensor.rows[i].raw;
            }

            // Child center of mass in the body frame
            let child_cm = child
                .get_variable("total_cm")
                .or_else(|_| child.get_variable("cm"))?
                .get_vector()?;
            let child_cm = system.vector_components(&child_cm, object.id())?;

            // Mass-weighted mean
            center *= total_mass;
            total_mass += child_mass;
            center = (center + child_mass * child_cm) / total_mass;
        }

        data.total_mass.set_float(total_mass)?;
        data.total_dmass.set_float(0.0)?;
        data.total_cm.set_vector(&FrameVector::from_raw(
            DerivativeLevel::Position,
            object.id(),
            center,
        ))?;
        data.total_dcm
            .set_vector(&FrameVector::zero(DerivativeLevel::Velocity, object.id()))?;

        for (variable, row) in [
            (&data.total_ix, inertia.rows[0]),
            (&data.total_iy, inertia.rows[1]),
            (&data.total_iz, inertia.rows[2]),
        ] {
            let mut row = row;
            row.frame = Some(object.id());
            variable.set_vector(&row)?;
        }

        // A degenerate (point-mass) tensor has no inverse; zero it so the
        // body simply picks up no angular acceleration
        let inverse = if inertia.matrix().determinant().abs() < 1e-30 {
            Tensor::zero(object.id())
        } else {
            inertia.invert_symmetric()
        };
        for (variable, row) in [
            (&data.total_inv_ix, inverse.rows[0]),
            (&data.total_inv_iy, inverse.rows[1]),
            (&data.total_inv_iz, inverse.rows[2]),
        ] {
            let mut row = row;
            row.frame = Some(object.id());
            variable.set_vector(&row)?;
        }
        Ok(())
    }

    /// Translational and angular accelerations from accumulated child
    /// forces and torques, plus local gravity.
    fn on_integrate(
        &self,
        system: &System,
        object: &ObjectRef,
        delta_time: f64,
        state: &StateVector,
    ) -> Result<StateDerivative> {
        let data: Arc<RigidBodyData> = object.solverdata()?;
        let parent = object
            .parent_id()
            .ok_or(vessim::Error::BadState("rigid body has no parent frame"))?;

        let mut derivative = StateDerivative::new(Some(parent));
        derivative.velocity = state.velocity;
        derivative.angular_velocity = state.angular_velocity;

        let mass = data.total_mass.get_float()?;
        let cm = data.total_cm.get_vector()?;
        if mass <= EPS {
            return Ok(derivative);
        }

        let mut cm_force = FrameVector::zero(DerivativeLevel::Force, object.id());
        let mut cm_torque = FrameVector::zero(DerivativeLevel::Torque, object.id());

        for child in system.children(object) {
            let child_derivative = system.integrate_object(&child, delta_time, None)?;

            // Force about the center of mass; a force without an acting
            // point is taken to act at the center of mass itself
            let force = system.convert_vector(&child_derivative.force, object.id())?;
            let force_position = force.position_vector().unwrap_or(cm);
            let arm = force_position.subtract(&cm);
            cm_force = cm_force.add(&force);
            cm_torque = cm_torque.add(&arm.cross(&force));

            // Torque about the center of mass; an off-center torque also
            // contributes a force
            let torque = system.convert_vector(&child_derivative.torque, object.id())?;
            let torque_position = torque.position_vector().unwrap_or(cm);
            let arm = torque_position.subtract(&cm);
            cm_torque = cm_torque.add(&torque);
            cm_force = cm_force.add(&torque.cross(&arm));
        }

        // Report the totals upward through the force/torque channel
        let mut reported_force = cm_force;
        reported_force.set_position_vector(&cm);
        derivative.force = system.convert_vector(&reported_force, parent)?;
        let mut reported_torque = cm_torque;
        reported_torque.set_position_vector(&cm);
        derivative.torque = system.convert_vector(&reported_torque, parent)?;

        // Linear acceleration at the center of mass, expressed in the
        // parent frame (this also picks up the frame's own non-inertial
        // terms, which are then removed with the state acceleration)
        let mut linear = cm_force.scale(1.0 / mass).with_level(DerivativeLevel::Acceleration);
        linear.set_position_vector(&cm);
        let linear = system.convert_vector(&linear, parent)?;
        derivative.acceleration = derivative
            .acceleration
            .add(&linear)
            .subtract(&state.acceleration.with_level(DerivativeLevel::Acceleration));

        // Euler's equation in body axes: α = I⁻¹ (T − ω × Iω)
        let inertia = Tensor::from_rows(
            data.total_ix.get_vector()?,
            data.total_iy.get_vector()?,
            data.total_iz.get_vector()?,
        );
        let inverse = Tensor::from_rows(
            data.total_inv_ix.get_vector()?,
            data.total_inv_iy.get_vector()?,
            data.total_inv_iz.get_vector()?,
        );
        let i_omega = inertia.multiply_vector(&state.angular_velocity);
        let gyroscopic = state
            .angular_velocity
            .cross(&i_omega)
            .with_level(DerivativeLevel::Torque);
        let gyroscopic = system.convert_vector(&gyroscopic, object.id())?;
        let residual = cm_torque.subtract(&gyroscopic);
        let alpha = inverse
            .multiply_vector(&residual)
            .with_level(DerivativeLevel::AngularAcceleration);
        let alpha = system.convert_vector(&alpha, parent)?;
        derivative.angular_acceleration = derivative.angular_acceleration.add(&alpha);

        // Local gravity
        let (_, gravity) = environment::gravitational_field(system, &state.position)?;
        derivative.acceleration = derivative.acceleration.add(&gravity);

        // Static bodies stay put
        if data.is_static {
            derivative.acceleration.raw = nalgebra::Vector3::zeros();
        }
        Ok(derivative)
    }
}
