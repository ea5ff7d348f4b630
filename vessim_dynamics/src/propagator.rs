//! Fixed-step numeric propagators.
//!
//! A propagator is a frame whose type begins with `propagator_`. Its solve
//! callback iterates the frame's initialized children in list order and
//! advances each one by the externally chosen step: the child's own solve
//! runs first (internal state, fuel burn, mass updates), then its
//! integrate callback is sampled at the sub-steps of the method and the
//! derivatives are combined through state-vector arithmetic. A child whose
//! solve fails is skipped so one ill-formed object cannot freeze the whole
//! tree.

use log::debug;
use vessim::{Claim, ObjectRef, Result, Solver, StateDerivative, System};

/// Iterates the children of a propagator frame, applying `step` to each.
fn propagate_children(
    system: &System,
    coordinate_system: &ObjectRef,
    delta_time: f64,
    step: &dyn Fn(&System, &ObjectRef, &ObjectRef, f64) -> Result<()>,
) -> Result<()> {
    for object in system.children(coordinate_system) {
        if let Err(error) = system.solve_object(&object, delta_time) {
            debug!("skipping '{}' this step: {error}", object.name());
            continue;
        }
        step(system, coordinate_system, &object, delta_time)?;
    }
    Ok(())
}

/// First-order forward-Euler propagator; claims `propagator_forwardeuler`
/// frames. One derivative evaluation per step.
pub struct ForwardEuler;

impl Solver for ForwardEuler {
    fn on_initialize(&self, _system: &System, object: &ObjectRef) -> Result<Claim> {
        if object.check_type("propagator_forwardeuler").is_err() {
            return Ok(Claim::Ignore);
        }
        Ok(Claim::Claimed)
    }

    fn on_solve(&self, system: &System, object: &ObjectRef, delta_time: f64) -> Result<()> {
        propagate_children(system, object, delta_time, &|system, _frame, child, h| {
            let state = child.state_vector();
            let derivative = system.integrate_object(child, 0.0, Some(&state))?;
            let state = state.multiply_by_time_and_add(&derivative, h);
            child.set_state_vector(&state)
        })
    }
}

/// Heun predictor-corrector propagator; claims `propagator_heun` frames.
///
/// The corrector iterates until the squared position and velocity changes
/// drop below [`HEUN_TOLERANCE`], or [`HEUN_MAX_ITERATIONS`] is reached.
pub struct Heun;

/// Corrector exit threshold on `‖Δr‖² + ‖Δv‖²`.
pub const HEUN_TOLERANCE: f64 = 1e-10;

/// Hard cap on corrector iterations per child per step.
pub const HEUN_MAX_ITERATIONS: usize = 16;

impl Solver for Heun {
    fn on_initialize(&self, _system: &System, object: &ObjectRef) -> Result<Claim> {
        if object.check_type("propagator_heun").is_err() {
            return Ok(Claim::Ignore);
        }
        Ok(Claim::Claimed)
    }

    fn on_solve(&self, system: &System, object: &ObjectRef, delta_time: f64) -> Result<()> {
        propagate_children(system, object, delta_time, &|system, frame, child, h| {
            let state_0 = child.state_vector();
            let derivative_0 = system.integrate_object(child, 0.0, Some(&state_0))?;

            // Forward-integration estimate of the final state (predictor)
            let mut state_1 = state_0.multiply_by_time_and_add(&derivative_0, h);

            for iteration in 0..HEUN_MAX_ITERATIONS {
                let derivative_1 = system.integrate_object(child, h, Some(&state_1))?;

                // Averaged derivative at the starting point (corrector)
                let averaged = StateDerivative::new(Some(frame.id()))
                    .multiply_and_add(&derivative_0, 0.5)
                    .multiply_and_add(&derivative_1, 0.5);
                let state_next = state_0.multiply_by_time_and_add(&averaged, h);

                let error = (state_1.position.raw - state_next.position.raw).norm_squared()
                    + (state_1.velocity.raw - state_next.velocity.raw).norm_squared();
                state_1 = state_next;
                if error < HEUN_TOLERANCE {
                    break;
                }
                if iteration + 1 == HEUN_MAX_ITERATIONS {
                    debug!("corrector for '{}' did not converge", child.name());
                }
            }
            child.set_state_vector(&state_1)
        })
    }
}

/// Classic fourth-order Runge-Kutta propagator; claims `propagator_rk4`
/// frames. Four derivative evaluations per step, combined with the
/// 1/6-1/3-1/3-1/6 weights.
pub struct Rk4;

impl Solver for Rk4 {
    fn on_initialize(&self, _system: &System, object: &ObjectRef) -> Result<Claim> {
        if object.check_type("propagator_rk4").is_err() {
            return Ok(Claim::Ignore);
        }
        Ok(Claim::Claimed)
    }

    fn on_solve(&self, system: &System, object: &ObjectRef, delta_time: f64) -> Result<()> {
        propagate_children(system, object, delta_time, &|system, frame, child, h| {
            let state = child.state_vector();

            // k1 = f(0, y)
            let k1 = system.integrate_object(child, 0.0, Some(&state))?;

            // k2 = f(h/2, y + h/2 k1)
            let midpoint = state.multiply_by_time_and_add(&k1, 0.5 * h);
            let k2 = system.integrate_object(child, 0.5 * h, Some(&midpoint))?;

            // k3 = f(h/2, y + h/2 k2)
            let midpoint = state.multiply_by_time_and_add(&k2, 0.5 * h);
            let k3 = system.integrate_object(child, 0.5 * h, Some(&midpoint))?;

            // k4 = f(h, y + h k3)
            let endpoint = state.multiply_by_time_and_add(&k3, h);
            let k4 = system.integrate_object(child, h, Some(&endpoint))?;

            let combined = StateDerivative::new(Some(frame.id()))
                .multiply_and_add(&k1, 1.0 / 6.0)
                .multiply_and_add(&k2, 1.0 / 3.0)
                .multiply_and_add(&k3, 1.0 / 3.0)
                .multiply_and_add(&k4, 1.0 / 6.0);

            let state = state.multiply_by_time_and_add(&combined, h);
            child.set_state_vector(&state)
        })
    }
}
