//! Solver registry and dispatch.
//!
//! A solver is a bundle of callbacks that claims objects during
//! initialization by type and then advances them. Registered solvers are
//! polled in registration order; the first one that claims an object wins.

use crate::error::{Claim, Result};
use crate::object::ObjectRef;
use crate::system::System;
use frame_algebra::{StateDerivative, StateVector};

/// Callbacks of a solver. All callbacks except `on_initialize` have
/// defaults: solve recurses into the object's initialized children and
/// integrate copies velocities and accelerations from the given state.
pub trait Solver: Send + Sync {
    /// Called once when the solver is registered with a system.
    fn on_startup(&self, _system: &System) -> Result<()> {
        Ok(())
    }

    /// Called when the owning system shuts down.
    fn on_shutdown(&self, _system: &System) -> Result<()> {
        Ok(())
    }

    /// Offered an object during its initialization. Return
    /// [`Claim::Claimed`] to bind this solver to the object,
    /// [`Claim::Ignore`] to pass, or an error to abort the object's
    /// initialization (the object is then destroyed).
    fn on_initialize(&self, system: &System, object: &ObjectRef) -> Result<Claim>;

    /// Called when a claimed object is destroyed.
    fn on_deinitialize(&self, _system: &System, _object: &ObjectRef) -> Result<()> {
        Ok(())
    }

    /// Advances the object's internal state by `delta_time`.
    fn on_solve(&self, system: &System, object: &ObjectRef, delta_time: f64) -> Result<()> {
        default_solve(system, object, delta_time)
    }

    /// Returns the state-vector derivative for a hypothetical `state`.
    /// Must not commit the state: propagators call this several times per
    /// step at different sub-states.
    fn on_integrate(
        &self,
        _system: &System,
        _object: &ObjectRef,
        _delta_time: f64,
        state: &StateVector,
    ) -> Result<StateDerivative> {
        Ok(default_integrate(state))
    }

    /// Hook for persisting solver-specific state (used by the external
    /// file-format collaborator).
    fn on_state_save(&self, _system: &System, _object: &ObjectRef) -> Result<()> {
        Ok(())
    }

    /// Hook for restoring solver-specific state.
    fn on_state_load(&self, _system: &System, _object: &ObjectRef) -> Result<()> {
        Ok(())
    }
}

/// Default solve: recurse into every initialized child. A child error
/// does not stop iteration over its siblings.
pub(crate) fn default_solve(system: &System, object: &ObjectRef, delta_time: f64) -> Result<()> {
    for child in system.children(object) {
        if let Err(error) = system.solve_object(&child, delta_time) {
            log::debug!(
                "child '{}' skipped during solve: {}",
                child.name(),
                error
            );
        }
    }
    Ok(())
}

/// Default integrate: the derivative mirrors the velocities and
/// accelerations already present in the state.
pub(crate) fn default_integrate(state: &StateVector) -> StateDerivative {
    let mut derivative = StateDerivative::new(state.frame());
    derivative.velocity = state.velocity;
    derivative.acceleration = state.acceleration;
    derivative.angular_velocity = state.angular_velocity;
    derivative.angular_acceleration = state.angular_acceleration;
    derivative
}

/// Global pre-initialization hook: runs before each solver is polled and
/// may claim the object for that solver, pass, or abort.
pub type InitializeHook = dyn Fn(&System, &dyn Solver, &ObjectRef) -> Result<Claim> + Send + Sync;
