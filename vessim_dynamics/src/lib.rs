//! Stock solvers for the vessel-dynamics kernel: the fixed-step numeric
//! propagators, the rigid-body accumulator and the environment gravity
//! aggregator.
//!
//! Register the solvers you need before initializing objects:
//!
//! ```no_run
//! use std::sync::Arc;
//! use vessim::System;
//! use vessim_dynamics::{propagator::Rk4, rigid_body::RigidBody};
//!
//! let system = System::new();
//! system.register_solver(Arc::new(Rk4)).unwrap();
//! system.register_solver(Arc::new(RigidBody)).unwrap();
//! ```

pub mod environment;
pub mod propagator;
pub mod rigid_body;

/// Registers the three propagators and the rigid-body solver.
pub fn register_all(system: &vessim::System) -> vessim::Result<()> {
    system.register_solver(std::sync::Arc::new(propagator::ForwardEuler))?;
    system.register_solver(std::sync::Arc::new(propagator::Heun))?;
    system.register_solver(std::sync::Arc::new(propagator::Rk4))?;
    system.register_solver(std::sync::Arc::new(rigid_body::RigidBody))?;
    Ok(())
}
