//! Propagates a satellite on a low Earth orbit with the RK4 propagator
//! and prints the altitude every minute.

use nalgebra::Vector3;
use std::sync::Arc;
use vessim::System;
use vessim_dynamics::{propagator::Rk4, rigid_body::RigidBody};

fn main() -> vessim::Result<()> {
    let system = System::new();
    system.set_time(59000.0);
    system.register_solver(Arc::new(Rk4))?;
    system.register_solver(Arc::new(RigidBody))?;

    let propagator = system.create_object(Some(&system.root()))?;
    propagator.set_type("propagator_rk4")?;

    let earth = system.create_object(Some(&propagator))?;
    earth.set_type("planet")?;
    earth.set_name("Earth")?;
    earth.add_float("mu", 3.9860044e14)?;
    earth.add_float("radius", 6.378145e6)?;
    earth.add_float("period", 86164.10)?;

    let satellite = system.create_object(Some(&propagator))?;
    satellite.set_type("vessel")?;
    satellite.set_name("Satellite")?;
    satellite.add_float("mass", 1000.0)?;

    system.initialize_object(&propagator, true)?;

    let mut state = satellite.state_vector();
    state.position.raw = Vector3::new(6.728e6, 0.0, 0.0);
    state.velocity.raw = Vector3::new(0.0, 7700.0, 0.0);
    satellite.set_state_vector(&state)?;

    let radius = 6.378145e6;
    let dt = 1.0;
    for step in 0..=5400 {
        if step % 60 == 0 {
            let state = satellite.state_vector();
            println!(
                "t = {:4} s  altitude = {:8.1} km  speed = {:7.1} m/s",
                step,
                (state.position.raw.norm() - radius) / 1000.0,
                state.velocity.raw.norm()
            );
        }
        system.solve_object(&propagator, dt)?;
    }
    Ok(())
}
