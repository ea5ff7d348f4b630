//! Environment field aggregator.
//!
//! Walks every `planet`-typed object and sums the gravitational potential
//! and acceleration at a position. Planets contribute a spherical field
//! from `mu` (or `G·mass`), optionally corrected by the `J₂` zonal
//! harmonic when `j2` and `radius` are present, or delegate to a custom
//! `gravitational_field` callback variable.

use frame_algebra::{DerivativeLevel, FrameVector, EPS};
use vessim::{Error, ObjectRef, Result, System};

/// CODATA gravitational constant, used when a planet specifies `mass`
/// without `mu`.
pub const GRAVITATIONAL_CONSTANT: f64 = 6.6738480e-11;

/// Custom per-planet field callback, stored in a planet's
/// `gravitational_field` variable. Receives the position relative to the
/// planet center and returns `(potential, acceleration)`.
pub struct GravityField(
    pub Box<dyn Fn(&System, &ObjectRef, &FrameVector) -> Result<(f64, FrameVector)> + Send + Sync>,
);

/// Total gravitational potential and acceleration at `position`,
/// accumulated over all planets.
///
/// A planet is skipped when the position is inside 0.9 of its physical
/// radius, coincides with the planet center, or lies outside its sphere
/// of influence (`rs`).
pub fn gravitational_field(system: &System, position: &FrameVector) -> Result<(f64, FrameVector)> {
    let target = position
        .frame
        .ok_or(Error::BadParameter("position has no coordinate frame"))?;

    let mut total_phi = 0.0;
    let mut total_field = FrameVector::zero(DerivativeLevel::Acceleration, target);

    for planet in system.objects_by_type("planet") {
        let planet_position =
            system.convert_vector(&planet.state_vector().position, target)?;
        let relative = position.subtract(&planet_position);
        let r2 = relative.dot(&relative);
        let r = r2.sqrt();

        let radius = planet.float_value("radius");
        if let Some(radius) = radius {
            if r < radius * 0.9 {
                continue;
            }
        }
        if r2 < EPS {
            // Planets don't pull themselves
            continue;
        }
        if let Some(rs) = planet.float_value("rs") {
            if r2 > rs * rs {
                continue;
            }
        }

        let custom = planet
            .get_variable("gravitational_field")
            .and_then(|variable| variable.get_callback::<GravityField>());
        let (phi, acceleration) = match custom {
            Ok(callback) => (callback.0)(system, &planet, &relative)?,
            Err(_) => {
                let mu = planet.float_value("mu").or_else(|| {
                    planet
                        .float_value("mass")
                        .map(|mass| GRAVITATIONAL_CONSTANT * mass)
                });
                let Some(mu) = mu else {
                    // Not enough information for this planet
                    continue;
                };
                match (planet.float_value("j2"), radius) {
                    (Some(j2), Some(radius)) => oblate_field(mu, j2, radius, &relative, r, r2),
                    _ => spherical_field(mu, &relative, r, r2),
                }
            }
        };
        total_phi += phi;
        total_field = total_field.add(&acceleration.with_level(DerivativeLevel::Acceleration));
    }
    Ok((total_phi, total_field))
}

fn spherical_field(mu: f64, relative: &FrameVector, r: f64, r2: f64) -> (f64, FrameVector) {
    let phi = -mu / r;
    let acceleration = relative
        .normalize()
        .scale(-mu / r2)
        .with_level(DerivativeLevel::Acceleration);
    (phi, acceleration)
}

/// Spherical field plus the `J₂` zonal correction in closed cartesian
/// form, with `sin φ = z/r`.
fn oblate_field(
    mu: f64,
    j2: f64,
    radius: f64,
    relative: &FrameVector,
    r: f64,
    r2: f64,
) -> (f64, FrameVector) {
    let (x, y, z) = (relative.raw.x, relative.raw.y, relative.raw.z);
    let sin_lat2 = (z / r) * (z / r);
    let rr = radius * radius;

    let phi = -mu / r + mu * j2 * rr * (3.0 * sin_lat2 - 1.0) / (2.0 * r2 * r);

    let r5 = r2 * r2 * r;
    let factor = 1.5 * j2 * mu * rr / r5;
    let mut acceleration = relative.scale(-mu / (r2 * r));
    acceleration.raw.x -= factor * x * (1.0 - 5.0 * sin_lat2);
    acceleration.raw.y -= factor * y * (1.0 - 5.0 * sin_lat2);
    acceleration.raw.z -= factor * z * (3.0 - 5.0 * sin_lat2);
    (phi, acceleration.with_level(DerivativeLevel::Acceleration))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use std::sync::Arc;
    use vessim::VariableType;

    const EARTH_MU: f64 = 3.9860044e14;
    const EARTH_RADIUS: f64 = 6.378145e6;

    fn make_planet(system: &System, mu: Option<f64>) -> ObjectRef {
        let planet = system.create_object(Some(&system.root())).unwrap();
        planet.set_type("planet").unwrap();
        planet.set_name("Earth").unwrap();
        if let Some(mu) = mu {
            planet.add_float("mu", mu).unwrap();
        }
        planet.add_float("radius", EARTH_RADIUS).unwrap();
        planet
    }

    #[test]
    fn test_spherical_gravity_at_leo() {
        let system = System::new();
        let planet = make_planet(&system, Some(EARTH_MU));
        system.initialize_object(&planet, true).unwrap();

        let r = 6.728e6;
        let position =
            FrameVector::new(DerivativeLevel::Position, system.root_id(), r, 0.0, 0.0);
        let (phi, g) = gravitational_field(&system, &position).unwrap();

        assert_relative_eq!(g.raw.x, -EARTH_MU / (r * r), epsilon = 1e-9);
        assert_abs_diff_eq!(g.raw.y, 0.0, epsilon = 1e-12);
        assert_relative_eq!(phi, -EARTH_MU / r, epsilon = 1e-9);
        assert_eq!(g.level, DerivativeLevel::Acceleration);
    }

    #[test]
    fn test_mu_derived_from_mass() {
        let system = System::new();
        let planet = system.create_object(Some(&system.root())).unwrap();
        planet.set_type("planet").unwrap();
        planet.add_float("mass", 5.97e24).unwrap();
        system.initialize_object(&planet, true).unwrap();

        let r = 7.0e6;
        let position =
            FrameVector::new(DerivativeLevel::Position, system.root_id(), 0.0, r, 0.0);
        let (_, g) = gravitational_field(&system, &position).unwrap();
        assert_relative_eq!(
            g.raw.y,
            -GRAVITATIONAL_CONSTANT * 5.97e24 / (r * r),
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_no_gravity_inside_planet() {
        let system = System::new();
        let planet = make_planet(&system, Some(EARTH_MU));
        system.initialize_object(&planet, true).unwrap();

        let position = FrameVector::new(
            DerivativeLevel::Position,
            system.root_id(),
            EARTH_RADIUS * 0.89,
            0.0,
            0.0,
        );
        let (phi, g) = gravitational_field(&system, &position).unwrap();
        assert_abs_diff_eq!(g.magnitude(), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(phi, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_sphere_of_influence_cutoff() {
        let system = System::new();
        let planet = make_planet(&system, Some(EARTH_MU));
        planet.add_float("rs", 1.0e9).unwrap();
        system.initialize_object(&planet, true).unwrap();

        let inside =
            FrameVector::new(DerivativeLevel::Position, system.root_id(), 5.0e8, 0.0, 0.0);
        let (_, g) = gravitational_field(&system, &inside).unwrap();
        assert!(g.magnitude() > 0.0);

        let outside =
            FrameVector::new(DerivativeLevel::Position, system.root_id(), 2.0e9, 0.0, 0.0);
        let (_, g) = gravitational_field(&system, &outside).unwrap();
        assert_abs_diff_eq!(g.magnitude(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_two_planets_superpose() {
        let system = System::new();
        let root = system.root();
        for x in [-1.0e7, 1.0e7] {
            let planet = system.create_object(Some(&root)).unwrap();
            planet.set_type("planet").unwrap();
            planet.add_float("mu", EARTH_MU).unwrap();
            let mut state = planet.state_vector();
            state.position.raw.x = x;
            planet.set_state_vector(&state).unwrap();
            system.initialize_object(&planet, true).unwrap();
        }

        // Midway between two equal bodies the field cancels
        let midpoint =
            FrameVector::new(DerivativeLevel::Position, root.id(), 0.0, 0.0, 0.0);
        let (phi, g) = gravitational_field(&system, &midpoint).unwrap();
        assert_abs_diff_eq!(g.magnitude(), 0.0, epsilon = 1e-9);
        assert_relative_eq!(phi, 2.0 * -EARTH_MU / 1.0e7, epsilon = 1e-9);
    }

    #[test]
    fn test_j2_stronger_at_equator_weaker_at_pole() {
        let system = System::new();
        let planet = make_planet(&system, Some(EARTH_MU));
        planet.add_float("j2", 1.08263e-3).unwrap();
        system.initialize_object(&planet, true).unwrap();

        let r = 7.0e6;
        let equator =
            FrameVector::new(DerivativeLevel::Position, system.root_id(), r, 0.0, 0.0);
        let pole = FrameVector::new(DerivativeLevel::Position, system.root_id(), 0.0, 0.0, r);
        let spherical = EARTH_MU / (r * r);

        let (_, g_equator) = gravitational_field(&system, &equator).unwrap();
        let (_, g_pole) = gravitational_field(&system, &pole).unwrap();

        assert!(g_equator.magnitude() > spherical);
        assert!(g_pole.magnitude() < spherical);
        // Perturbation is on the order of J2 (R/r)^2
        assert_relative_eq!(
            g_equator.magnitude() / spherical,
            1.0,
            epsilon = 5.0e-3
        );
    }

    #[test]
    fn test_custom_field_callback() {
        let system = System::new();
        let planet = make_planet(&system, None);
        let variable = planet
            .add_variable("gravitational_field", VariableType::Callback)
            .unwrap();
        variable
            .set_callback(Arc::new(GravityField(Box::new(
                |_system, _planet, relative| {
                    let uniform = relative
                        .normalize()
                        .scale(-1.0)
                        .with_level(DerivativeLevel::Acceleration);
                    Ok((-1.0, uniform))
                },
            ))))
            .unwrap();
        system.initialize_object(&planet, true).unwrap();

        let position = FrameVector::new(
            DerivativeLevel::Position,
            system.root_id(),
            8.0e6,
            0.0,
            0.0,
        );
        let (phi, g) = gravitational_field(&system, &position).unwrap();
        assert_abs_diff_eq!(phi, -1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(g.raw.x, -1.0, epsilon = 1e-12);
    }
}
