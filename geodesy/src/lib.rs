//! Geodetic coordinates and LVLH attitude helpers.
//!
//! A [`Datum`] is the reference ellipsoid of a planetary body, derived
//! from its variables. Geodetic coordinates (latitude, longitude,
//! elevation in degrees and meters) convert to and from position vectors
//! in the body's frame: the forward direction uses the prime-vertical
//! formula, the reverse solves Bowring's irrational geodetic-latitude
//! equation with Newton iteration. LVLH helpers compose the longitude and
//! colatitude rotations with a target quaternion to move attitudes between
//! the body frame and the local-vertical/local-horizontal frame.

use frame_algebra::{DerivativeLevel, FrameId, FrameQuaternion, FrameVector, StateVector, EPS};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use vessim::{ObjectRef, System};

#[derive(Debug, Clone, Error)]
pub enum GeodesyError {
    #[error("{0}")]
    Kernel(#[from] vessim::Error),
    #[error("datum semiminor axis exceeds semimajor axis")]
    InvalidEllipsoid,
    #[error("vector is not a position")]
    NotAPosition,
}

pub type Result<T> = std::result::Result<T, GeodesyError>;

/// Reference ellipsoid of a body, tagged with the body's frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Datum {
    pub semimajor_axis: f64,
    pub semiminor_axis: f64,
    pub frame: FrameId,
}

impl Datum {
    /// Derives the datum from a planetary body's variables.
    ///
    /// `geometry.semimajor_axis` together with one of
    /// `geometry.semiminor_axis`, `geometry.flattening` or
    /// `geometry.inverse_flattening` defines an ellipsoid;
    /// `geometry.radius` (or the bare `radius`) defines a sphere. Anything
    /// else yields a zero-radius datum: bearing and elevation around the
    /// object's reference point.
    pub fn from_object(object: &ObjectRef) -> Datum {
        let mut datum = Datum {
            semimajor_axis: 0.0,
            semiminor_axis: 0.0,
            frame: object.id(),
        };
        if object.check_type("planet").is_err() {
            return datum;
        }

        if let Some(semimajor) = object.float_value("geometry.semimajor_axis") {
            datum.semimajor_axis = semimajor;
            if let Some(semiminor) = object.float_value("geometry.semiminor_axis") {
                datum.semiminor_axis = semiminor;
            } else if let Some(flattening) = object.float_value("geometry.flattening") {
                datum.semiminor_axis = semimajor * (1.0 - flattening);
            } else if let Some(inverse) = object.float_value("geometry.inverse_flattening") {
                datum.semiminor_axis = if inverse != 0.0 {
                    semimajor * (1.0 - 1.0 / inverse)
                } else {
                    0.0
                };
            } else {
                datum.semiminor_axis = semimajor;
            }
        } else if let Some(radius) = object
            .float_value("geometry.radius")
            .or_else(|| object.float_value("radius"))
        {
            datum.semimajor_axis = radius;
            datum.semiminor_axis = radius;
        }
        datum
    }

    fn eccentricity_squared(&self) -> f64 {
        if self.semiminor_axis < self.semimajor_axis {
            1.0 - (self.semiminor_axis * self.semiminor_axis)
                / (self.semimajor_axis * self.semimajor_axis)
        } else {
            0.0
        }
    }

    fn is_spherical(&self) -> bool {
        self.semimajor_axis == self.semiminor_axis
    }
}

/// Geodetic position around a datum. Latitude and longitude in degrees,
/// elevation in meters above the ellipsoid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeodeticCoordinate {
    pub datum: Datum,
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: f64,
}

impl GeodeticCoordinate {
    /// Geodetic coordinate around an object, with the datum derived from
    /// the object. Longitudes at or beyond 180° are remapped into
    /// [-180, 180).
    pub fn new(object: &ObjectRef, latitude: f64, longitude: f64, elevation: f64) -> Self {
        let longitude = if longitude >= 180.0 {
            -180.0 + (longitude - 180.0) % 360.0
        } else {
            longitude
        };
        Self {
            datum: Datum::from_object(object),
            latitude,
            longitude,
            elevation,
        }
    }

    /// Position vector of this coordinate in the datum body's frame,
    /// using the prime-vertical radius of curvature.
    pub fn to_vector(&self) -> Result<FrameVector> {
        if self.datum.semiminor_axis > self.datum.semimajor_axis {
            return Err(GeodesyError::InvalidEllipsoid);
        }
        let sin_lat = self.latitude.to_radians().sin();
        let cos_lat = self.latitude.to_radians().cos();
        let sin_lon = self.longitude.to_radians().sin();
        let cos_lon = self.longitude.to_radians().cos();

        let e2 = self.datum.eccentricity_squared();
        let normal = if e2 > 0.0 {
            self.datum.semimajor_axis / (1.0 - e2 * sin_lat * sin_lat).sqrt()
        } else {
            self.datum.semimajor_axis
        };

        Ok(FrameVector::new(
            DerivativeLevel::Position,
            self.datum.frame,
            (normal + self.elevation) * cos_lon * cos_lat,
            (normal + self.elevation) * sin_lon * cos_lat,
            (normal * (1.0 - e2) + self.elevation) * sin_lat,
        ))
    }

    /// Geodetic coordinate of a position vector. The datum is taken from
    /// `target_datum`, or derived from the vector's own frame object.
    ///
    /// Spherical datums convert directly; ellipsoids solve Bowring's
    /// equation by Newton iteration, at most 8 steps or until the
    /// iterate is stationary. Longitude is returned in [-180, 180), an
    /// exact 180° mapping to -180°.
    pub fn from_vector(
        system: &System,
        source: &FrameVector,
        target_datum: Option<&Datum>,
    ) -> Result<GeodeticCoordinate> {
        if source.level != DerivativeLevel::Position {
            return Err(GeodesyError::NotAPosition);
        }
        let datum = match target_datum {
            Some(datum) => *datum,
            None => {
                let frame = source
                    .frame
                    .ok_or(vessim::Error::BadParameter("vector has no coordinate frame"))?;
                Datum::from_object(&system.object(frame)?)
            }
        };

        let components = system.vector_components(source, datum.frame)?;
        let (x, y, z) = (components.x, components.y, components.z);

        let mut longitude = y.atan2(x).to_degrees();
        if longitude == 180.0 {
            longitude = -180.0;
        }

        if datum.is_spherical() {
            let r = (x * x + y * y + z * z).sqrt() + EPS;
            return Ok(GeodeticCoordinate {
                datum,
                latitude: (z / r).asin().to_degrees(),
                longitude,
                elevation: r - datum.semimajor_axis,
            });
        }

        let e2 = datum.eccentricity_squared();
        let one_minus_e2 = 1.0 - e2;
        let p = (x * x + y * y).sqrt();

        // Newton iteration on Bowring's kappa, seeded with 1/(1-e²)
        let mut k = 1.0 / one_minus_e2;
        let mut k_prev = f64::INFINITY;
        let mut iterations = 0;
        while (k - k_prev).abs() > EPS && iterations < 8 {
            k_prev = k;
            let ci = (p * p + one_minus_e2 * z * z * k * k).powf(1.5)
                / (datum.semimajor_axis * e2);
            k = 1.0 + (p * p + one_minus_e2 * z * z * k * k * k) / (ci - p * p);
            iterations += 1;
        }

        let tan_lat = if p != 0.0 {
            k * z / p
        } else if k * z > 0.0 {
            f64::INFINITY
        } else {
            f64::NEG_INFINITY
        };
        let lat = tan_lat.atan();

        let sin_lat = lat.sin();
        let normal = datum.semimajor_axis / (1.0 - e2 * sin_lat * sin_lat).sqrt();
        let elevation = if sin_lat != 0.0 {
            z / sin_lat - normal * one_minus_e2
        } else {
            p - normal
        };

        Ok(GeodeticCoordinate {
            datum,
            latitude: lat.to_degrees(),
            longitude,
            elevation,
        })
    }
}

/// Longitude and colatitude rotations from the body frame's pole to the
/// given coordinate.
fn lvlh_rotations(coordinate: &GeodeticCoordinate) -> (FrameQuaternion, FrameQuaternion) {
    let frame = coordinate.datum.frame;
    let q_lon = FrameQuaternion::from_euler(frame, 0.0, 0.0, coordinate.longitude.to_radians());
    let q_lat = FrameQuaternion::from_euler(
        frame,
        0.0,
        (90.0 - coordinate.latitude).to_radians(),
        0.0,
    );
    (q_lon, q_lat)
}

/// Re-expresses an attitude quaternion in the LVLH frame at the given
/// coordinate. The result stays numerically in the datum body's frame.
pub fn quaternion_to_lvlh(
    system: &System,
    source: &FrameQuaternion,
    coordinate: &GeodeticCoordinate,
) -> Result<FrameQuaternion> {
    let (q_lon, q_lat) = lvlh_rotations(coordinate);
    let in_datum = system.convert_quaternion(source, coordinate.datum.frame)?;
    Ok(q_lat.conjugate() * (q_lon.conjugate() * in_datum))
}

/// Inverse of [`quaternion_to_lvlh`]: takes an attitude in the LVLH frame
/// at the coordinate and re-expresses it in the datum body's frame.
pub fn quaternion_from_lvlh(
    system: &System,
    source_lvlh: &FrameQuaternion,
    coordinate: &GeodeticCoordinate,
) -> Result<FrameQuaternion> {
    let in_datum = system.convert_quaternion(source_lvlh, coordinate.datum.frame)?;
    let (q_lon, q_lat) = lvlh_rotations(coordinate);
    Ok(q_lon * (q_lat * in_datum))
}

/// State vector for a frame placed at a geodetic coordinate with LVLH
/// attitude, in the datum body's frame. The frame is only non-inertial if
/// the datum body itself rotates.
pub fn lvlh_state_vector(system: &System, coordinate: &GeodeticCoordinate) -> Result<StateVector> {
    let mut state = StateVector::new(Some(coordinate.datum.frame));
    state.orientation = quaternion_from_lvlh(system, &state.orientation, coordinate)?;
    state.position = coordinate.to_vector()?;
    Ok(state)
}
