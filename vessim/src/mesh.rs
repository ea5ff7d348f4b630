//! Interface to the external procedural mesher.
//!
//! Tessellation itself lives outside the kernel; initialization only needs
//! coarse triangle data to derive mass properties that were not specified
//! explicitly. Embedders install a generator on the [`crate::System`].

use crate::error::Result;
use crate::object::Object;
use nalgebra::Vector3;

#[derive(Debug, Clone, Copy)]
pub struct MeshTriangle {
    pub center: Vector3<f64>,
    pub area: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct BoundingBox {
    pub min: Vector3<f64>,
    pub max: Vector3<f64>,
}

/// Tessellated geometry of an object.
#[derive(Debug, Clone)]
pub struct Mesh {
    pub triangles: Vec<MeshTriangle>,
    pub total_volume: f64,
    pub total_area: f64,
    pub bounding_box: BoundingBox,
}

/// Produces a mesh for an object from its geometry variables.
///
/// `resolution` is a quality hint; mass-property derivation asks for a
/// coarse mesh.
pub trait MeshGenerator: Send + Sync {
    fn generate_mesh(&self, object: &Object, resolution: f64) -> Result<Mesh>;
}
