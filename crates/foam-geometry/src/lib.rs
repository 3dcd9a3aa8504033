//! `foam-geometry` – the mesh capability.
//!
//! Provides the geometry the spherization pipeline consumes without
//! interpreting: loading link meshes, placing them in their link frame and
//! handing them to the external tools in a format those tools read.
//!
//! # Modules
//!
//! - [`mesh`] – [`TriMesh`][mesh::TriMesh]: indexed triangle mesh with
//!   OBJ/STL loading, OBJ export with vertex normals, bounds, watertightness
//!   and Laplacian smoothing.
//! - [`transform`] – [`Placement`][transform::Placement],
//!   [`Transform3D`][transform::Transform3D] and
//!   [`Quaternion`][transform::Quaternion]: scale + rigid transform built
//!   from URDF-style `xyz`/`rpy` attributes.

pub mod mesh;
pub mod transform;

pub use mesh::{Aabb, TriMesh};
pub use transform::{Placement, Quaternion, Transform3D};
