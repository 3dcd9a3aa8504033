//! Triangle mesh capability consumed by the spherization pipeline.
//!
//! [`TriMesh`] is an indexed triangle soup with exactly the operations the
//! pipeline needs:
//!
//! | operation | purpose |
//! |---|---|
//! | [`TriMesh::load`] | read OBJ (text) or STL (binary/ASCII) link geometry |
//! | [`TriMesh::write_obj`] | serialize, with vertex normals, for the external tools |
//! | [`TriMesh::placed`] | private copy under a scale + rigid transform |
//! | [`TriMesh::bounds`] | bounding box, whose midpoint re-centres tool output |
//! | [`TriMesh::is_watertight`] | cheap manifoldness diagnostic |
//! | [`TriMesh::smoothed`] | volume-preserving Laplacian smoothing after repair |
//!
//! # Example
//!
//! ```rust
//! use foam_geometry::mesh::TriMesh;
//!
//! let obj = "v 0 0 0\nv 1 0 0\nv 0 1 0\nv 0 0 1\nf 1 3 2\nf 1 2 4\nf 1 4 3\nf 2 3 4\n";
//! let mesh = TriMesh::from_obj_str(obj).unwrap();
//!
//! assert_eq!(mesh.face_count(), 4);
//! assert!(mesh.is_watertight());
//! ```

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use foam_types::{FoamError, Result, Vec3};
use obj::{Group, IndexTuple, ObjData, ObjError, Object, SimplePolygon};
use tracing::debug;

use crate::transform::Placement;

// ────────────────────────────────────────────────────────────────────────────
// Aabb
// ────────────────────────────────────────────────────────────────────────────

/// An axis-aligned bounding box, defined by its minimum and maximum corners.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// Create a bounding box from its two opposite corners.
    ///
    /// The corners are normalised so that `min ≤ max` per axis.
    pub fn new(a: Vec3, b: Vec3) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// Midpoint of the box.
    pub fn center(&self) -> Vec3 {
        self.min.add(self.max).scale(0.5)
    }

    /// Half the side length along each axis.
    pub fn half_extents(&self) -> Vec3 {
        self.max.sub(self.min).scale(0.5)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// TriMesh
// ────────────────────────────────────────────────────────────────────────────

/// An indexed triangle mesh.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriMesh {
    vertices: Vec<Vec3>,
    faces: Vec<[usize; 3]>,
}

impl TriMesh {
    /// Build a mesh from raw vertices and triangle indices.
    ///
    /// Returns [`FoamError::MeshLoad`] when a face references a vertex that
    /// does not exist.
    pub fn new(vertices: Vec<Vec3>, faces: Vec<[usize; 3]>) -> Result<Self> {
        if let Some(face) = faces.iter().find(|f| f.iter().any(|&i| i >= vertices.len())) {
            return Err(FoamError::MeshLoad {
                path: "<memory>".into(),
                reason: format!(
                    "face {face:?} references a vertex outside 0..{}",
                    vertices.len()
                ),
            });
        }
        Ok(Self { vertices, faces })
    }

    pub fn vertices(&self) -> &[Vec3] {
        &self.vertices
    }

    pub fn faces(&self) -> &[[usize; 3]] {
        &self.faces
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    // ── Loading ──────────────────────────────────────────────────────────────

    /// Load a mesh from an `.obj` or `.stl` file.
    ///
    /// Multiple OBJ groups/objects are concatenated into one mesh.  A file
    /// that yields no triangles is a [`FoamError::MeshLoad`] error.
    pub fn load(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        let mesh = match extension.as_str() {
            "obj" => {
                let file = File::open(path)
                    .map_err(|e| FoamError::io(format!("opening {}", path.display()), e))?;
                Self::read_obj(BufReader::new(file)).map_err(|reason| FoamError::MeshLoad {
                    path: path.to_path_buf(),
                    reason,
                })?
            }
            "stl" => {
                let file = File::open(path)
                    .map_err(|e| FoamError::io(format!("opening {}", path.display()), e))?;
                let mut reader = BufReader::new(file);
                let indexed = stl_io::read_stl(&mut reader).map_err(|e| FoamError::MeshLoad {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })?;
                let vertices = indexed
                    .vertices
                    .iter()
                    .map(|v| Vec3::new(v[0] as f64, v[1] as f64, v[2] as f64))
                    .collect();
                let faces = indexed.faces.iter().map(|f| f.vertices).collect();
                Self { vertices, faces }
            }
            other => {
                return Err(FoamError::MeshLoad {
                    path: path.to_path_buf(),
                    reason: format!("unsupported mesh format '{other}'"),
                });
            }
        };

        if mesh.is_empty() {
            return Err(FoamError::MeshLoad {
                path: path.to_path_buf(),
                reason: "file contains no triangles".to_string(),
            });
        }

        debug!(
            path = %path.display(),
            vertices = mesh.vertex_count(),
            faces = mesh.face_count(),
            "mesh loaded"
        );
        Ok(mesh)
    }

    /// Parse Wavefront OBJ text.  Polygons are fan-triangulated.
    pub fn from_obj_str(text: &str) -> Result<Self> {
        Self::read_obj(text.as_bytes()).map_err(|reason| FoamError::MeshLoad {
            path: "<memory>".into(),
            reason,
        })
    }

    fn read_obj<R: Read>(input: R) -> std::result::Result<Self, String> {
        let data = ObjData::load_buf(input).map_err(|e| e.to_string())?;
        let vertices: Vec<Vec3> = data
            .position
            .iter()
            .map(|p| Vec3::new(p[0] as f64, p[1] as f64, p[2] as f64))
            .collect();

        let mut faces = Vec::new();
        let polygons = data
            .objects
            .iter()
            .flat_map(|o| &o.groups)
            .flat_map(|g| &g.polys);
        for SimplePolygon(corners) in polygons {
            if corners.len() < 3 {
                return Err(format!("face with {} vertices", corners.len()));
            }
            for i in 1..corners.len() - 1 {
                faces.push([corners[0].0, corners[i].0, corners[i + 1].0]);
            }
        }

        if let Some(face) = faces.iter().find(|f| f.iter().any(|&i| i >= vertices.len())) {
            return Err(format!(
                "face {face:?} references a vertex outside 0..{}",
                vertices.len()
            ));
        }
        Ok(Self { vertices, faces })
    }

    // ── Export ───────────────────────────────────────────────────────────────

    /// Write the mesh as OBJ, including per-vertex normals (`vn` records).
    pub fn write_obj<W: Write>(&self, out: &mut W) -> std::result::Result<(), ObjError> {
        let to_f32 = |v: &Vec3| [v.x as f32, v.y as f32, v.z as f32];
        ObjData {
            position: self.vertices.iter().map(to_f32).collect(),
            normal: self.vertex_normals().iter().map(to_f32).collect(),
            objects: vec![Object {
                name: "mesh".to_string(),
                groups: vec![Group {
                    name: "mesh".to_string(),
                    index: 0,
                    material: None,
                    polys: self
                        .faces
                        .iter()
                        .map(|f| {
                            SimplePolygon(f.iter().map(|&i| IndexTuple(i, None, Some(i))).collect())
                        })
                        .collect(),
                }],
            }],
            ..Default::default()
        }
        .write_to_buf(out)
    }

    /// Write the mesh as OBJ to `path`.
    pub fn save_obj(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .map_err(|e| FoamError::io(format!("creating {}", path.display()), e))?;
        let mut out = BufWriter::new(file);
        let written = match self.write_obj(&mut out) {
            Ok(()) => out.flush(),
            Err(e) => Err(std::io::Error::other(e.to_string())),
        };
        written.map_err(|e| FoamError::io(format!("writing {}", path.display()), e))
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    /// Axis-aligned bounds of all vertices, or `None` for a mesh without
    /// vertices.
    pub fn bounds(&self) -> Option<Aabb> {
        let first = *self.vertices.first()?;
        let (min, max) = self
            .vertices
            .iter()
            .fold((first, first), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        Some(Aabb { min, max })
    }

    /// Area-weighted per-vertex normals.
    pub fn vertex_normals(&self) -> Vec<Vec3> {
        let mut normals = vec![Vec3::zero(); self.vertices.len()];
        for &[a, b, c] in &self.faces {
            let e1 = self.vertices[b].sub(self.vertices[a]);
            let e2 = self.vertices[c].sub(self.vertices[a]);
            // Unnormalised cross product weights by twice the face area.
            let n = e1.cross(e2);
            for i in [a, b, c] {
                normals[i] = normals[i].add(n);
            }
        }
        normals.into_iter().map(Vec3::normalized).collect()
    }

    /// `true` when every edge is shared by exactly two faces.
    pub fn is_watertight(&self) -> bool {
        if self.faces.is_empty() {
            return false;
        }
        let mut edges: HashMap<(usize, usize), u32> = HashMap::new();
        for &[a, b, c] in &self.faces {
            for (u, v) in [(a, b), (b, c), (c, a)] {
                *edges.entry((u.min(v), u.max(v))).or_default() += 1;
            }
        }
        edges.values().all(|&count| count == 2)
    }

    // ── Transformation ───────────────────────────────────────────────────────

    /// A copy of the mesh with `placement` applied to every vertex.
    pub fn placed(&self, placement: &Placement) -> Self {
        Self {
            vertices: self.vertices.iter().map(|&v| placement.apply(v)).collect(),
            faces: self.faces.clone(),
        }
    }

    /// A copy of the mesh moved by `offset`.
    pub fn translated(&self, offset: Vec3) -> Self {
        Self {
            vertices: self.vertices.iter().map(|v| v.add(offset)).collect(),
            faces: self.faces.clone(),
        }
    }

    /// Humphrey's-classes Laplacian smoothing.
    ///
    /// Each iteration moves vertices towards their neighbour average and then
    /// pushes them part of the way back towards the original and previous
    /// positions, which limits the shrinkage of plain Laplacian smoothing.
    /// `alpha` weights the original position, `beta` the previous iteration.
    pub fn smoothed(&self, iterations: usize, alpha: f64, beta: f64) -> Self {
        let neighbours = self.vertex_neighbours();
        let original = &self.vertices;
        let mut current = self.vertices.clone();

        for _ in 0..iterations {
            let laplacian: Vec<Vec3> = neighbours
                .iter()
                .enumerate()
                .map(|(i, adj)| average(adj, &current).unwrap_or(current[i]))
                .collect();

            let pushback: Vec<Vec3> = laplacian
                .iter()
                .enumerate()
                .map(|(i, &p)| p.sub(original[i].scale(alpha).add(current[i].scale(1.0 - alpha))))
                .collect();

            current = laplacian
                .iter()
                .enumerate()
                .map(|(i, &p)| {
                    let neighbour_b = average(&neighbours[i], &pushback).unwrap_or(pushback[i]);
                    p.sub(pushback[i].scale(beta).add(neighbour_b.scale(1.0 - beta)))
                })
                .collect();
        }

        Self {
            vertices: current,
            faces: self.faces.clone(),
        }
    }

    fn vertex_neighbours(&self) -> Vec<Vec<usize>> {
        let mut adj: Vec<Vec<usize>> = vec![Vec::new(); self.vertices.len()];
        for &[a, b, c] in &self.faces {
            for (u, v) in [(a, b), (b, c), (c, a)] {
                if !adj[u].contains(&v) {
                    adj[u].push(v);
                }
                if !adj[v].contains(&u) {
                    adj[v].push(u);
                }
            }
        }
        adj
    }
}

fn average(indices: &[usize], values: &[Vec3]) -> Option<Vec3> {
    if indices.is_empty() {
        return None;
    }
    let sum = indices
        .iter()
        .fold(Vec3::zero(), |acc, &i| acc.add(values[i]));
    Some(sum.scale(1.0 / indices.len() as f64))
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::Transform3D;

    const TETRA: &str = "\
# unit tetrahedron
v 0 0 0
v 1 0 0
v 0 1 0
v 0 0 1
f 1 3 2
f 1 2 4
f 1 4 3
f 2 3 4
";

    fn cube(center: Vec3, half: f64) -> TriMesh {
        let mut vertices = Vec::new();
        for i in 0..8 {
            let sx = if i & 1 == 0 { -half } else { half };
            let sy = if i & 2 == 0 { -half } else { half };
            let sz = if i & 4 == 0 { -half } else { half };
            vertices.push(center.add(Vec3::new(sx, sy, sz)));
        }
        let faces = vec![
            [0, 2, 1], [1, 2, 3], [4, 5, 6], [5, 7, 6],
            [0, 1, 4], [1, 5, 4], [2, 6, 3], [3, 6, 7],
            [0, 4, 2], [2, 4, 6], [1, 3, 5], [3, 7, 5],
        ];
        TriMesh::new(vertices, faces).unwrap()
    }

    #[test]
    fn parse_tetrahedron() {
        let mesh = TriMesh::from_obj_str(TETRA).unwrap();
        assert_eq!(mesh.vertex_count(), 4);
        assert_eq!(mesh.face_count(), 4);
        assert!(mesh.is_watertight());
    }

    #[test]
    fn parse_handles_slashes_and_quads() {
        let obj = "v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nvn 0 0 1\nf 1//1 2//1 3//1 4//1\n";
        let mesh = TriMesh::from_obj_str(obj).unwrap();
        assert_eq!(mesh.faces(), &[[0, 1, 2], [0, 2, 3]]);
        assert!(!mesh.is_watertight());
    }

    #[test]
    fn parse_rejects_out_of_range_index() {
        let err = TriMesh::from_obj_str("v 0 0 0\nf 1 2 3\n").unwrap_err();
        assert!(matches!(err, FoamError::MeshLoad { .. }));
        let err = TriMesh::from_obj_str("v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 x\n").unwrap_err();
        assert!(matches!(err, FoamError::MeshLoad { .. }));
    }

    #[test]
    fn new_rejects_dangling_face() {
        assert!(TriMesh::new(vec![Vec3::zero()], vec![[0, 0, 1]]).is_err());
    }

    #[test]
    fn bounds_of_offset_cube() {
        let mesh = cube(Vec3::new(10.0, 0.0, 0.0), 1.0);
        let b = mesh.bounds().unwrap();
        assert_eq!(b.center(), Vec3::new(10.0, 0.0, 0.0));
        assert_eq!(b.half_extents(), Vec3::splat(1.0));
        assert!(TriMesh::default().bounds().is_none());
    }

    #[test]
    fn cube_normals_point_outwards() {
        let mesh = cube(Vec3::zero(), 1.0);
        for (v, n) in mesh.vertices().iter().zip(mesh.vertex_normals()) {
            assert!(v.dot(n) > 0.0, "normal {n:?} at {v:?} points inwards");
        }
    }

    #[test]
    fn placed_returns_copy() {
        let mesh = cube(Vec3::zero(), 1.0);
        let placement = Placement::new(
            Transform3D::from_xyz_rpy(Vec3::new(0.0, 0.0, 5.0), Vec3::zero()),
            Vec3::splat(2.0),
        );
        let moved = mesh.placed(&placement);
        let b = moved.bounds().unwrap();
        assert_eq!(b.center(), Vec3::new(0.0, 0.0, 5.0));
        assert_eq!(b.half_extents(), Vec3::splat(2.0));
        // The source mesh is untouched.
        assert_eq!(mesh.bounds().unwrap().center(), Vec3::zero());
    }

    #[test]
    fn obj_export_round_trips_geometry() {
        let mesh = cube(Vec3::new(1.0, 2.0, 3.0), 0.5);
        let mut buf = Vec::new();
        mesh.write_obj(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.lines().filter(|l| l.starts_with("vn ")).count(), 8);
        assert!(text.lines().filter(|l| l.starts_with("f ")).all(|l| l.contains("//")));
        let back = TriMesh::from_obj_str(&text).unwrap();
        assert_eq!(back, mesh);
    }

    #[test]
    fn load_obj_and_reject_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let obj = dir.path().join("link.obj");
        std::fs::write(&obj, TETRA).unwrap();
        assert_eq!(TriMesh::load(&obj).unwrap().face_count(), 4);

        let saved = dir.path().join("saved.obj");
        let mesh = cube(Vec3::zero(), 0.25);
        mesh.save_obj(&saved).unwrap();
        assert_eq!(TriMesh::load(&saved).unwrap(), mesh);

        let empty = dir.path().join("empty.obj");
        std::fs::write(&empty, "# nothing\n").unwrap();
        assert!(matches!(TriMesh::load(&empty), Err(FoamError::MeshLoad { .. })));

        let dae = dir.path().join("link.dae");
        std::fs::write(&dae, "<COLLADA/>").unwrap();
        assert!(matches!(TriMesh::load(&dae), Err(FoamError::MeshLoad { .. })));
    }

    #[test]
    fn smoothing_keeps_topology_and_planarity() {
        let obj = "v 0 0 0\nv 1 0 0\nv 2 0 0\nv 0 1 0\nv 1 1 0.0\nv 2 1 0\n\
                   f 1 2 5\nf 1 5 4\nf 2 3 6\nf 2 6 5\n";
        let mesh = TriMesh::from_obj_str(obj).unwrap();
        let smooth = mesh.smoothed(5, 0.1, 0.5);
        assert_eq!(smooth.faces(), mesh.faces());
        assert!(smooth.vertices().iter().all(|v| v.z == 0.0 && v.x.is_finite()));
        assert_eq!(mesh.smoothed(0, 0.1, 0.5), mesh);
    }
}
