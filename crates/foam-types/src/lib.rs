//! `foam-types` – shared data model for the spherization stack.
//!
//! Every crate in the workspace speaks in terms of the types defined here:
//! [`Sphere`], [`SphereLevel`], [`SpherizationResult`], [`CacheKey`] and the
//! global [`FoamError`] taxonomy.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Convenience alias used throughout the workspace.
pub type Result<T, E = FoamError> = std::result::Result<T, E>;

// ─────────────────────────────────────────────────────────────────────────────
// Vec3
// ─────────────────────────────────────────────────────────────────────────────

/// A 3-D point or displacement in metres.
///
/// Serialized as a bare `[x, y, z]` array.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f64; 3]", into = "[f64; 3]")]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub const fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    /// Uniform vector with all three components equal to `v`.
    pub const fn splat(v: f64) -> Self {
        Self::new(v, v, v)
    }

    pub fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }

    pub fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }

    pub fn scale(self, s: f64) -> Self {
        Self::new(self.x * s, self.y * s, self.z * s)
    }

    /// Component-wise product.
    pub fn mul_elem(self, rhs: Self) -> Self {
        Self::new(self.x * rhs.x, self.y * rhs.y, self.z * rhs.z)
    }

    pub fn dot(self, rhs: Self) -> f64 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    pub fn cross(self, rhs: Self) -> Self {
        Self::new(
            self.y * rhs.z - self.z * rhs.y,
            self.z * rhs.x - self.x * rhs.z,
            self.x * rhs.y - self.y * rhs.x,
        )
    }

    pub fn norm(self) -> f64 {
        self.dot(self).sqrt()
    }

    /// Unit vector in the same direction, or the zero vector when the norm is
    /// zero.
    pub fn normalized(self) -> Self {
        let n = self.norm();
        if n == 0.0 { Self::zero() } else { self.scale(1.0 / n) }
    }

    pub fn min(self, rhs: Self) -> Self {
        Self::new(self.x.min(rhs.x), self.y.min(rhs.y), self.z.min(rhs.z))
    }

    pub fn max(self, rhs: Self) -> Self {
        Self::new(self.x.max(rhs.x), self.y.max(rhs.y), self.z.max(rhs.z))
    }
}

impl From<[f64; 3]> for Vec3 {
    fn from(v: [f64; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }
}

impl From<Vec3> for [f64; 3] {
    fn from(v: Vec3) -> Self {
        [v.x, v.y, v.z]
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sphere
// ─────────────────────────────────────────────────────────────────────────────

/// A single bounding sphere.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sphere {
    #[serde(rename = "origin")]
    pub center: Vec3,
    pub radius: f64,
}

impl Sphere {
    pub fn new(center: Vec3, radius: f64) -> Self {
        Self { center, radius }
    }

    /// `false` for the degenerate spheres (radius ≤ 0) the fitting tool
    /// occasionally emits.
    pub fn is_valid(&self) -> bool {
        self.radius > 0.0
    }

    /// The same sphere moved by `offset`.
    pub fn translated(&self, offset: Vec3) -> Self {
        Self::new(self.center.add(offset), self.radius)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SphereLevel
// ─────────────────────────────────────────────────────────────────────────────

/// One depth of a sphere tree: a set of spheres approximating the mesh,
/// together with the error statistics reported by the fitting tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SphereLevel {
    pub spheres: Vec<Sphere>,
    #[serde(rename = "mean")]
    pub mean_error: f64,
    #[serde(rename = "best")]
    pub best_error: f64,
    #[serde(rename = "worst")]
    pub worst_error: f64,
}

impl SphereLevel {
    /// Build a level, dropping any sphere with radius ≤ 0.
    pub fn new(spheres: Vec<Sphere>, mean_error: f64, best_error: f64, worst_error: f64) -> Self {
        Self {
            spheres: spheres.into_iter().filter(Sphere::is_valid).collect(),
            mean_error,
            best_error,
            worst_error,
        }
    }

    pub fn len(&self) -> usize {
        self.spheres.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spheres.is_empty()
    }

    /// `true` when `self` has a strictly lower mean error than `other`.
    ///
    /// The comparison is a total order: a NaN mean error ranks after every
    /// number, so it never beats anything and anything else beats it.
    pub fn is_better_than(&self, other: &SphereLevel) -> bool {
        error_rank(self.mean_error)
            .total_cmp(&error_rank(other.mean_error))
            .is_lt()
    }

    /// `true` when every error statistic, center and radius is finite.
    pub fn is_finite(&self) -> bool {
        [self.mean_error, self.best_error, self.worst_error]
            .iter()
            .all(|e| e.is_finite())
            && self.spheres.iter().all(|s| {
                let c = s.center;
                [c.x, c.y, c.z, s.radius].iter().all(|v| v.is_finite())
            })
    }

    /// The same level with every sphere center moved by `offset`.
    pub fn translated(&self, offset: Vec3) -> Self {
        Self {
            spheres: self.spheres.iter().map(|s| s.translated(offset)).collect(),
            ..self.clone()
        }
    }
}

fn error_rank(error: f64) -> f64 {
    // Normalise the NaN sign so every NaN sorts above +inf.
    if error.is_nan() { f64::NAN } else { error }
}

// ─────────────────────────────────────────────────────────────────────────────
// SpherizationResult
// ─────────────────────────────────────────────────────────────────────────────

/// A complete sphere tree, indexed by depth (0 = coarsest).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpherizationResult {
    levels: Vec<SphereLevel>,
}

impl SpherizationResult {
    pub fn new(levels: Vec<SphereLevel>) -> Self {
        Self { levels }
    }

    pub fn levels(&self) -> &[SphereLevel] {
        &self.levels
    }

    pub fn into_levels(self) -> Vec<SphereLevel> {
        self.levels
    }

    /// The level at `depth`, if the tree is that deep.
    pub fn level(&self, depth: usize) -> Option<&SphereLevel> {
        self.levels.get(depth)
    }

    /// The deepest (finest) level.
    pub fn finest(&self) -> Option<&SphereLevel> {
        self.levels.last()
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// The same tree with every sphere center moved by `offset`.
    pub fn translated(&self, offset: Vec3) -> Self {
        Self::new(self.levels.iter().map(|l| l.translated(offset)).collect())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CacheKey
// ─────────────────────────────────────────────────────────────────────────────

/// Composite key under which the best known [`SphereLevel`] is cached.
///
/// `mesh_identity` is a caller-chosen stable name (typically a robot link
/// name), **not** a content hash of the mesh.  Reusing a name for different
/// geometry will serve the other geometry's cached spheres; keeping names
/// stable is the caller's responsibility.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub mesh_identity: String,
    pub branch_factor: u32,
    pub depth: u32,
}

impl CacheKey {
    pub fn new(mesh_identity: impl Into<String>, branch_factor: u32, depth: u32) -> Self {
        Self {
            mesh_identity: mesh_identity.into(),
            branch_factor,
            depth,
        }
    }

    /// The key for another depth of the same mesh and branch factor.
    pub fn with_depth(&self, depth: u32) -> Self {
        Self {
            depth,
            ..self.clone()
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[branch={}, depth={}]",
            self.mesh_identity, self.branch_factor, self.depth
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Error taxonomy
// ─────────────────────────────────────────────────────────────────────────────

/// Global error type spanning result parsing, external tool failures, the
/// repair-and-retry policy, task scheduling, and the result cache.
#[derive(Error, Debug)]
pub enum FoamError {
    #[error("Malformed result file {path}: {reason}")]
    MalformedResult { path: PathBuf, reason: String },

    #[error("{tool} exited with status {exit_code:?}: {output}")]
    ToolExecution {
        tool: String,
        exit_code: Option<i32>,
        output: String,
    },

    #[error("{tool} exited successfully but produced no output at {path}")]
    MissingOutput { tool: String, path: PathBuf },

    #[error("Mesh is still invalid for spherization after repair: {reason}")]
    UnprocessableMesh { reason: String },

    #[error("Spherization failed before and after repair: {source}")]
    ProcessingFailed {
        #[source]
        source: Box<FoamError>,
    },

    #[error("No cache entry for {0}")]
    NotFound(CacheKey),

    #[error("Failed to load mesh {path}: {reason}")]
    MeshLoad { path: PathBuf, reason: String },

    #[error("Cache store {path} is corrupt: {reason}")]
    CorruptCache { path: PathBuf, reason: String },

    #[error("Task '{0}' is already pending")]
    DuplicateTask(String),

    #[error("No pending task named '{0}'")]
    UnknownTask(String),

    #[error("Task '{0}' panicked")]
    TaskPanicked(String),

    #[error("I/O error while {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl FoamError {
    /// Attach a human-readable context to an I/O error.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        FoamError::Io {
            context: context.into(),
            source,
        }
    }

    /// Stable snake_case label for the taxonomy kind, used when reporting
    /// which kind of failure a named task hit.
    pub fn kind(&self) -> &'static str {
        match self {
            FoamError::MalformedResult { .. } => "malformed_result",
            FoamError::ToolExecution { .. } => "tool_execution",
            FoamError::MissingOutput { .. } => "missing_output",
            FoamError::UnprocessableMesh { .. } => "unprocessable_mesh",
            FoamError::ProcessingFailed { .. } => "processing_failed",
            FoamError::NotFound(_) => "not_found",
            FoamError::MeshLoad { .. } => "mesh_load",
            FoamError::CorruptCache { .. } => "corrupt_cache",
            FoamError::DuplicateTask(_) => "duplicate_task",
            FoamError::UnknownTask(_) => "unknown_task",
            FoamError::TaskPanicked(_) => "task_panicked",
            FoamError::Io { .. } => "io",
        }
    }

    /// Whether the pipeline may answer this error with a repair-and-retry
    /// cycle.  Only failures of the external tools themselves qualify.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FoamError::ToolExecution { .. }
                | FoamError::MissingOutput { .. }
                | FoamError::MalformedResult { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(mean: f64, radii: &[f64]) -> SphereLevel {
        let spheres = radii
            .iter()
            .map(|&r| Sphere::new(Vec3::new(1.0, 2.0, 3.0), r))
            .collect();
        SphereLevel::new(spheres, mean, mean / 2.0, mean * 2.0)
    }

    #[test]
    fn sphere_serializes_with_origin_array() {
        let sphere = Sphere::new(Vec3::new(1.0, 2.0, 3.0), 0.5);
        let json = serde_json::to_string(&sphere).unwrap();
        assert_eq!(json, r#"{"origin":[1.0,2.0,3.0],"radius":0.5}"#);
        let back: Sphere = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sphere);
    }

    #[test]
    fn level_drops_degenerate_spheres() {
        let l = level(0.1, &[0.5, 0.0, -1.0, 0.2]);
        assert_eq!(l.len(), 2);
        assert!(l.spheres.iter().all(|s| s.radius > 0.0));
    }

    #[test]
    fn level_uses_short_error_field_names() {
        let json = serde_json::to_value(level(0.1, &[0.5])).unwrap();
        assert!(json.get("mean").is_some());
        assert!(json.get("best").is_some());
        assert!(json.get("worst").is_some());
        assert!(json.get("spheres").is_some());
    }

    #[test]
    fn lower_mean_error_is_better() {
        let good = level(0.1, &[0.5]);
        let bad = level(0.3, &[0.5]);
        assert!(good.is_better_than(&bad));
        assert!(!bad.is_better_than(&good));
        assert!(!good.is_better_than(&good.clone()));
    }

    #[test]
    fn nan_mean_error_ranks_last() {
        let nan = level(f64::NAN, &[0.5]);
        let negative_nan = level(-f64::NAN, &[0.5]);
        let finite = level(0.1, &[0.5]);
        let infinite = level(f64::INFINITY, &[0.5]);
        assert!(finite.is_better_than(&nan));
        assert!(finite.is_better_than(&negative_nan));
        assert!(infinite.is_better_than(&nan));
        assert!(!nan.is_better_than(&finite));
        assert!(!negative_nan.is_better_than(&finite));
        assert!(!nan.is_better_than(&negative_nan));
    }

    #[test]
    fn finiteness_covers_errors_and_spheres() {
        assert!(level(0.1, &[0.5]).is_finite());
        assert!(!level(f64::NAN, &[0.5]).is_finite());
        assert!(!level(0.1, &[f64::INFINITY]).is_finite());
        let mut off = level(0.1, &[0.5]);
        off.spheres[0].center = Vec3::new(f64::NAN, 0.0, 0.0);
        assert!(!off.is_finite());
    }

    #[test]
    fn result_translation_moves_every_center() {
        let result = SpherizationResult::new(vec![level(0.1, &[0.5]), level(0.05, &[0.2, 0.3])]);
        let moved = result.translated(Vec3::new(10.0, 0.0, -1.0));
        for l in moved.levels() {
            for s in &l.spheres {
                assert_eq!(s.center, Vec3::new(11.0, 2.0, 2.0));
            }
        }
        assert_eq!(moved.finest().unwrap().len(), 2);
    }

    #[test]
    fn cache_key_with_depth_keeps_identity() {
        let key = CacheKey::new("panda_link1", 8, 2);
        let other = key.with_depth(0);
        assert_eq!(other.mesh_identity, "panda_link1");
        assert_eq!(other.branch_factor, 8);
        assert_eq!(other.depth, 0);
        assert_eq!(key.to_string(), "panda_link1[branch=8, depth=2]");
    }

    #[test]
    fn recoverable_errors_are_tool_failures_only() {
        let tool = FoamError::ToolExecution {
            tool: "makeTreeMedial".into(),
            exit_code: Some(1),
            output: String::new(),
        };
        assert!(tool.is_recoverable());
        assert!(
            FoamError::MissingOutput { tool: "manifold".into(), path: "x.obj".into() }
                .is_recoverable()
        );
        assert!(!FoamError::io("writing mesh", std::io::Error::other("disk full")).is_recoverable());
        assert!(!FoamError::UnprocessableMesh { reason: "x".into() }.is_recoverable());
    }

    #[test]
    fn foam_error_display_and_kind() {
        let err = FoamError::NotFound(CacheKey::new("base", 8, 1));
        assert!(err.to_string().contains("base[branch=8, depth=1]"));
        assert_eq!(err.kind(), "not_found");

        let wrapped = FoamError::ProcessingFailed {
            source: Box::new(FoamError::MissingOutput {
                tool: "makeTreeMedial".into(),
                path: "a-medial.sph".into(),
            }),
        };
        assert_eq!(wrapped.kind(), "processing_failed");
        assert!(wrapped.to_string().contains("a-medial.sph"));
    }
}
