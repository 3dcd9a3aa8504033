//! Rigid-body transforms for placing link meshes.
//!
//! A link's collision geometry is described by a translation (`xyz`), a
//! fixed-axis roll/pitch/yaw rotation (`rpy`) and a per-axis scale.
//! [`Placement`] bundles all three; [`Transform3D`] is the rigid part.
//!
//! # Example
//!
//! ```rust
//! use foam_geometry::transform::Transform3D;
//! use foam_types::Vec3;
//!
//! // A link origin 1 m forward, yawed by 90°.
//! let t = Transform3D::from_xyz_rpy(
//!     Vec3::new(1.0, 0.0, 0.0),
//!     Vec3::new(0.0, 0.0, std::f64::consts::FRAC_PI_2),
//! );
//!
//! let p = t.apply(Vec3::new(1.0, 0.0, 0.0));
//! assert!((p.x - 1.0).abs() < 1e-9);
//! assert!((p.y - 1.0).abs() < 1e-9);
//! ```

use foam_types::Vec3;

// ────────────────────────────────────────────────────────────────────────────
// Quaternion
// ────────────────────────────────────────────────────────────────────────────

/// A unit quaternion representing a 3-D rotation (w, x, y, z convention).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quaternion {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Quaternion {
    /// Create a quaternion.  The caller is responsible for providing a unit
    /// quaternion (|q| = 1).
    pub fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { w, x, y, z }
    }

    /// The identity rotation (no rotation).
    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0)
    }

    /// Rotation of `angle` radians about the unit vector `axis`.
    pub fn from_axis_angle(axis: Vec3, angle: f64) -> Self {
        let (s, c) = (angle * 0.5).sin_cos();
        let a = axis.normalized();
        Self::new(c, a.x * s, a.y * s, a.z * s)
    }

    /// Fixed-axis roll (X), pitch (Y), yaw (Z) as used by URDF `rpy`
    /// attributes: the composed rotation is `Rz(yaw) · Ry(pitch) · Rx(roll)`.
    pub fn from_rpy(roll: f64, pitch: f64, yaw: f64) -> Self {
        let qx = Self::from_axis_angle(Vec3::new(1.0, 0.0, 0.0), roll);
        let qy = Self::from_axis_angle(Vec3::new(0.0, 1.0, 0.0), pitch);
        let qz = Self::from_axis_angle(Vec3::new(0.0, 0.0, 1.0), yaw);
        qz.mul(qy).mul(qx)
    }

    /// Hamilton product: compose two rotations.
    pub fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
            self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
        )
    }

    /// Conjugate (== inverse for a unit quaternion).
    pub fn conjugate(self) -> Self {
        Self::new(self.w, -self.x, -self.y, -self.z)
    }

    /// Rotate a vector by this quaternion: p' = q * p * q*.
    pub fn rotate(self, v: Vec3) -> Vec3 {
        let p = Self::new(0.0, v.x, v.y, v.z);
        let rotated = self.mul(p).mul(self.conjugate());
        Vec3::new(rotated.x, rotated.y, rotated.z)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Transform3D
// ────────────────────────────────────────────────────────────────────────────

/// A rigid-body 3-D transform: rotation followed by translation.
///
/// To map a point from the link's mesh frame into the link frame, rotate it
/// by `rotation` then add `translation`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform3D {
    pub translation: Vec3,
    pub rotation: Quaternion,
}

impl Transform3D {
    pub fn new(translation: Vec3, rotation: Quaternion) -> Self {
        Self {
            translation,
            rotation,
        }
    }

    /// The identity transform (no translation, no rotation).
    pub fn identity() -> Self {
        Self::new(Vec3::zero(), Quaternion::identity())
    }

    /// Build a transform from a URDF-style `xyz` translation and `rpy`
    /// rotation.
    pub fn from_xyz_rpy(xyz: Vec3, rpy: Vec3) -> Self {
        Self::new(xyz, Quaternion::from_rpy(rpy.x, rpy.y, rpy.z))
    }

    /// Map a point through this transform.
    pub fn apply(&self, p: Vec3) -> Vec3 {
        self.rotation.rotate(p).add(self.translation)
    }
}

impl Default for Transform3D {
    fn default() -> Self {
        Self::identity()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Placement
// ────────────────────────────────────────────────────────────────────────────

/// Where a mesh sits in its link: per-axis scale, then the rigid transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub transform: Transform3D,
    pub scale: Vec3,
}

impl Placement {
    pub fn new(transform: Transform3D, scale: Vec3) -> Self {
        Self { transform, scale }
    }

    /// Unit scale, identity transform.
    pub fn identity() -> Self {
        Self::new(Transform3D::identity(), Vec3::splat(1.0))
    }

    /// Only a uniform scale.
    pub fn scaled(scale: f64) -> Self {
        Self::new(Transform3D::identity(), Vec3::splat(scale))
    }

    /// Scale, then rotate, then translate `p`.
    pub fn apply(&self, p: Vec3) -> Vec3 {
        self.transform.apply(p.mul_elem(self.scale))
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::identity()
    }
}

impl Default for Placement {
    fn default() -> Self {
        Self::identity()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::{FRAC_1_SQRT_2, FRAC_PI_2};

    fn close(a: Vec3, b: Vec3) -> bool {
        a.sub(b).norm() < 1e-9
    }

    // ── Quaternion ──────────────────────────────────────────────────────────

    #[test]
    fn quaternion_identity_rotate_is_noop() {
        let v = Vec3::new(1.0, 2.0, 3.0);
        assert!(close(Quaternion::identity().rotate(v), v));
    }

    #[test]
    fn quaternion_90deg_yaw_rotates_x_to_y() {
        let q = Quaternion::new(FRAC_1_SQRT_2, 0.0, 0.0, FRAC_1_SQRT_2);
        let r = q.rotate(Vec3::new(1.0, 0.0, 0.0));
        assert!(close(r, Vec3::new(0.0, 1.0, 0.0)), "got {r:?}");
    }

    #[test]
    fn quaternion_conjugate_is_inverse() {
        let q = Quaternion::from_rpy(0.3, -0.2, 1.1);
        let prod = q.mul(q.conjugate());
        assert!((prod.w - 1.0).abs() < 1e-9);
        assert!(prod.x.abs() < 1e-9);
        assert!(prod.y.abs() < 1e-9);
        assert!(prod.z.abs() < 1e-9);
    }

    #[test]
    fn rpy_applies_roll_before_yaw() {
        // Roll 90° takes +Y to +Z; a following yaw leaves +Z alone.
        let q = Quaternion::from_rpy(FRAC_PI_2, 0.0, FRAC_PI_2);
        let r = q.rotate(Vec3::new(0.0, 1.0, 0.0));
        assert!(close(r, Vec3::new(0.0, 0.0, 1.0)), "got {r:?}");
    }

    // ── Transform3D ─────────────────────────────────────────────────────────

    #[test]
    fn xyz_rpy_rotates_then_translates() {
        let yaw = Vec3::new(0.0, 0.0, FRAC_PI_2);
        let t = Transform3D::from_xyz_rpy(Vec3::new(0.0, 0.0, 1.0), yaw);
        assert!(close(t.apply(Vec3::new(1.0, 0.0, 0.0)), Vec3::new(0.0, 1.0, 1.0)));
    }

    // ── Placement ───────────────────────────────────────────────────────────

    #[test]
    fn placement_scales_before_translating() {
        let p = Placement::new(
            Transform3D::new(Vec3::new(1.0, 0.0, 0.0), Quaternion::identity()),
            Vec3::new(2.0, 3.0, 4.0),
        );
        assert!(close(p.apply(Vec3::new(1.0, 1.0, 1.0)), Vec3::new(3.0, 3.0, 4.0)));
    }

    #[test]
    fn default_placement_is_identity() {
        assert!(Placement::default().is_identity());
        assert!(!Placement::scaled(0.001).is_identity());
    }
}
