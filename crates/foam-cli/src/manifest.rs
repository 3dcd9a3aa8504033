//! Link manifest – the robot links to spherize.
//!
//! A manifest is a TOML file listing each link's collision mesh and where it
//! sits in the link frame:
//!
//! ```toml
//! [[link]]
//! name  = "panda_link0"
//! mesh  = "package://meshes/collision/link0.obj"
//! xyz   = [0.0, 0.0, 0.0]
//! rpy   = [0.0, 0.0, 0.0]
//! scale = [1.0, 1.0, 1.0]
//! ```
//!
//! `xyz`, `rpy` and `scale` are optional.  Mesh paths may carry a
//! `package://` prefix, which is stripped; relative paths are resolved
//! against the manifest's directory.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use foam_geometry::{Placement, Transform3D};
use foam_types::Vec3;
use serde::Deserialize;

const PACKAGE_PREFIX: &str = "package://";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LinkEntry {
    pub name: String,
    pub mesh: String,
    #[serde(default)]
    pub xyz: [f64; 3],
    #[serde(default)]
    pub rpy: [f64; 3],
    #[serde(default = "unit_scale")]
    pub scale: [f64; 3],
}

fn unit_scale() -> [f64; 3] {
    [1.0; 3]
}

impl LinkEntry {
    pub fn placement(&self) -> Placement {
        Placement::new(
            Transform3D::from_xyz_rpy(Vec3::from(self.xyz), Vec3::from(self.rpy)),
            Vec3::from(self.scale),
        )
    }

    /// Mesh file location, with `package://` stripped and relative paths
    /// anchored at `base`.
    pub fn mesh_path(&self, base: &Path) -> PathBuf {
        let cleaned = self.mesh.strip_prefix(PACKAGE_PREFIX).unwrap_or(&self.mesh);
        let path = Path::new(cleaned);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base.join(path)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Manifest {
    #[serde(rename = "link", default)]
    pub links: Vec<LinkEntry>,
    /// Directory the manifest was loaded from.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl Manifest {
    /// Parse a manifest from `path`.
    pub fn load(path: &Path) -> Result<Self, String> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read manifest at {}: {}", path.display(), e))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Self::parse(&raw, base)
    }

    /// Parse manifest text; relative mesh paths resolve against `base_dir`.
    pub fn parse(raw: &str, base_dir: &Path) -> Result<Self, String> {
        let mut manifest: Manifest =
            toml::from_str(raw).map_err(|e| format!("Failed to parse manifest: {}", e))?;
        manifest.base_dir = base_dir.to_path_buf();

        let mut seen = HashSet::new();
        for link in &manifest.links {
            if !seen.insert(link.name.as_str()) {
                return Err(format!("Link '{}' appears more than once", link.name));
            }
        }
        Ok(manifest)
    }

    pub fn mesh_path(&self, link: &LinkEntry) -> PathBuf {
        link.mesh_path(&self.base_dir)
    }
}
