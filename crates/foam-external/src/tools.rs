//! Parameters and argument vectors for the external executables.
//!
//! Each sphere-tree construction method is a distinct executable with its own
//! option set.  [`SpherizationMethod`] carries only the options its
//! executable understands, and [`SpherizationMethod::arguments`] is a total
//! mapping from a method to its command line.
//!
//! | method | executable | result suffix |
//! |---|---|---|
//! | [`Medial`][SpherizationMethod::Medial] | `makeTreeMedial` | `-medial.sph` |
//! | [`Grid`][SpherizationMethod::Grid] | `makeTreeGrid` | `-grid.sph` |
//! | [`Hubbard`][SpherizationMethod::Hubbard] | `makeTreeHubbard` | `-hubbard.sph` |
//! | [`Octree`][SpherizationMethod::Octree] | `makeTreeOctree` | `-octree.sph` |
//! | [`Spawn`][SpherizationMethod::Spawn] | `makeTreeSpawn` | `-spawn.sph` |
//!
//! Mesh repair uses two further executables, `manifold` and `simplify`,
//! parameterised by [`RepairParams`].

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Executable performing watertight manifold reconstruction.
pub const MANIFOLD_TOOL: &str = "manifold";
/// Executable performing quadric simplification.
pub const SIMPLIFY_TOOL: &str = "simplify";

// ─────────────────────────────────────────────────────────────────────────────
// Shared tree options
// ─────────────────────────────────────────────────────────────────────────────

/// Options common to the methods that evaluate coverage with a tester.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeParams {
    /// Children per sphere.
    pub branch: u32,
    /// Number of levels below the root.
    pub depth: u32,
    /// Levels of the sphere tester used to measure error.
    pub tester_levels: u32,
    /// Sample points covering the surface.
    pub num_cover: u32,
    /// Minimum sample points per sphere.
    pub min_cover: u32,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            branch: 8,
            depth: 1,
            tester_levels: 2,
            num_cover: 5000,
            min_cover: 5,
        }
    }
}

impl TreeParams {
    fn push_args(&self, args: &mut Vec<OsString>) {
        push_opt(args, "-branch", self.branch);
        push_opt(args, "-depth", self.depth);
        push_opt(args, "-testerLevels", self.tester_levels);
        push_opt(args, "-numCover", self.num_cover);
        push_opt(args, "-minCover", self.min_cover);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Per-method options
// ─────────────────────────────────────────────────────────────────────────────

/// Medial-axis approximation (the default and most accurate method).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MedialParams {
    #[serde(flatten)]
    pub tree: TreeParams,
    /// Spheres in the initial medial approximation.
    pub init_spheres: u32,
    /// Minimum spheres kept when reducing the approximation.
    pub min_spheres: u32,
    /// Error factor controlling how aggressively the approximation grows.
    pub er_fact: u32,
    pub expand: bool,
    pub merge: bool,
    pub burst: bool,
    /// Run the simplex optimiser on each level.
    pub optimise: bool,
    pub max_opt_level: u32,
    pub bal_excess: f64,
    pub verify: bool,
    pub num_samples: u32,
    pub min_samples: u32,
}

impl Default for MedialParams {
    fn default() -> Self {
        Self {
            tree: TreeParams::default(),
            init_spheres: 1000,
            min_spheres: 200,
            er_fact: 2,
            expand: true,
            merge: true,
            burst: false,
            optimise: true,
            max_opt_level: 1,
            bal_excess: 0.05,
            verify: true,
            num_samples: 500,
            min_samples: 1,
        }
    }
}

/// Regular-grid sphere placement.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GridParams {
    #[serde(flatten)]
    pub tree: TreeParams,
    pub verify: bool,
}

/// Hubbard's medial-axis sampling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubbardParams {
    pub branch: u32,
    pub depth: u32,
    pub num_samples: u32,
    pub min_samples: u32,
}

impl Default for HubbardParams {
    fn default() -> Self {
        Self {
            branch: 8,
            depth: 1,
            num_samples: 500,
            min_samples: 1,
        }
    }
}

/// Octree subdivision.  The branch factor is fixed at 8 by construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OctreeParams {
    pub depth: u32,
}

impl Default for OctreeParams {
    fn default() -> Self {
        Self { depth: 1 }
    }
}

/// Sphere spawning from the surface inwards.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpawnParams {
    #[serde(flatten)]
    pub tree: TreeParams,
    pub optimise: bool,
    pub max_opt_level: u32,
    pub bal_excess: f64,
    pub verify: bool,
}

impl Default for SpawnParams {
    fn default() -> Self {
        Self {
            tree: TreeParams::default(),
            optimise: true,
            max_opt_level: 1,
            bal_excess: 0.05,
            verify: true,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SpherizationMethod
// ─────────────────────────────────────────────────────────────────────────────

/// A sphere-tree construction method together with its options.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum SpherizationMethod {
    Medial(MedialParams),
    Grid(GridParams),
    Hubbard(HubbardParams),
    Octree(OctreeParams),
    Spawn(SpawnParams),
}

impl Default for SpherizationMethod {
    fn default() -> Self {
        SpherizationMethod::Medial(MedialParams::default())
    }
}

impl SpherizationMethod {
    /// Lower-case method name (`"medial"`, `"grid"`, …).
    pub fn name(&self) -> &'static str {
        match self {
            SpherizationMethod::Medial(_) => "medial",
            SpherizationMethod::Grid(_) => "grid",
            SpherizationMethod::Hubbard(_) => "hubbard",
            SpherizationMethod::Octree(_) => "octree",
            SpherizationMethod::Spawn(_) => "spawn",
        }
    }

    /// Executable implementing this method.
    pub fn executable(&self) -> &'static str {
        match self {
            SpherizationMethod::Medial(_) => "makeTreeMedial",
            SpherizationMethod::Grid(_) => "makeTreeGrid",
            SpherizationMethod::Hubbard(_) => "makeTreeHubbard",
            SpherizationMethod::Octree(_) => "makeTreeOctree",
            SpherizationMethod::Spawn(_) => "makeTreeSpawn",
        }
    }

    pub fn branch(&self) -> u32 {
        match self {
            SpherizationMethod::Medial(p) => p.tree.branch,
            SpherizationMethod::Grid(p) => p.tree.branch,
            SpherizationMethod::Hubbard(p) => p.branch,
            SpherizationMethod::Octree(_) => 8,
            SpherizationMethod::Spawn(p) => p.tree.branch,
        }
    }

    pub fn depth(&self) -> u32 {
        match self {
            SpherizationMethod::Medial(p) => p.tree.depth,
            SpherizationMethod::Grid(p) => p.tree.depth,
            SpherizationMethod::Hubbard(p) => p.depth,
            SpherizationMethod::Octree(p) => p.depth,
            SpherizationMethod::Spawn(p) => p.tree.depth,
        }
    }

    /// The same method with a different tree depth.
    pub fn with_depth(mut self, depth: u32) -> Self {
        match &mut self {
            SpherizationMethod::Medial(p) => p.tree.depth = depth,
            SpherizationMethod::Grid(p) => p.tree.depth = depth,
            SpherizationMethod::Hubbard(p) => p.depth = depth,
            SpherizationMethod::Octree(p) => p.depth = depth,
            SpherizationMethod::Spawn(p) => p.tree.depth = depth,
        }
        self
    }

    /// The same method with a different branch factor.  Octree ignores it.
    pub fn with_branch(mut self, branch: u32) -> Self {
        match &mut self {
            SpherizationMethod::Medial(p) => p.tree.branch = branch,
            SpherizationMethod::Grid(p) => p.tree.branch = branch,
            SpherizationMethod::Hubbard(p) => p.branch = branch,
            SpherizationMethod::Octree(_) => {}
            SpherizationMethod::Spawn(p) => p.tree.branch = branch,
        }
        self
    }

    /// Derive the result file the executable writes next to `input`:
    /// `dir/mesh.obj` becomes `dir/mesh-<method>.sph`.
    pub fn result_path(&self, input: &Path) -> PathBuf {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        input.with_file_name(format!("{stem}-{}.sph", self.name()))
    }

    /// Command-line arguments for fitting `input`.
    pub fn arguments(&self, input: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-nopause".into()];
        match self {
            SpherizationMethod::Medial(p) => {
                p.tree.push_args(&mut args);
                push_opt(&mut args, "-initSpheres", p.init_spheres);
                push_opt(&mut args, "-minSpheres", p.min_spheres);
                push_opt(&mut args, "-erFact", p.er_fact);
                push_opt(&mut args, "-numSamples", p.num_samples);
                push_opt(&mut args, "-minSamples", p.min_samples);
                push_flag(&mut args, "-expand", p.expand);
                push_flag(&mut args, "-merge", p.merge);
                push_flag(&mut args, "-burst", p.burst);
                push_optimiser(&mut args, p.optimise, p.max_opt_level, p.bal_excess);
                push_flag(&mut args, "-verify", p.verify);
            }
            SpherizationMethod::Grid(p) => {
                p.tree.push_args(&mut args);
                push_flag(&mut args, "-verify", p.verify);
            }
            SpherizationMethod::Hubbard(p) => {
                push_opt(&mut args, "-branch", p.branch);
                push_opt(&mut args, "-depth", p.depth);
                push_opt(&mut args, "-numSamples", p.num_samples);
                push_opt(&mut args, "-minSamples", p.min_samples);
            }
            SpherizationMethod::Octree(p) => {
                push_opt(&mut args, "-depth", p.depth);
            }
            SpherizationMethod::Spawn(p) => {
                p.tree.push_args(&mut args);
                push_optimiser(&mut args, p.optimise, p.max_opt_level, p.bal_excess);
                push_flag(&mut args, "-verify", p.verify);
            }
        }
        args.push(input.as_os_str().to_owned());
        args
    }

    /// Arguments for the validity probe: the cheapest run of this method
    /// (`depth = 0`, no expansion or optimisation) with verification on.
    pub fn probe_arguments(&self, input: &Path) -> Vec<OsString> {
        let probe = match *self {
            SpherizationMethod::Medial(p) => SpherizationMethod::Medial(MedialParams {
                tree: TreeParams { depth: 0, ..p.tree },
                expand: false,
                merge: false,
                burst: false,
                optimise: false,
                verify: true,
                ..p
            }),
            SpherizationMethod::Grid(p) => SpherizationMethod::Grid(GridParams {
                tree: TreeParams { depth: 0, ..p.tree },
                verify: true,
            }),
            SpherizationMethod::Spawn(p) => SpherizationMethod::Spawn(SpawnParams {
                tree: TreeParams { depth: 0, ..p.tree },
                optimise: false,
                verify: true,
                ..p
            }),
            other => other.with_depth(0),
        };
        probe.arguments(input)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Repair
// ─────────────────────────────────────────────────────────────────────────────

/// Options for the repair pass: manifold reconstruction, simplification and
/// smoothing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairParams {
    /// Octree leaf budget for manifold reconstruction.
    pub manifold_leaves: u32,
    /// Target face ratio for simplification (0, 1].
    pub simplify_ratio: f64,
    /// Smoothing iterations applied after simplification.
    pub smoothing_iterations: usize,
}

impl Default for RepairParams {
    fn default() -> Self {
        Self {
            manifold_leaves: 1000,
            simplify_ratio: 0.2,
            smoothing_iterations: 100,
        }
    }
}

impl RepairParams {
    /// `manifold <input> <output> <leaves>`
    pub fn manifold_arguments(&self, input: &Path, output: &Path) -> Vec<OsString> {
        vec![
            input.as_os_str().to_owned(),
            output.as_os_str().to_owned(),
            self.manifold_leaves.to_string().into(),
        ]
    }

    /// `simplify -i <input> -o <output> -m -r <ratio>`
    pub fn simplify_arguments(&self, input: &Path, output: &Path) -> Vec<OsString> {
        vec![
            "-i".into(),
            input.as_os_str().to_owned(),
            "-o".into(),
            output.as_os_str().to_owned(),
            "-m".into(),
            "-r".into(),
            self.simplify_ratio.to_string().into(),
        ]
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn push_opt(args: &mut Vec<OsString>, name: &str, value: impl ToString) {
    args.push(name.into());
    args.push(value.to_string().into());
}

fn push_flag(args: &mut Vec<OsString>, name: &str, enabled: bool) {
    if enabled {
        args.push(name.into());
    }
}

fn push_optimiser(args: &mut Vec<OsString>, optimise: bool, max_level: u32, bal_excess: f64) {
    if optimise {
        args.push("-optimise".into());
        args.push("simplex".into());
        push_opt(args, "-maxOptLevel", max_level);
        push_opt(args, "-balExcess", bal_excess);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    fn value_after(args: &[String], flag: &str) -> Option<String> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1).cloned())
    }

    #[test]
    fn medial_arguments_carry_every_knob() {
        let args = strings(SpherizationMethod::default().arguments(Path::new("/tmp/m.obj")));
        assert_eq!(args.first().map(String::as_str), Some("-nopause"));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/m.obj"));
        assert_eq!(value_after(&args, "-branch").as_deref(), Some("8"));
        assert_eq!(value_after(&args, "-depth").as_deref(), Some("1"));
        assert_eq!(value_after(&args, "-initSpheres").as_deref(), Some("1000"));
        assert_eq!(value_after(&args, "-optimise").as_deref(), Some("simplex"));
        assert!(args.contains(&"-expand".to_string()));
        assert!(args.contains(&"-merge".to_string()));
        assert!(args.contains(&"-verify".to_string()));
        assert!(!args.contains(&"-burst".to_string()));
    }

    #[test]
    fn octree_arguments_only_carry_depth() {
        let method = SpherizationMethod::Octree(OctreeParams { depth: 3 });
        let args = strings(method.arguments(Path::new("m.obj")));
        assert_eq!(args, vec!["-nopause", "-depth", "3", "m.obj"]);
        assert_eq!(method.branch(), 8);
    }

    #[test]
    fn hubbard_arguments_have_no_tester_options() {
        let method = SpherizationMethod::Hubbard(HubbardParams::default());
        let args = strings(method.arguments(Path::new("m.obj")));
        assert!(!args.contains(&"-testerLevels".to_string()));
        assert!(!args.contains(&"-verify".to_string()));
        assert_eq!(value_after(&args, "-numSamples").as_deref(), Some("500"));
    }

    #[test]
    fn probe_arguments_use_depth_zero_and_verify() {
        let method = SpherizationMethod::default().with_depth(4);
        let args = strings(method.probe_arguments(Path::new("m.obj")));
        assert_eq!(value_after(&args, "-depth").as_deref(), Some("0"));
        assert!(args.contains(&"-verify".to_string()));
        assert!(!args.contains(&"-expand".to_string()));
        assert!(!args.contains(&"-optimise".to_string()));
        // The method itself is unchanged.
        assert_eq!(method.depth(), 4);
    }

    #[test]
    fn result_path_replaces_extension_with_method_suffix() {
        let input = Path::new("/tmp/work/link.obj");
        assert_eq!(
            SpherizationMethod::default().result_path(input),
            PathBuf::from("/tmp/work/link-medial.sph")
        );
        assert_eq!(
            SpherizationMethod::Spawn(SpawnParams::default()).result_path(input),
            PathBuf::from("/tmp/work/link-spawn.sph")
        );
    }

    #[test]
    fn with_branch_and_depth_update_every_variant() {
        for method in [
            SpherizationMethod::Medial(MedialParams::default()),
            SpherizationMethod::Grid(GridParams::default()),
            SpherizationMethod::Hubbard(HubbardParams::default()),
            SpherizationMethod::Spawn(SpawnParams::default()),
        ] {
            let m = method.with_branch(4).with_depth(3);
            assert_eq!((m.branch(), m.depth()), (4, 3), "{}", m.name());
        }
    }

    #[test]
    fn repair_arguments() {
        let params = RepairParams::default();
        let manifold = strings(params.manifold_arguments(Path::new("a.obj"), Path::new("b.obj")));
        assert_eq!(manifold, vec!["a.obj", "b.obj", "1000"]);
        let simplify = strings(params.simplify_arguments(Path::new("b.obj"), Path::new("c.obj")));
        assert_eq!(simplify, vec!["-i", "b.obj", "-o", "c.obj", "-m", "-r", "0.2"]);
    }

    #[test]
    fn method_deserializes_from_tagged_json() {
        let json = r#"{"method":"grid","branch":4,"depth":2,"verify":true}"#;
        let method: SpherizationMethod = serde_json::from_str(json).unwrap();
        assert_eq!(method.name(), "grid");
        assert_eq!(method.branch(), 4);
        assert_eq!(method.depth(), 2);
    }
}
