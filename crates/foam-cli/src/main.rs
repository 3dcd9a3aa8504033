//! `foam` – sphere-tree generation for robot collision geometry.
//!
//! Subcommands:
//!
//! - `foam mesh <FILE>` spherizes a single mesh and writes every tree level
//!   to `<stem>-spheres.json`.
//! - `foam links <MANIFEST>` spherizes all links of a robot concurrently and
//!   writes `{link name -> finest level}` JSON.
//! - `foam config` shows the effective configuration, or writes the
//!   defaults with `--init`.
//!
//! Both spherizing commands go through the persistent sphere cache.  Entries
//! are named by canonical mesh path plus placement, so re-running the same
//! geometry with the same branch factor and depth is instant while a changed
//! scale or pose is fitted afresh.

mod config;
mod manifest;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use foam_external::{
    GridParams, HubbardParams, MedialParams, OctreeParams, SpawnParams, SpherizationMethod,
    ToolInvoker,
};
use foam_geometry::{Placement, TriMesh};
use foam_pipeline::{
    RequestOutcome, ResultCache, SpherizationPipeline, SpherizationService, init_tracing,
};
use foam_types::{FoamError, SphereLevel};
use tracing::{debug, info};

use crate::manifest::Manifest;

// ─────────────────────────────────────────────────────────────────────────────
// Command line
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum CliMethod {
    Medial,
    Grid,
    Hubbard,
    Octree,
    Spawn,
}

/// Sphere-tree options shared by the spherizing subcommands.
#[derive(clap::Args, Debug, Clone, Copy)]
struct TreeArgs {
    /// Fitting method
    #[arg(long, value_enum, default_value_t = CliMethod::Medial)]
    method: CliMethod,

    /// Children per sphere (ignored by octree, which always uses 8)
    #[arg(long, default_value_t = 8)]
    branch: u32,

    /// Tree depth below the root sphere
    #[arg(long, default_value_t = 1)]
    depth: u32,
}

impl TreeArgs {
    fn method(&self) -> SpherizationMethod {
        let base = match self.method {
            CliMethod::Medial => SpherizationMethod::Medial(MedialParams::default()),
            CliMethod::Grid => SpherizationMethod::Grid(GridParams::default()),
            CliMethod::Hubbard => SpherizationMethod::Hubbard(HubbardParams::default()),
            CliMethod::Octree => SpherizationMethod::Octree(OctreeParams::default()),
            CliMethod::Spawn => SpherizationMethod::Spawn(SpawnParams::default()),
        };
        base.with_branch(self.branch).with_depth(self.depth)
    }
}

/// foam – approximate meshes with sphere trees
#[derive(Parser, Debug)]
#[command(name = "foam", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Spherize one mesh file (OBJ or STL)
    Mesh {
        #[arg(value_name = "FILE")]
        path: PathBuf,

        /// Uniform scale applied before fitting
        #[arg(long, default_value_t = 1.0)]
        scale: f64,

        #[command(flatten)]
        tree: TreeArgs,

        /// Output file (defaults to `<stem>-spheres.json` next to the mesh)
        #[arg(long, short, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Spherize every link listed in a TOML manifest
    Links {
        #[arg(value_name = "MANIFEST")]
        manifest: PathBuf,

        #[command(flatten)]
        tree: TreeArgs,

        /// Output file (defaults to `<manifest stem>-spheres.json`)
        #[arg(long, short, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Show the effective configuration
    Config {
        /// Write the default configuration to ~/.foam/config.toml
        #[arg(long)]
        init: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let _guard = init_tracing("foam");

    let cfg = match config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{}: {}", "Config error".red(), e);
            return ExitCode::FAILURE;
        }
    };
    debug!(?cfg, "configuration loaded");

    let outcome = match cli.command {
        Command::Mesh {
            path,
            scale,
            tree,
            output,
        } => run_mesh(&cfg, &path, scale, tree.method(), output),
        Command::Links {
            manifest,
            tree,
            output,
        } => run_links(&cfg, &manifest, tree.method(), output),
        Command::Config { init } => run_config(&cfg, init),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", "✗".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Subcommands
// ─────────────────────────────────────────────────────────────────────────────

fn build_service(cfg: &config::Config) -> Result<SpherizationService, String> {
    let invoker = ToolInvoker::new(cfg.tool_config());
    let pipeline = SpherizationPipeline::new(Arc::new(invoker));
    let cache = ResultCache::open(&cfg.cache_path).map_err(describe)?;
    SpherizationService::new(pipeline, cache, cfg.service_config()).map_err(describe)
}

fn run_mesh(
    cfg: &config::Config,
    path: &Path,
    scale: f64,
    method: SpherizationMethod,
    output: Option<PathBuf>,
) -> Result<(), String> {
    let started = Instant::now();
    let mesh = TriMesh::load(path).map_err(describe)?;
    let display = mesh_name(path);
    let name = geometry_name(path, [0.0; 3], [0.0; 3], [scale; 3]);
    println!(
        "  Spherizing {} ({} faces, {}, branch {}, depth {}) …",
        display.bold(),
        mesh.face_count(),
        method.name(),
        method.branch(),
        method.depth()
    );

    let service = build_service(cfg)?;
    let key = SpherizationService::key_for(&name, &method);
    let levels = match service.request(&name, mesh, Placement::scaled(scale), method) {
        Ok(RequestOutcome::Cached) => {
            println!("  {} served from cache", "✓".green());
            collect_levels(&service, &name, &method)
        }
        Ok(RequestOutcome::Scheduled) => service
            .resolve(&name, &key, true)
            .and_then(|_| collect_levels(&service, &name, &method)),
        Err(e) => Err(e),
    };
    let levels = match levels {
        Ok(levels) => levels,
        Err(e) => {
            report_failure(&display, &e);
            service.close().map_err(describe)?;
            return Err(format!("spherization of '{display}' failed"));
        }
    };
    service.close().map_err(describe)?;

    let out = output.unwrap_or_else(|| sibling_output(path));
    write_json(&out, &levels)?;
    for (depth, level) in levels.iter().enumerate() {
        println!(
            "    depth {depth}: {:>4} spheres, mean error {:.5}",
            level.len(),
            level.mean_error
        );
    }
    println!(
        "  {} Wrote {} in {:.2?}",
        "✓".green().bold(),
        out.display().to_string().bold(),
        started.elapsed()
    );
    Ok(())
}

fn run_links(
    cfg: &config::Config,
    manifest_path: &Path,
    method: SpherizationMethod,
    output: Option<PathBuf>,
) -> Result<(), String> {
    let started = Instant::now();
    let manifest = Manifest::load(manifest_path)?;
    let service = build_service(cfg)?;
    println!(
        "  Spherizing {} links ({}, branch {}, depth {}) on {} workers …",
        manifest.links.len(),
        method.name(),
        method.branch(),
        method.depth(),
        cfg.threads
    );

    // Fan out every request before blocking on any of them.  Links with the
    // same mesh and placement share one request.
    let mut failures: Vec<(Vec<String>, FoamError)> = Vec::new();
    let mut requested: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for link in &manifest.links {
        let mesh_path = manifest.mesh_path(link);
        let name = geometry_name(&mesh_path, link.xyz, link.rpy, link.scale);
        if let Some(sharing) = requested.get_mut(&name) {
            sharing.push(link.name.clone());
            continue;
        }
        let scheduled = TriMesh::load(&mesh_path)
            .and_then(|mesh| service.request(&name, mesh, link.placement(), method));
        match scheduled {
            Ok(outcome) => {
                debug!(link = %link.name, task = %name, ?outcome, "requested");
                requested.insert(name, vec![link.name.clone()]);
            }
            Err(e) => failures.push((vec![link.name.clone()], e)),
        }
    }

    let mut spheres: BTreeMap<String, SphereLevel> = BTreeMap::new();
    for (name, links) in requested {
        let key = SpherizationService::key_for(&name, &method);
        match service.resolve_finest(&name, &key) {
            Ok(level) => {
                for link in links {
                    println!(
                        "  {} {:<24} {:>4} spheres, mean error {:.5}",
                        "✓".green(),
                        link,
                        level.len(),
                        level.mean_error
                    );
                    spheres.insert(link, level.clone());
                }
            }
            Err(e) => failures.push((links, e)),
        }
    }
    service.close().map_err(describe)?;

    for (links, err) in &failures {
        report_failure(&links.join(", "), err);
    }
    let failed: usize = failures.iter().map(|(links, _)| links.len()).sum();

    let out = output.unwrap_or_else(|| sibling_output(manifest_path));
    write_json(&out, &spheres)?;
    info!(links = spheres.len(), failed, "manifest done");
    println!(
        "  {} Wrote {} ({} of {} links) in {:.2?}",
        "✓".green().bold(),
        out.display().to_string().bold(),
        spheres.len(),
        manifest.links.len(),
        started.elapsed()
    );

    if failed == 0 {
        Ok(())
    } else {
        Err(format!("{failed} link(s) failed"))
    }
}

fn run_config(cfg: &config::Config, init: bool) -> Result<(), String> {
    if init {
        config::save(&config::Config::default())?;
        println!(
            "  {} Config saved to {}",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        );
        return Ok(());
    }
    println!("  Config file: {}", config::config_path().display().to_string().dimmed());
    let raw = toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {e}"))?;
    println!("{raw}");
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// All cached levels `0..=depth` for `name`, stopping at the first gap.
fn collect_levels(
    service: &SpherizationService,
    name: &str,
    method: &SpherizationMethod,
) -> Result<Vec<SphereLevel>, FoamError> {
    let key = SpherizationService::key_for(name, method);
    let levels: Vec<SphereLevel> = (0..=method.depth())
        .map_while(|depth| service.cache().get(&key.with_depth(depth)).ok())
        .collect();
    if levels.is_empty() {
        Err(FoamError::NotFound(key))
    } else {
        Ok(levels)
    }
}

fn report_failure(name: &str, err: &FoamError) {
    eprintln!(
        "  {} {} failed [{}]: {}",
        "✗".red().bold(),
        name.bold(),
        err.kind().yellow(),
        err
    );
}

fn describe(err: FoamError) -> String {
    format!("[{}] {}", err.kind(), err)
}

/// Cache and task name for a mesh under a placement.
///
/// Cached spheres are only valid for the exact geometry they were fitted to,
/// so the name carries the canonical mesh path and every placement
/// component.  Editing the mesh file in place is not detected.
fn geometry_name(mesh_path: &Path, xyz: [f64; 3], rpy: [f64; 3], scale: [f64; 3]) -> String {
    let canonical = std::fs::canonicalize(mesh_path).unwrap_or_else(|_| mesh_path.to_path_buf());
    format!(
        "{}?xyz={xyz:?}&rpy={rpy:?}&scale={scale:?}",
        canonical.display()
    )
}

fn mesh_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "mesh".to_string())
}

/// `dir/name.ext` → `dir/name-spheres.json`
fn sibling_output(path: &Path) -> PathBuf {
    path.with_file_name(format!("{}-spheres.json", mesh_name(path)))
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), String> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| format!("Failed to serialize spheres: {e}"))?;
    std::fs::write(path, json).map_err(|e| format!("Failed to write {}: {e}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn tree_args_map_to_method() {
        let cli = Cli::parse_from(["foam", "mesh", "link.obj", "--method", "spawn", "--branch", "4", "--depth", "3"]);
        let Command::Mesh { tree, scale, .. } = cli.command else {
            panic!("expected mesh command");
        };
        let method = tree.method();
        assert_eq!(method.name(), "spawn");
        assert_eq!((method.branch(), method.depth()), (4, 3));
        assert_eq!(scale, 1.0);
    }

    #[test]
    fn octree_ignores_branch() {
        let cli = Cli::parse_from(["foam", "links", "robot.toml", "--method", "octree", "--branch", "2"]);
        let Command::Links { tree, .. } = cli.command else {
            panic!("expected links command");
        };
        assert_eq!(tree.method().branch(), 8);
    }

    #[test]
    fn output_defaults_next_to_input() {
        assert_eq!(
            sibling_output(Path::new("/meshes/link0.obj")),
            PathBuf::from("/meshes/link0-spheres.json")
        );
    }

    #[test]
    fn geometry_names_change_with_scale_and_placement() {
        let dir = tempfile::tempdir().unwrap();
        let mesh = dir.path().join("link0.obj");
        std::fs::write(&mesh, "v 0 0 0\n").unwrap();

        let unit = geometry_name(&mesh, [0.0; 3], [0.0; 3], [1.0; 3]);
        assert_eq!(unit, geometry_name(&mesh, [0.0; 3], [0.0; 3], [1.0; 3]));
        assert_ne!(unit, geometry_name(&mesh, [0.0; 3], [0.0; 3], [2.0; 3]));
        assert_ne!(unit, geometry_name(&mesh, [0.0, 0.0, 0.1], [0.0; 3], [1.0; 3]));
        assert_ne!(unit, geometry_name(&mesh, [0.0; 3], [0.0, 0.0, 0.5], [1.0; 3]));

        let other = dir.path().join("other").join("link0.obj");
        std::fs::create_dir_all(other.parent().unwrap()).unwrap();
        std::fs::write(&other, "v 0 0 0\n").unwrap();
        assert_ne!(unit, geometry_name(&other, [0.0; 3], [0.0; 3], [1.0; 3]));
    }

    #[test]
    fn geometry_name_resolves_equivalent_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("meshes")).unwrap();
        let mesh = dir.path().join("meshes").join("hand.stl");
        std::fs::write(&mesh, "solid hand\nendsolid hand\n").unwrap();
        let dotted = dir.path().join("meshes").join(".").join("hand.stl");
        assert_eq!(
            geometry_name(&mesh, [0.0; 3], [0.0; 3], [1.0; 3]),
            geometry_name(&dotted, [0.0; 3], [0.0; 3], [1.0; 3])
        );
    }

    #[test]
    fn rescaled_mesh_is_not_served_from_the_unscaled_entry() {
        use foam_types::{CacheKey, Sphere, Vec3};

        let dir = tempfile::tempdir().unwrap();
        let mesh = dir.path().join("link.obj");
        std::fs::write(&mesh, "v 0 0 0\n").unwrap();
        let method = SpherizationMethod::default();

        let cache = ResultCache::in_memory();
        let unscaled = geometry_name(&mesh, [0.0; 3], [0.0; 3], [1.0; 3]);
        let level = SphereLevel::new(vec![Sphere::new(Vec3::zero(), 1.0)], 0.1, 0.1, 0.1);
        cache.insert(&CacheKey::new(unscaled.clone(), 8, 1), level);

        let pipeline = SpherizationPipeline::new(Arc::new(ToolInvoker::new(Default::default())));
        let service = SpherizationService::new(pipeline, cache, Default::default()).unwrap();
        assert!(service.cache().exists(&SpherizationService::key_for(&unscaled, &method)));

        let scaled = geometry_name(&mesh, [0.0; 3], [0.0; 3], [2.0; 3]);
        assert!(!service.cache().exists(&SpherizationService::key_for(&scaled, &method)));
        assert!(collect_levels(&service, &scaled, &method).is_err());
    }

    #[test]
    fn collect_levels_reads_cached_depths() {
        use foam_types::{CacheKey, Sphere, Vec3};

        let pipeline = SpherizationPipeline::new(Arc::new(ToolInvoker::new(Default::default())));
        let cache = ResultCache::in_memory();
        for depth in 0..2 {
            let level = SphereLevel::new(vec![Sphere::new(Vec3::zero(), 1.0)], 0.1, 0.1, 0.1);
            cache.insert(&CacheKey::new("link", 8, depth), level);
        }
        let service = SpherizationService::new(pipeline, cache, Default::default()).unwrap();
        let method = SpherizationMethod::default().with_depth(3);
        let levels = collect_levels(&service, "link", &method).unwrap();
        assert_eq!(levels.len(), 2);
        assert!(collect_levels(&service, "other", &method).is_err());
    }
}
