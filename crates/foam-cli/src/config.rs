//! Configuration Vault – reads/writes `~/.foam/config.toml`.

use foam_external::{RepairParams, ToolConfig};
use foam_pipeline::{ExecutorConfig, ServiceConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Persisted user configuration stored in `~/.foam/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding `makeTree*`, `manifold` and `simplify`.  Empty means
    /// the executables are looked up on `PATH`.
    #[serde(default)]
    pub tool_dir: PathBuf,

    /// Kill an external tool after this many seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_timeout_secs: Option<u64>,

    /// JSON sphere cache.
    #[serde(default = "default_cache_path")]
    pub cache_path: PathBuf,

    /// Spherizations running at once.
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// Octree leaf budget for manifold reconstruction.
    #[serde(default = "default_manifold_leaves")]
    pub manifold_leaves: u32,

    /// Face ratio kept by simplification.
    #[serde(default = "default_simplify_ratio")]
    pub simplify_ratio: f64,

    #[serde(default = "default_smoothing_iterations")]
    pub smoothing_iterations: usize,
}

fn default_cache_path() -> PathBuf {
    foam_dir_for_home(&home_dir()).join("spheres.json")
}
fn default_threads() -> usize {
    8
}
fn default_manifold_leaves() -> u32 {
    RepairParams::default().manifold_leaves
}
fn default_simplify_ratio() -> f64 {
    RepairParams::default().simplify_ratio
}
fn default_smoothing_iterations() -> usize {
    RepairParams::default().smoothing_iterations
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tool_dir: PathBuf::new(),
            tool_timeout_secs: None,
            cache_path: default_cache_path(),
            threads: default_threads(),
            manifold_leaves: default_manifold_leaves(),
            simplify_ratio: default_simplify_ratio(),
            smoothing_iterations: default_smoothing_iterations(),
        }
    }
}

impl Config {
    pub fn tool_config(&self) -> ToolConfig {
        ToolConfig {
            tool_dir: self.tool_dir.clone(),
            timeout_secs: self.tool_timeout_secs,
        }
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            executor: ExecutorConfig {
                workers: self.threads,
            },
            repair: RepairParams {
                manifold_leaves: self.manifold_leaves,
                simplify_ratio: self.simplify_ratio,
                smoothing_iterations: self.smoothing_iterations,
            },
        }
    }
}

fn home_dir() -> String {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string())
}

fn foam_dir_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".foam")
}

/// Return the path to `~/.foam/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(&home_dir())
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    foam_dir_for_home(home).join("config.toml")
}

/// Load the config from disk, falling back to defaults when the file does
/// not exist.  Environment overrides are applied either way.
pub fn load() -> Result<Config, String> {
    let mut cfg = load_from(&config_path())?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Load the config from a specific path.  Returns `None` if the file does
/// not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config = toml::from_str(&raw)
        .map_err(|e| format!("Failed to parse config at {}: {}", path.display(), e))?;
    Ok(Some(cfg))
}

/// Apply `FOAM_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `FOAM_TOOL_DIR` | `tool_dir` |
/// | `FOAM_CACHE_PATH` | `cache_path` |
/// | `FOAM_THREADS` | `threads` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("FOAM_TOOL_DIR") {
        cfg.tool_dir = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("FOAM_CACHE_PATH") {
        cfg.cache_path = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("FOAM_THREADS")
        && let Ok(n) = v.parse::<usize>()
        && n > 0
    {
        cfg.threads = n;
    }
}

/// Save the config to disk, creating `~/.foam/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

/// Save the config to a specific path.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))
}
