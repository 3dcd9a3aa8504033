//! Drives the external executables against a mesh.
//!
//! Every call owns a private scratch directory (a [`tempfile::TempDir`])
//! holding the serialized input mesh and whatever the tool writes next to it.
//! The directory is removed when the call returns, on success and on every
//! error path.
//!
//! Failure is surfaced as typed errors:
//!
//! - non-zero exit (or death by signal) → [`FoamError::ToolExecution`] with
//!   the captured output;
//! - zero exit without the expected output file → [`FoamError::MissingOutput`];
//! - an unreadable result file → [`FoamError::MalformedResult`] from the
//!   parser.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use foam_geometry::TriMesh;
use foam_types::{FoamError, Result, SpherizationResult, Vec3};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::parser::parse_result_file;
use crate::runner::{ProcessRunner, ToolOutput, ToolRunner};
use crate::tools::{MANIFOLD_TOOL, RepairParams, SIMPLIFY_TOOL, SpherizationMethod};

const INPUT_FILE: &str = "mesh.obj";

// ─────────────────────────────────────────────────────────────────────────────
// ToolConfig
// ─────────────────────────────────────────────────────────────────────────────

/// Where the executables live and how long they may run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Directory containing the executables.  Empty means "search `PATH`".
    pub tool_dir: PathBuf,
    /// Kill a tool that runs longer than this.  `None` waits indefinitely.
    pub timeout_secs: Option<u64>,
}

impl ToolConfig {
    pub fn new(tool_dir: impl Into<PathBuf>) -> Self {
        Self {
            tool_dir: tool_dir.into(),
            timeout_secs: None,
        }
    }

    /// Full path of executable `name`.
    pub fn program(&self, name: &str) -> PathBuf {
        if self.tool_dir.as_os_str().is_empty() {
            PathBuf::from(name)
        } else {
            self.tool_dir.join(name)
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ToolInvoker
// ─────────────────────────────────────────────────────────────────────────────

/// Runs the fitting, manifold and simplification executables.
#[derive(Clone)]
pub struct ToolInvoker {
    config: ToolConfig,
    runner: Arc<dyn ToolRunner>,
}

impl std::fmt::Debug for ToolInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolInvoker")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ToolInvoker {
    /// An invoker that starts real processes.
    pub fn new(config: ToolConfig) -> Self {
        let runner = match config.timeout_secs {
            Some(secs) => ProcessRunner::with_timeout(Duration::from_secs(secs)),
            None => ProcessRunner::new(),
        };
        Self::with_runner(config, Arc::new(runner))
    }

    /// An invoker that runs programs through `runner`.
    pub fn with_runner(config: ToolConfig, runner: Arc<dyn ToolRunner>) -> Self {
        Self { config, runner }
    }

    pub fn config(&self) -> &ToolConfig {
        &self.config
    }

    /// Fit a sphere tree to `mesh` with `method`.
    ///
    /// Sphere centers are reported in `mesh`'s frame: the tool's
    /// origin-centred output is shifted by the midpoint of the mesh bounds.
    pub fn fit(&self, mesh: &TriMesh, method: &SpherizationMethod) -> Result<SpherizationResult> {
        let scratch = scratch_dir()?;
        let input = write_input(&scratch, mesh)?;
        let tool = method.executable();

        self.run_checked(tool, &method.arguments(&input))?;
        let result_path = require_output(tool, method.result_path(&input))?;

        let offset = mesh.bounds().map(|b| b.center()).unwrap_or_else(Vec3::zero);
        let result = parse_result_file(&result_path, offset)?;
        info!(
            tool,
            levels = result.len(),
            finest = result.finest().map_or(0, |l| l.len()),
            "fitted sphere tree"
        );
        Ok(result)
    }

    /// Cheap validity probe: `true` when the fitting tool accepts `mesh` at
    /// depth 0 with verification on.
    ///
    /// Tool failure and missing output mean "not fit-able" and yield
    /// `Ok(false)`; anything else (for example the tool not being startable)
    /// is an error.
    pub fn probe(&self, mesh: &TriMesh, method: &SpherizationMethod) -> Result<bool> {
        let scratch = scratch_dir()?;
        let input = write_input(&scratch, mesh)?;
        let tool = method.executable();

        let outcome = self
            .run_checked(tool, &method.probe_arguments(&input))
            .and_then(|_| require_output(tool, method.result_path(&input)));
        match outcome {
            Ok(_) => Ok(true),
            Err(e @ (FoamError::ToolExecution { .. } | FoamError::MissingOutput { .. })) => {
                debug!(tool, error = %e, "probe rejected mesh");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Manifold reconstruction followed by simplification.  Returns the
    /// repaired mesh; smoothing is left to the caller.
    pub fn repair(&self, mesh: &TriMesh, params: &RepairParams) -> Result<TriMesh> {
        let scratch = scratch_dir()?;
        let input = write_input(&scratch, mesh)?;
        let manifold = scratch.path().join("manifold.obj");
        let simplified = scratch.path().join("simplified.obj");

        self.run_checked(MANIFOLD_TOOL, &params.manifold_arguments(&input, &manifold))?;
        let manifold = require_output(MANIFOLD_TOOL, manifold)?;

        self.run_checked(SIMPLIFY_TOOL, &params.simplify_arguments(&manifold, &simplified))?;
        let simplified = require_output(SIMPLIFY_TOOL, simplified)?;

        let repaired = TriMesh::load(&simplified)?;
        info!(
            faces_before = mesh.face_count(),
            faces_after = repaired.face_count(),
            watertight = repaired.is_watertight(),
            "repaired mesh"
        );
        Ok(repaired)
    }

    fn run_checked(&self, tool: &str, args: &[std::ffi::OsString]) -> Result<ToolOutput> {
        let program = self.config.program(tool);
        let output = self.runner.run(&program, args)?;
        if output.success() {
            Ok(output)
        } else {
            warn!(tool, exit_code = ?output.exit_code, "tool failed");
            Err(FoamError::ToolExecution {
                tool: tool.to_string(),
                exit_code: output.exit_code,
                output: output.output,
            })
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn scratch_dir() -> Result<TempDir> {
    tempfile::Builder::new()
        .prefix("foam-")
        .tempdir()
        .map_err(|e| FoamError::io("creating scratch directory", e))
}

fn write_input(scratch: &TempDir, mesh: &TriMesh) -> Result<PathBuf> {
    let input = scratch.path().join(INPUT_FILE);
    mesh.save_obj(&input)?;
    Ok(input)
}

fn require_output(tool: &str, path: PathBuf) -> Result<PathBuf> {
    if path.is_file() {
        Ok(path)
    } else {
        Err(FoamError::MissingOutput {
            tool: tool.to_string(),
            path,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
