//! Process execution seam.
//!
//! [`ToolRunner`] is the single point where the crate starts an external
//! program.  [`ProcessRunner`] is the real implementation; tests substitute a
//! runner that writes the files a tool would have written.

use std::ffi::OsString;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use foam_types::{FoamError, Result};
use tracing::{debug, warn};

/// Captured result of one program run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code, or `None` when the process was terminated by a signal
    /// (including a timeout kill).
    pub exit_code: Option<i32>,
    /// Combined stdout followed by stderr.
    pub output: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs an external program to completion.
///
/// Implementations return `Err` only when the program could not be run at
/// all; a program that ran and failed is an `Ok` with a non-zero exit code.
pub trait ToolRunner: Send + Sync {
    fn run(&self, program: &Path, args: &[OsString]) -> Result<ToolOutput>;
}

// ─────────────────────────────────────────────────────────────────────────────
// ProcessRunner
// ─────────────────────────────────────────────────────────────────────────────

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Runs programs with [`std::process::Command`].
///
/// Output streams are redirected to anonymous temporary files, so a chatty
/// tool can never block on a full pipe.  With a timeout set, a process that
/// outlives it is killed and reported with `exit_code: None`.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    timeout: Option<Duration>,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

impl ToolRunner for ProcessRunner {
    fn run(&self, program: &Path, args: &[OsString]) -> Result<ToolOutput> {
        let name = program.display().to_string();
        let context = |what: &str| format!("{what} {name}");

        let mut stdout = tempfile::tempfile().map_err(|e| FoamError::io(context("capturing"), e))?;
        let mut stderr = tempfile::tempfile().map_err(|e| FoamError::io(context("capturing"), e))?;

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(stdout.try_clone().map_err(|e| FoamError::io(context("capturing"), e))?)
            .stderr(stderr.try_clone().map_err(|e| FoamError::io(context("capturing"), e))?);

        debug!(program = %name, args = ?args, "spawning tool");
        let started = Instant::now();
        let mut child = command
            .spawn()
            .map_err(|e| FoamError::io(context("spawning"), e))?;

        let status = loop {
            if let Some(status) = child
                .try_wait()
                .map_err(|e| FoamError::io(context("waiting for"), e))?
            {
                break Some(status);
            }
            if self.timeout.is_some_and(|t| started.elapsed() >= t) {
                warn!(program = %name, elapsed = ?started.elapsed(), "tool timed out, killing");
                // The process may have exited between try_wait and kill.
                let _ = child.kill();
                let _ = child.wait();
                break None;
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        let mut output = read_captured(&mut stdout).map_err(|e| FoamError::io(context("reading output of"), e))?;
        output.push_str(
            &read_captured(&mut stderr).map_err(|e| FoamError::io(context("reading output of"), e))?,
        );

        let exit_code = status.and_then(|s| s.code());
        debug!(program = %name, ?exit_code, elapsed = ?started.elapsed(), "tool finished");
        Ok(ToolOutput { exit_code, output })
    }
}

fn read_captured(file: &mut File) -> std::io::Result<String> {
    file.seek(SeekFrom::Start(0))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
