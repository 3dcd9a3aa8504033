//! Single-mesh spherization with bounded repair.
//!
//! [`SpherizationPipeline::run`] is a small state machine over one mesh:
//!
//! ```text
//!   place ──► probe ──ok──────────────────────► fit ──ok──► un-offset ──► result
//!               │                                │
//!             invalid                        recoverable error
//!               ▼                                ▼
//!            repair ──► probe ──invalid──► UnprocessableMesh
//!                         │                   repair ──► fit ──err──► ProcessingFailed
//!                         ok ──► fit
//! ```
//!
//! At most one repair precedes validation and at most one repair-and-retry
//! follows a failed fit; there is no loop.  Only errors for which
//! [`FoamError::is_recoverable`] holds trigger the retry, everything else
//! propagates unchanged.  A recoverable failure of the repair tools themselves
//! ends the run as `UnprocessableMesh` before the fit and as
//! `ProcessingFailed` during the retry.

use std::sync::Arc;

use foam_external::{RepairParams, SpherizationMethod, ToolInvoker};
use foam_geometry::{Placement, TriMesh};
use foam_types::{FoamError, Result, SpherizationResult};
use tracing::{debug, info, info_span, warn};

/// Humphrey filter weight towards the original positions.
const SMOOTHING_ALPHA: f64 = 0.1;
/// Humphrey filter weight towards the previous iteration.
const SMOOTHING_BETA: f64 = 0.5;

// ─────────────────────────────────────────────────────────────────────────────
// SphereTools
// ─────────────────────────────────────────────────────────────────────────────

/// The external operations the pipeline orchestrates.
///
/// [`ToolInvoker`] is the production implementation.
pub trait SphereTools: Send + Sync {
    /// `true` when `mesh` is acceptable input for `method`.
    fn probe(&self, mesh: &TriMesh, method: &SpherizationMethod) -> Result<bool>;

    /// Fit a sphere tree.  Centers are in `mesh`'s frame.
    fn fit(&self, mesh: &TriMesh, method: &SpherizationMethod) -> Result<SpherizationResult>;

    /// Manifold reconstruction plus simplification.
    fn repair(&self, mesh: &TriMesh, params: &RepairParams) -> Result<TriMesh>;
}

impl SphereTools for ToolInvoker {
    fn probe(&self, mesh: &TriMesh, method: &SpherizationMethod) -> Result<bool> {
        ToolInvoker::probe(self, mesh, method)
    }

    fn fit(&self, mesh: &TriMesh, method: &SpherizationMethod) -> Result<SpherizationResult> {
        ToolInvoker::fit(self, mesh, method)
    }

    fn repair(&self, mesh: &TriMesh, params: &RepairParams) -> Result<TriMesh> {
        ToolInvoker::repair(self, mesh, params)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SpherizationPipeline
// ─────────────────────────────────────────────────────────────────────────────

/// Validates, repairs and fits one mesh.  Cheap to clone; clones share the
/// underlying tools.
#[derive(Clone)]
pub struct SpherizationPipeline {
    tools: Arc<dyn SphereTools>,
}

impl SpherizationPipeline {
    pub fn new(tools: Arc<dyn SphereTools>) -> Self {
        Self { tools }
    }

    /// Spherize `mesh` placed by `placement`.
    ///
    /// The caller's mesh is never modified.  Sphere centers in the result are
    /// in the placed mesh's frame.
    pub fn run(
        &self,
        mesh: &TriMesh,
        placement: &Placement,
        method: &SpherizationMethod,
        repair: &RepairParams,
    ) -> Result<SpherizationResult> {
        let span = info_span!(
            "pipeline",
            method = method.name(),
            branch = method.branch(),
            depth = method.depth()
        );
        let _enter = span.enter();

        // ── Transform ────────────────────────────────────────────────────────
        let placed = mesh.placed(placement);
        let center = placed
            .bounds()
            .map(|b| b.center())
            .ok_or_else(|| FoamError::UnprocessableMesh {
                reason: "mesh has no vertices".to_string(),
            })?;
        let mut working = placed.translated(center.scale(-1.0));
        debug!(
            vertices = working.vertex_count(),
            faces = working.face_count(),
            watertight = working.is_watertight(),
            "placed mesh"
        );

        // ── Validate ─────────────────────────────────────────────────────────
        if !self.tools.probe(&working, method)? {
            info!("mesh rejected by probe, repairing");
            working = self.repair(&working, repair).map_err(|e| {
                if e.is_recoverable() {
                    FoamError::UnprocessableMesh {
                        reason: format!("repair failed: {e}"),
                    }
                } else {
                    e
                }
            })?;
            if !self.tools.probe(&working, method)? {
                warn!("mesh still invalid after repair");
                return Err(FoamError::UnprocessableMesh {
                    reason: format!("{} rejected the repaired mesh", method.executable()),
                });
            }
        }

        // ── Fit, with one repair-and-retry ───────────────────────────────────
        let result = match self.tools.fit(&working, method) {
            Ok(result) => result,
            Err(first) if first.is_recoverable() => {
                warn!(error = %first, kind = first.kind(), "fit failed, repairing and retrying once");
                let retried = self
                    .repair(&working, repair)
                    .and_then(|repaired| self.tools.fit(&repaired, method));
                match retried {
                    Ok(result) => result,
                    Err(second) if second.is_recoverable() => {
                        return Err(FoamError::ProcessingFailed {
                            source: Box::new(second),
                        });
                    }
                    Err(other) => return Err(other),
                }
            }
            Err(other) => return Err(other),
        };

        // ── Un-offset ────────────────────────────────────────────────────────
        info!(levels = result.len(), "spherization complete");
        Ok(result.translated(center))
    }

    fn repair(&self, mesh: &TriMesh, params: &RepairParams) -> Result<TriMesh> {
        let repaired = self.tools.repair(mesh, params)?;
        Ok(repaired.smoothed(params.smoothing_iterations, SMOOTHING_ALPHA, SMOOTHING_BETA))
    }
}

impl std::fmt::Debug for SpherizationPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpherizationPipeline").finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
