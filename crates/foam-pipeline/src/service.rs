//! Cached, concurrent spherization.
//!
//! [`SpherizationService`] composes a [`TaskExecutor`] and a [`ResultCache`]
//! into a two-phase API:
//!
//! 1. [`request`][SpherizationService::request] schedules a pipeline run in
//!    the background unless the result is already cached.
//! 2. [`resolve`][SpherizationService::resolve] returns the cached level, or
//!    blocks on the scheduled run and (optionally) caches every level it
//!    produced.
//!
//! Callers fan out many requests before resolving any of them.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use foam_external::{SpherizationMethod, ToolConfig, ToolInvoker};
//! use foam_geometry::{Placement, TriMesh};
//! use foam_pipeline::{ResultCache, ServiceConfig, SpherizationPipeline, SpherizationService};
//!
//! let pipeline = SpherizationPipeline::new(Arc::new(ToolInvoker::new(ToolConfig::default())));
//! let cache = ResultCache::open("spheres.json").unwrap();
//! let service = SpherizationService::new(pipeline, cache, ServiceConfig::default()).unwrap();
//!
//! let method = SpherizationMethod::default();
//! let mesh = TriMesh::load("link.obj".as_ref()).unwrap();
//! service.request("link", mesh, Placement::identity(), method).unwrap();
//!
//! let key = SpherizationService::key_for("link", &method);
//! let level = service.resolve("link", &key, true).unwrap();
//! println!("{} spheres", level.len());
//! service.close().unwrap();
//! ```

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use foam_external::{RepairParams, SpherizationMethod};
use foam_geometry::{Placement, TriMesh};
use foam_types::{CacheKey, FoamError, Result, SphereLevel, SpherizationResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn};

use crate::cache::ResultCache;
use crate::executor::{ExecutorConfig, TaskExecutor};
use crate::pipeline::SpherizationPipeline;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub executor: ExecutorConfig,
    pub repair: RepairParams,
}

/// What [`SpherizationService::request`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// The key was already cached; nothing was scheduled.
    Cached,
    /// A pipeline run was started under the task name.
    Scheduled,
}

// ─────────────────────────────────────────────────────────────────────────────
// SpherizationService
// ─────────────────────────────────────────────────────────────────────────────

pub struct SpherizationService {
    pipeline: SpherizationPipeline,
    executor: TaskExecutor<SpherizationResult>,
    cache: ResultCache,
    repair: RepairParams,
    /// Cache key of every scheduled, unresolved task.
    scheduled: Mutex<HashMap<String, CacheKey>>,
}

impl SpherizationService {
    pub fn new(pipeline: SpherizationPipeline, cache: ResultCache, config: ServiceConfig) -> Result<Self> {
        Ok(Self {
            pipeline,
            executor: TaskExecutor::new(config.executor)?,
            cache,
            repair: config.repair,
            scheduled: Mutex::new(HashMap::new()),
        })
    }

    /// Cache key for mesh `name` spherized with `method`.
    ///
    /// The name alone identifies the mesh: reusing a name for different
    /// geometry serves the earlier geometry's spheres.
    pub fn key_for(name: &str, method: &SpherizationMethod) -> CacheKey {
        CacheKey::new(name, method.branch(), method.depth())
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Schedule spherization of `mesh` under task `name`, unless
    /// `(name, branch, depth)` is already cached.
    ///
    /// Fails with [`FoamError::DuplicateTask`] when `name` is already
    /// scheduled and not yet resolved.
    pub fn request(
        &self,
        name: &str,
        mesh: TriMesh,
        placement: Placement,
        method: SpherizationMethod,
    ) -> Result<RequestOutcome> {
        let key = Self::key_for(name, &method);
        if self.cache.exists(&key) {
            debug!(%key, "cache hit, not scheduling");
            return Ok(RequestOutcome::Cached);
        }

        let pipeline = self.pipeline.clone();
        let repair = self.repair;
        let task = name.to_string();
        let mut scheduled = self.scheduled_lock();
        self.executor.submit(name, move || {
            let span = info_span!("spherize", task = %task);
            let _enter = span.enter();
            pipeline.run(&mesh, &placement, &method, &repair)
        })?;
        info!(%key, "scheduled spherization");
        scheduled.insert(name.to_string(), key);
        Ok(RequestOutcome::Scheduled)
    }

    /// The level for `key`, from the cache or from the task `name`.
    ///
    /// When the task is consulted, its error is returned unchanged.  With
    /// `cache_on_success`, every level the task produced is inserted under
    /// `key` with that level's depth.
    pub fn resolve(&self, name: &str, key: &CacheKey, cache_on_success: bool) -> Result<SphereLevel> {
        if let Ok(level) = self.cache.get(key) {
            return Ok(level);
        }
        let result = self.take(name, key, cache_on_success)?;
        let depth = key.depth as usize;
        result
            .level(depth)
            .cloned()
            .ok_or_else(|| FoamError::NotFound(key.clone()))
    }

    /// Like [`resolve`][Self::resolve], but returns the deepest level the
    /// task produced, which may be shallower than `key.depth` when the tool
    /// stopped early.
    pub fn resolve_finest(&self, name: &str, key: &CacheKey) -> Result<SphereLevel> {
        if let Ok(level) = self.cache.get(key) {
            return Ok(level);
        }
        let result = self.take(name, key, true)?;
        result
            .finest()
            .cloned()
            .ok_or_else(|| FoamError::NotFound(key.clone()))
    }

    /// Request and resolve in one blocking call, caching the result.
    pub fn spherize(
        &self,
        name: &str,
        mesh: TriMesh,
        placement: Placement,
        method: SpherizationMethod,
    ) -> Result<SphereLevel> {
        self.request(name, mesh, placement, method)?;
        self.resolve_finest(name, &Self::key_for(name, &method))
    }

    /// Wait for outstanding tasks, cache what they produced, and persist the
    /// cache.  Failures of tasks nobody resolved are logged, not returned.
    pub fn close(self) -> Result<()> {
        for (name, outcome) in self.executor.wait_all() {
            let key = self.scheduled_lock().remove(&name);
            match (outcome, key) {
                (Ok(result), Some(key)) => self.insert_levels(&key, &result),
                (Ok(_), None) => {}
                (Err(e), _) => {
                    warn!(task = %name, kind = e.kind(), error = %e, "unresolved task failed")
                }
            }
        }
        self.cache.close()
    }

    fn take(&self, name: &str, key: &CacheKey, cache_on_success: bool) -> Result<SpherizationResult> {
        self.scheduled_lock().remove(name);
        let result = self.executor.get(name)?;
        if cache_on_success {
            self.insert_levels(key, &result);
        }
        Ok(result)
    }

    fn insert_levels(&self, key: &CacheKey, result: &SpherizationResult) {
        for (depth, level) in result.levels().iter().enumerate() {
            self.cache.insert(&key.with_depth(depth as u32), level.clone());
        }
    }

    fn scheduled_lock(&self) -> MutexGuard<'_, HashMap<String, CacheKey>> {
        self.scheduled.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for SpherizationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpherizationService")
            .field("pending", &self.executor.pending_names())
            .field("cached", &self.cache.len())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::SphereTools;
    use crate::pipeline::tests::cube_at;
    use foam_types::{Sphere, Vec3};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Produces `depth + 1` levels whose error halves with each level.
    #[derive(Default)]
    struct LevelTools {
        fits: AtomicUsize,
        reject: bool,
    }

    impl SphereTools for LevelTools {
        fn probe(&self, _mesh: &TriMesh, _method: &SpherizationMethod) -> Result<bool> {
            Ok(!self.reject)
        }

        fn fit(&self, _mesh: &TriMesh, method: &SpherizationMethod) -> Result<SpherizationResult> {
            self.fits.fetch_add(1, Ordering::SeqCst);
            let levels = (0..=method.depth())
                .map(|d| {
                    let count = method.branch().pow(d) as usize;
                    let spheres = vec![Sphere::new(Vec3::zero(), 1.0 / (d + 1) as f64); count];
                    let err = 0.4 / 2f64.powi(d as i32);
                    SphereLevel::new(spheres, err, err / 2.0, err * 2.0)
                })
                .collect();
            Ok(SpherizationResult::new(levels))
        }

        fn repair(&self, mesh: &TriMesh, _params: &RepairParams) -> Result<TriMesh> {
            Ok(mesh.clone())
        }
    }

    fn service_with(tools: Arc<LevelTools>, cache: ResultCache) -> SpherizationService {
        let config = ServiceConfig {
            executor: ExecutorConfig { workers: 2 },
            repair: RepairParams::default(),
        };
        SpherizationService::new(SpherizationPipeline::new(tools), cache, config).unwrap()
    }

    fn method(branch: u32, depth: u32) -> SpherizationMethod {
        SpherizationMethod::default().with_branch(branch).with_depth(depth)
    }

    fn mesh() -> TriMesh {
        cube_at(Vec3::new(1.0, 2.0, 3.0))
    }

    #[test]
    fn resolve_caches_every_level() {
        let tools = Arc::new(LevelTools::default());
        let service = service_with(tools.clone(), ResultCache::in_memory());
        let m = method(4, 2);

        let outcome = service.request("link", mesh(), Placement::identity(), m).unwrap();
        assert_eq!(outcome, RequestOutcome::Scheduled);

        let key = SpherizationService::key_for("link", &m);
        let level = service.resolve("link", &key, true).unwrap();
        assert_eq!(level.len(), 16);

        for depth in 0..=2 {
            assert!(service.cache().exists(&key.with_depth(depth)), "depth {depth}");
        }
        assert_eq!(service.cache().get(&key.with_depth(0)).unwrap().len(), 1);
        assert_eq!(tools.fits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cached_request_is_not_scheduled() {
        let tools = Arc::new(LevelTools::default());
        let service = service_with(tools.clone(), ResultCache::in_memory());
        let m = method(8, 1);
        let key = SpherizationService::key_for("link", &m);

        service.request("link", mesh(), Placement::identity(), m).unwrap();
        service.resolve("link", &key, true).unwrap();

        let again = service.request("link", mesh(), Placement::identity(), m).unwrap();
        assert_eq!(again, RequestOutcome::Cached);
        // A shallower request is served by the byproduct level.
        let coarse = service
            .request("link", mesh(), Placement::identity(), m.with_depth(0))
            .unwrap();
        assert_eq!(coarse, RequestOutcome::Cached);
        assert_eq!(service.resolve("link", &key, true).unwrap().len(), 8);
        assert_eq!(tools.fits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn resolve_without_caching_leaves_cache_empty() {
        let service = service_with(Arc::new(LevelTools::default()), ResultCache::in_memory());
        let m = method(8, 1);
        service.request("link", mesh(), Placement::identity(), m).unwrap();
        let level = service
            .resolve("link", &SpherizationService::key_for("link", &m), false)
            .unwrap();
        assert_eq!(level.len(), 8);
        assert!(service.cache().is_empty());
    }

    #[test]
    fn duplicate_request_while_pending_is_rejected() {
        let service = service_with(Arc::new(LevelTools::default()), ResultCache::in_memory());
        let m = method(8, 1);
        service.request("link", mesh(), Placement::identity(), m).unwrap();
        let err = service
            .request("link", mesh(), Placement::identity(), m)
            .unwrap_err();
        assert_eq!(err.kind(), "duplicate_task");
        service.close().unwrap();
    }

    #[test]
    fn pipeline_errors_reach_the_resolver_by_kind() {
        let tools = Arc::new(LevelTools {
            reject: true,
            ..Default::default()
        });
        let service = service_with(tools, ResultCache::in_memory());
        let m = method(8, 1);
        service.request("bad_link", mesh(), Placement::identity(), m).unwrap();
        let err = service
            .resolve("bad_link", &SpherizationService::key_for("bad_link", &m), true)
            .unwrap_err();
        assert_eq!(err.kind(), "unprocessable_mesh");
        assert!(service.cache().is_empty());
    }

    #[test]
    fn resolve_without_request_is_unknown_task() {
        let service = service_with(Arc::new(LevelTools::default()), ResultCache::in_memory());
        let key = CacheKey::new("ghost", 8, 1);
        assert_eq!(service.resolve("ghost", &key, true).unwrap_err().kind(), "unknown_task");
    }

    #[test]
    fn spherize_returns_the_finest_level() {
        let service = service_with(Arc::new(LevelTools::default()), ResultCache::in_memory());
        let level = service
            .spherize("link", mesh(), Placement::identity(), method(2, 3))
            .unwrap();
        assert_eq!(level.len(), 8);
        assert_eq!(service.cache().len(), 4);
    }

    #[test]
    fn close_persists_resolved_and_unresolved_work() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spheres.json");
        let m = method(8, 1);

        let service = service_with(Arc::new(LevelTools::default()), ResultCache::open(&path).unwrap());
        service.request("resolved", mesh(), Placement::identity(), m).unwrap();
        service
            .resolve("resolved", &SpherizationService::key_for("resolved", &m), true)
            .unwrap();
        service.request("unresolved", mesh(), Placement::identity(), m).unwrap();
        service.close().unwrap();

        let reopened = ResultCache::open(&path).unwrap();
        assert!(reopened.exists(&CacheKey::new("resolved", 8, 1)));
        assert!(reopened.exists(&CacheKey::new("unresolved", 8, 1)));
        assert!(reopened.exists(&CacheKey::new("unresolved", 8, 0)));
    }
}
