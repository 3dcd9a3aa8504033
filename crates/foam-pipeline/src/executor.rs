//! Named background tasks on a bounded worker pool.
//!
//! [`TaskExecutor`] owns a Tokio runtime whose blocking pool is capped at
//! [`ExecutorConfig::workers`] threads.  Work functions are synchronous and
//! spend most of their time waiting on child processes, so each one runs on
//! the blocking pool via `spawn_blocking`.
//!
//! A task name is *pending* from [`submit`][TaskExecutor::submit] until its
//! result is taken with [`get`][TaskExecutor::get] or
//! [`wait_all`][TaskExecutor::wait_all].  While a name is pending, a second
//! submission under it is rejected with [`FoamError::DuplicateTask`] and the
//! work function is not run, so at most one computation per name is ever in
//! flight.
//!
//! `get` and `wait_all` block the calling thread and must not be called from
//! inside an async context.
//!
//! # Example
//!
//! ```rust
//! use foam_pipeline::executor::{ExecutorConfig, TaskExecutor};
//!
//! let executor: TaskExecutor<u32> = TaskExecutor::new(ExecutorConfig { workers: 2 }).unwrap();
//! executor.submit("answer", || Ok(42)).unwrap();
//! assert_eq!(executor.get("answer").unwrap(), 42);
//! ```

use std::collections::HashMap;
use std::sync::Mutex;

use foam_types::{FoamError, Result, SpherizationResult};
use serde::{Deserialize, Serialize};
use tokio::runtime::{Builder, Runtime};
use tokio::task::JoinHandle;
use tracing::{debug, error};

// ─────────────────────────────────────────────────────────────────────────────
// ExecutorConfig
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Maximum number of work functions running at once.
    pub workers: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { workers: 8 }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// TaskExecutor
// ─────────────────────────────────────────────────────────────────────────────

/// Runs named work functions concurrently and hands their results back by
/// name.
pub struct TaskExecutor<T: Send + 'static = SpherizationResult> {
    runtime: Runtime,
    pending: Mutex<HashMap<String, JoinHandle<Result<T>>>>,
}

impl<T: Send + 'static> TaskExecutor<T> {
    pub fn new(config: ExecutorConfig) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(config.workers.max(1))
            .thread_name("foam-worker")
            .build()
            .map_err(|e| FoamError::io("starting worker pool", e))?;
        Ok(Self {
            runtime,
            pending: Mutex::new(HashMap::new()),
        })
    }

    /// Start `work` in the background under `name`.
    ///
    /// Returns immediately.  Fails with [`FoamError::DuplicateTask`] when
    /// `name` is already pending; the earlier task is unaffected.
    pub fn submit<F>(&self, name: impl Into<String>, work: F) -> Result<()>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let name = name.into();
        let mut pending = self.lock();
        if pending.contains_key(&name) {
            debug!(task = %name, "rejecting duplicate submission");
            return Err(FoamError::DuplicateTask(name));
        }
        debug!(task = %name, "submitting task");
        let handle = self.runtime.spawn_blocking(work);
        pending.insert(name, handle);
        Ok(())
    }

    /// Whether `name` has been submitted and not yet retrieved.
    pub fn is_pending(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    /// Names of all pending tasks, sorted.
    pub fn pending_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Block until the task `name` completes and take its result.
    ///
    /// The work function's own error is returned unchanged.  A panic in the
    /// work function becomes [`FoamError::TaskPanicked`].  A name that is not
    /// pending (never submitted, or already retrieved) is
    /// [`FoamError::UnknownTask`].
    pub fn get(&self, name: &str) -> Result<T> {
        let handle = self
            .lock()
            .remove(name)
            .ok_or_else(|| FoamError::UnknownTask(name.to_string()))?;
        self.join(name, handle)
    }

    /// Block until every pending task completes and take all results,
    /// sorted by task name.
    pub fn wait_all(&self) -> Vec<(String, Result<T>)> {
        let mut drained: Vec<(String, JoinHandle<Result<T>>)> = self.lock().drain().collect();
        drained.sort_by(|a, b| a.0.cmp(&b.0));
        drained
            .into_iter()
            .map(|(name, handle)| {
                let result = self.join(&name, handle);
                (name, result)
            })
            .collect()
    }

    fn join(&self, name: &str, handle: JoinHandle<Result<T>>) -> Result<T> {
        match self.runtime.block_on(handle) {
            Ok(result) => result,
            Err(join_error) => {
                error!(task = %name, error = %join_error, "task did not complete");
                Err(FoamError::TaskPanicked(name.to_string()))
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, JoinHandle<Result<T>>>> {
        // A poisoned map is still structurally valid.
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<T: Send + 'static> std::fmt::Debug for TaskExecutor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskExecutor")
            .field("pending", &self.pending_names())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    fn executor(workers: usize) -> TaskExecutor<usize> {
        TaskExecutor::new(ExecutorConfig { workers }).unwrap()
    }

    #[test]
    fn duplicate_name_does_not_run_work_twice() {
        let exec = executor(4);
        let runs = Arc::new(AtomicUsize::new(0));
        let (release, gate) = mpsc::channel::<()>();

        let counter = runs.clone();
        exec.submit("link", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            gate.recv().ok();
            Ok(1)
        })
        .unwrap();

        let counter = runs.clone();
        let err = exec
            .submit("link", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(2)
            })
            .unwrap_err();
        assert!(matches!(err, FoamError::DuplicateTask(ref n) if n == "link"));

        release.send(()).unwrap();
        assert_eq!(exec.get("link").unwrap(), 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn name_can_be_reused_after_retrieval() {
        let exec = executor(2);
        exec.submit("a", || Ok(1)).unwrap();
        assert_eq!(exec.get("a").unwrap(), 1);
        exec.submit("a", || Ok(2)).unwrap();
        assert_eq!(exec.get("a").unwrap(), 2);
    }

    #[test]
    fn get_consumes_the_result() {
        let exec = executor(2);
        exec.submit("once", || Ok(7)).unwrap();
        assert!(exec.is_pending("once"));
        assert_eq!(exec.get("once").unwrap(), 7);
        assert!(!exec.is_pending("once"));
        assert!(matches!(exec.get("once"), Err(FoamError::UnknownTask(_))));
    }

    #[test]
    fn unknown_name_is_an_error() {
        assert_eq!(executor(1).get("missing").unwrap_err().kind(), "unknown_task");
    }

    #[test]
    fn work_errors_are_returned_unchanged() {
        let exec = executor(2);
        exec.submit("bad", || {
            Err(FoamError::UnprocessableMesh {
                reason: "rejected".into(),
            })
        })
        .unwrap();
        let err = exec.get("bad").unwrap_err();
        assert_eq!(err.kind(), "unprocessable_mesh");
    }

    #[test]
    fn panicking_work_is_reported_by_name() {
        let exec = executor(2);
        exec.submit("boom", || -> Result<usize> { panic!("worker exploded") })
            .unwrap();
        assert!(matches!(exec.get("boom"), Err(FoamError::TaskPanicked(ref n)) if n == "boom"));
    }

    #[test]
    fn concurrency_is_bounded_by_worker_count() {
        let exec = executor(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for i in 0..8 {
            let running = running.clone();
            let peak = peak.clone();
            exec.submit(format!("task-{i}"), move || {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(20));
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(i)
            })
            .unwrap();
        }

        let results = exec.wait_all();
        assert_eq!(results.len(), 8);
        assert!(results.iter().all(|(_, r)| r.is_ok()));
        assert!(peak.load(Ordering::SeqCst) <= 2, "peak {}", peak.load(Ordering::SeqCst));
        assert!(exec.pending_names().is_empty());
    }

    #[test]
    fn wait_all_returns_results_sorted_by_name() {
        let exec = executor(3);
        for name in ["c", "a", "b"] {
            exec.submit(name, move || Ok(name.len())).unwrap();
        }
        let names: Vec<String> = exec.wait_all().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }
}
