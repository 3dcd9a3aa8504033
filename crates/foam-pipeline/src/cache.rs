//! Persistent store of the best sphere level per key.
//!
//! Entries are keyed by [`CacheKey`] `(mesh_identity, branch_factor, depth)`
//! and hold one [`SphereLevel`].  Insertion is a conditional replace: the
//! entry with the lower `mean_error` wins, so the final state does not depend
//! on insertion order.
//!
//! # Storage layout
//!
//! The backing store is a single JSON document nested by key component:
//!
//! ```json
//! {
//!   "panda_link0": {
//!     "8": {
//!       "1": { "mean": 0.02, "best": 0.01, "worst": 0.05,
//!              "spheres": [ { "origin": [0.0, 0.0, 0.1], "radius": 0.08 } ] }
//!     }
//!   }
//! }
//! ```
//!
//! Branch factor and depth keys are strings on disk and integers in memory.
//! The document is read in full by [`ResultCache::open`] and written in full
//! by [`ResultCache::close`] (or [`flush`][ResultCache::flush]).  Nothing is
//! written implicitly: inserts made after the last flush are lost if the
//! cache is dropped without closing it.
//!
//! # Example
//!
//! ```rust
//! use foam_pipeline::cache::ResultCache;
//! use foam_types::{CacheKey, Sphere, SphereLevel, Vec3};
//!
//! let cache = ResultCache::in_memory();
//! let key = CacheKey::new("link", 8, 1);
//! let level = SphereLevel::new(vec![Sphere::new(Vec3::zero(), 0.5)], 0.1, 0.05, 0.2);
//!
//! cache.insert(&key, level.clone());
//! assert!(cache.exists(&key));
//! assert_eq!(cache.get(&key).unwrap(), level);
//! ```

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use foam_types::{CacheKey, FoamError, Result, SphereLevel};
use tracing::{debug, info, warn};

/// `mesh_identity -> branch_factor -> depth -> level`
type Store = BTreeMap<String, BTreeMap<u32, BTreeMap<u32, SphereLevel>>>;

// ─────────────────────────────────────────────────────────────────────────────
// ResultCache
// ─────────────────────────────────────────────────────────────────────────────

/// Thread-safe, optionally file-backed map from [`CacheKey`] to the best
/// [`SphereLevel`] seen for it.
#[derive(Debug)]
pub struct ResultCache {
    path: Option<PathBuf>,
    entries: Mutex<Store>,
    dirty: AtomicBool,
}

impl ResultCache {
    /// A cache that is never persisted.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: Mutex::new(Store::new()),
            dirty: AtomicBool::new(false),
        }
    }

    /// Load the store at `path`.
    ///
    /// A missing file yields an empty cache.  A file that exists but cannot
    /// be parsed is [`FoamError::CorruptCache`].
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str::<Store>(&text).map_err(|e| FoamError::CorruptCache {
                path: path.clone(),
                reason: e.to_string(),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no cache store yet, starting empty");
                Store::new()
            }
            Err(e) => return Err(FoamError::io(format!("reading {}", path.display()), e)),
        };

        let cache = Self {
            path: Some(path),
            entries: Mutex::new(entries),
            dirty: AtomicBool::new(false),
        };
        info!(entries = cache.len(), "opened sphere cache");
        Ok(cache)
    }

    /// Backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn exists(&self, key: &CacheKey) -> bool {
        lookup(&self.lock(), key).is_some()
    }

    /// The stored level for `key`, or [`FoamError::NotFound`].
    pub fn get(&self, key: &CacheKey) -> Result<SphereLevel> {
        lookup(&self.lock(), key)
            .cloned()
            .ok_or_else(|| FoamError::NotFound(key.clone()))
    }

    /// Store `candidate` under `key` unless an entry with a lower or equal
    /// `mean_error` is already there.  Returns `true` when `candidate` was
    /// stored.
    ///
    /// Levels holding a NaN or infinite value are never stored; JSON cannot
    /// represent them.
    pub fn insert(&self, key: &CacheKey, candidate: SphereLevel) -> bool {
        if !candidate.is_finite() {
            warn!(%key, mean = candidate.mean_error, "refusing non-finite sphere level");
            return false;
        }
        let mut entries = self.lock();
        let slot = entries
            .entry(key.mesh_identity.clone())
            .or_default()
            .entry(key.branch_factor)
            .or_default();

        let stored = match slot.get(&key.depth) {
            Some(existing) if !candidate.is_better_than(existing) => false,
            _ => {
                slot.insert(key.depth, candidate);
                true
            }
        };
        if stored {
            self.dirty.store(true, Ordering::SeqCst);
            debug!(%key, "cache entry updated");
        }
        stored
    }

    /// All keys, in `(mesh_identity, branch_factor, depth)` order.
    pub fn keys(&self) -> Vec<CacheKey> {
        self.lock()
            .iter()
            .flat_map(|(name, branches)| {
                branches.iter().flat_map(move |(&branch, depths)| {
                    depths
                        .keys()
                        .map(move |&depth| CacheKey::new(name.clone(), branch, depth))
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock()
            .values()
            .flat_map(|branches| branches.values())
            .map(BTreeMap::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether there are inserts not yet written to the backing store.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    /// Write the whole map to the backing store, replacing it atomically.
    /// A no-op for an in-memory cache.
    pub fn flush(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let entries = self.lock();
        let json = serde_json::to_string_pretty(&*entries)
            .map_err(|e| FoamError::io("serialising cache", std::io::Error::other(e)))?;
        write_atomically(path, json.as_bytes())?;
        self.dirty.store(false, Ordering::SeqCst);
        info!(path = %path.display(), "sphere cache written");
        Ok(())
    }

    /// Flush and release the cache.
    pub fn close(self) -> Result<()> {
        self.flush()
    }

    fn lock(&self) -> MutexGuard<'_, Store> {
        // Every mutation completes inside one critical section, so a
        // poisoned map is still consistent.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for ResultCache {
    fn drop(&mut self) {
        if self.path.is_some() && self.is_dirty() {
            warn!(
                path = ?self.path,
                "sphere cache dropped with unflushed entries; call close() to persist them"
            );
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn lookup<'a>(entries: &'a Store, key: &CacheKey) -> Option<&'a SphereLevel> {
    entries
        .get(&key.mesh_identity)?
        .get(&key.branch_factor)?
        .get(&key.depth)
}

/// Write to a sibling temporary file, then rename it over `path`.
fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|e| FoamError::io(format!("creating {}", dir.display()), e))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| FoamError::io(format!("creating temporary file in {}", dir.display()), e))?;
    tmp.write_all(bytes)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| FoamError::io(format!("writing {}", tmp.path().display()), e))?;
    tmp.persist(path)
        .map_err(|e| FoamError::io(format!("replacing {}", path.display()), e.error))?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
