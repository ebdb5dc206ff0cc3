//! Run-scoped cache of fitted pipeline steps.
//!
//! A fitted step is keyed by the step's identity, a fingerprint of its input
//! and its parameters. Both backends are first-writer-wins: once a key holds
//! a value, later puts for the same key are ignored, so concurrent folds that
//! fit the same step on the same input all read the same result.

use std::fmt;
use std::fs;
use std::hash::{BuildHasher, Hasher};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use rustc_hash::FxBuildHasher;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::{NamedTempFile, TempDir};

use crate::config::CacheStorage;
use crate::dataset::FeatureMatrix;
use crate::{Error, Result};

/// Identity of one fitted step.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Step name, e.g. `"standardize"`
    pub step: String,
    /// Fingerprint of the step's input
    pub input_fingerprint: u64,
    /// Canonical rendering of the step's parameters
    pub params: String,
}

impl CacheKey {
    /// Key for `step` fitted on input `input_fingerprint` with `params`.
    pub fn new(step: impl Into<String>, input_fingerprint: u64, params: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            input_fingerprint,
            params: params.into(),
        }
    }

    /// Hex digest used as the storage name.
    #[must_use]
    pub fn digest(&self) -> String {
        format!("{:016x}", trueno::hash_key(&self.to_string()))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:016x}[{}]", self.step, self.input_fingerprint, self.params)
    }
}

/// Storage for serialized fitted steps.
pub trait CacheBackend: Send + Sync {
    /// Stored bytes for `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageFault`] if the entry exists but cannot be read.
    fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>>;

    /// Store `value` unless `key` already has one. Returns whether this call
    /// stored it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageFault`] if the entry cannot be written.
    fn put_if_absent(&self, key: &CacheKey, value: Vec<u8>) -> Result<bool>;

    /// Number of stored entries.
    fn len(&self) -> usize;

    /// True if nothing is stored.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory backend on a concurrent hashmap.
#[derive(Debug, Default)]
pub struct MemoryCacheBackend {
    entries: DashMap<String, Vec<u8>>,
}

impl MemoryCacheBackend {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheBackend for MemoryCacheBackend {
    fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.get(&key.digest()).map(|v| v.value().clone()))
    }

    fn put_if_absent(&self, key: &CacheKey, value: Vec<u8>) -> Result<bool> {
        let mut stored = false;
        self.entries.entry(key.digest()).or_insert_with(|| {
            stored = true;
            value
        });
        Ok(stored)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Backend writing one file per entry into a temporary directory that is
/// removed when the backend is dropped.
#[derive(Debug)]
pub struct DiskCacheBackend {
    dir: TempDir,
}

impl DiskCacheBackend {
    /// Create a fresh temporary cache directory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageFault`] if the directory cannot be created.
    pub fn new() -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("dga-nn-cache-")
            .tempdir()
            .map_err(|e| Error::storage(std::env::temp_dir(), e))?;
        Ok(Self { dir })
    }

    /// Cache directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.path().join(format!("{}.json", key.digest()))
    }
}

impl CacheBackend for DiskCacheBackend {
    fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        let path = self.entry_path(key);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::storage(&path, e)),
        }
    }

    fn put_if_absent(&self, key: &CacheKey, value: Vec<u8>) -> Result<bool> {
        let path = self.entry_path(key);
        let mut staged =
            NamedTempFile::new_in(self.dir.path()).map_err(|e| Error::storage(self.dir.path(), e))?;
        staged
            .write_all(&value)
            .map_err(|e| Error::storage(staged.path(), e))?;
        match staged.persist_noclobber(&path) {
            Ok(_) => Ok(true),
            Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(Error::storage(&path, e.error)),
        }
    }

    fn len(&self) -> usize {
        fs::read_dir(self.dir.path()).map_or(0, |entries| {
            entries
                .filter_map(std::result::Result::ok)
                .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
                .count()
        })
    }
}

/// Fitted-step cache shared by all folds of one cross-validation run.
pub struct FitCache {
    backend: Box<dyn CacheBackend>,
    hash_seed: u64,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl fmt::Debug for FitCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FitCache")
            .field("entries", &self.backend.len())
            .field("hits", &self.hits())
            .field("misses", &self.misses())
            .finish_non_exhaustive()
    }
}

impl FitCache {
    /// Cache over `backend`; `hash_seed` perturbs input fingerprints.
    #[must_use]
    pub fn new(backend: Box<dyn CacheBackend>, hash_seed: u64) -> Self {
        Self {
            backend,
            hash_seed,
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    /// Cache on the configured storage.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageFault`] if the disk cache cannot be created.
    pub fn for_storage(storage: CacheStorage, hash_seed: u64) -> Result<Self> {
        let backend: Box<dyn CacheBackend> = match storage {
            CacheStorage::Disk => Box::new(DiskCacheBackend::new()?),
            CacheStorage::Memory => Box::new(MemoryCacheBackend::new()),
        };
        Ok(Self::new(backend, hash_seed))
    }

    /// Fingerprint of a feature matrix (shape and exact values).
    #[must_use]
    pub fn fingerprint(&self, x: &FeatureMatrix) -> u64 {
        let mut hasher = FxBuildHasher.build_hasher();
        hasher.write_u64(self.hash_seed);
        x.hash_into(&mut hasher);
        hasher.finish()
    }

    /// Return the cached value for `key`, or compute, store and return it.
    ///
    /// When two callers race on one key both may compute, but both return
    /// the value that was stored first.
    ///
    /// # Errors
    ///
    /// Propagates errors from `compute` and from the backend; a cached value
    /// that no longer decodes is a [`Error::SchemaMismatch`].
    pub fn fit_or_load<T, F>(&self, key: &CacheKey, compute: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T>,
    {
        if let Some(bytes) = self.backend.get(key)? {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("cache hit for {key}");
            return decode(key, &bytes);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let value = compute()?;
        let bytes = serde_json::to_vec(&value)?;
        if self.backend.put_if_absent(key, bytes)? {
            tracing::debug!("cached {key}");
            return Ok(value);
        }
        match self.backend.get(key)? {
            Some(winner) => decode(key, &winner),
            None => Ok(value),
        }
    }

    /// Lookups answered from the cache.
    #[must_use]
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }

    /// Lookups that had to compute.
    #[must_use]
    pub fn misses(&self) -> usize {
        self.misses.load(Ordering::Relaxed)
    }

    /// Stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.backend.len()
    }

    /// True if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.backend.is_empty()
    }
}

fn decode<T: DeserializeOwned>(key: &CacheKey, bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| Error::SchemaMismatch(format!("cached entry {key} does not decode: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(step: &str) -> CacheKey {
        CacheKey::new(step, 7, "p=1")
    }

    #[test]
    fn test_memory_first_writer_wins() {
        let backend = MemoryCacheBackend::new();
        assert!(backend.put_if_absent(&key("a"), b"1".to_vec()).unwrap());
        assert!(!backend.put_if_absent(&key("a"), b"2".to_vec()).unwrap());
        assert_eq!(backend.get(&key("a")).unwrap(), Some(b"1".to_vec()));
        assert_eq!(backend.len(), 1);
    }

    #[test]
    fn test_disk_first_writer_wins() {
        let backend = DiskCacheBackend::new().unwrap();
        assert_eq!(backend.get(&key("a")).unwrap(), None);
        assert!(backend.put_if_absent(&key("a"), b"1".to_vec()).unwrap());
        assert!(!backend.put_if_absent(&key("a"), b"2".to_vec()).unwrap());
        assert_eq!(backend.get(&key("a")).unwrap(), Some(b"1".to_vec()));
        assert_eq!(backend.len(), 1);
    }

    #[test]
    fn test_disk_directory_removed_on_drop() {
        let backend = DiskCacheBackend::new().unwrap();
        let path = backend.path().to_path_buf();
        assert!(path.exists());
        drop(backend);
        assert!(!path.exists());
    }

    #[test]
    fn test_fit_or_load_counts() {
        let cache = FitCache::new(Box::new(MemoryCacheBackend::new()), 0);
        let first: Vec<f64> = cache.fit_or_load(&key("s"), || Ok(vec![1.0, 2.0])).unwrap();
        let second: Vec<f64> = cache
            .fit_or_load(&key("s"), || Err(Error::Other("must not recompute".into())))
            .unwrap();
        assert_eq!(first, second);
        assert_eq!((cache.hits(), cache.misses()), (1, 1));
    }

    #[test]
    fn test_key_distinguishes_params() {
        assert_ne!(
            CacheKey::new("s", 1, "a").digest(),
            CacheKey::new("s", 1, "b").digest()
        );
        assert_eq!(key("s").digest(), key("s").digest());
    }

    #[test]
    fn test_fingerprint_depends_on_values_and_seed() {
        let a = FeatureMatrix::new(1, 2, vec![1.0, 2.0]).unwrap();
        let b = FeatureMatrix::new(1, 2, vec![1.0, 2.5]).unwrap();
        let cache = FitCache::new(Box::new(MemoryCacheBackend::new()), 0);
        let seeded = FitCache::new(Box::new(MemoryCacheBackend::new()), 1);
        assert_eq!(cache.fingerprint(&a), cache.fingerprint(&a));
        assert_ne!(cache.fingerprint(&a), cache.fingerprint(&b));
        assert_ne!(cache.fingerprint(&a), seeded.fingerprint(&a));
    }
}
