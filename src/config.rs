//! Run configuration
//!
//! Seeds and hyperparameters are passed explicitly to the components that
//! need them instead of living in process-wide state. All structs have
//! defaults and can be loaded from a single JSON document:
//!
//! ```json
//! {
//!     "run": { "numeric_seed": 42, "shuffle_seed": 7 },
//!     "cross_validation": { "fold_count": 5, "epochs": 20 }
//! }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Seeds for every source of randomness in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Seeds weight initialisation, minibatch shuffling and the sampler.
    pub numeric_seed: u64,
    /// Seeds stratified fold assignment. `None` draws a fresh seed per run,
    /// so fold membership differs between invocations.
    pub shuffle_seed: Option<u64>,
    /// Mixed into every fit-cache input fingerprint.
    pub hash_seed: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            numeric_seed: 42,
            shuffle_seed: None,
            hash_seed: 0,
        }
    }
}

impl RunConfig {
    /// Fix the fold shuffling seed.
    #[must_use]
    pub const fn with_shuffle_seed(mut self, seed: u64) -> Self {
        self.shuffle_seed = Some(seed);
        self
    }

    /// Set the numeric seed.
    #[must_use]
    pub const fn with_numeric_seed(mut self, seed: u64) -> Self {
        self.numeric_seed = seed;
        self
    }
}

/// Where the fit cache of a cross-validation run keeps its entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStorage {
    /// Temporary directory removed when the run ends
    #[default]
    Disk,
    /// Process memory
    Memory,
}

/// Cross-validation hyperparameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossValidationConfig {
    /// Number of stratified folds
    pub fold_count: usize,
    /// Training epochs per fold
    pub epochs: usize,
    /// Minibatch size per fold
    pub batch_size: usize,
    /// Worker threads; `None` uses every available core
    pub n_jobs: Option<usize>,
    /// Fit cache backend
    pub cache: CacheStorage,
}

impl Default for CrossValidationConfig {
    fn default() -> Self {
        Self {
            fold_count: 10,
            epochs: 100,
            batch_size: 5,
            n_jobs: None,
            cache: CacheStorage::Disk,
        }
    }
}

impl CrossValidationConfig {
    /// Set the number of folds.
    #[must_use]
    pub const fn with_fold_count(mut self, fold_count: usize) -> Self {
        self.fold_count = fold_count;
        self
    }

    /// Set epochs and batch size used to train each fold.
    #[must_use]
    pub const fn with_training(mut self, epochs: usize, batch_size: usize) -> Self {
        self.epochs = epochs;
        self.batch_size = batch_size;
        self
    }

    /// Limit the worker pool.
    #[must_use]
    pub const fn with_n_jobs(mut self, n_jobs: usize) -> Self {
        self.n_jobs = Some(n_jobs);
        self
    }

    /// Choose the fit cache backend.
    #[must_use]
    pub const fn with_cache(mut self, cache: CacheStorage) -> Self {
        self.cache = cache;
        self
    }
}

/// Where experiment directories are created and how they are named.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Parent directory of all experiments
    pub root: PathBuf,
    /// Host name → tag appended to the experiment name on that host
    pub host_tags: BTreeMap<String, String>,
    /// Overrides the detected host name
    pub hostname: Option<String>,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        let mut host_tags = BTreeMap::new();
        host_tags.insert("classificatoredga".to_string(), "kula".to_string());
        Self {
            root: PathBuf::from("saved models"),
            host_tags,
            hostname: None,
        }
    }
}

impl ExperimentConfig {
    /// Use `root` as the parent of new experiment directories.
    #[must_use]
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// Pretend to run on `hostname`.
    #[must_use]
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Host identity used for tagging: the override, then `$HOSTNAME`,
    /// then `/etc/hostname`.
    #[must_use]
    pub fn host_identity(&self) -> Option<String> {
        if let Some(name) = &self.hostname {
            return Some(name.clone());
        }
        std::env::var("HOSTNAME")
            .ok()
            .or_else(|| fs::read_to_string("/etc/hostname").ok())
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
    }

    /// Deployment tag for the current host, if it has one.
    #[must_use]
    pub fn host_tag(&self) -> Option<&str> {
        let host = self.host_identity()?;
        self.host_tags.get(&host).map(String::as_str)
    }
}

/// Comparison harness settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComparisonConfig {
    /// Fraction of each dataset held out for evaluation
    pub test_fraction: f64,
    /// Seed for the held-out split
    pub split_seed: u64,
    /// Persisted baseline classifier
    pub baseline_path: PathBuf,
}

impl Default for ComparisonConfig {
    fn default() -> Self {
        Self {
            test_fraction: 0.3,
            split_seed: 42,
            baseline_path: PathBuf::from("../detect_DGA/models/model_baseline.json"),
        }
    }
}

impl ComparisonConfig {
    /// Load the baseline from `path`.
    #[must_use]
    pub fn with_baseline_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.baseline_path = path.into();
        self
    }
}

/// Everything the command line entry point needs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Seeds
    pub run: RunConfig,
    /// Cross-validation hyperparameters
    pub cross_validation: CrossValidationConfig,
    /// Experiment directory settings
    pub experiment: ExperimentConfig,
    /// Comparison harness settings
    pub comparison: ComparisonConfig,
}

impl AppConfig {
    /// Load a JSON configuration; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageFault`] if the file cannot be read and
    /// [`Error::Json`] if it is not valid configuration JSON.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| Error::storage(path, e))?;
        Ok(serde_json::from_str(&contents)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_run() {
        let config = AppConfig::default();
        assert_eq!(config.run.numeric_seed, 42);
        assert!(config.run.shuffle_seed.is_none());
        assert_eq!(config.cross_validation.fold_count, 10);
        assert_eq!(config.cross_validation.epochs, 100);
        assert_eq!(config.cross_validation.batch_size, 5);
        assert!((config.comparison.test_fraction - 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let json = r#"{ "run": { "shuffle_seed": 7 }, "cross_validation": { "fold_count": 3 } }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.run.shuffle_seed, Some(7));
        assert_eq!(config.run.numeric_seed, 42);
        assert_eq!(config.cross_validation.fold_count, 3);
        assert_eq!(config.cross_validation.cache, CacheStorage::Disk);
    }

    #[test]
    fn test_host_tag_lookup() {
        let config = ExperimentConfig::default().with_hostname("classificatoredga");
        assert_eq!(config.host_tag(), Some("kula"));

        let config = ExperimentConfig::default().with_hostname("laptop");
        assert_eq!(config.host_tag(), None);
    }

    #[test]
    fn test_load_missing_file_is_storage_fault() {
        let err = AppConfig::load(Path::new("/nonexistent/dga-nn.json")).unwrap_err();
        assert!(matches!(err, Error::StorageFault { .. }));
    }
}
