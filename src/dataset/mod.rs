//! Feature matrices, labels and the dataset sources that produce them.
//!
//! Rows of a [`FeatureMatrix`] and entries of the label vector are always
//! moved together; [`Dataset`] is the only way the rest of the crate
//! receives them from a [`DatasetSource`].

mod parquet_source;
pub mod split;

use std::collections::HashMap;
use std::hash::Hasher;

use serde::{Deserialize, Serialize};

pub use parquet_source::{ParquetDatasetSource, LABEL_COLUMN};
pub use split::{train_test_split, Fold, StratifiedKFold};

use crate::{Error, Result};

/// Name of the primary dataset (legitimate + DGA domains).
pub const DEFAULT_DATASET: &str = "legit-dga";

/// Name of the second DGA family merged by [`DatasetSource::load_both_datasets`].
pub const SUPPOBOX_DATASET: &str = "suppobox";

/// Dense row-major matrix of `f64` features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl FeatureMatrix {
    /// Wrap row-major `data` of shape `rows x cols`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `data.len() != rows * cols`.
    pub fn new(rows: usize, cols: usize, data: Vec<f64>) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(Error::InvalidInput(format!(
                "feature buffer has {} values, expected {rows}x{cols}",
                data.len()
            )));
        }
        Ok(Self { rows, cols, data })
    }

    /// Build a matrix from equally sized rows.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the rows are ragged.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let cols = rows.first().map_or(0, Vec::len);
        let mut data = Vec::with_capacity(rows.len() * cols);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != cols {
                return Err(Error::InvalidInput(format!(
                    "row {i} has {} columns, expected {cols}",
                    row.len()
                )));
            }
            data.extend_from_slice(row);
        }
        Ok(Self {
            rows: rows.len(),
            cols,
            data,
        })
    }

    /// Number of rows.
    #[must_use]
    pub const fn rows(&self) -> usize {
        self.rows
    }

    /// Number of feature columns.
    #[must_use]
    pub const fn cols(&self) -> usize {
        self.cols
    }

    /// True if the matrix has no rows.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Borrow row `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i >= self.rows()`.
    #[must_use]
    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    /// Iterate over rows.
    pub fn iter_rows(&self) -> impl Iterator<Item = &[f64]> {
        // chunks_exact panics on a zero chunk size
        self.data.chunks_exact(self.cols.max(1)).take(self.rows)
    }

    /// Raw row-major values.
    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Copy the rows at `indices`, in that order.
    #[must_use]
    pub fn select_rows(&self, indices: &[usize]) -> Self {
        let mut data = Vec::with_capacity(indices.len() * self.cols);
        for &i in indices {
            data.extend_from_slice(self.row(i));
        }
        Self {
            rows: indices.len(),
            cols: self.cols,
            data,
        }
    }

    /// Feed shape and exact bit patterns of every value into `hasher`.
    pub fn hash_into<H: Hasher>(&self, hasher: &mut H) {
        hasher.write_usize(self.rows);
        hasher.write_usize(self.cols);
        for value in &self.data {
            hasher.write_u64(value.to_bits());
        }
    }
}

/// Row-aligned features and binary labels.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    features: FeatureMatrix,
    labels: Vec<u8>,
}

impl Dataset {
    /// Pair `features` with `labels`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the row counts differ or a label is
    /// not 0 or 1.
    pub fn new(features: FeatureMatrix, labels: Vec<u8>) -> Result<Self> {
        check_alignment(&features, &labels)?;
        Ok(Self { features, labels })
    }

    /// Feature matrix.
    #[must_use]
    pub const fn features(&self) -> &FeatureMatrix {
        &self.features
    }

    /// Label vector.
    #[must_use]
    pub fn labels(&self) -> &[u8] {
        &self.labels
    }

    /// Number of rows.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.features.rows()
    }

    /// True if the dataset has no rows.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Rows at `indices` with their labels.
    #[must_use]
    pub fn subset(&self, indices: &[usize]) -> Self {
        Self {
            features: self.features.select_rows(indices),
            labels: indices.iter().map(|&i| self.labels[i]).collect(),
        }
    }

    /// Append the rows of `other`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SchemaMismatch`] if both sides have rows and their
    /// column counts differ. An empty side takes the other's width.
    pub fn concat(mut self, other: &Self) -> Result<Self> {
        if other.is_empty() {
            return Ok(self);
        }
        if self.features.cols != other.features.cols && !self.is_empty() {
            return Err(Error::SchemaMismatch(format!(
                "cannot concatenate datasets with {} and {} feature columns",
                self.features.cols, other.features.cols
            )));
        }
        self.features.cols = other.features.cols;
        self.features.rows += other.features.rows;
        self.features.data.extend_from_slice(&other.features.data);
        self.labels.extend_from_slice(&other.labels);
        Ok(self)
    }

    /// Keep at most `n_samples` rows, balanced across the two classes and in
    /// original order. Returns the dataset unchanged when `n_samples` is `None`.
    #[must_use]
    pub fn limit(self, n_samples: Option<usize>) -> Self {
        let Some(n) = n_samples else { return self };
        if n >= self.len() {
            return self;
        }
        let per_class = n.div_ceil(2);
        let mut taken = [0usize; 2];
        let mut keep = Vec::with_capacity(n);
        for (i, &label) in self.labels.iter().enumerate() {
            let slot = &mut taken[usize::from(label)];
            if *slot < per_class && keep.len() < n {
                *slot += 1;
                keep.push(i);
            }
        }
        self.subset(&keep)
    }

    /// Number of rows per class, `[negatives, positives]`.
    #[must_use]
    pub fn class_counts(&self) -> [usize; 2] {
        let positives = self.labels.iter().filter(|&&l| l == 1).count();
        [self.labels.len() - positives, positives]
    }

    /// Split into owned parts.
    #[must_use]
    pub fn into_parts(self) -> (FeatureMatrix, Vec<u8>) {
        (self.features, self.labels)
    }
}

/// Validate that `labels` is binary and row-aligned with `features`.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] on a row count mismatch or a label outside {0, 1}.
pub fn check_alignment(features: &FeatureMatrix, labels: &[u8]) -> Result<()> {
    if features.rows() != labels.len() {
        return Err(Error::InvalidInput(format!(
            "{} feature rows but {} labels",
            features.rows(),
            labels.len()
        )));
    }
    if let Some(bad) = labels.iter().find(|&&l| l > 1) {
        return Err(Error::InvalidInput(format!("label {bad} is not binary")));
    }
    Ok(())
}

/// Source of labelled feature datasets.
pub trait DatasetSource: Send + Sync {
    /// Load one named dataset (default: [`DEFAULT_DATASET`]), optionally
    /// truncated to `n_samples` balanced rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the dataset does not exist or cannot be decoded.
    fn load_features_dataset(
        &self,
        n_samples: Option<usize>,
        dataset_name: Option<&str>,
    ) -> Result<Dataset>;

    /// Load [`DEFAULT_DATASET`] merged with [`SUPPOBOX_DATASET`].
    ///
    /// # Errors
    ///
    /// Returns an error if either dataset cannot be loaded.
    fn load_both_datasets(&self, n_samples: Option<usize>, verbose: bool) -> Result<Dataset> {
        let merged = self
            .load_features_dataset(None, Some(DEFAULT_DATASET))?
            .concat(&self.load_features_dataset(None, Some(SUPPOBOX_DATASET))?)?
            .limit(n_samples);
        if verbose {
            let [negatives, positives] = merged.class_counts();
            tracing::info!(
                "Loaded {} rows ({negatives} negative / {positives} positive) from {DEFAULT_DATASET} + {SUPPOBOX_DATASET}",
                merged.len()
            );
        }
        Ok(merged)
    }
}

/// Named datasets held in memory.
#[derive(Debug, Default, Clone)]
pub struct InMemoryDatasetSource {
    datasets: HashMap<String, Dataset>,
}

impl InMemoryDatasetSource {
    /// Create an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `dataset` under `name`.
    #[must_use]
    pub fn with_dataset(mut self, name: impl Into<String>, dataset: Dataset) -> Self {
        self.datasets.insert(name.into(), dataset);
        self
    }
}

impl DatasetSource for InMemoryDatasetSource {
    fn load_features_dataset(
        &self,
        n_samples: Option<usize>,
        dataset_name: Option<&str>,
    ) -> Result<Dataset> {
        let name = dataset_name.unwrap_or(DEFAULT_DATASET);
        self.datasets
            .get(name)
            .cloned()
            .map(|d| d.limit(n_samples))
            .ok_or_else(|| Error::InvalidInput(format!("unknown dataset '{name}'")))
    }
}
