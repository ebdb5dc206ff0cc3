//! Per-fold metric records and their aggregation.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::ser::{PrettyFormatter, Serializer};

use super::ResultsLog;
use crate::{Error, Result};

/// File name of the structured metric document.
pub const RESULTS_FILE: &str = "data.json";

/// Metric name → one value per fold.
///
/// Every sequence has the same length and only finite values, so the record
/// survives a JSON round trip unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricRecord {
    metrics: BTreeMap<String, Vec<f64>>,
}

impl MetricRecord {
    /// Create an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and wrap an existing mapping.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SchemaMismatch`] if the sequences have different
    /// lengths or contain non-finite values.
    pub fn from_map(metrics: BTreeMap<String, Vec<f64>>) -> Result<Self> {
        let mut record = Self::new();
        for (key, values) in metrics {
            record
                .insert(key, values)
                .map_err(|e| Error::SchemaMismatch(e.to_string()))?;
        }
        Ok(record)
    }

    /// Add or replace the per-fold values of `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `values` has a different length
    /// than the metrics already present or contains NaN/infinity.
    pub fn insert(&mut self, key: impl Into<String>, values: Vec<f64>) -> Result<()> {
        let key = key.into();
        if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
            return Err(Error::InvalidInput(format!("metric '{key}' has non-finite value {bad}")));
        }
        let expected = self
            .metrics
            .iter()
            .find(|(k, _)| **k != key)
            .map(|(_, v)| v.len());
        if let Some(expected) = expected {
            if values.len() != expected {
                return Err(Error::InvalidInput(format!(
                    "metric '{key}' has {} values, other metrics have {expected}",
                    values.len()
                )));
            }
        }
        self.metrics.insert(key, values);
        Ok(())
    }

    /// Values of `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&[f64]> {
        self.metrics.get(key).map(Vec::as_slice)
    }

    /// Metric names in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.metrics.keys().map(String::as_str)
    }

    /// `(name, values)` pairs in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f64])> {
        self.metrics.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Number of metrics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    /// True if no metric has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Number of folds (length of every sequence).
    #[must_use]
    pub fn fold_count(&self) -> usize {
        self.metrics.values().next().map_or(0, Vec::len)
    }

    /// Check that every key in `expected` is present.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SchemaMismatch`] naming the missing keys.
    pub fn ensure_keys(&self, expected: &[&str]) -> Result<()> {
        let missing: Vec<&str> = expected
            .iter()
            .copied()
            .filter(|k| !self.metrics.contains_key(*k))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::SchemaMismatch(format!(
                "metric record is missing {}",
                missing.join(", ")
            )))
        }
    }

    /// Mean and standard deviation of every metric, in key order.
    #[must_use]
    pub fn summaries(&self) -> Vec<MetricSummary> {
        self.iter().map(|(k, v)| MetricSummary::of(k, v)).collect()
    }
}

/// True for metrics measured in seconds rather than as fractions.
#[must_use]
pub fn is_timing_metric(key: &str) -> bool {
    key.contains("time")
}

/// Mean and population standard deviation of one metric across folds.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSummary {
    /// Metric name
    pub key: String,
    /// Mean across folds
    pub mean: f64,
    /// Population standard deviation across folds
    pub std: f64,
}

impl MetricSummary {
    /// Summarize `values` of metric `key`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn of(key: &str, values: &[f64]) -> Self {
        let n = values.len().max(1) as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Self {
            key: key.to_string(),
            mean,
            std: variance.sqrt(),
        }
    }
}

impl fmt::Display for MetricSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if is_timing_metric(&self.key) {
            write!(f, "{}: {:.2}s ({:.2})s", self.key, self.mean, self.std)
        } else {
            write!(
                f,
                "{}: {:.2}% ({:.2}%)",
                self.key,
                self.mean * 100.0,
                self.std * 100.0
            )
        }
    }
}

/// Summarizes metric records into the results log and persists them as
/// `data.json`.
#[derive(Debug, Clone)]
pub struct ResultAggregator {
    path: PathBuf,
    log: Arc<ResultsLog>,
}

impl ResultAggregator {
    /// Aggregator writing `data.json` into `directory`.
    #[must_use]
    pub fn new(directory: &Path, log: Arc<ResultsLog>) -> Self {
        Self {
            path: directory.join(RESULTS_FILE),
            log,
        }
    }

    /// Path of the metric document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Log one line per metric, in key order, and return the lines.
    pub fn summarize(&self, record: &MetricRecord) -> Vec<String> {
        record
            .summaries()
            .iter()
            .map(|summary| {
                let line = summary.to_string();
                self.log.info(&line);
                line
            })
            .collect()
    }

    /// Write `record` as key-sorted, 4-space indented JSON.
    ///
    /// Failures are logged and swallowed; the caller keeps its in-memory
    /// record either way. Returns whether the document was written.
    pub fn persist(&self, record: &MetricRecord) -> bool {
        match write_document(&self.path, record) {
            Ok(()) => {
                tracing::debug!("Metric document written to '{}'", self.path.display());
                true
            }
            Err(e) => {
                self.log.error(&e.to_string());
                false
            }
        }
    }

    /// Read `data.json` back and echo its summary into the log.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageFault`] if the file cannot be read,
    /// [`Error::Json`] if it is not a flat map of number arrays and
    /// [`Error::SchemaMismatch`] if the arrays have different lengths.
    pub fn reload(&self) -> Result<MetricRecord> {
        let contents = fs::read(&self.path).map_err(|e| Error::storage(&self.path, e))?;
        let metrics: BTreeMap<String, Vec<f64>> = serde_json::from_slice(&contents)?;
        let record = MetricRecord::from_map(metrics)?;
        self.summarize(&record);
        Ok(record)
    }
}

fn write_document(path: &Path, record: &MetricRecord) -> Result<()> {
    let mut buffer = Vec::new();
    let mut serializer = Serializer::with_formatter(&mut buffer, PrettyFormatter::with_indent(b"    "));
    record.serialize(&mut serializer)?;
    fs::write(path, buffer).map_err(|e| Error::storage(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> MetricRecord {
        let mut record = MetricRecord::new();
        record.insert("recall", vec![0.5, 1.0]).unwrap();
        record.insert("fit_time", vec![1.0, 3.0]).unwrap();
        record
    }

    #[test]
    fn test_unequal_lengths_rejected() {
        let mut record = record();
        assert!(record.insert("f1", vec![0.1]).is_err());
        // replacing a key with the right length is fine
        record.insert("recall", vec![0.1, 0.2]).unwrap();
    }

    #[test]
    fn test_non_finite_rejected() {
        let mut record = MetricRecord::new();
        assert!(record.insert("f1", vec![f64::NAN]).is_err());
    }

    #[test]
    fn test_summary_formatting() {
        let summaries = record().summaries();
        assert_eq!(summaries[0].to_string(), "fit_time: 2.00s (1.00)s");
        assert_eq!(summaries[1].to_string(), "recall: 75.00% (25.00%)");
    }

    #[test]
    fn test_persist_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(ResultsLog::open(dir.path()).unwrap());
        let aggregator = ResultAggregator::new(dir.path(), log);

        assert!(aggregator.persist(&record()));
        let text = fs::read_to_string(aggregator.path()).unwrap();
        assert!(text.starts_with("{\n    \"fit_time\": ["));

        let reloaded = aggregator.reload().unwrap();
        assert_eq!(reloaded, record());
    }

    #[test]
    fn test_persist_failure_is_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(ResultsLog::open(dir.path()).unwrap());
        let aggregator = ResultAggregator::new(&dir.path().join("missing"), log);
        assert!(!aggregator.persist(&record()));
    }

    #[test]
    fn test_ensure_keys() {
        assert!(record().ensure_keys(&["recall"]).is_ok());
        let err = record().ensure_keys(&["recall", "roc_auc"]).unwrap_err();
        assert!(err.to_string().contains("roc_auc"));
    }
}
