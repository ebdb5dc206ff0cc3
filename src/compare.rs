//! Side-by-side evaluation of a trained [`Model`] against a persisted
//! baseline classifier.
//!
//! For every dataset variant the rows are split into stratified train and
//! held-out parts. The model is only evaluated (never retrained); the
//! baseline is loaded fresh, refitted on the training part and evaluated on
//! the same held-out rows.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::ComparisonConfig;
use crate::dataset::{check_alignment, train_test_split, Dataset, DatasetSource, FeatureMatrix};
use crate::metrics::{classification_report, ClassificationReport};
use crate::model::{Model, TARGET_NAMES};
use crate::{Error, Result};

/// Name of the single-dataset variant.
pub const SINGLE_VARIANT: &str = "legit-dga dataset";

/// Name of the merged-dataset variant.
pub const MERGED_VARIANT: &str = "legit-dga dataset + suppobox";

/// A classifier the neural model is compared against.
pub trait BaselineClassifier: Send {
    /// Display name used in the comparison output.
    fn name(&self) -> &str;

    /// Refit on `x` / `y`.
    ///
    /// # Errors
    ///
    /// Returns an input error if the data cannot be fitted.
    fn fit(&mut self, x: &FeatureMatrix, y: &[u8]) -> Result<()>;

    /// Predicted label for every row.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SchemaMismatch`] if `x` does not match the fitted width.
    fn predict(&self, x: &FeatureMatrix) -> Result<Vec<u8>>;
}

/// Loads the persisted baseline.
pub trait BaselineLoader: Send + Sync {
    /// Where the baseline is read from.
    fn location(&self) -> &Path;

    /// A fresh baseline instance.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BaselineUnavailable`] if it cannot be loaded.
    fn load(&self) -> Result<Box<dyn BaselineClassifier>>;
}

/// Assigns each row to the class whose feature centroid is nearest
/// (squared Euclidean distance).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NearestCentroidBaseline {
    /// Centroid of label 0 and label 1; empty until fitted
    pub centroids: Vec<Vec<f64>>,
}

impl NearestCentroidBaseline {
    /// Unfitted baseline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Write the baseline as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageFault`] if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        fs::write(path, json).map_err(|e| Error::storage(path, e))
    }
}

impl BaselineClassifier for NearestCentroidBaseline {
    fn name(&self) -> &str {
        "Nearest Centroid"
    }

    #[allow(clippy::cast_precision_loss)]
    fn fit(&mut self, x: &FeatureMatrix, y: &[u8]) -> Result<()> {
        check_alignment(x, y)?;
        let mut sums = vec![vec![0.0; x.cols()]; 2];
        let mut counts = [0usize; 2];
        for (row, &label) in x.iter_rows().zip(y) {
            let class = usize::from(label);
            counts[class] += 1;
            for (s, v) in sums[class].iter_mut().zip(row) {
                *s += v;
            }
        }
        if counts.contains(&0) {
            return Err(Error::InvalidInput(
                "nearest centroid needs rows of both classes".to_string(),
            ));
        }
        for (sum, count) in sums.iter_mut().zip(counts) {
            sum.iter_mut().for_each(|s| *s /= count as f64);
        }
        self.centroids = sums;
        Ok(())
    }

    fn predict(&self, x: &FeatureMatrix) -> Result<Vec<u8>> {
        let [negative, positive] = self.centroids.as_slice() else {
            return Err(Error::InvalidInput("baseline has not been fitted".to_string()));
        };
        if negative.len() != x.cols() {
            return Err(Error::SchemaMismatch(format!(
                "baseline was fitted on {} features, got {}",
                negative.len(),
                x.cols()
            )));
        }
        let distance = |row: &[f64], centroid: &[f64]| -> f64 {
            row.iter().zip(centroid).map(|(a, b)| (a - b).powi(2)).sum()
        };
        Ok(x.iter_rows()
            .map(|row| u8::from(distance(row, positive) < distance(row, negative)))
            .collect())
    }
}

/// Reads a [`NearestCentroidBaseline`] from a JSON file on every load.
#[derive(Debug, Clone)]
pub struct JsonBaselineLoader {
    path: PathBuf,
}

impl JsonBaselineLoader {
    /// Loader for `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl BaselineLoader for JsonBaselineLoader {
    fn location(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Box<dyn BaselineClassifier>> {
        let bytes = fs::read(&self.path).map_err(|e| Error::baseline(&self.path, e))?;
        let baseline: NearestCentroidBaseline =
            serde_json::from_slice(&bytes).map_err(|e| Error::baseline(&self.path, e))?;
        Ok(Box::new(baseline))
    }
}

/// Reports of one dataset variant.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonReport {
    /// Variant name
    pub variant: String,
    /// Baseline display name
    pub baseline_name: String,
    /// Neural model on the held-out rows
    pub neural: ClassificationReport,
    /// Refitted baseline on the same rows
    pub baseline: ClassificationReport,
}

/// Runs the comparison over both dataset variants.
pub struct ComparisonHarness<'a> {
    source: &'a dyn DatasetSource,
    loader: &'a dyn BaselineLoader,
    config: ComparisonConfig,
}

impl<'a> ComparisonHarness<'a> {
    /// Harness reading datasets from `source` and the baseline via `loader`.
    #[must_use]
    pub fn new(
        source: &'a dyn DatasetSource,
        loader: &'a dyn BaselineLoader,
        config: ComparisonConfig,
    ) -> Self {
        Self {
            source,
            loader,
            config,
        }
    }

    /// Compare `model` with the baseline, printing to stdout.
    ///
    /// # Errors
    ///
    /// See [`compare_to`](Self::compare_to).
    pub fn compare(&self, model: &Model) -> Result<Vec<ComparisonReport>> {
        let stdout = io::stdout();
        self.compare_to(model, &mut stdout.lock())
    }

    /// Compare `model` with the baseline, writing the reports to `out`.
    ///
    /// Variants are processed in order; the first error aborts the rest.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BaselineUnavailable`] if the baseline cannot be
    /// loaded, or any dataset, split or evaluation error.
    pub fn compare_to(&self, model: &Model, out: &mut impl Write) -> Result<Vec<ComparisonReport>> {
        model.log().info("Comparing Datasets:");
        let mut reports = Vec::with_capacity(2);
        for variant in [SINGLE_VARIANT, MERGED_VARIANT] {
            let data = if variant == MERGED_VARIANT {
                self.source.load_both_datasets(None, false)?
            } else {
                self.source.load_features_dataset(None, None)?
            };
            let report = self.compare_variant(model, variant, &data)?;
            writeln!(out)?;
            writeln!(out, "{variant}")?;
            writeln!(out, "Neural Network")?;
            writeln!(out, "{}", report.neural)?;
            writeln!(out, "{}", report.baseline_name)?;
            writeln!(out, "{}", report.baseline)?;
            model.log().info(&format!(
                "{variant}: neural accuracy {:.4}, {} accuracy {:.4}",
                report.neural.accuracy(),
                report.baseline_name,
                report.baseline.accuracy()
            ));
            reports.push(report);
        }
        Ok(reports)
    }

    fn compare_variant(&self, model: &Model, variant: &str, data: &Dataset) -> Result<ComparisonReport> {
        let (train, test) = train_test_split(data.labels(), self.config.test_fraction, self.config.split_seed)?;
        let train = data.subset(&train);
        let test = data.subset(&test);
        tracing::debug!(
            "{variant}: {} training rows, {} held-out rows",
            train.len(),
            test.len()
        );

        let neural = model.evaluate(test.features(), test.labels())?;

        let mut baseline = self.loader.load()?;
        baseline.fit(train.features(), train.labels())?;
        let predicted = baseline.predict(test.features())?;
        Ok(ComparisonReport {
            variant: variant.to_string(),
            baseline_name: baseline.name().to_string(),
            neural,
            baseline: classification_report(test.labels(), &predicted, TARGET_NAMES),
        })
    }
}
