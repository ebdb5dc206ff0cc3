//! The [`Model`] façade: one estimator bound to one experiment directory.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use super::{Estimator, EstimatorFactory, ModelPersistence, TrainingOptions};
use crate::config::ExperimentConfig;
use crate::dataset::{check_alignment, FeatureMatrix};
use crate::experiment::{ExperimentDirectory, MetricRecord, ResultAggregator, ResultsLog};
use crate::metrics::{classification_report, round_classes, ClassificationReport};
use crate::pipeline::StandardScaler;
use crate::{Error, Result};

/// Class names for labels 0 and 1.
pub const TARGET_NAMES: [&str; 2] = ["DGA", "Legit"];

/// Fitted standardizer, present once [`Model::fit`] has run.
pub const STANDARDIZER_FILE: &str = "standardizer.json";

/// An estimator with its experiment directory, results log and persisted
/// artifacts.
///
/// A model is either fresh (new timestamped directory, untrained or
/// caller-supplied estimator) or reopened from an existing directory.
/// Either way it is ready as soon as construction returns.
pub struct Model {
    directory: ExperimentDirectory,
    estimator: Box<dyn Estimator>,
    scaler: Option<StandardScaler>,
    training: TrainingOptions,
    persistence: ModelPersistence,
    log: Arc<ResultsLog>,
    aggregator: ResultAggregator,
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("directory", &self.directory)
            .field("architecture", &self.estimator.architecture())
            .field("standardized", &self.scaler.is_some())
            .field("training", &self.training)
            .finish_non_exhaustive()
    }
}

impl Model {
    /// Wrap `estimator` in a new experiment directory named after the
    /// current minute (and host tag).
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageFault`] if the directory or its log cannot be
    /// created, or the directory is owned by another live model.
    pub fn fresh(estimator: Box<dyn Estimator>, config: &ExperimentConfig) -> Result<Self> {
        let directory = ExperimentDirectory::resolve(None, config)?;
        let log = ResultsLog::open(directory.path())?;
        Ok(Self::assemble(directory, log, estimator, None))
    }

    /// Like [`fresh`](Self::fresh), but if another live model owns this
    /// minute's directory the experiment goes to the first free
    /// `"<name> (n)"` sibling instead of failing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageFault`] if no directory or log can be created.
    pub fn fresh_or_sibling(estimator: Box<dyn Estimator>, config: &ExperimentConfig) -> Result<Self> {
        let base = ExperimentDirectory::resolve(None, config)?;
        let mut directory = base.clone();
        let mut n = 1;
        loop {
            if let Some(log) = ResultsLog::open_unclaimed(directory.path())? {
                if n > 1 {
                    log.warn(&format!(
                        "'{}' is owned by a live model, recording here instead",
                        base.path().display()
                    ));
                }
                return Ok(Self::assemble(directory, log, estimator, None));
            }
            n += 1;
            directory = base.sibling(n)?;
        }
    }

    /// Load the model saved in `directory`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageFault`] if the directory or an artifact is
    /// missing and [`Error::SchemaMismatch`] if the artifacts disagree.
    pub fn reopen(directory: &Path, factory: &dyn EstimatorFactory) -> Result<Self> {
        let directory = ExperimentDirectory::open(directory)?;
        let estimator = ModelPersistence::new(directory.path()).load(factory)?;

        let scaler_path = directory.join(STANDARDIZER_FILE);
        let scaler = match fs::read(&scaler_path) {
            Ok(bytes) => Some(
                serde_json::from_slice(&bytes)
                    .map_err(|e| Error::SchemaMismatch(format!("{}: {e}", scaler_path.display())))?,
            ),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(Error::storage(&scaler_path, e)),
        };

        let log = ResultsLog::open(directory.path())?;
        let model = Self::assemble(directory, log, estimator, scaler);
        model.log.info("Loaded model from disk");
        Ok(model)
    }

    fn assemble(
        directory: ExperimentDirectory,
        log: ResultsLog,
        estimator: Box<dyn Estimator>,
        scaler: Option<StandardScaler>,
    ) -> Self {
        let log = Arc::new(log);
        Self {
            persistence: ModelPersistence::new(directory.path()),
            aggregator: ResultAggregator::new(directory.path(), Arc::clone(&log)),
            directory,
            estimator,
            scaler,
            training: TrainingOptions::default(),
            log,
        }
    }

    /// Epochs and batch size used by [`fit`](Self::fit).
    #[must_use]
    pub fn with_training_options(mut self, training: TrainingOptions) -> Self {
        self.training = training;
        self
    }

    /// Experiment directory.
    #[must_use]
    pub fn directory(&self) -> &Path {
        self.directory.path()
    }

    /// Results log of this experiment.
    #[must_use]
    pub fn log(&self) -> &ResultsLog {
        &self.log
    }

    /// Underlying estimator.
    #[must_use]
    pub fn estimator(&self) -> &dyn Estimator {
        self.estimator.as_ref()
    }

    /// Fitted standardizer, if any.
    #[must_use]
    pub const fn scaler(&self) -> Option<&StandardScaler> {
        self.scaler.as_ref()
    }

    /// Standardize `x`, train on it and persist the result.
    ///
    /// # Errors
    ///
    /// Propagates input, training and persistence errors. Nothing is saved
    /// if training fails.
    pub fn fit(&mut self, x: &FeatureMatrix, y: &[u8]) -> Result<()> {
        check_alignment(x, y)?;
        if !self.estimator.is_compiled() {
            return Err(Error::Training(
                "estimator was not compiled before training".to_string(),
            ));
        }
        let scaler = StandardScaler::fit(x)?;
        let standardized = scaler.transform(x)?;
        self.log.info(&format!(
            "Training on {} rows for {} epochs (batch size {})",
            x.rows(),
            self.training.epochs,
            self.training.batch_size
        ));
        self.estimator.fit(&standardized, y, &self.training)?;
        self.scaler = Some(scaler);
        self.save_model()
    }

    /// Classification report of the estimator on `x` / `y`.
    ///
    /// Scores are rounded to the nearest class: 0.5 and above is class 1
    /// (`"Legit"`), everything else class 0 (`"DGA"`).
    ///
    /// # Errors
    ///
    /// Returns an input error for misaligned data and
    /// [`Error::SchemaMismatch`] for the wrong column count.
    pub fn evaluate(&self, x: &FeatureMatrix, y: &[u8]) -> Result<ClassificationReport> {
        check_alignment(x, y)?;
        let scores = match &self.scaler {
            Some(scaler) => self.estimator.predict(&scaler.transform(x)?)?,
            None => self.estimator.predict(x)?,
        };
        Ok(classification_report(y, &round_classes(&scores), TARGET_NAMES))
    }

    /// Persist architecture, weights, diagram and standardizer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageFault`] if a required artifact cannot be written.
    pub fn save_model(&self) -> Result<()> {
        self.persistence.save(self.estimator.as_ref(), &self.log)?;
        let scaler_path = self.directory.join(STANDARDIZER_FILE);
        match &self.scaler {
            Some(scaler) => {
                let json = serde_json::to_vec_pretty(scaler)?;
                fs::write(&scaler_path, json).map_err(|e| Error::storage(&scaler_path, e))?;
            }
            None => match fs::remove_file(&scaler_path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::storage(&scaler_path, e)),
            },
        }
        Ok(())
    }

    /// Log the summary of `record` and write it to `data.json`. Returns
    /// whether the document was written; a write failure is only logged.
    pub fn save_results(&self, record: &MetricRecord) -> bool {
        self.aggregator.summarize(record);
        self.aggregator.persist(record)
    }

    /// Read `data.json` back, echoing its summary into the log.
    ///
    /// # Errors
    ///
    /// See [`ResultAggregator::reload`].
    pub fn load_results(&self) -> Result<MetricRecord> {
        self.aggregator.reload()
    }

    /// Write the estimator's layer table into the results log.
    pub fn log_summary(&self) {
        for line in self.estimator.summary() {
            self.log.info(&line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NetworkFactory;

    fn config(root: &Path) -> ExperimentConfig {
        ExperimentConfig::default()
            .with_root(root)
            .with_hostname("workstation")
    }

    fn data() -> (FeatureMatrix, Vec<u8>) {
        let rows: Vec<Vec<f64>> = (0..20)
            .map(|i| (0..9).map(|c| f64::from(i * (c + 1))).collect())
            .collect();
        let labels = (0..20).map(|i| u8::from(i % 2 == 0)).collect();
        (FeatureMatrix::from_rows(&rows).unwrap(), labels)
    }

    #[test]
    fn test_fit_persists_everything() {
        let root = tempfile::tempdir().unwrap();
        let (x, y) = data();
        let mut model = Model::fresh(NetworkFactory::baseline().build(0).unwrap(), &config(root.path()))
            .unwrap()
            .with_training_options(TrainingOptions { epochs: 2, batch_size: 5 });
        model.fit(&x, &y).unwrap();

        for file in [
            crate::model::ARCHITECTURE_FILE,
            crate::model::WEIGHTS_FILE,
            STANDARDIZER_FILE,
            crate::experiment::RESULTS_LOG_FILE,
        ] {
            assert!(model.directory().join(file).exists(), "{file} missing");
        }
    }

    #[test]
    fn test_reopen_restores_scaler_and_predictions() {
        let root = tempfile::tempdir().unwrap();
        let (x, y) = data();
        let factory = NetworkFactory::baseline();
        let mut model = Model::fresh(factory.build(0).unwrap(), &config(root.path()))
            .unwrap()
            .with_training_options(TrainingOptions { epochs: 2, batch_size: 5 });
        model.fit(&x, &y).unwrap();
        let expected = model.evaluate(&x, &y).unwrap();
        let dir = model.directory().to_path_buf();
        drop(model);

        let reopened = Model::reopen(&dir, &factory).unwrap();
        assert!(reopened.scaler().is_some());
        assert_eq!(reopened.evaluate(&x, &y).unwrap(), expected);
    }

    #[test]
    fn test_reopen_missing_directory() {
        let root = tempfile::tempdir().unwrap();
        let err = Model::reopen(&root.path().join("nope"), &NetworkFactory::baseline()).unwrap_err();
        assert!(matches!(err, Error::StorageFault { .. }));
    }

    #[test]
    fn test_fresh_or_sibling_avoids_live_directory() {
        let root = tempfile::tempdir().unwrap();
        let factory = NetworkFactory::baseline();
        let first = Model::fresh(factory.build(0).unwrap(), &config(root.path())).unwrap();
        let second = Model::fresh_or_sibling(factory.build(1).unwrap(), &config(root.path())).unwrap();
        assert_ne!(first.directory(), second.directory());
        assert!(second.directory().join(crate::experiment::RESULTS_LOG_FILE).exists());
    }

    #[test]
    fn test_save_without_scaler_removes_stale_file() {
        let root = tempfile::tempdir().unwrap();
        let model = Model::fresh(NetworkFactory::baseline().build(0).unwrap(), &config(root.path())).unwrap();
        let stale = model.directory().join(STANDARDIZER_FILE);
        fs::write(&stale, b"{}").unwrap();
        model.save_model().unwrap();
        assert!(!stale.exists());
    }
}
