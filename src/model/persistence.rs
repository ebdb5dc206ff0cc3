//! Save/load of an estimator's architecture and weights.
//!
//! The architecture is a burn config document; the weights are written by
//! the estimator itself (a burn recorder file for [`FeedForwardNetwork`])
//! together with the fingerprint of the architecture they belong to.
//! Loading rebuilds the estimator from the architecture, restores the
//! weights and compiles it with binary cross-entropy and Adam.
//!
//! [`FeedForwardNetwork`]: super::FeedForwardNetwork

use std::fs;
use std::path::{Path, PathBuf};

use burn::config::Config;

use super::{render_diagram, Architecture, CompileOptions, Estimator, EstimatorFactory};
use crate::experiment::ResultsLog;
use crate::{Error, Result};

/// Architecture document.
pub const ARCHITECTURE_FILE: &str = "model_architecture.json";

/// Weights, as a named MessagePack record.
pub const WEIGHTS_FILE: &str = "model_weights.mpk";

/// Network diagram.
pub const DIAGRAM_FILE: &str = "model.png";

/// Reads and writes model artifacts in one experiment directory.
#[derive(Debug, Clone)]
pub struct ModelPersistence {
    directory: PathBuf,
    compile: CompileOptions,
}

impl ModelPersistence {
    /// Persistence rooted at `directory`.
    #[must_use]
    pub fn new(directory: &Path) -> Self {
        Self {
            directory: directory.to_path_buf(),
            compile: CompileOptions::default(),
        }
    }

    /// Compile options applied after [`load`](Self::load).
    #[must_use]
    pub fn with_compile_options(mut self, compile: CompileOptions) -> Self {
        self.compile = compile;
        self
    }

    /// Path of the architecture document.
    #[must_use]
    pub fn architecture_path(&self) -> PathBuf {
        self.directory.join(ARCHITECTURE_FILE)
    }

    /// Path of the weights file.
    #[must_use]
    pub fn weights_path(&self) -> PathBuf {
        self.directory.join(WEIGHTS_FILE)
    }

    /// Write architecture and weights, then the diagram on a best-effort basis.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageFault`] if the architecture or weights cannot
    /// be written. A diagram failure is only logged as a warning.
    pub fn save(&self, estimator: &dyn Estimator, log: &ResultsLog) -> Result<()> {
        let architecture = estimator.architecture();

        let arch_path = self.architecture_path();
        architecture
            .save(&arch_path)
            .map_err(|e| Error::storage(&arch_path, e))?;
        log.info("Saved model architecture to disk");

        estimator.save_weights(&self.weights_path())?;
        log.info("Saved model weights to disk");

        let diagram = self.directory.join(DIAGRAM_FILE);
        if let Err(e) = render_diagram(&architecture, &diagram) {
            log.warn(&format!("Model diagram not written: {e}"));
        }
        Ok(())
    }

    /// Rebuild a compiled estimator from the saved artifacts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageFault`] if either artifact is missing or
    /// unreadable and [`Error::SchemaMismatch`] if the architecture document
    /// does not parse or the weights were saved for a different architecture.
    pub fn load(&self, factory: &dyn EstimatorFactory) -> Result<Box<dyn Estimator>> {
        let arch_path = self.architecture_path();
        let bytes = fs::read(&arch_path).map_err(|e| Error::storage(&arch_path, e))?;
        let architecture = Architecture::load_binary(&bytes)
            .map_err(|e| Error::SchemaMismatch(format!("{}: {e:?}", arch_path.display())))?;
        let mut estimator = factory.from_architecture(&architecture)?;

        estimator.load_weights(&self.weights_path())?;
        estimator.compile(&self.compile);
        tracing::debug!("Loaded model from '{}'", self.directory.display());
        Ok(estimator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::FeatureMatrix;
    use crate::model::{Activation, LayerSpec, NetworkFactory};

    #[test]
    fn test_save_then_load_predicts_identically() {
        let dir = tempfile::tempdir().unwrap();
        let log = ResultsLog::open(dir.path()).unwrap();
        let factory = NetworkFactory::baseline();
        let original = factory.build(11).unwrap();

        let persistence = ModelPersistence::new(dir.path());
        persistence.save(original.as_ref(), &log).unwrap();
        assert!(dir.path().join(DIAGRAM_FILE).exists());

        let loaded = persistence.load(&factory).unwrap();
        assert!(loaded.is_compiled());
        let x = FeatureMatrix::new(2, 9, (0..18).map(f64::from).collect()).unwrap();
        assert_eq!(original.predict(&x).unwrap(), loaded.predict(&x).unwrap());
    }

    #[test]
    fn test_missing_architecture_is_storage_fault() {
        let dir = tempfile::tempdir().unwrap();
        let err = ModelPersistence::new(dir.path())
            .load(&NetworkFactory::baseline())
            .err().unwrap();
        assert!(matches!(err, Error::StorageFault { .. }));
    }

    #[test]
    fn test_foreign_weights_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let log = ResultsLog::open(dir.path()).unwrap();
        let persistence = ModelPersistence::new(dir.path());
        persistence
            .save(NetworkFactory::baseline().build(1).unwrap().as_ref(), &log)
            .unwrap();

        // swap the architecture for one the weights were not written for
        let other = Architecture::sequential(
            9,
            vec![
                LayerSpec::dense("dense_1", 4, Activation::Relu),
                LayerSpec::dense("dense_2", 1, Activation::Sigmoid),
            ],
        );
        other.save(persistence.architecture_path()).unwrap();

        let err = persistence.load(&NetworkFactory::baseline()).err().unwrap();
        assert!(matches!(err, Error::SchemaMismatch(_)));
    }
}
