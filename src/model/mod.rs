//! Estimators, their persisted form, and the [`Model`] façade.
//!
//! An [`Estimator`] is anything trainable that can describe its structure as
//! an [`Architecture`] and write its learned parameters to, and read them
//! back from, a weights file. An [`EstimatorFactory`] builds fresh estimators
//! and rebuilds bare ones from a persisted architecture.

mod diagram;
mod facade;
pub mod network;
mod persistence;

use std::path::Path;

use burn::config::Config;
use serde::{Deserialize, Serialize};

pub use diagram::render_diagram;
pub use facade::{Model, STANDARDIZER_FILE, TARGET_NAMES};
pub use network::{DenseStack, FeedForwardNetwork, NetworkFactory};
pub use persistence::{ModelPersistence, ARCHITECTURE_FILE, DIAGRAM_FILE, WEIGHTS_FILE};

use crate::dataset::FeatureMatrix;
use crate::Error;

/// Element-wise activation of a dense layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    /// `max(0, z)`
    Relu,
    /// `1 / (1 + e^-z)`
    Sigmoid,
    /// Identity
    Linear,
}

/// Kernel initialisation scheme.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "class_name")]
pub enum Initializer {
    /// Zero-mean normal distribution
    Normal {
        /// Standard deviation
        stddev: f64,
    },
    /// All zeros
    Zeros,
}

impl Default for Initializer {
    fn default() -> Self {
        Self::Normal { stddev: 0.05 }
    }
}

/// One fully connected layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSpec {
    /// Layer name, used to name its weight tensors
    pub name: String,
    /// Output width
    pub units: usize,
    /// Activation applied to the output
    pub activation: Activation,
    /// Kernel initialisation
    #[serde(default)]
    pub kernel_initializer: Initializer,
}

impl LayerSpec {
    /// Dense layer with the default normal initialiser.
    #[must_use]
    pub fn dense(name: impl Into<String>, units: usize, activation: Activation) -> Self {
        Self {
            name: name.into(),
            units,
            activation,
            kernel_initializer: Initializer::default(),
        }
    }
}

/// Structural description of a sequential estimator, independent of its
/// learned parameters. Saved as `model_architecture.json`.
#[derive(Config, Debug, PartialEq)]
pub struct Architecture {
    /// Estimator kind, e.g. `"Sequential"`
    pub class_name: String,
    /// Expected feature count
    pub input_dim: usize,
    /// Layers, input side first
    pub layers: Vec<LayerSpec>,
}

impl Architecture {
    /// Sequential architecture over `input_dim` features.
    #[must_use]
    pub fn sequential(input_dim: usize, layers: Vec<LayerSpec>) -> Self {
        Self {
            class_name: "Sequential".to_string(),
            input_dim,
            layers,
        }
    }

    /// Check that the architecture can be instantiated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SchemaMismatch`] for empty architectures, zero-width
    /// layers or invalid initialisers.
    pub fn validate(&self) -> crate::Result<()> {
        if self.input_dim == 0 || self.layers.is_empty() {
            return Err(Error::SchemaMismatch(
                "architecture needs a non-zero input width and at least one layer".to_string(),
            ));
        }
        for layer in &self.layers {
            if layer.units == 0 {
                return Err(Error::SchemaMismatch(format!("layer '{}' has zero units", layer.name)));
            }
            if let Initializer::Normal { stddev } = layer.kernel_initializer {
                if !stddev.is_finite() || stddev < 0.0 {
                    return Err(Error::SchemaMismatch(format!(
                        "layer '{}' has invalid stddev {stddev}",
                        layer.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Name and shape of every weight tensor, in storage order.
    #[must_use]
    pub fn weight_shapes(&self) -> Vec<(String, Vec<usize>)> {
        let mut inputs = self.input_dim;
        let mut shapes = Vec::with_capacity(self.layers.len() * 2);
        for layer in &self.layers {
            shapes.push((format!("{}/kernel", layer.name), vec![inputs, layer.units]));
            shapes.push((format!("{}/bias", layer.name), vec![layer.units]));
            inputs = layer.units;
        }
        shapes
    }

    /// Total number of learned parameters.
    #[must_use]
    pub fn parameter_count(&self) -> usize {
        self.weight_shapes()
            .iter()
            .map(|(_, shape)| shape.iter().product::<usize>())
            .sum()
    }

    /// Stable digest of the architecture, stored alongside weights.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the architecture cannot be serialized.
    pub fn fingerprint(&self) -> crate::Result<String> {
        let canonical = serde_json::to_string(self)?;
        Ok(format!("{:016x}", trueno::hash_key(&canonical)))
    }

    /// Layer table in the usual `Layer / Output Shape / Param #` layout.
    #[must_use]
    pub fn summary_lines(&self) -> Vec<String> {
        let rule = "_".repeat(65);
        let mut lines = vec![
            rule.clone(),
            format!("{:<29}{:<26}{}", "Layer (type)", "Output Shape", "Param #"),
            "=".repeat(65),
        ];
        let mut inputs = self.input_dim;
        for layer in &self.layers {
            let params = inputs * layer.units + layer.units;
            lines.push(format!(
                "{:<29}{:<26}{}",
                format!("{} (Dense)", layer.name),
                format!("(None, {})", layer.units),
                params
            ));
            inputs = layer.units;
        }
        lines.push("=".repeat(65));
        lines.push(format!("Total params: {}", self.parameter_count()));
        lines.push(rule);
        lines
    }
}

/// Training loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Loss {
    /// Log loss for a single sigmoid output
    #[default]
    BinaryCrossentropy,
}

/// Gradient-based optimiser.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Optimizer {
    /// Adam (Kingma & Ba, 2015)
    Adam {
        /// Step size
        learning_rate: f64,
        /// First moment decay
        beta_1: f64,
        /// Second moment decay
        beta_2: f64,
        /// Numerical stability term
        epsilon: f64,
    },
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::Adam {
            learning_rate: 0.001,
            beta_1: 0.9,
            beta_2: 0.999,
            epsilon: 1e-7,
        }
    }
}

/// Loss and optimiser an estimator is compiled with.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CompileOptions {
    /// Loss function
    pub loss: Loss,
    /// Optimiser
    pub optimizer: Optimizer,
}

/// Epochs and minibatch size for one call to [`Estimator::fit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingOptions {
    /// Passes over the training data
    pub epochs: usize,
    /// Rows per gradient step
    pub batch_size: usize,
}

impl Default for TrainingOptions {
    fn default() -> Self {
        Self {
            epochs: 1,
            batch_size: 32,
        }
    }
}

/// A trainable binary classifier producing scores in `[0, 1]`.
pub trait Estimator: Send {
    /// Structural description.
    fn architecture(&self) -> Architecture;

    /// Write every learned parameter to `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageFault`] if the file cannot be written.
    fn save_weights(&self, path: &Path) -> crate::Result<()>;

    /// Replace every learned parameter with the ones saved at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageFault`] if the file is missing or unreadable
    /// and [`Error::SchemaMismatch`] if it was written for another
    /// architecture; the estimator is left unchanged in both cases.
    fn load_weights(&mut self, path: &Path) -> crate::Result<()>;

    /// Attach loss and optimiser; required before [`fit`](Self::fit).
    fn compile(&mut self, options: &CompileOptions);

    /// True once [`compile`](Self::compile) has been called.
    fn is_compiled(&self) -> bool;

    /// Train on `x` / `y`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Training`] if the estimator is not compiled or
    /// training diverges, and an input error for misaligned data.
    fn fit(&mut self, x: &FeatureMatrix, y: &[u8], options: &TrainingOptions) -> crate::Result<()>;

    /// Positive-class score for every row of `x`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SchemaMismatch`] if `x` has the wrong column count.
    fn predict(&self, x: &FeatureMatrix) -> crate::Result<Vec<f64>>;

    /// Human-readable layer table.
    fn summary(&self) -> Vec<String> {
        self.architecture().summary_lines()
    }
}

/// Builds estimators of one family.
pub trait EstimatorFactory: Send + Sync {
    /// Fresh, compiled estimator with parameters initialised from `seed`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured architecture is invalid.
    fn build(&self, seed: u64) -> crate::Result<Box<dyn Estimator>>;

    /// Bare, uncompiled estimator with the structure of `architecture`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SchemaMismatch`] if this factory cannot build the
    /// described architecture.
    fn from_architecture(&self, architecture: &Architecture) -> crate::Result<Box<dyn Estimator>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arch() -> Architecture {
        Architecture::sequential(
            3,
            vec![
                LayerSpec::dense("dense_1", 4, Activation::Relu),
                LayerSpec::dense("dense_2", 1, Activation::Sigmoid),
            ],
        )
    }

    #[test]
    fn test_weight_shapes() {
        let shapes = arch().weight_shapes();
        assert_eq!(shapes.len(), 4);
        assert_eq!(shapes[0], ("dense_1/kernel".to_string(), vec![3, 4]));
        assert_eq!(shapes[3], ("dense_2/bias".to_string(), vec![1]));
        assert_eq!(arch().parameter_count(), 3 * 4 + 4 + 4 + 1);
    }

    #[test]
    fn test_fingerprint_tracks_structure() {
        let mut other = arch();
        other.layers[0].units = 5;
        assert_eq!(arch().fingerprint().unwrap(), arch().fingerprint().unwrap());
        assert_ne!(arch().fingerprint().unwrap(), other.fingerprint().unwrap());
    }

    #[test]
    fn test_validate_rejects_zero_units() {
        let mut bad = arch();
        bad.layers[1].units = 0;
        assert!(matches!(bad.validate(), Err(Error::SchemaMismatch(_))));
        assert!(Architecture::sequential(3, vec![]).validate().is_err());
    }

    #[test]
    fn test_architecture_json_shape() {
        let json = serde_json::to_value(arch()).unwrap();
        assert_eq!(json["class_name"], "Sequential");
        assert_eq!(json["layers"][0]["activation"], "relu");
        assert_eq!(json["layers"][0]["kernel_initializer"]["class_name"], "normal");
    }

    #[test]
    fn test_summary_totals() {
        let lines = arch().summary_lines();
        assert!(lines.iter().any(|l| l == "Total params: 21"));
    }

    #[test]
    fn test_architecture_document_round_trip() {
        let json = arch().to_string();
        assert_eq!(Architecture::load_binary(json.as_bytes()).unwrap(), arch());
    }
}
