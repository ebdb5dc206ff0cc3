//! Feed-forward network on burn, trained with binary cross-entropy and Adam.
//!
//! The reference topology is [`NetworkFactory::baseline`]:
//!
//! ```text
//! input(9) → dense_1(9, relu) → dense_2(128, relu) → dense_3(64, relu) → dense_4(1, sigmoid)
//! ```
//!
//! Training runs on `Autodiff<NdArray>`; prediction runs on the inner
//! `NdArray` backend through [`AutodiffModule::valid`].

use std::path::Path;

use burn::backend::ndarray::NdArrayDevice;
use burn::backend::{Autodiff, NdArray};
use burn::module::{AutodiffModule, Module, Param};
use burn::nn::loss::BinaryCrossEntropyLossConfig;
use burn::nn::Linear;
use burn::optim::{AdamConfig, GradientsParams, Optimizer as _};
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder, Record, Recorder};
use burn::tensor::activation::{relu, sigmoid};
use burn::tensor::backend::Backend;
use burn::tensor::{ElementConversion, Int, Tensor, TensorData};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use super::{
    Activation, Architecture, CompileOptions, Estimator, EstimatorFactory, Initializer, LayerSpec,
    Loss, Optimizer, TrainingOptions,
};
use crate::dataset::{check_alignment, FeatureMatrix};
use crate::{Error, Result};

type TrainingBackend = Autodiff<NdArray>;
type InferenceBackend = NdArray;

/// Full precision keeps reloaded predictions identical to the saved model's.
type WeightsRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

const DEVICE: NdArrayDevice = NdArrayDevice::Cpu;

/// Mixed into the init seed to derive the minibatch shuffling stream.
const SHUFFLE_STREAM: u64 = 0x9E37_79B9_7F4A_7C15;

/// Dense layers of a [`FeedForwardNetwork`]. Activations are not learned and
/// live in the [`Architecture`].
#[derive(Module, Debug)]
pub struct DenseStack<B: Backend> {
    layers: Vec<Linear<B>>,
}

impl<B: Backend> DenseStack<B> {
    fn init(architecture: &Architecture, rng: &mut StdRng, device: &B::Device) -> Result<Self> {
        let mut inputs = architecture.input_dim;
        let mut layers = Vec::with_capacity(architecture.layers.len());
        for spec in &architecture.layers {
            layers.push(dense_from_rng(spec, inputs, rng, device)?);
            inputs = spec.units;
        }
        Ok(Self { layers })
    }

    /// Output of the last layer before its activation.
    fn forward_logits(&self, x: Tensor<B, 2>, activations: &[Activation]) -> Tensor<B, 2> {
        let last = self.layers.len().saturating_sub(1);
        let mut x = x;
        for (i, (layer, &activation)) in self.layers.iter().zip(activations).enumerate() {
            x = layer.forward(x);
            if i < last {
                x = activate(activation, x);
            }
        }
        x
    }

    fn forward(&self, x: Tensor<B, 2>, activations: &[Activation]) -> Tensor<B, 2> {
        let logits = self.forward_logits(x, activations);
        match activations.last() {
            Some(&activation) => activate(activation, logits),
            None => logits,
        }
    }
}

fn activate<B: Backend>(activation: Activation, x: Tensor<B, 2>) -> Tensor<B, 2> {
    match activation {
        Activation::Relu => relu(x),
        Activation::Sigmoid => sigmoid(x),
        Activation::Linear => x,
    }
}

/// Linear layer with its kernel drawn from `rng` and a zero bias.
#[allow(clippy::cast_possible_truncation)]
fn dense_from_rng<B: Backend>(
    spec: &LayerSpec,
    inputs: usize,
    rng: &mut StdRng,
    device: &B::Device,
) -> Result<Linear<B>> {
    let count = inputs * spec.units;
    let kernel: Vec<f32> = match spec.kernel_initializer {
        Initializer::Normal { stddev } => {
            let normal = Normal::new(0.0, stddev)
                .map_err(|e| Error::SchemaMismatch(format!("layer '{}': {e}", spec.name)))?;
            (0..count).map(|_| normal.sample(rng) as f32).collect()
        }
        Initializer::Zeros => vec![0.0; count],
    };
    let weight = Tensor::<B, 2>::from_floats(TensorData::new(kernel, [inputs, spec.units]), device);
    Ok(Linear {
        weight: Param::from_tensor(weight),
        bias: Some(Param::from_tensor(Tensor::zeros([spec.units], device))),
    })
}

/// Rows of `x` at `rows`, as a `[rows, cols]` tensor.
#[allow(clippy::cast_possible_truncation)]
fn rows_tensor<B: Backend>(x: &FeatureMatrix, rows: &[usize], device: &B::Device) -> Tensor<B, 2> {
    let values: Vec<f32> = rows
        .iter()
        .flat_map(|&r| x.row(r).iter().map(|&v| v as f32))
        .collect();
    Tensor::from_floats(TensorData::new(values, [rows.len(), x.cols()]), device)
}

fn labels_tensor<B: Backend>(y: &[u8], rows: &[usize], device: &B::Device) -> Tensor<B, 2, Int> {
    let values: Vec<i64> = rows.iter().map(|&r| i64::from(y[r])).collect();
    Tensor::from_data(TensorData::new(values, [rows.len(), 1]), device)
}

/// On-disk weights: the module record plus the fingerprint of the
/// architecture it was saved from.
#[derive(Record)]
struct NetworkRecord<B: Backend> {
    architecture: String,
    stack: DenseStackRecord<B>,
}

/// Sequential stack of dense layers.
#[derive(Debug, Clone)]
pub struct FeedForwardNetwork {
    architecture: Architecture,
    activations: Vec<Activation>,
    stack: DenseStack<TrainingBackend>,
    compiled: Option<CompileOptions>,
    seed: u64,
}

impl FeedForwardNetwork {
    /// Uncompiled network with parameters initialised from `seed`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SchemaMismatch`] if the architecture is invalid.
    pub fn new(architecture: Architecture, seed: u64) -> Result<Self> {
        architecture.validate()?;
        let mut rng = StdRng::seed_from_u64(seed);
        let stack = DenseStack::init(&architecture, &mut rng, &DEVICE)?;
        Ok(Self {
            activations: architecture.layers.iter().map(|l| l.activation).collect(),
            architecture,
            stack,
            compiled: None,
            seed,
        })
    }

    fn check_input(&self, x: &FeatureMatrix) -> Result<()> {
        if x.cols() != self.architecture.input_dim {
            return Err(Error::SchemaMismatch(format!(
                "estimator expects {} features, got {}",
                self.architecture.input_dim,
                x.cols()
            )));
        }
        Ok(())
    }
}

impl Estimator for FeedForwardNetwork {
    fn architecture(&self) -> Architecture {
        self.architecture.clone()
    }

    fn save_weights(&self, path: &Path) -> Result<()> {
        let record = NetworkRecord {
            architecture: self.architecture.fingerprint()?,
            stack: self.stack.clone().into_record(),
        };
        WeightsRecorder::new()
            .record(record, path.to_path_buf())
            .map_err(|e| Error::storage(path, format!("{e:?}")))
    }

    fn load_weights(&mut self, path: &Path) -> Result<()> {
        let record: NetworkRecord<TrainingBackend> = WeightsRecorder::new()
            .load(path.to_path_buf(), &DEVICE)
            .map_err(|e| Error::storage(path, format!("{e:?}")))?;
        let expected = self.architecture.fingerprint()?;
        if record.architecture != expected {
            return Err(Error::SchemaMismatch(format!(
                "weights were saved for architecture {}, found {expected}",
                record.architecture
            )));
        }
        self.stack = self.stack.clone().load_record(record.stack);
        Ok(())
    }

    fn compile(&mut self, options: &CompileOptions) {
        self.compiled = Some(*options);
    }

    fn is_compiled(&self) -> bool {
        self.compiled.is_some()
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    fn fit(&mut self, x: &FeatureMatrix, y: &[u8], options: &TrainingOptions) -> Result<()> {
        let Some(compiled) = self.compiled else {
            return Err(Error::Training("estimator must be compiled before fit".to_string()));
        };
        let single_sigmoid = self
            .architecture
            .layers
            .last()
            .is_some_and(|out| out.units == 1 && out.activation == Activation::Sigmoid);
        if compiled.loss != Loss::BinaryCrossentropy || !single_sigmoid {
            return Err(Error::Training(
                "binary cross-entropy needs a single sigmoid output".to_string(),
            ));
        }
        self.check_input(x)?;
        check_alignment(x, y)?;
        if x.is_empty() || options.epochs == 0 || options.batch_size == 0 {
            return Err(Error::Training(format!(
                "nothing to train: {} rows, {} epochs, batch size {}",
                x.rows(),
                options.epochs,
                options.batch_size
            )));
        }

        let Optimizer::Adam {
            learning_rate,
            beta_1,
            beta_2,
            epsilon,
        } = compiled.optimizer;
        let mut optimizer = AdamConfig::new()
            .with_beta_1(beta_1 as f32)
            .with_beta_2(beta_2 as f32)
            .with_epsilon(epsilon as f32)
            .init();
        // the last sigmoid is folded into the loss
        let loss_fn = BinaryCrossEntropyLossConfig::new()
            .with_logits(true)
            .init::<TrainingBackend>(&DEVICE);

        let mut stack = self.stack.clone();
        let mut rng = StdRng::seed_from_u64(self.seed ^ SHUFFLE_STREAM);
        let mut order: Vec<usize> = (0..x.rows()).collect();

        for epoch in 0..options.epochs {
            order.shuffle(&mut rng);
            let mut total_loss = 0.0;
            for batch in order.chunks(options.batch_size) {
                let logits = stack.forward_logits(rows_tensor(x, batch, &DEVICE), &self.activations);
                let loss = loss_fn.forward(logits, labels_tensor(y, batch, &DEVICE));
                total_loss += loss.clone().into_scalar().elem::<f64>() * batch.len() as f64;

                let grads = GradientsParams::from_grads(loss.backward(), &stack);
                stack = optimizer.step(learning_rate, stack, grads);
            }
            let mean_loss = total_loss / x.rows() as f64;
            if !mean_loss.is_finite() {
                return Err(Error::Training(format!("loss diverged at epoch {}", epoch + 1)));
            }
            tracing::trace!(epoch = epoch + 1, loss = mean_loss, "epoch finished");
        }
        self.stack = stack;
        Ok(())
    }

    fn predict(&self, x: &FeatureMatrix) -> Result<Vec<f64>> {
        self.check_input(x)?;
        if x.is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<usize> = (0..x.rows()).collect();
        let stack: DenseStack<InferenceBackend> = self.stack.valid();
        let scores = stack.forward(rows_tensor(x, &rows, &DEVICE), &self.activations);
        let values = scores
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| Error::Training(format!("cannot read scores: {e:?}")))?;
        Ok(values.into_iter().map(f64::from).collect())
    }
}

/// Builds [`FeedForwardNetwork`]s of one architecture.
#[derive(Debug, Clone)]
pub struct NetworkFactory {
    architecture: Architecture,
    compile: CompileOptions,
}

impl NetworkFactory {
    /// Factory for `architecture`, compiled with binary cross-entropy + Adam.
    #[must_use]
    pub fn new(architecture: Architecture) -> Self {
        Self {
            architecture,
            compile: CompileOptions::default(),
        }
    }

    /// Reference DGA classifier over 9 features.
    #[must_use]
    pub fn baseline() -> Self {
        Self::new(Architecture::sequential(
            9,
            vec![
                LayerSpec::dense("dense_1", 9, Activation::Relu),
                LayerSpec::dense("dense_2", 128, Activation::Relu),
                LayerSpec::dense("dense_3", 64, Activation::Relu),
                LayerSpec::dense("dense_4", 1, Activation::Sigmoid),
            ],
        ))
    }

    /// Override loss/optimiser.
    #[must_use]
    pub fn with_compile_options(mut self, compile: CompileOptions) -> Self {
        self.compile = compile;
        self
    }

    /// Architecture this factory builds.
    #[must_use]
    pub const fn architecture(&self) -> &Architecture {
        &self.architecture
    }
}

impl EstimatorFactory for NetworkFactory {
    fn build(&self, seed: u64) -> Result<Box<dyn Estimator>> {
        let mut network = FeedForwardNetwork::new(self.architecture.clone(), seed)?;
        network.compile(&self.compile);
        Ok(Box::new(network))
    }

    fn from_architecture(&self, architecture: &Architecture) -> Result<Box<dyn Estimator>> {
        if architecture.class_name != "Sequential" {
            return Err(Error::SchemaMismatch(format!(
                "cannot build a '{}' estimator",
                architecture.class_name
            )));
        }
        Ok(Box::new(FeedForwardNetwork::new(architecture.clone(), 0)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_factory() -> NetworkFactory {
        NetworkFactory::new(Architecture::sequential(
            2,
            vec![
                LayerSpec::dense("dense_1", 8, Activation::Relu),
                LayerSpec {
                    kernel_initializer: Initializer::Normal { stddev: 0.5 },
                    ..LayerSpec::dense("dense_2", 1, Activation::Sigmoid)
                },
            ],
        ))
        .with_compile_options(CompileOptions {
            loss: Loss::BinaryCrossentropy,
            optimizer: Optimizer::Adam {
                learning_rate: 0.05,
                beta_1: 0.9,
                beta_2: 0.999,
                epsilon: 1e-7,
            },
        })
    }

    /// Two well separated blobs.
    fn blobs() -> (FeatureMatrix, Vec<u8>) {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for i in 0..40 {
            let jitter = f64::from(i % 5) * 0.1;
            rows.push(vec![-2.0 + jitter, -1.5 - jitter]);
            labels.push(0);
            rows.push(vec![2.0 - jitter, 1.5 + jitter]);
            labels.push(1);
        }
        (FeatureMatrix::from_rows(&rows).unwrap(), labels)
    }

    #[test]
    fn test_same_seed_same_predictions() {
        let (x, _) = blobs();
        let a = small_factory().build(3).unwrap().predict(&x).unwrap();
        let b = small_factory().build(3).unwrap().predict(&x).unwrap();
        let c = small_factory().build(4).unwrap().predict(&x).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_scores_are_probabilities() {
        let (x, _) = blobs();
        let scores = small_factory().build(1).unwrap().predict(&x).unwrap();
        assert_eq!(scores.len(), 80);
        assert!(scores.iter().all(|s| (0.0..=1.0).contains(s)));
    }

    #[test]
    fn test_learns_separable_blobs() {
        let (x, y) = blobs();
        let mut network = small_factory().build(1).unwrap();
        network
            .fit(&x, &y, &TrainingOptions { epochs: 30, batch_size: 8 })
            .unwrap();

        let scores = network.predict(&x).unwrap();
        let correct = scores
            .iter()
            .zip(&y)
            .filter(|&(s, &l)| (*s > 0.5) == (l == 1))
            .count();
        assert!(correct >= 76, "only {correct}/80 correct");
    }

    #[test]
    fn test_uncompiled_fit_fails() {
        let (x, y) = blobs();
        let mut bare = small_factory()
            .from_architecture(small_factory().architecture())
            .unwrap();
        assert!(!bare.is_compiled());
        let err = bare.fit(&x, &y, &TrainingOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Training(_)));
    }

    #[test]
    fn test_weights_round_trip_through_recorder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.mpk");
        let (x, y) = blobs();
        let mut trained = small_factory().build(1).unwrap();
        trained
            .fit(&x, &y, &TrainingOptions { epochs: 2, batch_size: 8 })
            .unwrap();
        trained.save_weights(&path).unwrap();

        let mut restored = small_factory()
            .from_architecture(small_factory().architecture())
            .unwrap();
        restored.load_weights(&path).unwrap();
        assert_eq!(restored.predict(&x).unwrap(), trained.predict(&x).unwrap());
    }

    #[test]
    fn test_weights_of_other_architecture_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.mpk");
        small_factory().build(1).unwrap().save_weights(&path).unwrap();

        let mut other = NetworkFactory::baseline().build(1).unwrap();
        let x = FeatureMatrix::new(2, 9, vec![0.5; 18]).unwrap();
        let before = other.predict(&x).unwrap();
        let err = other.load_weights(&path).unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch(_)));
        assert_eq!(other.predict(&x).unwrap(), before);
    }

    #[test]
    fn test_missing_weights_file_is_storage_fault() {
        let dir = tempfile::tempdir().unwrap();
        let mut network = small_factory().build(1).unwrap();
        let err = network.load_weights(&dir.path().join("absent.mpk")).unwrap_err();
        assert!(matches!(err, Error::StorageFault { .. }));
    }

    #[test]
    fn test_predict_checks_width() {
        let network = small_factory().build(1).unwrap();
        let x = FeatureMatrix::new(1, 3, vec![0.0; 3]).unwrap();
        assert!(matches!(network.predict(&x), Err(Error::SchemaMismatch(_))));
    }

    #[test]
    fn test_baseline_topology() {
        let arch = NetworkFactory::baseline().architecture().clone();
        assert_eq!(arch.input_dim, 9);
        let units: Vec<usize> = arch.layers.iter().map(|l| l.units).collect();
        assert_eq!(units, vec![9, 128, 64, 1]);
        assert_eq!(arch.parameter_count(), 90 + 1280 + 8256 + 65);
    }
}
