//! # dga-nn: Neural DGA Domain Classifier
//!
//! Trains and evaluates a small feed-forward network that separates
//! legitimate domain names from algorithmically generated ones, using
//! per-domain feature vectors.
//!
//! ## Components
//!
//! - **Experiments**: every run writes into a timestamped directory holding
//!   the model architecture, its weights, a layer diagram, `results.log` and
//!   the per-fold metric document `data.json`.
//! - **Cross-validation**: stratified k-fold over a standardize → network
//!   pipeline, folds trained in parallel, fitted standardizers cached for
//!   the duration of the run.
//! - **Comparison**: a trained model against a persisted baseline on the
//!   single and merged dataset variants.
//! - **Sampling**: temperature-scaled categorical sampling of per-position
//!   class distributions.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dga_nn::config::AppConfig;
//! use dga_nn::cross_validation::CrossValidationRunner;
//! use dga_nn::dataset::{DatasetSource, ParquetDatasetSource};
//! use dga_nn::model::NetworkFactory;
//!
//! let config = AppConfig::default();
//! let data = ParquetDatasetSource::new("data").load_both_datasets(None, true)?;
//! let runner = CrossValidationRunner::new(
//!     config.cross_validation,
//!     config.run,
//!     config.experiment,
//! );
//! let outcome = runner.run(data.features(), data.labels(), Arc::new(NetworkFactory::baseline()))?;
//! println!("results in {}", outcome.model.directory().display());
//! # Ok::<(), dga_nn::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod compare;
pub mod config;
pub mod cross_validation;
pub mod dataset;
pub mod error;
pub mod experiment;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod sampler;

pub use error::{Error, Result};
