//! Experiment directories, their log, and metric results.
//!
//! ## Layout
//!
//! ```text
//! saved models/
//! └── 2018-03-14 09:26 [tag]/
//!     ├── model_architecture.json   (ModelPersistence)
//!     ├── model_weights.mpk         (ModelPersistence)
//!     ├── model.png                 (best effort)
//!     ├── standardizer.json         (optional)
//!     ├── results.log               (ResultsLog, append-only)
//!     └── data.json                 (ResultAggregator)
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use dga_nn::config::ExperimentConfig;
//! use dga_nn::experiment::{ExperimentDirectory, MetricRecord, ResultAggregator, ResultsLog};
//!
//! # fn main() -> dga_nn::Result<()> {
//! # let root = tempfile::tempdir()?;
//! let config = ExperimentConfig::default().with_root(root.path());
//! let directory = ExperimentDirectory::resolve(None, &config)?;
//! let log = Arc::new(ResultsLog::open(directory.path())?);
//!
//! let mut record = MetricRecord::new();
//! record.insert("f1", vec![0.91, 0.93])?;
//!
//! let aggregator = ResultAggregator::new(directory.path(), log);
//! aggregator.summarize(&record);
//! aggregator.persist(&record);
//! assert_eq!(aggregator.reload()?, record);
//! # Ok(())
//! # }
//! ```

mod directory;
mod results;
mod results_log;

pub use directory::{experiment_name, ExperimentDirectory, EXPERIMENT_NAME_FORMAT};
pub use results::{is_timing_metric, MetricRecord, MetricSummary, ResultAggregator, RESULTS_FILE};
pub use results_log::{Level, ResultsLog, RESULTS_LOG_FILE};
