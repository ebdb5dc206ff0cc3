//! Parallel stratified k-fold cross-validation of the standardize →
//! estimator pipeline.
//!
//! Each fold runs on a rayon worker with its own freshly built estimator.
//! Fitted standardizers are shared between folds through a run-scoped
//! [`FitCache`] that is dropped (and, for the disk backend, deleted) when
//! the run ends. After all folds finish, an untrained estimator is wrapped
//! in a fresh [`Model`] that receives the summary, the metric document and
//! the saved artifacts.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Local};
use rayon::prelude::*;

use crate::config::{CrossValidationConfig, ExperimentConfig, RunConfig};
use crate::dataset::{check_alignment, FeatureMatrix, Fold, StratifiedKFold};
use crate::experiment::MetricRecord;
use crate::metrics::{f1, precision, predict_classes, recall, roc_auc};
use crate::model::{EstimatorFactory, Model, TrainingOptions};
use crate::pipeline::{FitCache, Pipeline};
use crate::{Error, Result};

/// Metric keys recorded per fold, in the order they are computed.
pub const METRIC_KEYS: [&str; 6] = ["fit_time", "score_time", "precision", "recall", "f1", "roc_auc"];

/// Scores of one fold.
#[derive(Debug, Clone, Copy, PartialEq)]
struct FoldScores {
    fit_time: f64,
    score_time: f64,
    precision: f64,
    recall: f64,
    f1: f64,
    roc_auc: f64,
}

impl FoldScores {
    const fn values(&self) -> [f64; 6] {
        [
            self.fit_time,
            self.score_time,
            self.precision,
            self.recall,
            self.f1,
            self.roc_auc,
        ]
    }
}

/// Result of a cross-validation run.
#[derive(Debug)]
pub struct CrossValidationOutcome {
    /// Per-fold metrics, one value per fold for every key in [`METRIC_KEYS`]
    pub record: MetricRecord,
    /// Fresh model holding the run's artifacts
    pub model: Model,
    /// Wall-clock start
    pub started_at: DateTime<Local>,
    /// Wall-clock end
    pub finished_at: DateTime<Local>,
    /// Standardizer fits answered from the cache
    pub cache_hits: usize,
    /// Standardizer fits that had to be computed
    pub cache_misses: usize,
}

/// Runs cross-validation and records it as a new experiment.
#[derive(Debug, Clone, Default)]
pub struct CrossValidationRunner {
    config: CrossValidationConfig,
    run: RunConfig,
    experiment: ExperimentConfig,
}

impl CrossValidationRunner {
    /// Runner with the given fold, seed and experiment settings.
    #[must_use]
    pub fn new(config: CrossValidationConfig, run: RunConfig, experiment: ExperimentConfig) -> Self {
        Self {
            config,
            run,
            experiment,
        }
    }

    /// Cross-validate estimators from `factory` on `x` / `y`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for unusable data or fold settings,
    /// [`Error::FoldFailure`] if any fold fails (no partial results are
    /// kept) and [`Error::StorageFault`] if the experiment cannot be
    /// created or its model cannot be saved. A live model already recording
    /// into this minute's directory sends the run to a sibling directory.
    pub fn run(
        &self,
        x: &FeatureMatrix,
        y: &[u8],
        factory: Arc<dyn EstimatorFactory>,
    ) -> Result<CrossValidationOutcome> {
        let started_at = Local::now();
        let clock = Instant::now();
        tracing::info!("Starting cross validation at {started_at}");
        check_alignment(x, y)?;

        let folds = StratifiedKFold::new(self.config.fold_count)
            .shuffled(self.run.shuffle_seed)
            .split(y)?;
        let cache = Arc::new(FitCache::for_storage(self.config.cache, self.run.hash_seed)?);
        let pipeline = Pipeline::new(
            Arc::clone(&factory),
            TrainingOptions {
                epochs: self.config.epochs,
                batch_size: self.config.batch_size,
            },
        )
        .with_cache(Arc::clone(&cache));

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.n_jobs.unwrap_or(0))
            .thread_name(|i| format!("cv-fold-{i}"))
            .build()
            .map_err(|e| Error::Other(format!("cannot start fold workers: {e}")))?;
        let numeric_seed = self.run.numeric_seed;
        let scores: Vec<FoldScores> = pool.install(|| {
            folds
                .par_iter()
                .map(|fold| {
                    run_fold(&pipeline, x, y, fold, numeric_seed).map_err(|e| Error::FoldFailure {
                        fold: fold.index,
                        reason: e.to_string(),
                    })
                })
                .collect::<Result<Vec<_>>>()
        })?;
        let (cache_hits, cache_misses) = (cache.hits(), cache.misses());
        drop(pipeline);
        drop(cache);

        let mut record = MetricRecord::new();
        for (i, key) in METRIC_KEYS.iter().enumerate() {
            record.insert(*key, scores.iter().map(|s| s.values()[i]).collect())?;
        }

        let model = Model::fresh_or_sibling(factory.build(numeric_seed)?, &self.experiment)?;
        model
            .log()
            .info(&format!("Starting cross validation at {started_at}"));
        model.log().info(&format!(
            "{} folds on {} rows, {} epochs, batch size {}",
            folds.len(),
            x.rows(),
            self.config.epochs,
            self.config.batch_size
        ));
        model.log_summary();
        model.save_results(&record);
        model.save_model()?;

        let finished_at = Local::now();
        model.log().info(&format!(
            "Cross Validation Ended. Elapsed time: {:.3}s",
            clock.elapsed().as_secs_f64()
        ));
        Ok(CrossValidationOutcome {
            record,
            model,
            started_at,
            finished_at,
            cache_hits,
            cache_misses,
        })
    }
}

fn run_fold(
    pipeline: &Pipeline,
    x: &FeatureMatrix,
    y: &[u8],
    fold: &Fold,
    numeric_seed: u64,
) -> Result<FoldScores> {
    let x_train = x.select_rows(&fold.train);
    let y_train: Vec<u8> = fold.train.iter().map(|&i| y[i]).collect();
    let x_test = x.select_rows(&fold.test);
    let y_test: Vec<u8> = fold.test.iter().map(|&i| y[i]).collect();

    let clock = Instant::now();
    let fitted = pipeline.fit(&x_train, &y_train, numeric_seed.wrapping_add(fold.index as u64))?;
    let fit_time = clock.elapsed().as_secs_f64();

    let clock = Instant::now();
    let scores = fitted.predict_scores(&x_test)?;
    let predicted = predict_classes(&scores);
    let result = FoldScores {
        fit_time,
        score_time: 0.0,
        precision: precision(&y_test, &predicted),
        recall: recall(&y_test, &predicted),
        f1: f1(&y_test, &predicted),
        roc_auc: roc_auc(&y_test, &scores),
    };
    let score_time = clock.elapsed().as_secs_f64();
    tracing::debug!(
        fold = fold.index,
        fit_time,
        score_time,
        f1 = result.f1,
        "fold finished"
    );
    Ok(FoldScores { score_time, ..result })
}
