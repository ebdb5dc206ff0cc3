//! Standardize → estimator pipeline with cached standardization.
//!
//! The standardizer is fitted on the training rows only; held-out rows are
//! transformed with the training statistics.

pub mod cache;
mod scaler;

use std::sync::Arc;

pub use cache::{CacheBackend, CacheKey, DiskCacheBackend, FitCache, MemoryCacheBackend};
pub use scaler::StandardScaler;

use crate::dataset::{check_alignment, FeatureMatrix};
use crate::model::{Estimator, EstimatorFactory, TrainingOptions};
use crate::Result;

const STANDARDIZE_STEP: &str = "standardize";
const STANDARDIZE_PARAMS: &str = "with_mean=true,with_std=true";

/// Unfitted pipeline: a standardizer followed by a freshly built estimator.
#[derive(Clone)]
pub struct Pipeline {
    factory: Arc<dyn EstimatorFactory>,
    training: TrainingOptions,
    cache: Option<Arc<FitCache>>,
}

impl Pipeline {
    /// Pipeline building its estimator from `factory`.
    #[must_use]
    pub fn new(factory: Arc<dyn EstimatorFactory>, training: TrainingOptions) -> Self {
        Self {
            factory,
            training,
            cache: None,
        }
    }

    /// Share fitted standardizers through `cache`.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<FitCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Fit the standardizer (or load it from the cache) and train a new
    /// estimator built with `seed` on the standardized rows.
    ///
    /// # Errors
    ///
    /// Propagates data validation, cache, build and training errors.
    pub fn fit(&self, x: &FeatureMatrix, y: &[u8], seed: u64) -> Result<FittedPipeline> {
        check_alignment(x, y)?;
        let scaler = match &self.cache {
            Some(cache) => {
                let key = CacheKey::new(STANDARDIZE_STEP, cache.fingerprint(x), STANDARDIZE_PARAMS);
                cache.fit_or_load(&key, || StandardScaler::fit(x))?
            }
            None => StandardScaler::fit(x)?,
        };
        let standardized = scaler.transform(x)?;
        let mut estimator = self.factory.build(seed)?;
        estimator.fit(&standardized, y, &self.training)?;
        Ok(FittedPipeline { scaler, estimator })
    }
}

/// Trained pipeline.
pub struct FittedPipeline {
    scaler: StandardScaler,
    estimator: Box<dyn Estimator>,
}

impl FittedPipeline {
    /// Positive-class scores for `x`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::SchemaMismatch`] on a column count mismatch.
    pub fn predict_scores(&self, x: &FeatureMatrix) -> Result<Vec<f64>> {
        self.estimator.predict(&self.scaler.transform(x)?)
    }

    /// Fitted standardizer.
    #[must_use]
    pub const fn scaler(&self) -> &StandardScaler {
        &self.scaler
    }

    /// Trained estimator.
    #[must_use]
    pub fn estimator(&self) -> &dyn Estimator {
        self.estimator.as_ref()
    }
}
