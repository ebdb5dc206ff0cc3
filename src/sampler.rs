//! Temperature-scaled categorical sampling.
//!
//! Input is a batch of sequences of probability vectors (`[item][position][class]`);
//! output is one sampled class index per item and position. Each vector is
//! reweighted as `exp(ln(p) / T)`, renormalised and sampled once. `T = 1`
//! samples from `p` itself, lower temperatures sharpen towards the mode.

use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::RunConfig;
use crate::{Error, Result};

/// Seedable categorical sampler.
#[derive(Debug, Clone)]
pub struct Sampler {
    temperature: f64,
    rng: StdRng,
}

impl Sampler {
    /// Sampler at temperature 1 seeded with `seed`.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            temperature: 1.0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Sampler seeded from the run's numeric seed.
    #[must_use]
    pub fn from_config(config: &RunConfig) -> Self {
        Self::new(config.numeric_seed)
    }

    /// Set the temperature.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] unless `temperature` is finite and > 0.
    pub fn with_temperature(mut self, temperature: f64) -> Result<Self> {
        if !(temperature.is_finite() && temperature > 0.0) {
            return Err(Error::InvalidInput(format!(
                "temperature must be finite and positive, got {temperature}"
            )));
        }
        self.temperature = temperature;
        Ok(self)
    }

    /// Current temperature.
    #[must_use]
    pub const fn temperature(&self) -> f64 {
        self.temperature
    }

    /// Sample one class index for every `(item, position)` of `batch`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] naming the offending item and
    /// position if a probability vector is unusable.
    pub fn sample(&mut self, batch: &[Vec<Vec<f64>>]) -> Result<Vec<Vec<usize>>> {
        batch
            .iter()
            .enumerate()
            .map(|(j, item)| {
                item.iter()
                    .enumerate()
                    .map(|(i, probs)| {
                        self.sample_index(probs).map_err(|e| {
                            Error::InvalidInput(format!("item {j}, position {i}: {e}"))
                        })
                    })
                    .collect::<Result<Vec<usize>>>()
            })
            .collect()
    }

    /// Sample a single index from one probability vector.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the vector is empty, contains a
    /// negative or non-finite entry, or has no mass.
    pub fn sample_index(&mut self, probs: &[f64]) -> Result<usize> {
        let weights = self.reweight(probs)?;
        let dist = WeightedIndex::new(&weights)
            .map_err(|e| Error::InvalidInput(format!("cannot sample from {probs:?}: {e}")))?;
        Ok(dist.sample(&mut self.rng))
    }

    /// `exp(ln(p) / T)` shifted by the maximum log weight; zero entries stay zero.
    fn reweight(&self, probs: &[f64]) -> Result<Vec<f64>> {
        if let Some(bad) = probs.iter().find(|p| !p.is_finite() || **p < 0.0) {
            return Err(Error::InvalidInput(format!("invalid probability {bad}")));
        }
        let logits: Vec<f64> = probs.iter().map(|p| p.ln() / self.temperature).collect();
        let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if max == f64::NEG_INFINITY {
            return Err(Error::InvalidInput("probability vector has no mass".to_string()));
        }
        Ok(logits.into_iter().map(|l| (l - max).exp()).collect())
    }
}
