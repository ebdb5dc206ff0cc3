//! Stratified partitioning.
//!
//! Both splitters shuffle each class separately and then deal its indices
//! out, so every partition keeps the overall label proportions up to one
//! row per class.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::{Error, Result};

/// One train/held-out partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    /// Zero-based fold index
    pub index: usize,
    /// Training row indices, ascending
    pub train: Vec<usize>,
    /// Held-out row indices, ascending
    pub test: Vec<usize>,
}

/// Stratified k-fold splitter.
#[derive(Debug, Clone, Copy)]
pub struct StratifiedKFold {
    n_splits: usize,
    shuffle: bool,
    seed: Option<u64>,
}

impl StratifiedKFold {
    /// Splitter producing `n_splits` folds without shuffling.
    #[must_use]
    pub const fn new(n_splits: usize) -> Self {
        Self {
            n_splits,
            shuffle: false,
            seed: None,
        }
    }

    /// Shuffle each class before dealing. With `seed == None` a fresh seed
    /// is drawn on every call to [`split`](Self::split).
    #[must_use]
    pub const fn shuffled(mut self, seed: Option<u64>) -> Self {
        self.shuffle = true;
        self.seed = seed;
        self
    }

    /// Number of folds.
    #[must_use]
    pub const fn n_splits(&self) -> usize {
        self.n_splits
    }

    /// Partition `labels` into folds.
    ///
    /// Held-out sets are pairwise disjoint and together cover every row.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `n_splits < 2` or there are fewer
    /// rows than folds.
    pub fn split(&self, labels: &[u8]) -> Result<Vec<Fold>> {
        if self.n_splits < 2 {
            return Err(Error::InvalidInput(format!(
                "need at least 2 folds, got {}",
                self.n_splits
            )));
        }
        if labels.len() < self.n_splits {
            return Err(Error::InvalidInput(format!(
                "cannot split {} rows into {} folds",
                labels.len(),
                self.n_splits
            )));
        }

        let mut by_class = group_by_class(labels);
        if let Some(smallest) = by_class.values().map(Vec::len).min() {
            if smallest < self.n_splits {
                tracing::warn!(
                    "least populated class has {smallest} rows, fewer than {} folds",
                    self.n_splits
                );
            }
        }
        if self.shuffle {
            let mut rng = seeded(self.seed);
            for indices in by_class.values_mut() {
                indices.shuffle(&mut rng);
            }
        }

        let mut assignment = vec![0usize; labels.len()];
        // Continue the round-robin across classes so fold sizes differ by at most one.
        let mut next = 0usize;
        for indices in by_class.values() {
            for &row in indices {
                assignment[row] = next % self.n_splits;
                next += 1;
            }
        }

        let folds = (0..self.n_splits)
            .map(|index| {
                let (test, train): (Vec<usize>, Vec<usize>) =
                    (0..labels.len()).partition(|&row| assignment[row] == index);
                Fold { index, train, test }
            })
            .collect();
        Ok(folds)
    }
}

/// Stratified single train/held-out split.
///
/// Each class contributes `round(count * test_fraction)` rows to the
/// held-out set. Returns `(train, test)` row indices, both ascending.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if `test_fraction` is not in `(0, 1)`.
pub fn train_test_split(
    labels: &[u8],
    test_fraction: f64,
    seed: u64,
) -> Result<(Vec<usize>, Vec<usize>)> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(Error::InvalidInput(format!(
            "test fraction must be in (0, 1), got {test_fraction}"
        )));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::with_capacity(labels.len());
    let mut test = Vec::new();
    for mut indices in group_by_class(labels).into_values() {
        indices.shuffle(&mut rng);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
        let n_test = ((indices.len() as f64) * test_fraction).round() as usize;
        test.extend_from_slice(&indices[..n_test]);
        train.extend_from_slice(&indices[n_test..]);
    }
    train.sort_unstable();
    test.sort_unstable();
    Ok((train, test))
}

fn group_by_class(labels: &[u8]) -> BTreeMap<u8, Vec<usize>> {
    let mut by_class: BTreeMap<u8, Vec<usize>> = BTreeMap::new();
    for (row, &label) in labels.iter().enumerate() {
        by_class.entry(label).or_default().push(row);
    }
    by_class
}

fn seeded(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}
