use serde::{Deserialize, Serialize};

use crate::dataset::FeatureMatrix;
use crate::{Error, Result};

/// Per-column standardisation to zero mean and unit variance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl StandardScaler {
    /// Learn column means and population standard deviations of `x`.
    /// Constant columns get a scale of 1.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `x` has no rows.
    #[allow(clippy::cast_precision_loss)]
    pub fn fit(x: &FeatureMatrix) -> Result<Self> {
        if x.is_empty() {
            return Err(Error::InvalidInput("cannot standardize an empty matrix".to_string()));
        }
        let n = x.rows() as f64;
        let mut mean = vec![0.0; x.cols()];
        for row in x.iter_rows() {
            for (m, v) in mean.iter_mut().zip(row) {
                *m += v;
            }
        }
        mean.iter_mut().for_each(|m| *m /= n);

        let mut variance = vec![0.0; x.cols()];
        for row in x.iter_rows() {
            for ((var, v), m) in variance.iter_mut().zip(row).zip(&mean) {
                *var += (v - m).powi(2);
            }
        }
        let scale = variance
            .into_iter()
            .map(|var| {
                let std = (var / n).sqrt();
                if std > 0.0 {
                    std
                } else {
                    1.0
                }
            })
            .collect();
        Ok(Self { mean, scale })
    }

    /// Column means.
    #[must_use]
    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    /// Column scales.
    #[must_use]
    pub fn scale(&self) -> &[f64] {
        &self.scale
    }

    /// Standardise `x` with the learned statistics.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SchemaMismatch`] if `x` has a different column count.
    pub fn transform(&self, x: &FeatureMatrix) -> Result<FeatureMatrix> {
        if x.cols() != self.mean.len() {
            return Err(Error::SchemaMismatch(format!(
                "scaler was fitted on {} columns, got {}",
                self.mean.len(),
                x.cols()
            )));
        }
        let cols = x.cols().max(1);
        let data = x
            .as_slice()
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let c = i % cols;
                (v - self.mean[c]) / self.scale[c]
            })
            .collect();
        FeatureMatrix::new(x.rows(), x.cols(), data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standardizes_columns() {
        let x = FeatureMatrix::from_rows(&[vec![1.0, 5.0], vec![3.0, 5.0]]).unwrap();
        let scaler = StandardScaler::fit(&x).unwrap();
        assert_eq!(scaler.mean(), &[2.0, 5.0]);
        assert_eq!(scaler.scale(), &[1.0, 1.0]);

        let z = scaler.transform(&x).unwrap();
        assert_eq!(z.as_slice(), &[-1.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_transform_checks_width() {
        let x = FeatureMatrix::from_rows(&[vec![1.0, 2.0]]).unwrap();
        let scaler = StandardScaler::fit(&x).unwrap();
        let wide = FeatureMatrix::from_rows(&[vec![1.0, 2.0, 3.0]]).unwrap();
        assert!(matches!(scaler.transform(&wide), Err(Error::SchemaMismatch(_))));
    }

    #[test]
    fn test_empty_rejected() {
        let x = FeatureMatrix::new(0, 3, vec![]).unwrap();
        assert!(StandardScaler::fit(&x).is_err());
    }
}
