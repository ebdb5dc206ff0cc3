//! Parquet-backed dataset source (Arrow columnar format)
//!
//! Each dataset is one file `<dir>/<name>.parquet`. Every column except the
//! label column is a numeric feature and is cast to `Float64`; the label
//! column is cast to `Int64` and must hold 0 or 1.

use std::fs::File;
use std::path::{Path, PathBuf};

use arrow::array::{Array, Float64Array, Int64Array};
use arrow::compute::cast;
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use super::{Dataset, DatasetSource, FeatureMatrix, DEFAULT_DATASET};
use crate::{Error, Result};

/// Default name of the label column.
pub const LABEL_COLUMN: &str = "label";

/// Loads datasets from a directory of Parquet files.
#[derive(Debug, Clone)]
pub struct ParquetDatasetSource {
    dir: PathBuf,
    label_column: String,
}

impl ParquetDatasetSource {
    /// Read `<dir>/<name>.parquet` files with a `label` column.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            label_column: LABEL_COLUMN.to_string(),
        }
    }

    /// Use a different label column.
    #[must_use]
    pub fn with_label_column(mut self, name: impl Into<String>) -> Self {
        self.label_column = name.into();
        self
    }

    /// Path of the file backing dataset `name`.
    #[must_use]
    pub fn dataset_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.parquet"))
    }

    /// Decode a single Parquet file into a [`Dataset`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageFault`] if the file cannot be opened,
    /// [`Error::SchemaMismatch`] if the label column is missing or batches
    /// disagree on their columns, and [`Error::InvalidInput`] on nulls or
    /// non-binary labels.
    pub fn load_file(&self, path: &Path) -> Result<Dataset> {
        let file = File::open(path).map_err(|e| Error::storage(path, e))?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

        let mut cols = None;
        let mut values = Vec::new();
        let mut labels = Vec::new();
        for batch in reader {
            let batch = batch?;
            let batch_cols = self.append_batch(&batch, &mut values, &mut labels)?;
            match cols {
                None => cols = Some(batch_cols),
                Some(c) if c != batch_cols => {
                    return Err(Error::SchemaMismatch(format!(
                        "'{}' has batches with {c} and {batch_cols} feature columns",
                        path.display()
                    )))
                }
                Some(_) => {}
            }
        }

        let features = FeatureMatrix::new(labels.len(), cols.unwrap_or(0), values)?;
        tracing::debug!(
            "Loaded {} rows x {} features from '{}'",
            features.rows(),
            features.cols(),
            path.display()
        );
        Dataset::new(features, labels)
    }

    /// Append one record batch row by row; returns its feature column count.
    fn append_batch(
        &self,
        batch: &RecordBatch,
        values: &mut Vec<f64>,
        labels: &mut Vec<u8>,
    ) -> Result<usize> {
        let schema = batch.schema();
        let label_idx = schema.index_of(&self.label_column).map_err(|_| {
            Error::SchemaMismatch(format!("missing label column '{}'", self.label_column))
        })?;

        let mut columns = Vec::with_capacity(batch.num_columns().saturating_sub(1));
        for (idx, field) in schema.fields().iter().enumerate() {
            if idx == label_idx {
                continue;
            }
            let casted = cast(batch.column(idx), &DataType::Float64)?;
            if casted.null_count() > 0 {
                return Err(Error::InvalidInput(format!(
                    "feature column '{}' contains nulls",
                    field.name()
                )));
            }
            columns.push(casted);
        }

        let label_array = cast(batch.column(label_idx), &DataType::Int64)?;
        let label_array = label_array
            .as_any()
            .downcast_ref::<Int64Array>()
            .ok_or_else(|| Error::Other("Int64 cast produced another array type".to_string()))?;
        let features: Vec<&Float64Array> = columns
            .iter()
            .map(|c| {
                c.as_any()
                    .downcast_ref::<Float64Array>()
                    .ok_or_else(|| Error::Other("Float64 cast produced another array type".to_string()))
            })
            .collect::<Result<_>>()?;

        for row in 0..batch.num_rows() {
            if label_array.is_null(row) {
                return Err(Error::InvalidInput(format!("null label at row {row}")));
            }
            let label = match label_array.value(row) {
                0 => 0,
                1 => 1,
                other => return Err(Error::InvalidInput(format!("label {other} is not binary"))),
            };
            labels.push(label);
            values.extend(features.iter().map(|c| c.value(row)));
        }

        Ok(features.len())
    }
}

impl DatasetSource for ParquetDatasetSource {
    fn load_features_dataset(
        &self,
        n_samples: Option<usize>,
        dataset_name: Option<&str>,
    ) -> Result<Dataset> {
        let path = self.dataset_path(dataset_name.unwrap_or(DEFAULT_DATASET));
        Ok(self.load_file(&path)?.limit(n_samples))
    }
}
