use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Per-feature standardization fitted on training rows only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    feature_names: Vec<String>,
    mean: Array1<f64>,
    scale: Array1<f64>,
    n_samples_seen: usize,
}

impl StandardScaler {
    /// Learns population mean and standard deviation per column.
    ///
    /// Zero-variance columns get a scale of `1.0` so they transform to zero.
    pub fn fit(
        features: ArrayView2<'_, f64>,
        feature_names: &[String],
    ) -> Result<Self, ScalerError> {
        if features.nrows() == 0 {
            return Err(ScalerError::Empty);
        }
        if features.ncols() != feature_names.len() {
            return Err(ScalerError::Width {
                expected: feature_names.len(),
                found: features.ncols(),
            });
        }
        #[allow(clippy::cast_precision_loss)]
        let n = features.nrows() as f64;
        let mean = features.sum_axis(Axis(0)) / n;
        let mut scale = Array1::zeros(features.ncols());
        for (col, column) in features.axis_iter(Axis(1)).enumerate() {
            let variance = column
                .iter()
                .map(|value| (value - mean[col]).powi(2))
                .sum::<f64>()
                / n;
            let std = variance.sqrt();
            scale[col] = if std > f64::EPSILON { std } else { 1.0 };
        }
        Ok(Self {
            feature_names: feature_names.to_vec(),
            mean,
            scale,
            n_samples_seen: features.nrows(),
        })
    }

    /// Applies the fitted transform to a batch of rows.
    pub fn transform(&self, features: ArrayView2<'_, f64>) -> Result<Array2<f64>, ScalerError> {
        if features.ncols() != self.mean.len() {
            return Err(ScalerError::Width {
                expected: self.mean.len(),
                found: features.ncols(),
            });
        }
        Ok((&features - &self.mean) / &self.scale)
    }

    /// Applies the fitted transform to a single row.
    pub fn transform_row(&self, row: &[f64]) -> Result<Vec<f64>, ScalerError> {
        if row.len() != self.mean.len() {
            return Err(ScalerError::Width {
                expected: self.mean.len(),
                found: row.len(),
            });
        }
        Ok(row
            .iter()
            .zip(self.mean.iter().zip(self.scale.iter()))
            .map(|(value, (mean, scale))| (value - mean) / scale)
            .collect())
    }

    /// Column names the scaler was fitted on, in order.
    #[must_use]
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// Learned means.
    #[must_use]
    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    /// Learned scales (standard deviations, `1.0` for constant columns).
    #[must_use]
    pub fn scale(&self) -> &Array1<f64> {
        &self.scale
    }

    /// Number of rows seen during fitting.
    #[must_use]
    pub const fn n_samples_seen(&self) -> usize {
        self.n_samples_seen
    }
}

/// Scaler fitting/transform failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScalerError {
    /// No rows to fit on.
    #[error("cannot fit scaler on zero rows")]
    Empty,
    /// Column count disagrees with the fitted width.
    #[error("expected {expected} feature columns, found {found}")]
    Width {
        /// Fitted width.
        expected: usize,
        /// Provided width.
        found: usize,
    },
}
