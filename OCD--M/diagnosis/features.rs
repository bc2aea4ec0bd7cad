use ndarray::Array2;

use crate::{
    dataset::{AGE, COMPULSIONS, DURATION, OBSESSIONS},
    labeler::{LabeledRecord, LabeledTable},
};

/// Model input columns, in matrix column order.
pub const FEATURE_COLUMNS: [&str; 4] = [AGE, DURATION, OBSESSIONS, COMPULSIONS];

/// Feature matrix with its row-aligned labels.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureFrame {
    /// Column names, one per matrix column.
    pub columns: Vec<String>,
    /// `rows x columns` feature values.
    pub features: Array2<f64>,
    /// Class index per row (see [`crate::labeler::Diagnosis::as_class`]).
    pub labels: Vec<usize>,
    /// Position of each kept row in the labeled table.
    pub source_rows: Vec<usize>,
}

impl FeatureFrame {
    /// Number of rows.
    #[must_use]
    pub fn n_rows(&self) -> usize {
        self.features.nrows()
    }

    /// Number of feature columns.
    #[must_use]
    pub fn n_features(&self) -> usize {
        self.features.ncols()
    }

    /// Distinct label values, sorted.
    #[must_use]
    pub fn distinct_labels(&self) -> Vec<usize> {
        let mut labels = self.labels.clone();
        labels.sort_unstable();
        labels.dedup();
        labels
    }

    /// Copies the given rows into a new frame, preserving the order of `rows`.
    #[must_use]
    pub fn select(&self, rows: &[usize]) -> Self {
        let features = self.features.select(ndarray::Axis(0), rows);
        Self {
            columns: self.columns.clone(),
            features,
            labels: rows.iter().map(|&r| self.labels[r]).collect(),
            source_rows: rows.iter().map(|&r| self.source_rows[r]).collect(),
        }
    }
}

/// Selects the model columns and drops rows missing any of them.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeaturePipeline;

impl FeaturePipeline {
    /// Builds the reduced feature frame. Only the four feature columns decide exclusion.
    #[must_use]
    pub fn build(&self, table: &LabeledTable) -> FeatureFrame {
        let mut values = Vec::with_capacity(table.len() * FEATURE_COLUMNS.len());
        let mut labels = Vec::with_capacity(table.len());
        let mut source_rows = Vec::with_capacity(table.len());

        for (idx, row) in table.rows.iter().enumerate() {
            if let Some((features, label)) = complete_row(row) {
                values.extend_from_slice(&features);
                labels.push(label);
                source_rows.push(idx);
            }
        }

        let features = Array2::from_shape_vec((labels.len(), FEATURE_COLUMNS.len()), values)
            .unwrap_or_else(|_| Array2::zeros((0, FEATURE_COLUMNS.len())));
        FeatureFrame {
            columns: FEATURE_COLUMNS.iter().map(ToString::to_string).collect(),
            features,
            labels,
            source_rows,
        }
    }
}

fn complete_row(row: &LabeledRecord) -> Option<([f64; 4], usize)> {
    let record = &row.record;
    let features = [
        f64::from(record.age?),
        f64::from(record.duration_months?),
        f64::from(record.obsessions?),
        f64::from(record.compulsions?),
    ];
    Some((features, row.diagnosis?.as_class()))
}
