use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of one training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    /// Identifier of this run.
    pub run_id: Uuid,
    /// When the fit finished.
    pub trained_at: DateTime<Utc>,
    /// Seed used for the split and the forest.
    pub seed: u64,
    /// Rows left after the missing-value drop.
    pub usable_rows: usize,
    /// Rows in the training partition.
    pub train_rows: usize,
    /// Rows in the held-out partition.
    pub test_rows: usize,
    /// Trees in the fitted forest.
    pub n_trees: usize,
    /// Scaler means, one per feature.
    pub scaler_mean: Vec<f64>,
    /// Scaler standard deviations, one per feature.
    pub scaler_scale: Vec<f64>,
    /// Held-out predictions in held-out order.
    pub held_out_predictions: Vec<usize>,
    /// Held-out labels in held-out order.
    pub held_out_labels: Vec<usize>,
    /// Share of held-out rows predicted correctly.
    pub held_out_accuracy: f64,
}

impl TrainingReport {
    /// Renders a concise summary string.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "[RF] run={} rows={} train={} test={} trees={} accuracy={:.4}",
            self.run_id,
            self.usable_rows,
            self.train_rows,
            self.test_rows,
            self.n_trees,
            self.held_out_accuracy
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_mentions_partition_sizes() {
        let report = TrainingReport {
            run_id: Uuid::nil(),
            trained_at: Utc::now(),
            seed: 42,
            usable_rows: 10,
            train_rows: 7,
            test_rows: 3,
            n_trees: 100,
            scaler_mean: vec![0.0; 4],
            scaler_scale: vec![1.0; 4],
            held_out_predictions: vec![1, 0, 1],
            held_out_labels: vec![1, 0, 0],
            held_out_accuracy: 2.0 / 3.0,
        };
        let summary = report.summary();
        assert!(summary.contains("train=7"));
        assert!(summary.contains("accuracy=0.6667"));
    }
}
