//! Bagged ensemble of randomized CART trees.
//!
//! Each tree is grown on a bootstrap resample of the training rows and
//! considers a random subset of features at every node. Prediction is a
//! majority vote across trees.
//!
//! All randomness flows from one seeded `ChaCha8Rng`: the master generator
//! hands every tree its own seed, so two fits with the same seed and data
//! produce identical forests.

use ndarray::ArrayView2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::tree::{DecisionTree, TreeParams};

/// Forest hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForestParams {
    /// Number of trees.
    pub n_trees: usize,
    /// Maximum depth per tree; `None` grows until leaves are pure.
    pub max_depth: Option<usize>,
    /// Minimum rows required to attempt a split.
    pub min_samples_split: usize,
    /// Resample rows with replacement per tree.
    pub bootstrap: bool,
    /// Seed for the master generator.
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: None,
            min_samples_split: 2,
            bootstrap: true,
            seed: 42,
        }
    }
}

/// Majority-vote outcome for a single row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestPrediction {
    /// Winning class (lowest index on ties).
    pub class: usize,
    /// Vote count per class.
    pub votes: Vec<usize>,
    /// Fraction of trees voting for the winning class.
    pub confidence: f64,
}

/// Random forest classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<DecisionTree>,
    n_features: usize,
    n_classes: usize,
    params: ForestParams,
}

impl RandomForest {
    /// Fits the forest on `features` (rows x columns) and class indices `labels`.
    pub fn fit(
        features: ArrayView2<'_, f64>,
        labels: &[usize],
        params: ForestParams,
    ) -> Result<Self, ForestError> {
        let n_rows = features.nrows();
        if n_rows == 0 {
            return Err(ForestError::Empty);
        }
        if labels.len() != n_rows {
            return Err(ForestError::LabelMismatch {
                rows: n_rows,
                labels: labels.len(),
            });
        }
        if params.n_trees == 0 {
            return Err(ForestError::NoTrees);
        }

        let n_classes = labels.iter().copied().max().unwrap_or(0).max(1) + 1;
        let tree_params = TreeParams {
            max_depth: params.max_depth,
            min_samples_split: params.min_samples_split.max(2),
            max_features: max_features(features.ncols()),
        };

        let mut master = ChaCha8Rng::seed_from_u64(params.seed);
        let trees = (0..params.n_trees)
            .map(|_| {
                let mut rng = ChaCha8Rng::seed_from_u64(master.gen());
                let sample = if params.bootstrap {
                    (0..n_rows).map(|_| rng.gen_range(0..n_rows)).collect()
                } else {
                    (0..n_rows).collect()
                };
                DecisionTree::fit(features, labels, sample, n_classes, tree_params, &mut rng)
            })
            .collect();

        Ok(Self {
            trees,
            n_features: features.ncols(),
            n_classes,
            params,
        })
    }

    /// Predicts one row with vote details.
    #[must_use]
    pub fn predict_with_votes(&self, row: &[f64]) -> ForestPrediction {
        let mut votes = vec![0usize; self.n_classes];
        for tree in &self.trees {
            let class = tree.predict(row);
            if class < self.n_classes {
                votes[class] += 1;
            }
        }

        let (class, max_votes) = votes
            .iter()
            .copied()
            .enumerate()
            .fold((0, 0), |best, (class, count)| {
                if count > best.1 {
                    (class, count)
                } else {
                    best
                }
            });

        #[allow(clippy::cast_precision_loss)]
        let confidence = if self.trees.is_empty() {
            0.0
        } else {
            max_votes as f64 / self.trees.len() as f64
        };

        ForestPrediction {
            class,
            votes,
            confidence,
        }
    }

    /// Predicts one row (class only).
    #[must_use]
    pub fn predict(&self, row: &[f64]) -> usize {
        self.predict_with_votes(row).class
    }

    /// Predicts every row of a matrix.
    #[must_use]
    pub fn predict_batch(&self, features: ArrayView2<'_, f64>) -> Vec<usize> {
        features
            .rows()
            .into_iter()
            .map(|row| self.predict(&row.to_vec()))
            .collect()
    }

    /// Number of trees.
    #[must_use]
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Expected number of features per row.
    #[must_use]
    pub const fn n_features(&self) -> usize {
        self.n_features
    }

    /// Number of output classes.
    #[must_use]
    pub const fn n_classes(&self) -> usize {
        self.n_classes
    }

    /// Hyperparameters used for the fit.
    #[must_use]
    pub const fn params(&self) -> &ForestParams {
        &self.params
    }

    /// Average depth across trees.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn avg_depth(&self) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        let total: usize = self.trees.iter().map(DecisionTree::depth).sum();
        total as f64 / self.trees.len() as f64
    }
}

/// `floor(sqrt(n_features))`, at least one.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn max_features(n_features: usize) -> usize {
    ((n_features as f64).sqrt().floor() as usize).max(1)
}

/// Forest fitting failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ForestError {
    /// No rows to fit on.
    #[error("cannot fit forest on zero rows")]
    Empty,
    /// Label vector not aligned with the feature matrix.
    #[error("{rows} feature rows but {labels} labels")]
    LabelMismatch {
        /// Feature rows.
        rows: usize,
        /// Labels provided.
        labels: usize,
    },
    /// `n_trees` was zero.
    #[error("forest needs at least one tree")]
    NoTrees,
}
