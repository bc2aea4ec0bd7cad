use rand::{seq::SliceRandom, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::features::FeatureFrame;

/// Row partition produced by [`train_test_split`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitIndices {
    /// Frame rows used for fitting, in shuffled order.
    pub train: Vec<usize>,
    /// Held-out frame rows, in shuffled order.
    pub test: Vec<usize>,
}

/// Number of held-out rows for `n` rows: `ceil(test_ratio * n)`.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn test_size(n: usize, test_ratio: f64) -> usize {
    ((test_ratio * n as f64).ceil() as usize).min(n)
}

/// Shuffles row indices with a seeded generator and cuts off the held-out tail.
#[must_use]
pub fn train_test_split(frame: &FeatureFrame, test_ratio: f64, seed: u64) -> SplitIndices {
    let n = frame.n_rows();
    let mut order: Vec<usize> = (0..n).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    order.shuffle(&mut rng);
    let test = test_size(n, test_ratio);
    let train = order.split_off(test);
    SplitIndices { train, test: order }
}

/// Fraction of predictions equal to their label; `0.0` for empty input.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn accuracy(predictions: &[usize], labels: &[usize]) -> f64 {
    if predictions.is_empty() || predictions.len() != labels.len() {
        return 0.0;
    }
    let hits = predictions
        .iter()
        .zip(labels)
        .filter(|(pred, label)| pred == label)
        .count();
    hits as f64 / predictions.len() as f64
}
