use ndarray::ArrayView2;
use rand::{seq::SliceRandom, Rng};
use serde::{Deserialize, Serialize};

/// Node of an array-backed classification tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TreeNode {
    /// Rows with `feature <= threshold` go to `left`, others to `right`.
    Split {
        /// Column index tested at this node.
        feature: usize,
        /// Split threshold.
        threshold: f64,
        /// Index of the left child.
        left: usize,
        /// Index of the right child.
        right: usize,
    },
    /// Terminal node.
    Leaf {
        /// Majority class (lowest index on ties).
        class: usize,
        /// Training rows per class that reached this leaf.
        counts: Vec<usize>,
    },
}

impl TreeNode {
    /// Returns `true` for terminal nodes.
    #[must_use]
    pub const fn is_leaf(&self) -> bool {
        matches!(self, Self::Leaf { .. })
    }
}

/// Growth limits for a single tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeParams {
    /// Maximum depth; `None` grows until leaves are pure.
    pub max_depth: Option<usize>,
    /// Minimum rows required to attempt a split.
    pub min_samples_split: usize,
    /// Candidate features drawn per node.
    pub max_features: usize,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: None,
            min_samples_split: 2,
            max_features: 2,
        }
    }
}

/// CART classification tree using Gini impurity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<TreeNode>,
    n_features: usize,
    n_classes: usize,
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    impurity: f64,
}

impl DecisionTree {
    /// Grows a tree on the rows listed in `sample`.
    ///
    /// Duplicate rows are allowed, as produced by bootstrapping.
    pub fn fit<R: Rng>(
        features: ArrayView2<'_, f64>,
        labels: &[usize],
        sample: Vec<usize>,
        n_classes: usize,
        params: TreeParams,
        rng: &mut R,
    ) -> Self {
        let mut tree = Self {
            nodes: Vec::new(),
            n_features: features.ncols(),
            n_classes,
        };
        let builder = Builder {
            features,
            labels,
            params,
            n_classes,
        };
        tree.nodes = builder.grow(sample, rng);
        tree
    }

    /// Classifies one row by walking from the root to a leaf.
    #[must_use]
    pub fn predict(&self, row: &[f64]) -> usize {
        let mut idx = 0usize;
        loop {
            match &self.nodes[idx] {
                TreeNode::Leaf { class, .. } => return *class,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let value = row.get(*feature).copied().unwrap_or(0.0);
                    idx = if value <= *threshold { *left } else { *right };
                }
            }
        }
    }

    /// Number of nodes in the tree.
    #[must_use]
    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Number of leaf nodes.
    #[must_use]
    pub fn n_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    /// Expected number of features.
    #[must_use]
    pub const fn n_features(&self) -> usize {
        self.n_features
    }

    /// Number of classes the tree votes over.
    #[must_use]
    pub const fn n_classes(&self) -> usize {
        self.n_classes
    }

    /// Longest root-to-leaf path.
    #[must_use]
    pub fn depth(&self) -> usize {
        if self.nodes.is_empty() {
            return 0;
        }
        let mut deepest = 0;
        let mut pending = vec![(0usize, 0usize)];
        while let Some((idx, depth)) = pending.pop() {
            match &self.nodes[idx] {
                TreeNode::Leaf { .. } => deepest = deepest.max(depth),
                TreeNode::Split { left, right, .. } => {
                    pending.push((*left, depth + 1));
                    pending.push((*right, depth + 1));
                }
            }
        }
        deepest
    }
}

#[derive(Clone, Copy)]
enum Side {
    Left,
    Right,
}

/// Rows waiting to become a node, and where to link that node in its parent.
struct Pending {
    rows: Vec<usize>,
    depth: usize,
    parent: Option<(usize, Side)>,
}

struct Builder<'a, 'b> {
    features: ArrayView2<'a, f64>,
    labels: &'b [usize],
    params: TreeParams,
    n_classes: usize,
}

impl Builder<'_, '_> {
    /// Depth-first growth on an explicit stack, left subtree first.
    fn grow<R: Rng>(&self, sample: Vec<usize>, rng: &mut R) -> Vec<TreeNode> {
        let mut nodes = Vec::new();
        let mut stack = vec![Pending {
            rows: sample,
            depth: 0,
            parent: None,
        }];
        while let Some(Pending {
            rows,
            depth,
            parent,
        }) = stack.pop()
        {
            let idx = nodes.len();
            if let Some((parent_idx, side)) = parent {
                if let TreeNode::Split { left, right, .. } = &mut nodes[parent_idx] {
                    match side {
                        Side::Left => *left = idx,
                        Side::Right => *right = idx,
                    }
                }
            }

            let counts = self.class_counts(&rows);
            let pure = counts.iter().filter(|&&c| c > 0).count() <= 1;
            let depth_reached = self.params.max_depth.is_some_and(|max| depth >= max);
            if pure || depth_reached || rows.len() < self.params.min_samples_split {
                nodes.push(leaf(counts));
                continue;
            }
            let Some(split) = self.best_split(&rows, rng) else {
                nodes.push(leaf(counts));
                continue;
            };

            // children are linked once they are created
            nodes.push(TreeNode::Split {
                feature: split.feature,
                threshold: split.threshold,
                left: idx,
                right: idx,
            });
            let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
                .into_iter()
                .partition(|&r| self.features[[r, split.feature]] <= split.threshold);
            stack.push(Pending {
                rows: right_rows,
                depth: depth + 1,
                parent: Some((idx, Side::Right)),
            });
            stack.push(Pending {
                rows: left_rows,
                depth: depth + 1,
                parent: Some((idx, Side::Left)),
            });
        }
        nodes
    }

    fn class_counts(&self, rows: &[usize]) -> Vec<usize> {
        let mut counts = vec![0; self.n_classes];
        for &r in rows {
            counts[self.labels[r]] += 1;
        }
        counts
    }

    /// Visits features in random order until `max_features` non-constant ones were scored.
    fn best_split<R: Rng>(&self, rows: &[usize], rng: &mut R) -> Option<SplitCandidate> {
        let mut order: Vec<usize> = (0..self.features.ncols()).collect();
        order.shuffle(rng);

        let mut best: Option<SplitCandidate> = None;
        let mut scored = 0usize;
        for feature in order {
            let mut column: Vec<(f64, usize)> = rows
                .iter()
                .map(|&r| (self.features[[r, feature]], self.labels[r]))
                .collect();
            column.sort_by(|a, b| a.0.total_cmp(&b.0));
            let (Some(first), Some(last)) = (column.first(), column.last()) else {
                continue;
            };
            if first.0 >= last.0 {
                continue;
            }
            scored += 1;

            if let Some(candidate) = self.scan_feature(feature, &column) {
                if best
                    .as_ref()
                    .map_or(true, |current| candidate.impurity < current.impurity)
                {
                    best = Some(candidate);
                }
            }
            if scored >= self.params.max_features.max(1) {
                break;
            }
        }
        best
    }

    #[allow(clippy::cast_precision_loss)]
    fn scan_feature(&self, feature: usize, column: &[(f64, usize)]) -> Option<SplitCandidate> {
        let total = column.len();
        let mut right = vec![0usize; self.n_classes];
        for &(_, label) in column {
            right[label] += 1;
        }
        let mut left = vec![0usize; self.n_classes];
        let mut best: Option<SplitCandidate> = None;

        for pos in 1..total {
            let (prev_value, prev_label) = column[pos - 1];
            left[prev_label] += 1;
            right[prev_label] -= 1;
            let value = column[pos].0;
            if prev_value >= value {
                continue;
            }
            let n_left = pos as f64;
            let n_right = (total - pos) as f64;
            let impurity =
                (n_left * gini(&left, n_left) + n_right * gini(&right, n_right)) / total as f64;
            if best.as_ref().map_or(true, |b| impurity < b.impurity) {
                let mut threshold = (prev_value + value) / 2.0;
                if threshold >= value {
                    threshold = prev_value;
                }
                best = Some(SplitCandidate {
                    feature,
                    threshold,
                    impurity,
                });
            }
        }
        best
    }
}

#[allow(clippy::cast_precision_loss)]
fn gini(counts: &[usize], n: f64) -> f64 {
    if n == 0.0 {
        return 0.0;
    }
    1.0 - counts
        .iter()
        .map(|&c| {
            let p = c as f64 / n;
            p * p
        })
        .sum::<f64>()
}

fn leaf(counts: Vec<usize>) -> TreeNode {
    let class = counts
        .iter()
        .enumerate()
        .fold((0usize, 0usize), |(best, best_count), (class, &count)| {
            if count > best_count {
                (class, count)
            } else {
                (best, best_count)
            }
        })
        .0;
    TreeNode::Leaf { class, counts }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn params(max_features: usize) -> TreeParams {
        TreeParams {
            max_features,
            ..TreeParams::default()
        }
    }

    #[test]
    fn learns_single_threshold() {
        let x = array![[0.1], [0.2], [0.3], [0.7], [0.8], [0.9]];
        let y = [0, 0, 0, 1, 1, 1];
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let tree = DecisionTree::fit(x.view(), &y, (0..6).collect(), 2, params(1), &mut rng);
        assert_eq!(tree.n_nodes(), 3);
        assert_eq!(tree.n_leaves(), 2);
        assert_eq!(tree.depth(), 1);
        assert_eq!(tree.predict(&[0.25]), 0);
        assert_eq!(tree.predict(&[0.75]), 1);
        assert_eq!(tree.predict(&[0.5]), 0); // midpoint goes left
    }

    #[test]
    fn pure_sample_is_a_single_leaf() {
        let x = array![[1.0, 2.0], [3.0, 4.0]];
        let y = [1, 1];
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let tree = DecisionTree::fit(x.view(), &y, vec![0, 1], 2, params(2), &mut rng);
        assert_eq!(tree.n_nodes(), 1);
        assert_eq!(tree.predict(&[100.0, -5.0]), 1);
    }

    #[test]
    fn constant_candidate_feature_falls_through_to_informative_one() {
        // column 0 is constant, only column 1 separates the classes
        let x = array![[5.0, 0.0], [5.0, 1.0], [5.0, 10.0], [5.0, 11.0]];
        let y = [0, 0, 1, 1];
        for seed in 0..8 {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let tree =
                DecisionTree::fit(x.view(), &y, (0..4).collect(), 2, params(1), &mut rng);
            assert_eq!(tree.predict(&[5.0, 0.5]), 0);
            assert_eq!(tree.predict(&[5.0, 10.5]), 1);
        }
    }

    #[test]
    fn max_depth_limits_growth() {
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let y = [0, 1, 0, 1];
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let limited = TreeParams {
            max_depth: Some(1),
            ..params(1)
        };
        let tree = DecisionTree::fit(x.view(), &y, (0..4).collect(), 2, limited, &mut rng);
        assert!(tree.depth() <= 1);
    }

    #[test]
    fn leaf_majority_breaks_ties_low() {
        let node = leaf(vec![2, 2]);
        assert_eq!(
            node,
            TreeNode::Leaf {
                class: 0,
                counts: vec![2, 2]
            }
        );
    }

    #[test]
    fn duplicate_rows_from_bootstrap_are_counted() {
        let x = array![[0.0], [1.0]];
        let y = [0, 1];
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let tree = DecisionTree::fit(x.view(), &y, vec![1, 1, 1], 2, params(1), &mut rng);
        assert_eq!(
            tree.nodes[0],
            TreeNode::Leaf {
                class: 1,
                counts: vec![0, 3]
            }
        );
    }

    #[test]
    fn features_and_labels_may_come_from_separate_borrows() {
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let tree = {
            let labels = vec![0, 0, 1, 1];
            let mut rng = ChaCha8Rng::seed_from_u64(5);
            DecisionTree::fit(x.view(), &labels, (0..4).collect(), 2, params(1), &mut rng)
        };
        assert_eq!(tree.predict(&[0.5]), 0);
        assert_eq!(tree.predict(&[2.5]), 1);
    }

    #[test]
    fn deep_staircase_grows_without_recursion() {
        // alternating labels on a line force one split per row
        let n = 4_000;
        let x = ndarray::Array2::from_shape_fn((n, 1), |(i, _)| i as f64);
        let y: Vec<usize> = (0..n).map(|i| usize::from(i >= n / 2 && i % 2 == 0)).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let tree = DecisionTree::fit(x.view(), &y, (0..n).collect(), 2, params(1), &mut rng);
        assert!(tree.depth() > 500);
        for i in (0..n).step_by(97) {
            assert_eq!(tree.predict(&[i as f64]), y[i]);
        }
    }
}
