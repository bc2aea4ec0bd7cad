//! Classical model building blocks: scaling, trees, forests, splitting.

/// Random forest ensemble.
pub mod forest;
/// Splitting and scoring helpers.
pub mod func;
/// Training run reports.
pub mod reporter;
/// Per-feature standardization.
pub mod scaler;
/// CART decision trees.
pub mod tree;

pub use forest::{ForestError, ForestParams, ForestPrediction, RandomForest};
pub use func::{accuracy, train_test_split, SplitIndices};
pub use reporter::TrainingReport;
pub use scaler::{ScalerError, StandardScaler};
pub use tree::{DecisionTree, TreeNode, TreeParams};
