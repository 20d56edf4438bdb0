//! Training result types.

use crate::forest::Forest;
use crate::learner::LearnerKind;

/// Shape of one trained tree.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TreeSummary {
    /// Total node count.
    pub n_nodes: usize,
    /// Leaf count.
    pub n_leaves: usize,
    /// Depth of the deepest leaf.
    pub depth: usize,
}

/// What happened during a training run.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TrainingReport {
    /// Number of training samples.
    pub n_samples: usize,
    /// Number of categories.
    pub n_categories: usize,
    /// Learner family the trees were grown with.
    pub learner: LearnerKind,
    /// Training-set accuracy of the first `i + 1` trees, per `i`.
    pub accuracy_per_tree: Vec<f64>,
    /// Shape of each tree, in training order.
    pub trees: Vec<TreeSummary>,
}

impl TrainingReport {
    /// Training-set accuracy of the whole forest.
    #[must_use]
    pub fn final_accuracy(&self) -> f64 {
        self.accuracy_per_tree.last().copied().unwrap_or(0.0)
    }
}

/// Result of forest training: the forest plus its [`TrainingReport`].
#[derive(Debug)]
pub struct TrainingResult {
    forest: Forest,
    report: TrainingReport,
}

impl TrainingResult {
    pub(crate) fn new(forest: Forest, report: TrainingReport) -> Self {
        Self { forest, report }
    }

    /// Borrow the trained forest.
    #[must_use]
    pub fn forest(&self) -> &Forest {
        &self.forest
    }

    /// Consume the result and return the trained forest.
    #[must_use]
    pub fn into_forest(self) -> Forest {
        self.forest
    }

    /// Return the training report.
    #[must_use]
    pub fn report(&self) -> &TrainingReport {
        &self.report
    }
}
