//! Sequential forest training over a shared, read-only dataset.

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, instrument};

use crate::config::TrainingConfig;
use crate::dataset::Dataset;
use crate::error::RfError;
use crate::learner::LearnerKind;
use crate::node::SplitSearch;
use crate::result::{TrainingReport, TrainingResult, TreeSummary};
use crate::tree::{self, DecisionTree};

/// A trained ensemble of decision trees. Immutable once built or loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct Forest {
    pub(crate) trees: Vec<DecisionTree>,
    pub(crate) n_categories: usize,
    pub(crate) learner: LearnerKind,
}

impl Forest {
    pub(crate) fn new(trees: Vec<DecisionTree>, n_categories: usize, learner: LearnerKind) -> Self {
        Self {
            trees,
            n_categories,
            learner,
        }
    }

    /// Return the trees in training order.
    #[must_use]
    pub fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }

    /// Return the number of trees in the ensemble.
    #[must_use]
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Return the number of categories.
    #[must_use]
    pub fn n_categories(&self) -> usize {
        self.n_categories
    }

    /// Return the learner family the split rules belong to.
    #[must_use]
    pub fn learner(&self) -> LearnerKind {
        self.learner
    }
}

/// Train a forest with default learner and seed.
///
/// Shorthand for building a [`TrainingConfig`] and calling
/// [`TrainingConfig::fit`].
///
/// # Errors
///
/// Same as [`TrainingConfig::fit`], plus [`RfError::InvalidCategoryCount`].
pub fn train_forest(
    dataset: &Dataset,
    n_categories: usize,
    max_depth: usize,
    n_trees: usize,
    generations: usize,
) -> Result<Forest, RfError> {
    let result = TrainingConfig::new(n_categories)?
        .with_max_depth(max_depth)
        .with_n_trees(n_trees)
        .with_generations(generations)
        .fit(dataset)?;
    Ok(result.into_forest())
}

/// Train the forest ensemble.
///
/// Trees are grown one after another on the full dataset, each with its
/// own seed drawn from a master RNG. Training-set accuracy of the partial
/// ensemble is logged after every tree.
#[instrument(skip_all, fields(n_trees = config.n_trees, n_samples = dataset.len()))]
pub(crate) fn train(config: &TrainingConfig, dataset: &Dataset) -> Result<TrainingResult, RfError> {
    // --- Validate config and inputs ---
    config.validate()?;
    if dataset.is_empty() {
        return Err(RfError::EmptyDataset);
    }
    let n_categories = config.n_categories;
    if let Some((sample_index, &label)) = dataset
        .labels()
        .iter()
        .enumerate()
        .find(|&(_, &label)| label >= n_categories)
    {
        return Err(RfError::LabelOutOfRange {
            sample_index,
            label,
            n_categories,
        });
    }

    info!(
        n_trees = config.n_trees,
        n_samples = dataset.len(),
        n_categories,
        max_depth = config.max_depth,
        generations = config.generations,
        learner = config.learner.name(),
        label_counts = ?dataset.label_counts(n_categories),
        "training forest"
    );

    let mut master_rng = ChaCha8Rng::seed_from_u64(config.seed);
    let tree_seeds: Vec<u64> = (0..config.n_trees).map(|_| master_rng.r#gen()).collect();

    let search = SplitSearch {
        images: dataset.images(),
        labels: dataset.labels(),
        n_categories,
        kind: config.learner,
        generations: config.generations,
    };

    let mut forest = Forest::new(Vec::with_capacity(config.n_trees), n_categories, config.learner);
    let mut accuracy_per_tree = Vec::with_capacity(config.n_trees);
    let mut summaries = Vec::with_capacity(config.n_trees);

    for (i, seed) in tree_seeds.into_iter().enumerate() {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let tree = tree::grow(&search, dataset.labels(), config.max_depth, &mut rng);
        summaries.push(TreeSummary {
            n_nodes: tree.n_nodes(),
            n_leaves: tree.n_leaves(),
            depth: tree.depth(),
        });
        forest.trees.push(tree);

        let accuracy = forest.evaluate(dataset);
        accuracy_per_tree.push(accuracy);
        info!(n_trees = i + 1, accuracy, "training accuracy");
    }

    debug!(n_trees_trained = forest.n_trees(), "tree training complete");

    let report = TrainingReport {
        n_samples: dataset.len(),
        n_categories,
        learner: config.learner,
        accuracy_per_tree,
        trees: summaries,
    };
    info!(accuracy = report.final_accuracy(), "forest training complete");

    Ok(TrainingResult::new(forest, report))
}
