//! Configuration builder for forest training.

use crate::dataset::Dataset;
use crate::error::RfError;
use crate::learner::LearnerKind;
use crate::result::TrainingResult;

/// Largest category count a forest may hold, in training and in files.
pub const MAX_CATEGORIES: usize = 1024;

/// Configuration for forest training.
///
/// Construct via [`TrainingConfig::new`], then chain `with_*` methods.
/// Remaining parameters are validated when [`TrainingConfig::fit`] runs.
///
/// # Defaults
///
/// | Parameter     | Default                      |
/// |---------------|------------------------------|
/// | `n_trees`     | 1                            |
/// | `max_depth`   | 3                            |
/// | `generations` | 1000                         |
/// | `learner`     | `PixelWindow { radius: 2 }`  |
/// | `seed`        | 42                           |
#[derive(Debug, Clone)]
pub struct TrainingConfig {
    pub(crate) n_categories: usize,
    pub(crate) n_trees: usize,
    pub(crate) max_depth: usize,
    pub(crate) generations: usize,
    pub(crate) learner: LearnerKind,
    pub(crate) seed: u64,
}

impl TrainingConfig {
    /// Create a new config for `n_categories` labels.
    ///
    /// # Errors
    ///
    /// Returns [`RfError::InvalidCategoryCount`] if `n_categories` is zero
    /// or above [`MAX_CATEGORIES`].
    pub fn new(n_categories: usize) -> Result<Self, RfError> {
        if n_categories == 0 || n_categories > MAX_CATEGORIES {
            return Err(RfError::InvalidCategoryCount { n_categories });
        }
        Ok(Self {
            n_categories,
            n_trees: 1,
            max_depth: 3,
            generations: 1000,
            learner: LearnerKind::default(),
            seed: 42,
        })
    }

    // --- Setters ---

    /// Set the number of trees.
    #[must_use]
    pub fn with_n_trees(mut self, n_trees: usize) -> Self {
        self.n_trees = n_trees;
        self
    }

    /// Set the maximum tree depth. A depth of 1 grows a single split.
    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Set the number of random trial rules per split search round.
    #[must_use]
    pub fn with_generations(mut self, generations: usize) -> Self {
        self.generations = generations;
        self
    }

    /// Set the weak-learner family.
    #[must_use]
    pub fn with_learner(mut self, learner: LearnerKind) -> Self {
        self.learner = learner;
        self
    }

    /// Set the random seed for reproducibility.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    // --- Getters ---

    /// Return the number of categories.
    #[must_use]
    pub fn n_categories(&self) -> usize {
        self.n_categories
    }

    /// Return the number of trees.
    #[must_use]
    pub fn n_trees(&self) -> usize {
        self.n_trees
    }

    /// Return the maximum tree depth.
    #[must_use]
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Return the trial count per split search round.
    #[must_use]
    pub fn generations(&self) -> usize {
        self.generations
    }

    /// Return the weak-learner family.
    #[must_use]
    pub fn learner(&self) -> LearnerKind {
        self.learner
    }

    /// Return the random seed.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Check every parameter that the builder does not check eagerly.
    ///
    /// # Errors
    ///
    /// | Variant                          | When                          |
    /// |----------------------------------|-------------------------------|
    /// | [`RfError::InvalidTreeCount`]    | `n_trees` is zero             |
    /// | [`RfError::InvalidMaxDepth`]     | `max_depth` is zero           |
    /// | [`RfError::InvalidGenerations`]  | `generations` is zero         |
    /// | [`RfError::InvalidLearner`]      | learner parameters are unusable |
    pub fn validate(&self) -> Result<(), RfError> {
        if self.n_trees == 0 {
            return Err(RfError::InvalidTreeCount {
                n_trees: self.n_trees,
            });
        }
        if self.max_depth == 0 {
            return Err(RfError::InvalidMaxDepth {
                max_depth: self.max_depth,
            });
        }
        if self.generations == 0 {
            return Err(RfError::InvalidGenerations {
                generations: self.generations,
            });
        }
        self.learner.validate()
    }

    /// Train a forest on every sample of `dataset`.
    ///
    /// # Errors
    ///
    /// | Variant                        | When                                      |
    /// |--------------------------------|-------------------------------------------|
    /// | any [`TrainingConfig::validate`] error | a parameter is out of range       |
    /// | [`RfError::EmptyDataset`]      | `dataset` is empty                        |
    /// | [`RfError::LabelOutOfRange`]   | a label is not below `n_categories`       |
    pub fn fit(&self, dataset: &Dataset) -> Result<TrainingResult, RfError> {
        crate::forest::train(self, dataset)
    }
}
