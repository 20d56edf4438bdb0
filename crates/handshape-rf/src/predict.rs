//! Inference for the forest ensemble.

use rayon::iter::{IntoParallelIterator, IntoParallelRefIterator, ParallelIterator};

use crate::bitimage::BitImage;
use crate::confusion::ConfusionMatrix;
use crate::dataset::Dataset;
use crate::error::RfError;
use crate::forest::Forest;
use crate::node::Node;

/// Default number of sample indices gathered from each visited leaf.
pub const DEFAULT_MATCHES_PER_LEAF: usize = 3;

/// Upper bound on a [`MatchBuffer`] sized from a forest.
pub const MAX_MATCHES: usize = 3000;

/// Index of the strict maximum of `distribution`.
///
/// Ties keep the lowest index. Returns `None` when no entry is positive,
/// which is the "no label" answer for an all-zero distribution.
#[must_use]
pub fn categorize(distribution: &[f64]) -> Option<usize> {
    let mut best = None;
    let mut best_p = 0.0f64;
    for (k, &p) in distribution.iter().enumerate() {
        if p > best_p {
            best_p = p;
            best = Some(k);
        }
    }
    best
}

fn normalize(distribution: &mut [f64]) {
    let sum: f64 = distribution.iter().sum();
    if sum > 0.0 {
        distribution.iter_mut().for_each(|p| *p /= sum);
    }
}

/// Category distribution from a classification.
#[derive(Debug, Clone, PartialEq)]
pub struct Distribution {
    probs: Vec<f64>,
}

impl Distribution {
    /// Create a new distribution.
    pub(crate) fn new(probs: Vec<f64>) -> Self {
        Self { probs }
    }

    /// Return the predicted category, or `None` for an all-zero distribution.
    #[must_use]
    pub fn predicted_class(&self) -> Option<usize> {
        categorize(&self.probs)
    }

    /// Probability of the predicted category, 0 when there is none.
    #[must_use]
    pub fn confidence(&self) -> f64 {
        self.predicted_class().map_or(0.0, |k| self.probs[k])
    }

    /// Return the top-k categories sorted by descending probability.
    #[must_use]
    pub fn top_k(&self, k: usize) -> Vec<(usize, f64)> {
        let mut indexed: Vec<(usize, f64)> = self.probs.iter().copied().enumerate().collect();
        indexed.sort_by(|a, b| b.1.total_cmp(&a.1));
        indexed.truncate(k);
        indexed
    }

    /// Return the probability distribution as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.probs
    }

    /// Consume and return the probabilities.
    #[must_use]
    pub fn into_vec(self) -> Vec<f64> {
        self.probs
    }
}

/// Caller-owned scratch for [`Forest::match_into`].
///
/// Holds the classification and up to `capacity` sample indices
/// gathered from the visited leaves. One buffer per stream.
#[derive(Debug, Clone)]
pub struct MatchBuffer {
    distribution: Vec<f64>,
    matches: Vec<u32>,
    capacity: usize,
    per_leaf: usize,
}

impl MatchBuffer {
    /// Create a buffer for a forest of `n_categories` holding at most
    /// `capacity` matches.
    #[must_use]
    pub fn new(n_categories: usize, capacity: usize) -> Self {
        Self {
            distribution: vec![0.0; n_categories],
            matches: Vec::with_capacity(capacity),
            capacity,
            per_leaf: DEFAULT_MATCHES_PER_LEAF,
        }
    }

    /// Size a buffer to the sum of per-tree largest leaves, capped at
    /// [`MAX_MATCHES`].
    #[must_use]
    pub fn for_forest(forest: &Forest) -> Self {
        Self::new(forest.n_categories(), forest.max_match_count().min(MAX_MATCHES))
    }

    /// Set how many sample indices each visited leaf contributes.
    #[must_use]
    pub fn with_per_leaf(mut self, per_leaf: usize) -> Self {
        self.per_leaf = per_leaf;
        self
    }

    /// Classification from the last match.
    #[must_use]
    pub fn distribution(&self) -> &[f64] {
        &self.distribution
    }

    /// Sample indices from the last match, in tree order.
    #[must_use]
    pub fn matches(&self) -> &[u32] {
        &self.matches
    }

    /// Return the match capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The matched training sample closest to `query`, with its score.
    ///
    /// Each candidate is scored by [`BitImage::best_shifted_score`], so a
    /// query off by one pixel still finds its exemplar. Matches that do not
    /// index into `exemplars` are skipped; ties keep the earliest match.
    #[must_use]
    pub fn nearest_exemplar(&self, query: &BitImage, exemplars: &[BitImage]) -> Option<(u32, u32)> {
        self.matches
            .iter()
            .filter_map(|&s| exemplars.get(s as usize).map(|e| (s, query.best_shifted_score(e))))
            .min_by_key(|&(_, score)| score)
    }
}

impl Forest {
    /// Classify `image` into caller-owned scratch.
    ///
    /// Sums the leaf distributions of every tree and normalizes the sum to
    /// 1. The result stays all zero when every reached leaf was empty.
    ///
    /// # Errors
    ///
    /// Returns [`RfError::ScratchSizeMismatch`] when `out.len() != n_categories`.
    pub fn classify_into(&self, image: &BitImage, out: &mut [f64]) -> Result<(), RfError> {
        if out.len() != self.n_categories {
            return Err(RfError::ScratchSizeMismatch {
                expected: self.n_categories,
                got: out.len(),
            });
        }
        out.fill(0.0);
        for tree in &self.trees {
            for (acc, p) in out.iter_mut().zip(tree.distribution(image)) {
                *acc += p;
            }
        }
        normalize(out);
        Ok(())
    }

    /// Return the category distribution for a single image.
    #[must_use]
    pub fn classify(&self, image: &BitImage) -> Distribution {
        let mut probs = vec![0.0f64; self.n_categories];
        for tree in &self.trees {
            for (acc, p) in probs.iter_mut().zip(tree.distribution(image)) {
                *acc += p;
            }
        }
        normalize(&mut probs);
        Distribution::new(probs)
    }

    /// Product of the leaf distributions, unnormalized.
    ///
    /// Any tree that gives a category zero probability vetoes it.
    #[must_use]
    pub fn classify_product(&self, image: &BitImage) -> Vec<f64> {
        let mut probs = vec![1.0f64; self.n_categories];
        for tree in &self.trees {
            for (acc, p) in probs.iter_mut().zip(tree.distribution(image)) {
                *acc *= p;
            }
        }
        probs
    }

    /// Predict the category of a single image.
    #[must_use]
    pub fn categorize(&self, image: &BitImage) -> Option<usize> {
        self.classify(image).predicted_class()
    }

    /// Classify `image` and gather training-sample indices from the
    /// visited leaves into `buffer`. Returns the number of matches.
    ///
    /// Each leaf contributes at most the buffer's per-leaf limit; the total
    /// stops at the buffer capacity.
    ///
    /// # Errors
    ///
    /// Returns [`RfError::ScratchSizeMismatch`] when the buffer was sized
    /// for a different category count.
    pub fn match_into(&self, image: &BitImage, buffer: &mut MatchBuffer) -> Result<usize, RfError> {
        self.classify_into(image, &mut buffer.distribution)?;
        buffer.matches.clear();
        'trees: for tree in &self.trees {
            if let Node::Leaf { samples, .. } = tree.leaf(image) {
                for &s in samples.iter().take(buffer.per_leaf) {
                    if buffer.matches.len() >= buffer.capacity {
                        break 'trees;
                    }
                    buffer.matches.push(s);
                }
            }
        }
        Ok(buffer.matches.len())
    }

    /// Sum over trees of the largest leaf sample list.
    #[must_use]
    pub fn max_match_count(&self) -> usize {
        self.trees.iter().map(|t| t.max_leaf_size()).sum()
    }

    /// Classify a batch of images in parallel.
    #[must_use]
    pub fn classify_batch(&self, images: &[BitImage]) -> Vec<Distribution> {
        images.par_iter().map(|image| self.classify(image)).collect()
    }

    /// Predict categories for a batch of images in parallel.
    #[must_use]
    pub fn categorize_batch(&self, images: &[BitImage]) -> Vec<Option<usize>> {
        images.par_iter().map(|image| self.categorize(image)).collect()
    }

    /// Fraction of `dataset` samples whose predicted category equals their label.
    ///
    /// Samples without a prediction count as wrong. Returns 0 for an
    /// empty dataset.
    #[must_use]
    pub fn evaluate(&self, dataset: &Dataset) -> f64 {
        if dataset.is_empty() {
            return 0.0;
        }
        let correct = (0..dataset.len())
            .into_par_iter()
            .filter(|&i| self.categorize(dataset.image(i)) == Some(dataset.label(i)))
            .count();
        correct as f64 / dataset.len() as f64
    }

    /// Confusion matrix of the forest's predictions over `dataset`.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`RfError::EmptyDataset`] | `dataset` has no samples |
    /// | [`RfError::LabelOutOfRange`] | a label is `>= n_categories` |
    pub fn confusion(&self, dataset: &Dataset) -> Result<ConfusionMatrix, RfError> {
        let predicted = self.categorize_batch(dataset.images());
        ConfusionMatrix::from_predictions(dataset.labels(), &predicted, self.n_categories)
    }
}
