use std::fmt;

use rand::Rng;
use tracing::debug;

use crate::bitimage::BitImage;
use crate::learner::{LearnerKind, SplitRule, WeakLearner};

/// Factor applied to the generation count on each escalation round.
const ESCALATION_FACTOR: f64 = 1.5;
/// Most escalation rounds a single node may run.
const MAX_ESCALATIONS: usize = 10;
/// Escalate while the best gain stays below this fraction of the node entropy.
const MIN_RELATIVE_GAIN: f64 = 0.01;

/// Index into a `Vec<Node>` arena, identifying a specific node in a decision tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeIndex(usize);

impl NodeIndex {
    /// Create a new node index from a zero-based arena position.
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    /// Return the zero-based arena index.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A node of a trained tree.
///
/// Trees are stored as `Vec<Node>` in depth-first order with the root
/// at index 0. Children always sit after their parent.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// An interior split node.
    Split {
        /// Rule routing images: `true` goes left.
        rule: SplitRule,
        /// Index of the left child node.
        left: NodeIndex,
        /// Index of the right child node.
        right: NodeIndex,
    },
    /// A terminal leaf node.
    Leaf {
        /// Training-sample indices that reached this leaf.
        samples: Vec<u32>,
        /// Normalized label distribution; all zero when `samples` is empty.
        distribution: Vec<f64>,
    },
}

impl Node {
    /// Return `true` if this node is a leaf.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }
}

/// Shannon entropy `-Σ p·ln(p)` of a normalized distribution.
///
/// Zero-probability terms contribute nothing.
#[must_use]
pub fn entropy(distribution: &[f64]) -> f64 {
    -distribution
        .iter()
        .filter(|&&p| p > 0.0)
        .map(|&p| p * p.ln())
        .sum::<f64>()
}

fn entropy_of_counts(counts: &[usize], total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    -counts
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / total;
            p * p.ln()
        })
        .sum::<f64>()
}

/// Normalized label distribution of `subset`, all zero when it is empty.
#[must_use]
pub(crate) fn distribution(subset: &[u32], labels: &[usize], n_categories: usize) -> Vec<f64> {
    let mut dist = vec![0.0f64; n_categories];
    for &i in subset {
        dist[labels[i as usize]] += 1.0;
    }
    let sum: f64 = dist.iter().sum();
    if sum > 0.0 {
        dist.iter_mut().for_each(|p| *p /= sum);
    }
    dist
}

/// A node still under induction. Lives in the tree's build arena.
#[derive(Debug, Clone)]
pub(crate) struct TrainingNode {
    pub(crate) subset: Vec<u32>,
    pub(crate) distribution: Vec<f64>,
    pub(crate) entropy: f64,
    pub(crate) depth: usize,
    pub(crate) split: Option<(SplitRule, NodeIndex, NodeIndex)>,
}

impl TrainingNode {
    pub(crate) fn new(subset: Vec<u32>, labels: &[usize], n_categories: usize, depth: usize) -> Self {
        let distribution = distribution(&subset, labels, n_categories);
        let entropy = entropy(&distribution);
        Self {
            subset,
            distribution,
            entropy,
            depth,
            split: None,
        }
    }
}

/// The committed outcome of a successful split search.
#[derive(Debug)]
pub(crate) struct Partition {
    pub(crate) rule: SplitRule,
    pub(crate) left: Vec<u32>,
    pub(crate) right: Vec<u32>,
    pub(crate) gain: f64,
}

/// Everything the randomized split search reads besides the node itself.
pub(crate) struct SplitSearch<'a> {
    pub(crate) images: &'a [BitImage],
    pub(crate) labels: &'a [usize],
    pub(crate) n_categories: usize,
    pub(crate) kind: LearnerKind,
    pub(crate) generations: usize,
}

impl SplitSearch<'_> {
    /// Search for the rule with the highest information gain on `subset`.
    ///
    /// Runs `generations` random trials, escalating the trial count by
    /// 1.5x while the best gain keeps improving but stays below 1% of
    /// `node_entropy` (at most 10 rounds). Returns `None` when no trial
    /// achieved a positive gain.
    pub(crate) fn learn(
        &self,
        subset: &[u32],
        node_entropy: f64,
        rng: &mut impl Rng,
    ) -> Option<Partition> {
        let mut learner = WeakLearner::new(self.kind, self.images, rng);
        let mut left_counts = vec![0usize; self.n_categories];
        let mut right_counts = vec![0usize; self.n_categories];

        let mut best_gain = 0.0f64;
        let mut prev_best_gain = 0.0f64;
        let mut generations = self.generations;
        let mut escalations = 0usize;

        loop {
            for _ in 0..generations {
                learner.randomize(rng);
                let gain = self.trial_gain(
                    &learner,
                    subset,
                    node_entropy,
                    &mut left_counts,
                    &mut right_counts,
                );
                if gain > best_gain {
                    best_gain = gain;
                    learner.save();
                }
            }

            let improved = prev_best_gain != best_gain;
            if improved
                && node_entropy > 0.0
                && best_gain / node_entropy < MIN_RELATIVE_GAIN
                && escalations < MAX_ESCALATIONS
            {
                escalations += 1;
                prev_best_gain = best_gain;
                generations = (generations as f64 * ESCALATION_FACTOR) as usize;
                debug!(
                    best_gain,
                    size = subset.len(),
                    entropy = node_entropy,
                    escalations,
                    generations,
                    rule = %learner,
                    "escalating split search"
                );
            } else {
                break;
            }
        }

        learner.use_saved();
        if best_gain <= 0.0 {
            return None;
        }

        let (left, right): (Vec<u32>, Vec<u32>) = subset
            .iter()
            .copied()
            .partition(|&i| learner.compare(&self.images[i as usize]));
        debug!(
            gain = best_gain,
            left = left.len(),
            right = right.len(),
            rule = %learner,
            "split committed"
        );
        Some(Partition {
            rule: learner.rule(),
            left,
            right,
            gain: best_gain,
        })
    }

    fn trial_gain(
        &self,
        learner: &WeakLearner<'_>,
        subset: &[u32],
        node_entropy: f64,
        left_counts: &mut [usize],
        right_counts: &mut [usize],
    ) -> f64 {
        left_counts.fill(0);
        right_counts.fill(0);
        for &i in subset {
            let i = i as usize;
            if learner.compare(&self.images[i]) {
                left_counts[self.labels[i]] += 1;
            } else {
                right_counts[self.labels[i]] += 1;
            }
        }
        let n_left: usize = left_counts.iter().sum();
        let n_right = subset.len() - n_left;
        let n = subset.len() as f64;
        let h_left = entropy_of_counts(left_counts, n_left);
        let h_right = entropy_of_counts(right_counts, n_right);
        node_entropy - (n_left as f64 / n * h_left + n_right as f64 / n * h_right)
    }
}
