use rand::Rng;
use tracing::{debug, instrument};

use crate::{
    bitimage::BitImage,
    node::{Node, NodeIndex, SplitSearch, TrainingNode},
};

/// A trained binary decision tree over bit images.
///
/// Stored as an arena-based `Vec<Node>` in depth-first order: the root
/// is node 0 and every child index is greater than its parent's.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionTree {
    pub(crate) nodes: Vec<Node>,
    pub(crate) n_categories: usize,
}

/// Grow one tree on every sample of the training set.
///
/// Induction is depth-first with an explicit LIFO stack. A node with zero
/// entropy stays a leaf without a split search. A successful split at
/// `depth < max_depth - 1` pushes right then left, so the left subtree is
/// grown first; deeper successful splits keep their children as leaves.
#[instrument(skip_all, fields(n_samples = labels.len(), max_depth = max_depth))]
pub(crate) fn grow(
    search: &SplitSearch<'_>,
    labels: &[usize],
    max_depth: usize,
    rng: &mut impl Rng,
) -> DecisionTree {
    let n_categories = search.n_categories;
    let all: Vec<u32> = (0..labels.len() as u32).collect();
    let mut arena = vec![TrainingNode::new(all, labels, n_categories, 0)];
    let mut stack = vec![NodeIndex::new(0)];
    let mut splits = 0usize;

    while let Some(idx) = stack.pop() {
        let node = &arena[idx.index()];
        if node.entropy == 0.0 {
            continue;
        }
        let depth = node.depth;
        let Some(partition) = search.learn(&node.subset, node.entropy, rng) else {
            debug!(depth, size = node.subset.len(), "no informative split, leaf");
            continue;
        };
        splits += 1;

        let left = NodeIndex::new(arena.len());
        arena.push(TrainingNode::new(partition.left, labels, n_categories, depth + 1));
        let right = NodeIndex::new(arena.len());
        arena.push(TrainingNode::new(partition.right, labels, n_categories, depth + 1));
        arena[idx.index()].split = Some((partition.rule, left, right));

        if depth + 1 < max_depth {
            stack.push(right);
            stack.push(left);
        }
    }

    let tree = freeze(arena, n_categories);
    debug!(
        n_nodes = tree.n_nodes(),
        n_leaves = tree.n_leaves(),
        splits,
        "decision tree built"
    );
    tree
}

/// Re-order the build arena into the persisted depth-first layout and
/// drop the sample subsets of interior nodes.
fn freeze(arena: Vec<TrainingNode>, n_categories: usize) -> DecisionTree {
    let mut order = Vec::with_capacity(arena.len());
    let mut position = vec![0usize; arena.len()];
    let mut stack = vec![0usize];
    while let Some(old) = stack.pop() {
        position[old] = order.len();
        order.push(old);
        if let Some((_, left, right)) = arena[old].split {
            stack.push(left.index());
            stack.push(right.index());
        }
    }

    let mut slots: Vec<Option<TrainingNode>> = arena.into_iter().map(Some).collect();
    let nodes = order
        .iter()
        .filter_map(|&old| slots[old].take())
        .map(|node| match node.split {
            Some((rule, left, right)) => Node::Split {
                rule,
                left: NodeIndex::new(position[left.index()]),
                right: NodeIndex::new(position[right.index()]),
            },
            None => Node::Leaf {
                samples: node.subset,
                distribution: node.distribution,
            },
        })
        .collect();

    DecisionTree {
        nodes,
        n_categories,
    }
}

impl DecisionTree {
    /// Assemble a tree from already-validated nodes.
    pub(crate) fn from_nodes(nodes: Vec<Node>, n_categories: usize) -> Self {
        Self {
            nodes,
            n_categories,
        }
    }

    /// Return the leaf an image lands in.
    ///
    /// Traverses from the root: at each `Split`, goes left when the rule's
    /// `compare` is `true`, right otherwise.
    #[must_use]
    pub fn leaf(&self, image: &BitImage) -> &Node {
        &self.nodes[self.traverse(image)]
    }

    /// Return the label distribution of the leaf an image lands in.
    #[must_use]
    pub fn distribution(&self, image: &BitImage) -> &[f64] {
        match self.leaf(image) {
            Node::Leaf { distribution, .. } => distribution,
            Node::Split { .. } => unreachable!("traverse always ends at a leaf"),
        }
    }

    /// Return the nodes in persisted order.
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Return the number of categories of the leaf distributions.
    #[must_use]
    pub fn n_categories(&self) -> usize {
        self.n_categories
    }

    /// Return the total number of nodes in the tree (both splits and leaves).
    #[must_use]
    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Return the number of leaf nodes.
    #[must_use]
    pub fn n_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    /// Return the largest sample list held by any leaf.
    #[must_use]
    pub fn max_leaf_size(&self) -> usize {
        self.nodes
            .iter()
            .map(|n| match n {
                Node::Leaf { samples, .. } => samples.len(),
                Node::Split { .. } => 0,
            })
            .max()
            .unwrap_or(0)
    }

    /// Return the maximum depth of the tree.
    ///
    /// A single-node tree (just a root leaf) has depth 0.
    #[must_use]
    pub fn depth(&self) -> usize {
        if self.nodes.is_empty() {
            return 0;
        }
        let mut max_depth = 0usize;
        let mut stack = vec![(0usize, 0usize)];
        while let Some((idx, d)) = stack.pop() {
            match &self.nodes[idx] {
                Node::Leaf { .. } => max_depth = max_depth.max(d),
                Node::Split { left, right, .. } => {
                    stack.push((left.index(), d + 1));
                    stack.push((right.index(), d + 1));
                }
            }
        }
        max_depth
    }

    /// Traverse the tree from the root and return the arena index of the leaf.
    fn traverse(&self, image: &BitImage) -> usize {
        let mut idx = 0usize;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { .. } => return idx,
                Node::Split { rule, left, right } => {
                    idx = if rule.compare(image) {
                        left.index()
                    } else {
                        right.index()
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;
    use crate::learner::LearnerKind;

    /// Blank, top-half and full images labelled 0, 1, 0. Every window rule
    /// is monotone in the foreground count, so no single split isolates
    /// the middle pattern.
    fn banded() -> (Vec<BitImage>, Vec<usize>) {
        let images = vec![
            BitImage::blank(),
            BitImage::from_fn(|_, y| y < 32),
            BitImage::from_rows([u64::MAX; 64]),
        ];
        (images, vec![0, 1, 0])
    }

    fn grow_with(images: &[BitImage], labels: &[usize], max_depth: usize, seed: u64) -> DecisionTree {
        let search = SplitSearch {
            images,
            labels,
            n_categories: 2,
            kind: LearnerKind::default(),
            generations: 300,
        };
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        grow(&search, labels, max_depth, &mut rng)
    }

    #[test]
    fn pure_dataset_single_leaf() {
        let images = vec![BitImage::blank(); 3];
        let labels = vec![1, 1, 1];
        let tree = grow_with(&images, &labels, 3, 42);
        assert_eq!(tree.n_nodes(), 1);
        assert_eq!(tree.n_leaves(), 1);
        assert_eq!(tree.distribution(&BitImage::blank()), &[0.0, 1.0]);
    }

    #[test]
    fn middle_pattern_needs_depth_two() {
        let (images, labels) = banded();
        let tree = grow_with(&images, &labels, 2, 42);
        assert_eq!(tree.depth(), 2);
        for (image, &label) in images.iter().zip(&labels) {
            assert_eq!(tree.distribution(image)[label], 1.0);
        }
    }

    #[test]
    fn max_depth_limits_tree() {
        let (images, labels) = banded();
        let tree = grow_with(&images, &labels, 1, 42);
        assert!(tree.depth() <= 1);
    }

    #[test]
    fn children_follow_parents_and_interior_nodes_drop_samples() {
        let (images, labels) = banded();
        let tree = grow_with(&images, &labels, 3, 9);
        let mut placed = 0usize;
        for (i, node) in tree.nodes().iter().enumerate() {
            match node {
                Node::Split { left, right, .. } => {
                    assert!(left.index() > i && right.index() > i);
                    // Right subtree is emitted first.
                    assert!(right.index() < left.index());
                }
                Node::Leaf { samples, .. } => placed += samples.len(),
            }
        }
        assert_eq!(placed, images.len());
        assert_eq!(tree.max_leaf_size(), 1);
    }

    #[test]
    fn deterministic_with_same_seed() {
        let (images, labels) = banded();
        let a = grow_with(&images, &labels, 3, 123);
        let b = grow_with(&images, &labels, 3, 123);
        assert_eq!(a, b);
    }
}
