//! Forest file format.
//!
//! Every field is big-endian with no padding:
//!
//! ```text
//! i32 tree_count
//! per tree:
//!     i32 n_categories
//!     i32 node_count
//!     per node, in depth-first order:
//!         i32 left          (-1 for a leaf)
//!         i32 right         (-1 for a leaf)
//!         i64 dim           (0 for a leaf)
//!         i64 threshold     (0 for a leaf)
//!         i64 mask          (0 for a leaf)
//!         i32 sample_count  (0 for an interior node)
//!         if sample_count > 0:
//!             i32[sample_count] samples
//!             f64[n_categories] distribution
//! ```
//!
//! The learner kind is not recorded, so readers must be told which kind
//! the forest was trained with.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};

use crate::bitimage::BitImage;
use crate::config::MAX_CATEGORIES;
use crate::error::RfError;
use crate::forest::Forest;
use crate::learner::{DecodeError, LearnerKind, SplitParams, SplitRule};
use crate::node::{Node, NodeIndex};
use crate::tree::DecisionTree;

const LEAF_CHILD: i32 = -1;

/// Bytes of the fixed part of every node record.
const NODE_RECORD_BYTES: usize = 4 + 4 + 8 + 8 + 8 + 4;

fn to_i32(value: usize) -> std::io::Result<i32> {
    i32::try_from(value).map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{value} does not fit the 32-bit forest format"),
        )
    })
}

impl Forest {
    /// Write the forest in the binary forest format.
    ///
    /// # Errors
    ///
    /// Propagates I/O errors from `writer`, and fails with
    /// `InvalidInput` if a count exceeds `i32::MAX`.
    pub fn write_to(&self, writer: &mut impl Write) -> std::io::Result<()> {
        writer.write_all(&to_i32(self.trees.len())?.to_be_bytes())?;
        for tree in &self.trees {
            writer.write_all(&to_i32(tree.n_categories)?.to_be_bytes())?;
            writer.write_all(&to_i32(tree.nodes.len())?.to_be_bytes())?;
            for node in &tree.nodes {
                match node {
                    Node::Split { rule, left, right } => {
                        let SplitParams {
                            dim,
                            threshold,
                            mask,
                        } = rule.params();
                        writer.write_all(&to_i32(left.index())?.to_be_bytes())?;
                        writer.write_all(&to_i32(right.index())?.to_be_bytes())?;
                        writer.write_all(&dim.to_be_bytes())?;
                        writer.write_all(&threshold.to_be_bytes())?;
                        writer.write_all(&mask.to_be_bytes())?;
                        writer.write_all(&0i32.to_be_bytes())?;
                    }
                    Node::Leaf {
                        samples,
                        distribution,
                    } => {
                        writer.write_all(&LEAF_CHILD.to_be_bytes())?;
                        writer.write_all(&LEAF_CHILD.to_be_bytes())?;
                        writer.write_all(&[0u8; 24])?;
                        writer.write_all(&to_i32(samples.len())?.to_be_bytes())?;
                        if !samples.is_empty() {
                            for &s in samples {
                                writer.write_all(&to_i32(s as usize)?.to_be_bytes())?;
                            }
                            for &p in distribution {
                                writer.write_all(&p.to_be_bytes())?;
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Encode the forest into a byte vector.
    ///
    /// # Errors
    ///
    /// Same as [`Forest::write_to`].
    pub fn to_bytes(&self) -> std::io::Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.write_to(&mut bytes)?;
        Ok(bytes)
    }

    /// Save the forest to a file.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`RfError::WriteModel`] | file creation or write failed |
    #[instrument(skip(self), fields(path = %path.as_ref().display()))]
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), RfError> {
        let path = path.as_ref();
        let write_err = |e| RfError::WriteModel {
            path: path.to_path_buf(),
            source: e,
        };

        let file = fs::File::create(path).map_err(write_err)?;
        let mut writer = BufWriter::new(file);
        self.write_to(&mut writer).map_err(write_err)?;
        writer.flush().map_err(write_err)?;

        info!(n_trees = self.trees.len(), learner = self.learner.name(), "forest saved");
        Ok(())
    }

    /// Load a forest of `PixelWindow { radius: 2 }` rules.
    ///
    /// Use [`ForestReader`] for any other learner kind.
    ///
    /// # Errors
    ///
    /// Same as [`ForestReader::read`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RfError> {
        ForestReader::new(LearnerKind::default()).read(path)
    }
}

/// Reads forest files for a given learner kind.
///
/// Exemplar forests also need the image table they were trained on,
/// supplied via [`ForestReader::with_exemplars`].
#[derive(Debug, Clone)]
pub struct ForestReader<'a> {
    kind: LearnerKind,
    exemplars: &'a [BitImage],
}

impl<'a> ForestReader<'a> {
    /// Create a reader for forests of `kind` rules.
    #[must_use]
    pub fn new(kind: LearnerKind) -> Self {
        Self {
            kind,
            exemplars: &[],
        }
    }

    /// Supply the training images exemplar rules refer to.
    #[must_use]
    pub fn with_exemplars(mut self, exemplars: &'a [BitImage]) -> Self {
        self.exemplars = exemplars;
        self
    }

    /// Read and validate a forest file.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`RfError::InvalidLearner`] | the reader's kind is unusable |
    /// | [`RfError::ReadModel`] | file read failed |
    /// | [`RfError::DeserializeModel`] | truncated data, bad counts or indices, trailing bytes |
    /// | [`RfError::MissingExemplars`] | an exemplar rule points past the supplied images |
    #[instrument(skip(self), fields(path = %path.as_ref().display(), learner = self.kind.name()))]
    pub fn read(&self, path: impl AsRef<Path>) -> Result<Forest, RfError> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|e| RfError::ReadModel {
            path: path.to_path_buf(),
            source: e,
        })?;
        self.decode(&bytes, path)
    }

    /// Decode a forest from bytes. `origin` only labels errors.
    ///
    /// # Errors
    ///
    /// Same as [`ForestReader::read`], except [`RfError::ReadModel`].
    pub fn decode(&self, bytes: &[u8], origin: &Path) -> Result<Forest, RfError> {
        self.kind.validate()?;
        let mut cursor = Cursor {
            bytes,
            pos: 0,
            path: origin,
        };

        let n_trees = cursor.count("tree count")?;
        if n_trees == 0 {
            return Err(cursor.malformed("forest contains no trees".into()));
        }
        let mut trees = Vec::with_capacity(n_trees.min(1024));
        let mut n_categories = None;
        for t in 0..n_trees {
            let tree = self.decode_tree(&mut cursor, t)?;
            match n_categories {
                None => n_categories = Some(tree.n_categories),
                Some(n) if n != tree.n_categories => {
                    return Err(cursor.malformed(format!(
                        "tree {t} has {} categories, earlier trees have {n}",
                        tree.n_categories
                    )));
                }
                Some(_) => {}
            }
            trees.push(tree);
        }
        if cursor.pos != bytes.len() {
            return Err(cursor.malformed(format!(
                "{} trailing bytes after the last tree",
                bytes.len() - cursor.pos
            )));
        }

        let n_categories = n_categories.unwrap_or(0);
        debug!(n_trees, n_categories, size_bytes = bytes.len(), "forest loaded");
        Ok(Forest::new(trees, n_categories, self.kind))
    }

    fn decode_tree(&self, cursor: &mut Cursor<'_>, t: usize) -> Result<DecisionTree, RfError> {
        let n_categories = cursor.count("category count")?;
        if n_categories == 0 || n_categories > MAX_CATEGORIES {
            return Err(cursor.malformed(format!(
                "tree {t} has {n_categories} categories, expected 1 to {MAX_CATEGORIES}"
            )));
        }
        let n_nodes = cursor.count("node count")?;
        if n_nodes == 0 {
            return Err(cursor.malformed(format!("tree {t} has no nodes")));
        }
        // Checked before any node is allocated.
        let remaining = cursor.remaining();
        if n_nodes.saturating_mul(NODE_RECORD_BYTES) > remaining || n_categories * 8 > remaining {
            return Err(cursor.malformed(format!(
                "tree {t} declares {n_nodes} nodes of {n_categories} categories but only {remaining} bytes remain"
            )));
        }

        let mut nodes = Vec::with_capacity(n_nodes.min(1 << 16));
        for i in 0..n_nodes {
            let left = cursor.i32()?;
            let right = cursor.i32()?;
            let params = SplitParams {
                dim: cursor.i64()?,
                threshold: cursor.i64()?,
                mask: cursor.i64()?,
            };
            let n_samples = cursor.count("leaf size")?;

            if left == LEAF_CHILD && right == LEAF_CHILD {
                let mut samples = Vec::with_capacity(n_samples.min(1 << 16));
                let mut distribution = vec![0.0f64; n_categories];
                if n_samples > 0 {
                    for _ in 0..n_samples {
                        samples.push(cursor.count("sample index")? as u32);
                    }
                    for p in distribution.iter_mut() {
                        *p = cursor.f64()?;
                        if !p.is_finite() || *p < 0.0 {
                            return Err(cursor.malformed(format!(
                                "tree {t} node {i} has probability {p}"
                            )));
                        }
                    }
                }
                nodes.push(Node::Leaf {
                    samples,
                    distribution,
                });
                continue;
            }

            let child = |raw: i32| -> Option<NodeIndex> {
                usize::try_from(raw)
                    .ok()
                    .filter(|&c| c > i && c < n_nodes)
                    .map(NodeIndex::new)
            };
            let (Some(left), Some(right)) = (child(left), child(right)) else {
                return Err(cursor.malformed(format!(
                    "tree {t} node {i} has children ({left}, {right}) outside ({i}, {n_nodes})"
                )));
            };
            if left == right || n_samples != 0 {
                return Err(cursor.malformed(format!(
                    "tree {t} node {i} is not a well-formed split"
                )));
            }
            let rule = SplitRule::decode(self.kind, params, self.exemplars).map_err(|e| match e {
                DecodeError::OutOfRange(reason) => {
                    cursor.malformed(format!("tree {t} node {i}: {reason}"))
                }
                DecodeError::MissingExemplar { index } => RfError::MissingExemplars {
                    path: cursor.path.to_path_buf(),
                    index,
                    available: self.exemplars.len(),
                },
            })?;
            nodes.push(Node::Split { rule, left, right });
        }
        if let Err(reason) = check_single_tree(&nodes) {
            return Err(cursor.malformed(format!("tree {t}: {reason}")));
        }
        Ok(DecisionTree::from_nodes(nodes, n_categories))
    }
}

/// Walk from node 0 and require every node to be reached exactly once.
fn check_single_tree(nodes: &[Node]) -> Result<(), String> {
    let mut seen = vec![false; nodes.len()];
    let mut stack = vec![0usize];
    let mut reached = 0;
    while let Some(i) = stack.pop() {
        if std::mem::replace(&mut seen[i], true) {
            return Err(format!("node {i} has more than one parent"));
        }
        reached += 1;
        if let Node::Split { left, right, .. } = &nodes[i] {
            stack.push(right.index());
            stack.push(left.index());
        }
    }
    if reached != nodes.len() {
        let orphan = seen.iter().position(|&s| !s).unwrap_or(0);
        return Err(format!(
            "{} of {} nodes unreachable from the root, first is node {orphan}",
            nodes.len() - reached,
            nodes.len()
        ));
    }
    Ok(())
}

/// Big-endian reader over the whole file with truncation checks.
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
    path: &'a Path,
}

impl Cursor<'_> {
    fn malformed(&self, reason: String) -> RfError {
        RfError::DeserializeModel {
            path: PathBuf::from(self.path),
            reason,
        }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], RfError> {
        let end = self.pos + N;
        let Some(chunk) = self.bytes.get(self.pos..end) else {
            return Err(self.malformed(format!(
                "truncated at byte {} (needed {N} more)",
                self.pos
            )));
        };
        let mut out = [0u8; N];
        out.copy_from_slice(chunk);
        self.pos = end;
        Ok(out)
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn i32(&mut self) -> Result<i32, RfError> {
        self.take::<4>().map(i32::from_be_bytes)
    }

    fn i64(&mut self) -> Result<i64, RfError> {
        self.take::<8>().map(i64::from_be_bytes)
    }

    fn f64(&mut self) -> Result<f64, RfError> {
        self.take::<8>().map(f64::from_be_bytes)
    }

    /// A non-negative `i32`.
    fn count(&mut self, what: &str) -> Result<usize, RfError> {
        let at = self.pos;
        let value = self.i32()?;
        usize::try_from(value).map_err(|_| self.malformed(format!("negative {what} {value} at byte {at}")))
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::config::TrainingConfig;
    use crate::dataset::Dataset;

    fn shapes() -> Dataset {
        let mut ds = Dataset::new();
        for shift in 0..4usize {
            ds.push(BitImage::from_fn(|x, _| x < 10 + shift), 0);
            ds.push(BitImage::from_fn(|_, y| y < 10 + shift), 1);
            ds.push(BitImage::from_fn(|x, y| x + y < 40 + shift), 2);
        }
        ds
    }

    fn train_simple_model(learner: LearnerKind) -> Forest {
        TrainingConfig::new(3)
            .unwrap()
            .with_n_trees(3)
            .with_generations(200)
            .with_learner(learner)
            .fit(&shapes())
            .unwrap()
            .into_forest()
    }

    #[test]
    fn round_trip_identical_forest() {
        let dir = TempDir::new().unwrap();
        let model_path = dir.path().join("test.forest");

        let forest = train_simple_model(LearnerKind::default());
        forest.save(&model_path).unwrap();
        let loaded = Forest::load(&model_path).unwrap();

        assert_eq!(forest, loaded);
        for image in shapes().images() {
            assert_eq!(forest.classify(image), loaded.classify(image));
        }
    }

    #[test]
    fn round_trip_every_learner_kind() {
        let ds = shapes();
        for kind in [
            LearnerKind::PixelWindow { radius: 3 },
            LearnerKind::PixelThreshold,
            LearnerKind::RowMask,
            LearnerKind::NibbleMask { tests: 2 },
            LearnerKind::Exemplar,
            LearnerKind::Haar,
        ] {
            let forest = train_simple_model(kind);
            let loaded = ForestReader::new(kind)
                .with_exemplars(ds.images())
                .decode(&forest.to_bytes().unwrap(), Path::new("memory"))
                .unwrap();
            assert_eq!(forest, loaded, "kind {}", kind.name());
        }
    }

    #[test]
    fn to_bytes_matches_saved_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bytes.forest");
        let forest = train_simple_model(LearnerKind::default());
        forest.save(&path).unwrap();
        assert_eq!(forest.to_bytes().unwrap(), std::fs::read(&path).unwrap());
    }

    #[test]
    fn header_layout_is_big_endian() {
        let forest = train_simple_model(LearnerKind::default());
        let bytes = forest.to_bytes().unwrap();
        assert_eq!(&bytes[0..4], &[0, 0, 0, 3]);
        assert_eq!(&bytes[4..8], &[0, 0, 0, 3]);
        let n_nodes = i32::from_be_bytes(bytes[8..12].try_into().unwrap());
        assert_eq!(n_nodes as usize, forest.trees()[0].n_nodes());
    }

    #[test]
    fn empty_leaf_reads_as_zero_distribution() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1i32.to_be_bytes());
        bytes.extend_from_slice(&2i32.to_be_bytes());
        bytes.extend_from_slice(&1i32.to_be_bytes());
        bytes.extend_from_slice(&(-1i32).to_be_bytes());
        bytes.extend_from_slice(&(-1i32).to_be_bytes());
        bytes.extend_from_slice(&[0u8; 24]);
        bytes.extend_from_slice(&0i32.to_be_bytes());

        let forest = ForestReader::new(LearnerKind::default())
            .decode(&bytes, Path::new("memory"))
            .unwrap();
        assert_eq!(forest.classify(&BitImage::blank()).as_slice(), &[0.0, 0.0]);
        assert_eq!(forest.categorize(&BitImage::blank()), None);
    }

    #[test]
    fn truncated_file_error() {
        let bytes = train_simple_model(LearnerKind::default()).to_bytes().unwrap();
        for cut in [2, 10, bytes.len() / 2, bytes.len() - 1] {
            let err = ForestReader::new(LearnerKind::default())
                .decode(&bytes[..cut], Path::new("memory"))
                .unwrap_err();
            assert!(matches!(err, RfError::DeserializeModel { .. }), "cut at {cut}");
        }
    }

    #[test]
    fn trailing_bytes_error() {
        let mut bytes = train_simple_model(LearnerKind::default()).to_bytes().unwrap();
        bytes.push(0);
        let err = ForestReader::new(LearnerKind::default())
            .decode(&bytes, Path::new("memory"))
            .unwrap_err();
        assert!(matches!(err, RfError::DeserializeModel { .. }));
    }

    #[test]
    fn backward_child_index_error() {
        let mut bytes = Vec::new();
        for v in [1i32, 2, 2, 0, 1] {
            bytes.extend_from_slice(&v.to_be_bytes());
        }
        bytes.extend_from_slice(&0i64.to_be_bytes());
        bytes.extend_from_slice(&1i64.to_be_bytes());
        bytes.extend_from_slice(&0i64.to_be_bytes());
        bytes.extend_from_slice(&0i32.to_be_bytes());
        let err = ForestReader::new(LearnerKind::default())
            .decode(&bytes, Path::new("memory"))
            .unwrap_err();
        assert!(matches!(err, RfError::DeserializeModel { .. }));
    }

    /// One-tree file header followed by `nodes` as `(left, right, samples)`
    /// records. Leaves with samples carry a uniform distribution.
    fn tree_file(n_categories: i32, nodes: &[(i32, i32, &[i32])]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for v in [1, n_categories, nodes.len() as i32] {
            bytes.extend_from_slice(&v.to_be_bytes());
        }
        for &(left, right, samples) in nodes {
            bytes.extend_from_slice(&left.to_be_bytes());
            bytes.extend_from_slice(&right.to_be_bytes());
            for v in [0i64, 1, 0] {
                bytes.extend_from_slice(&v.to_be_bytes());
            }
            bytes.extend_from_slice(&(samples.len() as i32).to_be_bytes());
            if !samples.is_empty() {
                for s in samples {
                    bytes.extend_from_slice(&s.to_be_bytes());
                }
                for _ in 0..n_categories {
                    bytes.extend_from_slice(&(1.0 / f64::from(n_categories)).to_be_bytes());
                }
            }
        }
        bytes
    }

    fn decode_err(bytes: &[u8]) -> RfError {
        ForestReader::new(LearnerKind::default())
            .decode(bytes, Path::new("memory"))
            .unwrap_err()
    }

    #[test]
    fn hand_built_tree_decodes() {
        let bytes = tree_file(2, &[(2, 1, &[]), (-1, -1, &[0]), (-1, -1, &[1])]);
        let forest = ForestReader::new(LearnerKind::default())
            .decode(&bytes, Path::new("memory"))
            .unwrap();
        assert_eq!(forest.trees()[0].n_nodes(), 3);
        assert_eq!(forest.trees()[0].n_leaves(), 2);
    }

    #[test]
    fn huge_category_count_rejected_before_allocating() {
        let leaves: Vec<(i32, i32, &[i32])> = vec![(-1, -1, &[]); 200];
        let bytes = tree_file(i32::MAX, &leaves);
        assert!(bytes.len() < 8 * 1024);
        assert!(matches!(decode_err(&bytes), RfError::DeserializeModel { .. }));

        let over_cap = tree_file((MAX_CATEGORIES + 1) as i32, &[(-1, -1, &[])]);
        assert!(matches!(decode_err(&over_cap), RfError::DeserializeModel { .. }));
    }

    #[test]
    fn node_count_beyond_file_rejected() {
        let mut bytes = tree_file(2, &[(-1, -1, &[0])]);
        bytes[8..12].copy_from_slice(&i32::MAX.to_be_bytes());
        assert!(matches!(decode_err(&bytes), RfError::DeserializeModel { .. }));
    }

    #[test]
    fn unreachable_node_rejected() {
        let bytes = tree_file(2, &[(-1, -1, &[0]), (-1, -1, &[1])]);
        let err = decode_err(&bytes);
        assert!(matches!(&err, RfError::DeserializeModel { reason, .. } if reason.contains("unreachable")));
    }

    #[test]
    fn shared_child_rejected() {
        let bytes = tree_file(
            2,
            &[(1, 2, &[]), (2, 3, &[]), (-1, -1, &[0]), (-1, -1, &[1])],
        );
        let err = decode_err(&bytes);
        assert!(matches!(&err, RfError::DeserializeModel { reason, .. } if reason.contains("more than one parent")));
    }

    #[test]
    fn exemplar_forest_without_images_error() {
        let forest = train_simple_model(LearnerKind::Exemplar);
        if forest.trees().iter().all(|t| t.n_nodes() == 1) {
            return;
        }
        let err = ForestReader::new(LearnerKind::Exemplar)
            .decode(&forest.to_bytes().unwrap(), Path::new("memory"))
            .unwrap_err();
        assert!(matches!(err, RfError::MissingExemplars { available: 0, .. }));
    }

    #[test]
    fn load_nonexistent_file_error() {
        let dir = TempDir::new().unwrap();
        let err = Forest::load(dir.path().join("missing.forest")).unwrap_err();
        assert!(matches!(err, RfError::ReadModel { .. }));
    }

    #[test]
    fn load_corrupt_file_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("corrupt.forest");
        std::fs::write(&path, b"not a forest").unwrap();
        let err = Forest::load(&path).unwrap_err();
        assert!(matches!(err, RfError::DeserializeModel { .. }));
    }
}
