use std::path::PathBuf;

/// Errors from forest training, inference, and the forest file format.
#[derive(Debug, thiserror::Error)]
pub enum RfError {
    /// Returned when n_trees is zero.
    #[error("n_trees must be at least 1, got {n_trees}")]
    InvalidTreeCount {
        /// The invalid n_trees value provided.
        n_trees: usize,
    },

    /// Returned when max_depth is zero.
    #[error("max_depth must be at least 1, got {max_depth}")]
    InvalidMaxDepth {
        /// The invalid max_depth value provided.
        max_depth: usize,
    },

    /// Returned when the weak-learner generation count is zero.
    #[error("generations must be at least 1, got {generations}")]
    InvalidGenerations {
        /// The invalid generation count provided.
        generations: usize,
    },

    /// Returned when the category count is zero or above `MAX_CATEGORIES`.
    #[error("n_categories must be between 1 and {}, got {n_categories}", crate::config::MAX_CATEGORIES)]
    InvalidCategoryCount {
        /// The invalid category count provided.
        n_categories: usize,
    },

    /// Returned when a weak-learner kind carries parameters outside its domain.
    #[error("invalid weak learner {kind}: {reason}")]
    InvalidLearner {
        /// Name of the learner kind.
        kind: &'static str,
        /// Human-readable description of the bad parameter.
        reason: String,
    },

    /// Returned when the training dataset has zero samples.
    #[error("training dataset has zero samples")]
    EmptyDataset,

    /// Returned when a training label is outside `[0, n_categories)`.
    #[error("sample {sample_index} has label {label}, expected a label below {n_categories}")]
    LabelOutOfRange {
        /// The zero-based index of the offending sample.
        sample_index: usize,
        /// The offending label.
        label: usize,
        /// The configured category count.
        n_categories: usize,
    },

    /// Returned when a raw intensity buffer is not exactly 64x64.
    #[error("raw image has {got} pixels, expected {expected}")]
    ImageSizeMismatch {
        /// The expected pixel count.
        expected: usize,
        /// The actual pixel count.
        got: usize,
    },

    /// Returned when a caller-owned distribution buffer has the wrong length.
    #[error("distribution buffer has {got} slots, expected {expected}")]
    ScratchSizeMismatch {
        /// The forest's category count.
        expected: usize,
        /// The buffer length supplied.
        got: usize,
    },

    /// Returned when true and predicted label slices differ in length.
    #[error("got {predicted} predictions for {expected} labels")]
    PredictionCountMismatch {
        /// Number of true labels.
        expected: usize,
        /// Number of predictions.
        predicted: usize,
    },

    /// Returned when writing the forest file fails.
    #[error("failed to write forest to {path}")]
    WriteModel {
        /// Path to the file that could not be written.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when reading the forest file fails.
    #[error("failed to read forest from {path}")]
    ReadModel {
        /// Path to the file that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when the forest file is truncated or structurally invalid.
    #[error("malformed forest file {path}: {reason}")]
    DeserializeModel {
        /// Path to the forest file.
        path: PathBuf,
        /// Human-readable description of the defect.
        reason: String,
    },

    /// Returned when a forest of exemplar learners is loaded without its image table.
    #[error("forest in {path} references exemplar {index}, but only {available} exemplars were supplied")]
    MissingExemplars {
        /// Path to the forest file.
        path: PathBuf,
        /// The exemplar index referenced by a split.
        index: usize,
        /// Number of exemplar images supplied to the reader.
        available: usize,
    },
}
