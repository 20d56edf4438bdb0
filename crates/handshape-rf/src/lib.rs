//! Random-forest hand-shape classification over 64x64 bit images.
//!
//! Trees are grown from randomized weak learners (pixel windows, row
//! masks, exemplar distances, Haar-like boxes and more) by an entropy-gain
//! split search with escalating generation budgets. Trained forests are
//! immutable, classify frames allocation-free into caller-owned buffers,
//! and persist in a compact big-endian file format. A small [`Matcher`]
//! debounces per-frame predictions from a live stream.

mod bitimage;
mod config;
mod confusion;
mod dataset;
mod error;
mod forest;
mod learner;
mod matcher;
mod node;
mod predict;
mod result;
mod serialize;
mod tree;

pub use bitimage::{BitImage, FOREGROUND_THRESHOLD, IMAGE_DIM, IMAGE_PIXELS};
pub use config::{MAX_CATEGORIES, TrainingConfig};
pub use confusion::{ClassMetrics, ConfusionMatrix};
pub use dataset::Dataset;
pub use error::RfError;
pub use forest::{Forest, train_forest};
pub use learner::{HaarBox, LearnerKind, MAX_NIBBLE_TESTS, NibbleTest, SplitParams, SplitRule};
pub use matcher::{CONFIRM_RUN, HISTORY_LEN, MatchUpdate, Matcher};
pub use node::{Node, NodeIndex, entropy};
pub use predict::{DEFAULT_MATCHES_PER_LEAF, Distribution, MAX_MATCHES, MatchBuffer, categorize};
pub use result::{TrainingReport, TrainingResult, TreeSummary};
pub use serialize::ForestReader;
pub use tree::DecisionTree;
