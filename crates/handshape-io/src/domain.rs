//! Domain types for handshape-io.

use handshape_rf::Dataset;

use crate::IoError;

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// A validated experiment name for output file naming.
///
/// Must match `[a-zA-Z0-9_-]+`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentName(String);

impl ExperimentName {
    /// Parse and validate an experiment name.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::InvalidExperimentName`] if the name is empty or
    /// contains characters outside `[a-zA-Z0-9_-]`.
    pub fn new(name: String) -> Result<Self, IoError> {
        if !is_valid_name(&name) {
            return Err(IoError::InvalidExperimentName { name });
        }
        Ok(Self(name))
    }

    /// Return the experiment name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ExperimentName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of one hand shape, the `<name>` in `handshape_<name>.bin`.
///
/// Ordered lexically; a library assigns labels in that order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(transparent)]
pub struct ShapeName(String);

impl ShapeName {
    /// File name prefix shared by every shape file.
    pub const FILE_PREFIX: &'static str = "handshape_";
    /// File name extension shared by every shape file.
    pub const FILE_EXTENSION: &'static str = "bin";

    /// Parse and validate a shape name.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::InvalidShapeName`] if the name is empty or
    /// contains characters outside `[a-zA-Z0-9_-]`.
    pub fn new(name: String) -> Result<Self, IoError> {
        if !is_valid_name(&name) {
            return Err(IoError::InvalidShapeName { name });
        }
        Ok(Self(name))
    }

    /// Extract the shape name from a file name such as `handshape_B.bin`.
    ///
    /// Returns `None` for files that are not shape files.
    pub(crate) fn from_file_name(file_name: &str) -> Option<Result<Self, IoError>> {
        let stem = file_name
            .strip_prefix(Self::FILE_PREFIX)?
            .strip_suffix(Self::FILE_EXTENSION)?
            .strip_suffix('.')?;
        Some(Self::new(stem.to_owned()))
    }

    /// The file name this shape is stored under.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}{}.{}", Self::FILE_PREFIX, self.0, Self::FILE_EXTENSION)
    }

    /// Return the shape name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ShapeName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// All hand shapes of a library directory as one labelled dataset.
///
/// Produced by [`ShapeLibraryReader`](crate::ShapeLibraryReader). Label
/// `i` in the dataset is the shape `names[i]`.
#[derive(Debug)]
pub struct ShapeLibrary {
    names: Vec<ShapeName>,
    dataset: Dataset,
}

impl ShapeLibrary {
    pub(crate) fn new(names: Vec<ShapeName>, dataset: Dataset) -> Self {
        Self { names, dataset }
    }

    /// Shape names, indexed by label.
    #[must_use]
    pub fn names(&self) -> &[ShapeName] {
        &self.names
    }

    /// The labelled images.
    #[must_use]
    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// Consume the library and return its dataset.
    #[must_use]
    pub fn into_dataset(self) -> Dataset {
        self.dataset
    }

    /// Number of shapes, the forest's category count.
    #[must_use]
    pub fn n_shapes(&self) -> usize {
        self.names.len()
    }

    /// Name for a predicted label.
    #[must_use]
    pub fn name(&self, label: usize) -> Option<&ShapeName> {
        self.names.get(label)
    }

    /// Label of the shape called `name`.
    #[must_use]
    pub fn label_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n.as_str() == name)
    }
}
