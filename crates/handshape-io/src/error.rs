//! I/O error types for handshape-io.

use std::path::PathBuf;

/// Errors from shape library files, raw frame input, and result serialization.
#[derive(Debug, thiserror::Error)]
pub enum IoError {
    /// Returned when the input file does not exist or is unreadable.
    #[error("file not found: {path}")]
    FileNotFound {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when the shape directory cannot be listed.
    #[error("cannot read shape directory {path}")]
    DirectoryRead {
        /// Directory that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when a shape directory holds no `handshape_<name>.bin` files.
    #[error("no shape files in {path}")]
    NoShapeFiles {
        /// Directory that was searched.
        path: PathBuf,
    },

    /// Returned when a shape file ends before its declared image count.
    #[error("truncated shape file {path}: header declares {declared} images, file holds {available}")]
    TruncatedShapeFile {
        /// Path to the shape file.
        path: PathBuf,
        /// Image count from the file header.
        declared: usize,
        /// Complete images actually present.
        available: usize,
    },

    /// Returned when a shape file header carries a negative image count.
    #[error("negative image count {count} in {path}")]
    NegativeCount {
        /// Path to the shape file.
        path: PathBuf,
        /// The count read from the header.
        count: i32,
    },

    /// Returned when a shape name is empty or contains characters outside `[a-zA-Z0-9_-]`.
    #[error("invalid shape name \"{name}\": must match [a-zA-Z0-9_-]+")]
    InvalidShapeName {
        /// The invalid name.
        name: String,
    },

    /// Returned when the experiment name contains characters outside `[a-zA-Z0-9_-]`.
    #[error("invalid experiment name \"{name}\": must match [a-zA-Z0-9_-]+")]
    InvalidExperimentName {
        /// The invalid name.
        name: String,
    },

    /// Returned when the output directory cannot be created.
    #[error("cannot create output directory {path}")]
    OutputDirCreate {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when a result or shape file cannot be written.
    #[error("cannot write file {path}")]
    WriteFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when a raw frame file is not a whole number of 64x64 frames.
    #[error("raw frame file {path} has {len} bytes, not a multiple of {frame_size}")]
    FrameSizeMismatch {
        /// Path to the frame file.
        path: PathBuf,
        /// File length in bytes.
        len: usize,
        /// Bytes per frame.
        frame_size: usize,
    },

    /// Returned when a result artifact cannot be encoded as JSON.
    #[error("cannot serialize {what} to JSON")]
    SerializeJson {
        /// Which artifact failed.
        what: &'static str,
        /// Underlying serde_json error.
        source: serde_json::Error,
    },
}
