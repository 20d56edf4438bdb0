//! File I/O, validation, and serialization for the hand-shape pipeline.
//!
//! Reads hand-shape libraries (`handshape_<name>.bin` files) into a
//! labelled [`handshape_rf::Dataset`], reads raw 8-bit frame streams, and
//! writes JSON result artifacts named after a validated experiment.

mod domain;
mod error;
mod frames;
mod shape_reader;
mod shape_writer;
mod writer;

pub use domain::{ExperimentName, ShapeLibrary, ShapeName};
pub use error::IoError;
pub use frames::read_raw_frames;
pub use shape_reader::{DEFAULT_MAX_PER_SHAPE, SHAPE_IMAGE_BYTES, ShapeLibraryReader, read_shape_file};
pub use shape_writer::ShapeWriter;
pub use writer::{FrameResult, ResultWriter};
