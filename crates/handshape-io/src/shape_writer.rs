//! Hand-shape file writer.

use std::fs;
use std::path::{Path, PathBuf};

use handshape_rf::BitImage;
use tracing::{info, instrument};

use crate::IoError;
use crate::domain::ShapeName;

/// Writes shapes as `handshape_<name>.bin` files into a library directory.
///
/// Creates the directory on construction if it does not exist.
pub struct ShapeWriter {
    dir: PathBuf,
}

impl ShapeWriter {
    /// Create a writer targeting the given library directory.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::OutputDirCreate`] if the directory cannot be created.
    pub fn new(dir: &Path) -> Result<Self, IoError> {
        fs::create_dir_all(dir).map_err(|e| IoError::OutputDirCreate {
            path: dir.to_path_buf(),
            source: e,
        })?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// Write every image of one shape, replacing any existing file.
    ///
    /// Returns the path written.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::WriteFile`] if the file cannot be written or
    /// holds more than `i32::MAX` images.
    #[instrument(skip(self, images), fields(shape = %name, n_images = images.len()))]
    pub fn write(&self, name: &ShapeName, images: &[BitImage]) -> Result<PathBuf, IoError> {
        let path = self.dir.join(name.file_name());
        let count = i32::try_from(images.len()).map_err(|_| IoError::WriteFile {
            path: path.clone(),
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "image count exceeds i32::MAX",
            ),
        })?;

        let mut bytes = Vec::with_capacity(4 + images.len() * crate::SHAPE_IMAGE_BYTES);
        bytes.extend_from_slice(&count.to_be_bytes());
        for image in images {
            for row in image.rows() {
                bytes.extend_from_slice(&row.to_be_bytes());
            }
        }
        fs::write(&path, &bytes).map_err(|e| IoError::WriteFile {
            path: path.clone(),
            source: e,
        })?;

        info!(path = %path.display(), "shape written");
        Ok(path)
    }
}
