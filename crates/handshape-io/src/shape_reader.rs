//! Hand-shape library reader with full input validation.

use std::fs;
use std::path::{Path, PathBuf};

use handshape_rf::{BitImage, Dataset, IMAGE_DIM};
use tracing::{debug, info, instrument};

use crate::IoError;
use crate::domain::{ShapeLibrary, ShapeName};

/// Bytes per packed image in a shape file.
pub const SHAPE_IMAGE_BYTES: usize = IMAGE_DIM * 8;

/// Default cap on images read from one shape file.
pub const DEFAULT_MAX_PER_SHAPE: usize = 10_000;

/// Reads every `handshape_<name>.bin` file in a directory.
///
/// Each file holds a big-endian `i32` image count followed by that many
/// images of 64 big-endian `i64` rows. Shapes are sorted by name and
/// labelled by their position in that order. Other files are ignored.
///
/// # Errors
///
/// | Variant | Condition |
/// |---|---|
/// | [`IoError::DirectoryRead`] | Directory missing or unreadable |
/// | [`IoError::NoShapeFiles`] | No shape files in the directory |
/// | [`IoError::InvalidShapeName`] | A shape file has an empty or unusable name |
/// | [`IoError::FileNotFound`] | A shape file cannot be read |
/// | [`IoError::NegativeCount`] | Header count below zero |
/// | [`IoError::TruncatedShapeFile`] | Fewer images than the header declares |
pub struct ShapeLibraryReader {
    dir: PathBuf,
    max_per_shape: usize,
}

impl ShapeLibraryReader {
    /// Create a new reader for the given library directory.
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            max_per_shape: DEFAULT_MAX_PER_SHAPE,
        }
    }

    /// Read at most `max_per_shape` images from each file.
    #[must_use]
    pub fn with_max_per_shape(mut self, max_per_shape: usize) -> Self {
        self.max_per_shape = max_per_shape;
        self
    }

    /// Read and validate the library.
    #[instrument(skip(self), fields(dir = %self.dir.display(), max_per_shape = self.max_per_shape))]
    pub fn read(&self) -> Result<ShapeLibrary, IoError> {
        let dir_err = |e| IoError::DirectoryRead {
            path: self.dir.clone(),
            source: e,
        };

        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(dir_err)? {
            let entry = entry.map_err(dir_err)?;
            let file_name = entry.file_name();
            let Some(parsed) = file_name.to_str().and_then(ShapeName::from_file_name) else {
                debug!(file = ?file_name, "skipping non-shape file");
                continue;
            };
            files.push((parsed?, entry.path()));
        }
        if files.is_empty() {
            return Err(IoError::NoShapeFiles {
                path: self.dir.clone(),
            });
        }
        files.sort_by(|a, b| a.0.cmp(&b.0));

        let mut names = Vec::with_capacity(files.len());
        let mut dataset = Dataset::new();
        for (label, (name, path)) in files.into_iter().enumerate() {
            let images = read_shape_file(&path, self.max_per_shape)?;
            info!(shape = %name, label, n_images = images.len(), "read shape");
            for image in images {
                dataset.push(image, label);
            }
            names.push(name);
        }

        info!(n_shapes = names.len(), n_images = dataset.len(), "shape library read");
        Ok(ShapeLibrary::new(names, dataset))
    }
}

/// Read the first `max_images` images of one shape file.
///
/// The file must hold every image its header declares, even those past
/// `max_images`.
///
/// # Errors
///
/// Same per-file conditions as [`ShapeLibraryReader::read`].
pub fn read_shape_file(path: &Path, max_images: usize) -> Result<Vec<BitImage>, IoError> {
    let bytes = fs::read(path).map_err(|e| IoError::FileNotFound {
        path: path.to_path_buf(),
        source: e,
    })?;

    let available = bytes.len().saturating_sub(4) / SHAPE_IMAGE_BYTES;
    let Some((header, body)) = bytes.split_first_chunk::<4>() else {
        return Err(IoError::TruncatedShapeFile {
            path: path.to_path_buf(),
            declared: 0,
            available,
        });
    };
    let count = i32::from_be_bytes(*header);
    let declared = usize::try_from(count).map_err(|_| IoError::NegativeCount {
        path: path.to_path_buf(),
        count,
    })?;
    if available < declared {
        return Err(IoError::TruncatedShapeFile {
            path: path.to_path_buf(),
            declared,
            available,
        });
    }
    if body.len() > declared * SHAPE_IMAGE_BYTES {
        debug!(
            path = %path.display(),
            extra_bytes = body.len() - declared * SHAPE_IMAGE_BYTES,
            "ignoring bytes after last image"
        );
    }

    let images = body
        .chunks_exact(SHAPE_IMAGE_BYTES)
        .take(declared.min(max_images))
        .map(|chunk| {
            let mut rows = [0u64; IMAGE_DIM];
            for (row, word) in rows.iter_mut().zip(chunk.chunks_exact(8)) {
                let mut be = [0u8; 8];
                be.copy_from_slice(word);
                *row = u64::from_be_bytes(be);
            }
            BitImage::from_rows(rows)
        })
        .collect();
    Ok(images)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_raw(dir: &Path, file: &str, count: i32, images: &[BitImage]) {
        let mut bytes = count.to_be_bytes().to_vec();
        for image in images {
            for row in image.rows() {
                bytes.extend_from_slice(&row.to_be_bytes());
            }
        }
        fs::write(dir.join(file), bytes).unwrap();
    }

    fn bar(x0: usize) -> BitImage {
        BitImage::from_fn(|x, _| (x0..x0 + 4).contains(&x))
    }

    #[test]
    fn reads_all_shapes_sorted_by_name() {
        let dir = TempDir::new().unwrap();
        write_raw(dir.path(), "handshape_Y.bin", 2, &[bar(1), bar(2)]);
        write_raw(dir.path(), "handshape_A.bin", 1, &[bar(30)]);
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let library = ShapeLibraryReader::new(dir.path()).read().unwrap();
        let names: Vec<_> = library.names().iter().map(ShapeName::as_str).collect();
        assert_eq!(names, ["A", "Y"]);
        assert_eq!(library.dataset().labels(), &[0, 1, 1]);
        assert_eq!(library.dataset().image(0), &bar(30));
        assert_eq!(library.dataset().image(2), &bar(2));
        assert_eq!(library.label_of("Y"), Some(1));
    }

    #[test]
    fn max_per_shape_caps_each_file() {
        let dir = TempDir::new().unwrap();
        write_raw(dir.path(), "handshape_A.bin", 3, &[bar(1), bar(2), bar(3)]);
        let library = ShapeLibraryReader::new(dir.path())
            .with_max_per_shape(2)
            .read()
            .unwrap();
        assert_eq!(library.dataset().len(), 2);
    }

    #[test]
    fn truncated_file_error() {
        let dir = TempDir::new().unwrap();
        write_raw(dir.path(), "handshape_A.bin", 2, &[bar(1)]);
        let err = ShapeLibraryReader::new(dir.path()).read().unwrap_err();
        assert!(matches!(
            err,
            IoError::TruncatedShapeFile {
                declared: 2,
                available: 1,
                ..
            }
        ));
    }

    #[test]
    fn negative_count_error() {
        let dir = TempDir::new().unwrap();
        write_raw(dir.path(), "handshape_A.bin", -1, &[]);
        let err = ShapeLibraryReader::new(dir.path()).read().unwrap_err();
        assert!(matches!(err, IoError::NegativeCount { count: -1, .. }));
    }

    #[test]
    fn empty_directory_error() {
        let dir = TempDir::new().unwrap();
        let err = ShapeLibraryReader::new(dir.path()).read().unwrap_err();
        assert!(matches!(err, IoError::NoShapeFiles { .. }));
    }

    #[test]
    fn missing_directory_error() {
        let dir = TempDir::new().unwrap();
        let err = ShapeLibraryReader::new(&dir.path().join("absent")).read().unwrap_err();
        assert!(matches!(err, IoError::DirectoryRead { .. }));
    }

    #[test]
    fn empty_shape_name_error() {
        let dir = TempDir::new().unwrap();
        write_raw(dir.path(), "handshape_.bin", 0, &[]);
        let err = ShapeLibraryReader::new(dir.path()).read().unwrap_err();
        assert!(matches!(err, IoError::InvalidShapeName { .. }));
    }
}
