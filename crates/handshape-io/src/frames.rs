//! Raw 8-bit frame input.

use std::fs;
use std::path::Path;

use handshape_rf::{BitImage, IMAGE_PIXELS};
use tracing::{info, instrument};

use crate::IoError;

/// Read a file of concatenated 64x64 8-bit grayscale frames.
///
/// Pixels are row-major. Each frame is thresholded by [`BitImage::pack`].
///
/// # Errors
///
/// | Variant | Condition |
/// |---|---|
/// | [`IoError::FileNotFound`] | File doesn't exist or is unreadable |
/// | [`IoError::FrameSizeMismatch`] | Length is not a multiple of 4096 bytes |
#[instrument(fields(path = %path.display()))]
pub fn read_raw_frames(path: &Path) -> Result<Vec<BitImage>, IoError> {
    let bytes = fs::read(path).map_err(|e| IoError::FileNotFound {
        path: path.to_path_buf(),
        source: e,
    })?;
    if bytes.len() % IMAGE_PIXELS != 0 {
        return Err(IoError::FrameSizeMismatch {
            path: path.to_path_buf(),
            len: bytes.len(),
            frame_size: IMAGE_PIXELS,
        });
    }

    let frames = bytes
        .chunks_exact(IMAGE_PIXELS)
        .map(|raw| {
            BitImage::pack(raw).map_err(|_| IoError::FrameSizeMismatch {
                path: path.to_path_buf(),
                len: raw.len(),
                frame_size: IMAGE_PIXELS,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    info!(n_frames = frames.len(), "raw frames read");
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn packs_each_frame() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("frames.raw");
        let mut bytes = vec![0u8; 2 * IMAGE_PIXELS];
        bytes[0] = 200;
        bytes[IMAGE_PIXELS + 64 + 3] = 128;
        bytes[IMAGE_PIXELS + 5] = 127;
        fs::write(&path, &bytes).unwrap();

        let frames = read_raw_frames(&path).unwrap();
        assert_eq!(frames.len(), 2);
        assert!(frames[0].pixel(0, 0));
        assert_eq!(frames[0].count_ones(), 1);
        assert!(frames[1].pixel(3, 1));
        assert_eq!(frames[1].count_ones(), 1);
    }

    #[test]
    fn frames_match_packed_buffers() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("diag.raw");
        let raw: Vec<u8> = (0..IMAGE_PIXELS).map(|i| if i % 65 == 0 { 255 } else { 40 }).collect();
        fs::write(&path, &raw).unwrap();

        let frames = read_raw_frames(&path).unwrap();
        assert_eq!(frames, vec![BitImage::pack(&raw).unwrap()]);
        assert_eq!(frames[0].unpack().iter().filter(|&&p| p == 255).count(), 64);
    }

    #[test]
    fn partial_frame_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("short.raw");
        fs::write(&path, vec![0u8; IMAGE_PIXELS + 10]).unwrap();
        let err = read_raw_frames(&path).unwrap_err();
        assert!(matches!(err, IoError::FrameSizeMismatch { len: 4106, .. }));
    }

    #[test]
    fn missing_file_error() {
        let dir = TempDir::new().unwrap();
        let err = read_raw_frames(&dir.path().join("absent.raw")).unwrap_err();
        assert!(matches!(err, IoError::FileNotFound { .. }));
    }
}
