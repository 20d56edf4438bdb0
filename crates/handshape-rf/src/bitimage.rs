//! Packed 64x64 binary silhouettes and their popcount-based scoring primitives.

use std::fmt;

use crate::error::RfError;

/// Side length of every silhouette, in pixels.
pub const IMAGE_DIM: usize = 64;

/// Number of pixels in a silhouette.
pub const IMAGE_PIXELS: usize = IMAGE_DIM * IMAGE_DIM;

/// Intensities at or above this value pack to foreground.
pub const FOREGROUND_THRESHOLD: u8 = 128;

/// A fixed-size binary image stored as one `u64` word per row.
///
/// The leftmost pixel of a row lives in the most-significant bit, so
/// column `x` is bit `63 - x`. Foreground pixels are 1.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BitImage {
    rows: [u64; IMAGE_DIM],
}

/// Bit mask covering `width` columns starting at column `left`.
fn column_span(left: usize, width: usize) -> u64 {
    if width == 0 || left >= IMAGE_DIM {
        return 0;
    }
    let high = u64::MAX >> left;
    let low = u64::MAX.checked_shr((left + width) as u32).unwrap_or(0);
    high & !low
}

impl BitImage {
    /// An image with every pixel cleared.
    #[must_use]
    pub fn blank() -> Self {
        Self {
            rows: [0; IMAGE_DIM],
        }
    }

    /// Wrap already-packed rows.
    #[must_use]
    pub fn from_rows(rows: [u64; IMAGE_DIM]) -> Self {
        Self { rows }
    }

    /// Build an image by evaluating `f(x, y)` for every pixel.
    #[must_use]
    pub fn from_fn(mut f: impl FnMut(usize, usize) -> bool) -> Self {
        let mut rows = [0u64; IMAGE_DIM];
        for (y, row) in rows.iter_mut().enumerate() {
            for x in 0..IMAGE_DIM {
                if f(x, y) {
                    *row |= 1 << (IMAGE_DIM - 1 - x);
                }
            }
        }
        Self { rows }
    }

    /// Threshold a row-major 8-bit intensity buffer into a packed image.
    ///
    /// # Errors
    ///
    /// Returns [`RfError::ImageSizeMismatch`] unless `raw` holds exactly
    /// [`IMAGE_PIXELS`] values.
    pub fn pack(raw: &[u8]) -> Result<Self, RfError> {
        if raw.len() != IMAGE_PIXELS {
            return Err(RfError::ImageSizeMismatch {
                expected: IMAGE_PIXELS,
                got: raw.len(),
            });
        }
        Ok(Self::from_fn(|x, y| raw[y * IMAGE_DIM + x] >= FOREGROUND_THRESHOLD))
    }

    /// Expand back to a row-major intensity buffer of 0 and 255.
    #[must_use]
    pub fn unpack(&self) -> Vec<u8> {
        let mut raw = Vec::with_capacity(IMAGE_PIXELS);
        for y in 0..IMAGE_DIM {
            for x in 0..IMAGE_DIM {
                raw.push(if self.pixel(x, y) { 255 } else { 0 });
            }
        }
        raw
    }

    /// Return the packed rows.
    #[must_use]
    pub fn rows(&self) -> &[u64; IMAGE_DIM] {
        &self.rows
    }

    /// Return one packed row.
    #[must_use]
    pub fn row(&self, y: usize) -> u64 {
        self.rows[y]
    }

    /// Return whether pixel `(x, y)` is foreground.
    #[must_use]
    pub fn pixel(&self, x: usize, y: usize) -> bool {
        (self.rows[y] >> (IMAGE_DIM - 1 - x)) & 1 == 1
    }

    /// Total number of foreground pixels.
    #[must_use]
    pub fn count_ones(&self) -> u32 {
        self.rows.iter().map(|r| r.count_ones()).sum()
    }

    /// Number of differing pixels. Lower means more similar.
    #[must_use]
    pub fn hamming_score(&self, other: &BitImage) -> u32 {
        self.rows
            .iter()
            .zip(other.rows.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }

    /// Foreground count of the `radius x radius` block whose top-left
    /// pixel is `(x, y)`. The block is clipped at the image border.
    #[must_use]
    pub fn window_count(&self, x: usize, y: usize, radius: usize) -> u32 {
        let span = column_span(x, radius);
        let bottom = (y + radius).min(IMAGE_DIM);
        self.rows[y.min(IMAGE_DIM)..bottom]
            .iter()
            .map(|r| (r & span).count_ones())
            .sum()
    }

    /// Foreground count of the inclusive rectangle `[left, right] x [top, bottom]`.
    /// The rectangle is clipped at the image border.
    #[must_use]
    pub fn box_count(&self, left: usize, top: usize, right: usize, bottom: usize) -> u32 {
        if right < left || bottom < top || left >= IMAGE_DIM || top >= IMAGE_DIM {
            return 0;
        }
        let right = right.min(IMAGE_DIM - 1);
        let span = column_span(left, right - left + 1);
        self.rows[top..=bottom.min(IMAGE_DIM - 1)]
            .iter()
            .map(|r| (r & span).count_ones())
            .sum()
    }

    /// Horizontal flip, used to present left and right hands identically.
    #[must_use]
    pub fn mirrored(&self) -> Self {
        let mut rows = self.rows;
        rows.iter_mut().for_each(|r| *r = r.reverse_bits());
        Self { rows }
    }

    /// Move content one pixel left, replicating the rightmost column.
    #[must_use]
    pub fn shifted_left(&self) -> Self {
        let mut rows = self.rows;
        rows.iter_mut().for_each(|r| *r = (*r << 1) | (*r & 1));
        Self { rows }
    }

    /// Move content one pixel right, replicating the leftmost column.
    #[must_use]
    pub fn shifted_right(&self) -> Self {
        let mut rows = self.rows;
        rows.iter_mut()
            .for_each(|r| *r = (*r >> 1) | (*r & (1 << (IMAGE_DIM - 1))));
        Self { rows }
    }

    /// Move content one pixel up, replicating the bottom row.
    #[must_use]
    pub fn shifted_up(&self) -> Self {
        let mut rows = self.rows;
        rows.copy_within(1.., 0);
        Self { rows }
    }

    /// Move content one pixel down, replicating the top row.
    #[must_use]
    pub fn shifted_down(&self) -> Self {
        let mut rows = self.rows;
        rows.copy_within(..IMAGE_DIM - 1, 1);
        Self { rows }
    }

    /// The image followed by its eight one-pixel offsets.
    #[must_use]
    pub fn neighborhood(&self) -> [BitImage; 9] {
        let up = self.shifted_up();
        let down = self.shifted_down();
        [
            *self,
            self.shifted_left(),
            self.shifted_right(),
            up,
            down,
            up.shifted_left(),
            up.shifted_right(),
            down.shifted_left(),
            down.shifted_right(),
        ]
    }

    /// Lowest Hamming score of any one-pixel offset of `self` against `exemplar`.
    #[must_use]
    pub fn best_shifted_score(&self, exemplar: &BitImage) -> u32 {
        self.neighborhood()
            .iter()
            .map(|candidate| candidate.hamming_score(exemplar))
            .min()
            .unwrap_or(u32::MAX)
    }
}

impl Default for BitImage {
    fn default() -> Self {
        Self::blank()
    }
}

impl fmt::Debug for BitImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BitImage")
            .field("foreground", &self.count_ones())
            .finish()
    }
}

impl fmt::Display for BitImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for y in 0..IMAGE_DIM {
            for x in 0..IMAGE_DIM {
                f.write_str(if self.pixel(x, y) { "#" } else { "." })?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
