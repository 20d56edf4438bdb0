//! Weak learners: randomized binary split rules over packed silhouettes.
//!
//! A forest uses exactly one [`LearnerKind`]. Each kind draws trial
//! [`SplitRule`]s from a bounded parameter domain. A rule's `compare`
//! answers `true` to send an image to the left child. Every rule
//! persists as three `i64` fields ([`SplitParams`]), so loading a forest
//! needs the kind it was trained with.

use std::fmt;

use rand::Rng;

use crate::bitimage::{BitImage, IMAGE_DIM};
use crate::error::RfError;

/// Most tests a [`LearnerKind::NibbleMask`] rule may combine.
pub const MAX_NIBBLE_TESTS: usize = 8;

/// Threshold steps for exemplar rules: 200, 300, ..., 800.
const EXEMPLAR_THRESHOLDS: u32 = 7;

const NIBBLE: u64 = 0xF;
const MAX_NIBBLE_SHIFT: u8 = 60;
const COORD_BITS: u32 = 6;
const COORD_MASK: i64 = (1 << COORD_BITS) - 1;
const BOX_BITS: u32 = 4 * COORD_BITS;

/// Family of split rules used by a forest.
///
/// # Defaults
///
/// `PixelWindow { radius: 2 }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LearnerKind {
    /// Foreground count of a `radius x radius` window against a threshold.
    PixelWindow {
        /// Window side length.
        radius: usize,
    },
    /// A single pixel equals a bit value.
    PixelThreshold,
    /// Popcount of one row under a random 64-bit mask below a threshold.
    RowMask,
    /// Conjunction of 4-pixel nibble tests on chosen rows.
    NibbleMask {
        /// Number of nibble tests per rule, `1..=8`.
        tests: usize,
    },
    /// Hamming distance to a stored training image below a threshold.
    Exemplar,
    /// Area-normalized difference of two box sums against a threshold.
    Haar,
}

impl Default for LearnerKind {
    fn default() -> Self {
        Self::PixelWindow { radius: 2 }
    }
}

impl LearnerKind {
    /// Short stable name, used in logs and CLI flags.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::PixelWindow { .. } => "pixel-window",
            Self::PixelThreshold => "pixel-threshold",
            Self::RowMask => "row-mask",
            Self::NibbleMask { .. } => "nibble-mask",
            Self::Exemplar => "exemplar",
            Self::Haar => "haar",
        }
    }

    /// Check that the kind's parameters are usable on 64x64 images.
    ///
    /// # Errors
    ///
    /// Returns [`RfError::InvalidLearner`] for a window radius outside
    /// `1..=64` or a nibble test count outside `1..=8`.
    pub fn validate(&self) -> Result<(), RfError> {
        match *self {
            Self::PixelWindow { radius } if radius == 0 || radius > IMAGE_DIM => {
                Err(RfError::InvalidLearner {
                    kind: self.name(),
                    reason: format!("radius must be in [1, {IMAGE_DIM}], got {radius}"),
                })
            }
            Self::NibbleMask { tests } if tests == 0 || tests > MAX_NIBBLE_TESTS => {
                Err(RfError::InvalidLearner {
                    kind: self.name(),
                    reason: format!("tests must be in [1, {MAX_NIBBLE_TESTS}], got {tests}"),
                })
            }
            _ => Ok(()),
        }
    }

    /// Draw a fresh rule from this kind's parameter domain.
    ///
    /// `images` is the training image table; only exemplar rules read it
    /// and it must be non-empty for them.
    pub(crate) fn random_rule(&self, rng: &mut impl Rng, images: &[BitImage]) -> SplitRule {
        match *self {
            Self::PixelWindow { radius } => {
                let max_origin = IMAGE_DIM - radius;
                SplitRule::PixelWindow {
                    x: rng.gen_range(0..=max_origin) as u8,
                    y: rng.gen_range(0..=max_origin) as u8,
                    radius: radius as u8,
                    threshold: rng.gen_range(0..=(radius * radius) as u32),
                    inverted: rng.r#gen(),
                }
            }
            Self::PixelThreshold => SplitRule::PixelThreshold {
                x: rng.gen_range(0..IMAGE_DIM) as u8,
                y: rng.gen_range(0..IMAGE_DIM) as u8,
                value: rng.r#gen(),
            },
            Self::RowMask => SplitRule::RowMask {
                row: rng.gen_range(0..IMAGE_DIM) as u8,
                mask: rng.r#gen(),
                threshold: rng.gen_range(0..=IMAGE_DIM as u32),
            },
            Self::NibbleMask { tests } => {
                let mut slots = [NibbleTest::default(); MAX_NIBBLE_TESTS];
                for slot in slots.iter_mut().take(tests) {
                    *slot = NibbleTest {
                        shift: rng.gen_range(0..=MAX_NIBBLE_SHIFT),
                        row: rng.gen_range(0..IMAGE_DIM) as u8,
                        min_count: rng.gen_range(0..=4),
                        negate: rng.r#gen(),
                    };
                }
                SplitRule::NibbleMask {
                    tests: slots,
                    n_tests: tests as u8,
                }
            }
            Self::Exemplar => {
                let index = rng.gen_range(0..images.len());
                SplitRule::Exemplar {
                    index: index as u32,
                    threshold: 200 + 100 * rng.gen_range(0..EXEMPLAR_THRESHOLDS),
                    exemplar: images[index],
                }
            }
            Self::Haar => SplitRule::Haar {
                boxes: [HaarBox::random(rng), HaarBox::random(rng)],
                threshold: rng.gen_range(-1.0..1.0),
            },
        }
    }
}

/// One 4-pixel test of a nibble-mask rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NibbleTest {
    /// Bit offset of the nibble within the row, `0..=60`.
    pub shift: u8,
    /// Row the nibble is taken from.
    pub row: u8,
    /// Minimum foreground count for the test to pass, `0..=4`.
    pub min_count: u8,
    /// Test background pixels instead of foreground.
    pub negate: bool,
}

impl NibbleTest {
    fn passes(&self, image: &BitImage) -> bool {
        let row = image.row(self.row as usize);
        let row = if self.negate { !row } else { row };
        (row & (NIBBLE << self.shift)).count_ones() >= u32::from(self.min_count)
    }
}

/// One signed box of a Haar-like rule. Coordinates are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HaarBox {
    /// Leftmost column.
    pub left: u8,
    /// Top row.
    pub top: u8,
    /// Rightmost column.
    pub right: u8,
    /// Bottom row.
    pub bottom: u8,
    /// `true` adds the box density, `false` subtracts it.
    pub positive: bool,
}

impl HaarBox {
    fn random(rng: &mut impl Rng) -> Self {
        let (a, b) = (rng.gen_range(0..IMAGE_DIM), rng.gen_range(0..IMAGE_DIM));
        let (c, d) = (rng.gen_range(0..IMAGE_DIM), rng.gen_range(0..IMAGE_DIM));
        Self {
            left: a.min(b) as u8,
            right: a.max(b) as u8,
            top: c.min(d) as u8,
            bottom: c.max(d) as u8,
            positive: rng.r#gen(),
        }
    }

    /// Signed foreground density of the box, in `[-1, 1]`.
    fn response(&self, image: &BitImage) -> f64 {
        let count = image.box_count(
            self.left as usize,
            self.top as usize,
            self.right as usize,
            self.bottom as usize,
        );
        let area = (usize::from(self.right - self.left) + 1) * (usize::from(self.bottom - self.top) + 1);
        let density = f64::from(count) / area as f64;
        if self.positive { density } else { -density }
    }

    fn encode(&self) -> i64 {
        i64::from(self.left)
            | i64::from(self.top) << COORD_BITS
            | i64::from(self.right) << (2 * COORD_BITS)
            | i64::from(self.bottom) << (3 * COORD_BITS)
    }

    fn decode(bits: i64, positive: bool) -> Result<Self, DecodeError> {
        let coord = |i: u32| ((bits >> (i * COORD_BITS)) & COORD_MASK) as u8;
        let b = Self {
            left: coord(0),
            top: coord(1),
            right: coord(2),
            bottom: coord(3),
            positive,
        };
        if b.left > b.right || b.top > b.bottom {
            return Err(DecodeError::OutOfRange(format!(
                "haar box ({}, {})-({}, {}) is inverted",
                b.left, b.top, b.right, b.bottom
            )));
        }
        Ok(b)
    }
}

/// A committed split rule. `compare` returning `true` routes left.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SplitRule {
    /// `window_count(x, y, radius) > threshold`, or `<` when inverted.
    PixelWindow {
        /// Window left column.
        x: u8,
        /// Window top row.
        y: u8,
        /// Window side length.
        radius: u8,
        /// Count threshold, `0..=radius²`.
        threshold: u32,
        /// Flip the comparison to `count < threshold`.
        inverted: bool,
    },
    /// `pixel(x, y) == value`.
    PixelThreshold {
        /// Pixel column.
        x: u8,
        /// Pixel row.
        y: u8,
        /// Bit value that routes left.
        value: bool,
    },
    /// `popcount(row & mask) < threshold`.
    RowMask {
        /// Row index.
        row: u8,
        /// Column mask.
        mask: u64,
        /// Count threshold, `0..=64`.
        threshold: u32,
    },
    /// Every one of the first `n_tests` nibble tests passes.
    NibbleMask {
        /// Test slots; only the first `n_tests` are used.
        tests: [NibbleTest; MAX_NIBBLE_TESTS],
        /// Number of active tests.
        n_tests: u8,
    },
    /// `hamming(image, exemplar) < threshold`.
    Exemplar {
        /// Training-set index of the exemplar.
        index: u32,
        /// Distance threshold.
        threshold: u32,
        /// The exemplar image itself.
        exemplar: BitImage,
    },
    /// Sum of the two box responses `> threshold`.
    Haar {
        /// The signed boxes.
        boxes: [HaarBox; 2],
        /// Response threshold in `[-1, 1)`.
        threshold: f64,
    },
}

/// The three integers a split rule persists as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SplitParams {
    /// Primary coordinate or index.
    pub dim: i64,
    /// Threshold field.
    pub threshold: i64,
    /// Mask or polarity field.
    pub mask: i64,
}

/// Why a persisted rule could not be rebuilt.
#[derive(Debug)]
pub(crate) enum DecodeError {
    OutOfRange(String),
    MissingExemplar { index: usize },
}

fn pack_bytes(bytes: impl Iterator<Item = u8>) -> i64 {
    bytes
        .enumerate()
        .fold(0u64, |acc, (i, b)| acc | u64::from(b) << (8 * i)) as i64
}

fn byte_at(value: i64, i: usize) -> u8 {
    ((value as u64) >> (8 * i)) as u8
}

fn coordinate(dim: i64, max_origin: usize) -> Result<(u8, u8), DecodeError> {
    if !(0..(IMAGE_DIM * IMAGE_DIM) as i64).contains(&dim) {
        return Err(DecodeError::OutOfRange(format!("pixel index {dim} outside the image")));
    }
    let (x, y) = (dim as usize % IMAGE_DIM, dim as usize / IMAGE_DIM);
    if x > max_origin || y > max_origin {
        return Err(DecodeError::OutOfRange(format!(
            "origin ({x}, {y}) leaves no room for the window"
        )));
    }
    Ok((x as u8, y as u8))
}

fn bounded(value: i64, max: i64, what: &str) -> Result<u32, DecodeError> {
    if !(0..=max).contains(&value) {
        return Err(DecodeError::OutOfRange(format!("{what} {value} outside [0, {max}]")));
    }
    Ok(value as u32)
}

fn flag(value: i64, what: &str) -> Result<bool, DecodeError> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(DecodeError::OutOfRange(format!("{what} must be 0 or 1, got {other}"))),
    }
}

impl SplitRule {
    /// Route an image: `true` means left.
    #[must_use]
    pub fn compare(&self, image: &BitImage) -> bool {
        match self {
            Self::PixelWindow {
                x,
                y,
                radius,
                threshold,
                inverted,
            } => {
                let count = image.window_count(*x as usize, *y as usize, *radius as usize);
                if *inverted {
                    count < *threshold
                } else {
                    count > *threshold
                }
            }
            Self::PixelThreshold { x, y, value } => image.pixel(*x as usize, *y as usize) == *value,
            Self::RowMask {
                row,
                mask,
                threshold,
            } => (image.row(*row as usize) & mask).count_ones() < *threshold,
            Self::NibbleMask { tests, n_tests } => {
                tests[..*n_tests as usize].iter().all(|t| t.passes(image))
            }
            Self::Exemplar {
                threshold,
                exemplar,
                ..
            } => image.hamming_score(exemplar) < *threshold,
            Self::Haar { boxes, threshold } => {
                boxes.iter().map(|b| b.response(image)).sum::<f64>() > *threshold
            }
        }
    }

    /// Encode as the three persisted integers.
    #[must_use]
    pub fn params(&self) -> SplitParams {
        match self {
            Self::PixelWindow {
                x,
                y,
                threshold,
                inverted,
                ..
            } => SplitParams {
                dim: i64::from(*y) * IMAGE_DIM as i64 + i64::from(*x),
                threshold: i64::from(*threshold),
                mask: i64::from(*inverted),
            },
            Self::PixelThreshold { x, y, value } => SplitParams {
                dim: i64::from(*y) * IMAGE_DIM as i64 + i64::from(*x),
                threshold: i64::from(*value),
                mask: 0,
            },
            Self::RowMask {
                row,
                mask,
                threshold,
            } => SplitParams {
                dim: i64::from(*row),
                threshold: i64::from(*threshold),
                mask: *mask as i64,
            },
            Self::NibbleMask { tests, n_tests } => {
                let active = &tests[..*n_tests as usize];
                SplitParams {
                    dim: pack_bytes(active.iter().map(|t| t.row)),
                    threshold: pack_bytes(active.iter().map(|t| t.min_count << 1 | u8::from(t.negate))),
                    mask: pack_bytes(active.iter().map(|t| t.shift)),
                }
            }
            Self::Exemplar {
                index, threshold, ..
            } => SplitParams {
                dim: i64::from(*index),
                threshold: i64::from(*threshold),
                mask: 0,
            },
            Self::Haar { boxes, threshold } => SplitParams {
                dim: boxes[0].encode() | boxes[1].encode() << BOX_BITS,
                threshold: threshold.to_bits() as i64,
                mask: i64::from(boxes[0].positive) | i64::from(boxes[1].positive) << 1,
            },
        }
    }

    /// Rebuild a rule of `kind` from its persisted integers.
    pub(crate) fn decode(
        kind: LearnerKind,
        params: SplitParams,
        exemplars: &[BitImage],
    ) -> Result<Self, DecodeError> {
        let SplitParams {
            dim,
            threshold,
            mask,
        } = params;
        match kind {
            LearnerKind::PixelWindow { radius } => {
                let (x, y) = coordinate(dim, IMAGE_DIM - radius)?;
                Ok(Self::PixelWindow {
                    x,
                    y,
                    radius: radius as u8,
                    threshold: bounded(threshold, (radius * radius) as i64, "window threshold")?,
                    inverted: flag(mask, "window polarity")?,
                })
            }
            LearnerKind::PixelThreshold => {
                let (x, y) = coordinate(dim, IMAGE_DIM - 1)?;
                Ok(Self::PixelThreshold {
                    x,
                    y,
                    value: flag(threshold, "pixel value")?,
                })
            }
            LearnerKind::RowMask => Ok(Self::RowMask {
                row: bounded(dim, IMAGE_DIM as i64 - 1, "row")? as u8,
                mask: mask as u64,
                threshold: bounded(threshold, IMAGE_DIM as i64, "row threshold")?,
            }),
            LearnerKind::NibbleMask { tests } => {
                let mut slots = [NibbleTest::default(); MAX_NIBBLE_TESTS];
                for (i, slot) in slots.iter_mut().enumerate().take(tests) {
                    let packed = byte_at(threshold, i);
                    *slot = NibbleTest {
                        shift: byte_at(mask, i),
                        row: byte_at(dim, i),
                        min_count: packed >> 1,
                        negate: packed & 1 == 1,
                    };
                    if slot.shift > MAX_NIBBLE_SHIFT
                        || usize::from(slot.row) >= IMAGE_DIM
                        || slot.min_count > 4
                    {
                        return Err(DecodeError::OutOfRange(format!("nibble test {i} is out of range")));
                    }
                }
                Ok(Self::NibbleMask {
                    tests: slots,
                    n_tests: tests as u8,
                })
            }
            LearnerKind::Exemplar => {
                let index = usize::try_from(dim)
                    .map_err(|_| DecodeError::OutOfRange(format!("exemplar index {dim}")))?;
                let exemplar = exemplars
                    .get(index)
                    .copied()
                    .ok_or(DecodeError::MissingExemplar { index })?;
                Ok(Self::Exemplar {
                    index: index as u32,
                    threshold: bounded(threshold, i64::from(u32::MAX), "exemplar threshold")?,
                    exemplar,
                })
            }
            LearnerKind::Haar => {
                let value = f64::from_bits(threshold as u64);
                if !value.is_finite() {
                    return Err(DecodeError::OutOfRange("haar threshold is not finite".into()));
                }
                Ok(Self::Haar {
                    boxes: [
                        HaarBox::decode(dim, mask & 1 == 1)?,
                        HaarBox::decode(dim >> BOX_BITS, mask & 2 == 2)?,
                    ],
                    threshold: value,
                })
            }
        }
    }
}

impl fmt::Display for SplitRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PixelWindow {
                x,
                y,
                radius,
                threshold,
                inverted,
            } => {
                let op = if *inverted { '<' } else { '>' };
                write!(f, "window({x}, {y}, r={radius}) {op} {threshold}")
            }
            Self::PixelThreshold { x, y, value } => {
                write!(f, "pixel({x}, {y}) == {}", u8::from(*value))
            }
            Self::RowMask {
                row,
                mask,
                threshold,
            } => write!(f, "popcount(row {row} & {mask:#018x}) < {threshold}"),
            Self::NibbleMask { tests, n_tests } => {
                f.write_str("all[")?;
                for (i, t) in tests[..*n_tests as usize].iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    let neg = if t.negate { "!" } else { "" };
                    write!(f, "{neg}row {}>>{} >= {}", t.row, t.shift, t.min_count)?;
                }
                f.write_str("]")
            }
            Self::Exemplar {
                index, threshold, ..
            } => write!(f, "hamming(exemplar {index}) < {threshold}"),
            Self::Haar { boxes, threshold } => {
                for (i, b) in boxes.iter().enumerate() {
                    let sign = if b.positive { '+' } else { '-' };
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{sign}box({}, {})-({}, {})", b.left, b.top, b.right, b.bottom)?;
                }
                write!(f, " > {threshold:.4}")
            }
        }
    }
}

/// Trial/committed rule pair driven by the split search in [`crate::node`].
#[derive(Debug, Clone)]
pub(crate) struct WeakLearner<'a> {
    kind: LearnerKind,
    images: &'a [BitImage],
    trial: SplitRule,
    saved: SplitRule,
}

impl<'a> WeakLearner<'a> {
    /// Create a learner with a freshly drawn trial rule, also marked as saved.
    pub(crate) fn new(kind: LearnerKind, images: &'a [BitImage], rng: &mut impl Rng) -> Self {
        let trial = kind.random_rule(rng, images);
        Self {
            kind,
            images,
            trial,
            saved: trial,
        }
    }

    /// Draw a new trial rule.
    pub(crate) fn randomize(&mut self, rng: &mut impl Rng) {
        self.trial = self.kind.random_rule(rng, self.images);
    }

    pub(crate) fn compare(&self, image: &BitImage) -> bool {
        self.trial.compare(image)
    }

    /// Commit the trial rule.
    pub(crate) fn save(&mut self) {
        self.saved = self.trial;
    }

    /// Restore the committed rule as the trial rule.
    pub(crate) fn use_saved(&mut self) {
        self.trial = self.saved;
    }

    pub(crate) fn rule(&self) -> SplitRule {
        self.trial
    }
}

impl fmt::Display for WeakLearner<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.trial, f)
    }
}
