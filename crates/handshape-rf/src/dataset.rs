use crate::bitimage::BitImage;

/// Append-only collection of labelled silhouettes.
///
/// Samples are addressed by insertion index for the dataset's lifetime;
/// tree nodes and leaf sample lists store those indices. Labels are
/// validated against the category count when training starts.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    images: Vec<BitImage>,
    labels: Vec<usize>,
}

impl Dataset {
    /// Create an empty dataset.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty dataset with room for `capacity` samples.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            images: Vec::with_capacity(capacity),
            labels: Vec::with_capacity(capacity),
        }
    }

    /// Append a sample and return its index.
    pub fn push(&mut self, image: BitImage, label: usize) -> usize {
        self.images.push(image);
        self.labels.push(label);
        self.images.len() - 1
    }

    /// Return the number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.images.len()
    }

    /// Return `true` if the dataset holds no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Return the image at `index`.
    #[must_use]
    pub fn image(&self, index: usize) -> &BitImage {
        &self.images[index]
    }

    /// Return the label at `index`.
    #[must_use]
    pub fn label(&self, index: usize) -> usize {
        self.labels[index]
    }

    /// Return all images in insertion order.
    #[must_use]
    pub fn images(&self) -> &[BitImage] {
        &self.images
    }

    /// Return all labels in insertion order.
    #[must_use]
    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// Count samples per label, for labels below `n_categories`.
    #[must_use]
    pub fn label_counts(&self, n_categories: usize) -> Vec<usize> {
        let mut counts = vec![0usize; n_categories];
        for &label in &self.labels {
            if let Some(slot) = counts.get_mut(label) {
                *slot += 1;
            }
        }
        counts
    }

    /// Return a dataset holding every sample followed by its eight
    /// one-pixel shifts, all with the sample's label.
    #[must_use]
    pub fn with_shifted_copies(&self) -> Self {
        let mut out = Self::with_capacity(self.len() * 9);
        for (image, &label) in self.images.iter().zip(&self.labels) {
            for shifted in image.neighborhood() {
                out.push(shifted, label);
            }
        }
        out
    }
}
