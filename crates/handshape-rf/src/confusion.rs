//! Confusion matrix and per-class classification metrics.

use std::fmt;

use crate::error::RfError;

/// A confusion matrix for multi-class classification where the classifier
/// may decline to predict.
///
/// Entry `matrix[true_class][predicted_class]` counts samples with true
/// label `true_class` predicted as `predicted_class`; `unpredicted[c]`
/// counts samples of class `c` that got no prediction.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ConfusionMatrix {
    matrix: Vec<Vec<usize>>,
    unpredicted: Vec<usize>,
    n_classes: usize,
}

/// Per-class precision, recall, and F1 score.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ClassMetrics {
    /// The class index.
    pub class: usize,
    /// TP / (TP + FP). 0.0 if nothing was predicted as this class.
    pub precision: f64,
    /// TP / support. Unpredicted samples count as misses.
    pub recall: f64,
    /// Harmonic mean of precision and recall, 0.0 if both are zero.
    pub f1: f64,
    /// Number of true samples in this class.
    pub support: usize,
}

impl ConfusionMatrix {
    /// Build a confusion matrix from true labels and optional predictions.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`RfError::EmptyDataset`] | Zero labels provided |
    /// | [`RfError::PredictionCountMismatch`] | Slices differ in length |
    /// | [`RfError::LabelOutOfRange`] | A true or predicted label is `>= n_classes` |
    pub fn from_predictions(
        true_labels: &[usize],
        predicted: &[Option<usize>],
        n_classes: usize,
    ) -> Result<Self, RfError> {
        if true_labels.is_empty() {
            return Err(RfError::EmptyDataset);
        }
        if true_labels.len() != predicted.len() {
            return Err(RfError::PredictionCountMismatch {
                expected: true_labels.len(),
                predicted: predicted.len(),
            });
        }

        let mut matrix = vec![vec![0usize; n_classes]; n_classes];
        let mut unpredicted = vec![0usize; n_classes];
        for (i, (&t, &p)) in true_labels.iter().zip(predicted).enumerate() {
            let out_of_range = |label| RfError::LabelOutOfRange {
                sample_index: i,
                label,
                n_categories: n_classes,
            };
            if t >= n_classes {
                return Err(out_of_range(t));
            }
            match p {
                Some(p) if p >= n_classes => return Err(out_of_range(p)),
                Some(p) => matrix[t][p] += 1,
                None => unpredicted[t] += 1,
            }
        }
        Ok(Self {
            matrix,
            unpredicted,
            n_classes,
        })
    }

    /// Proportion of samples predicted correctly. Unpredicted samples count
    /// as wrong.
    #[must_use]
    pub fn accuracy(&self) -> f64 {
        let correct: usize = (0..self.n_classes).map(|i| self.matrix[i][i]).sum();
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            correct as f64 / total as f64
        }
    }

    /// Number of samples counted.
    #[must_use]
    pub fn total(&self) -> usize {
        let predicted: usize = self.matrix.iter().flatten().sum();
        predicted + self.unpredicted.iter().sum::<usize>()
    }

    /// Per-class precision, recall, F1, and support.
    #[must_use]
    pub fn class_metrics(&self) -> Vec<ClassMetrics> {
        (0..self.n_classes)
            .map(|c| {
                let tp = self.matrix[c][c];
                let predicted_as_c: usize = (0..self.n_classes).map(|i| self.matrix[i][c]).sum();
                let support = self.matrix[c].iter().sum::<usize>() + self.unpredicted[c];
                let precision = if predicted_as_c == 0 {
                    0.0
                } else {
                    tp as f64 / predicted_as_c as f64
                };
                let recall = if support == 0 {
                    0.0
                } else {
                    tp as f64 / support as f64
                };
                let f1 = if precision + recall == 0.0 {
                    0.0
                } else {
                    2.0 * precision * recall / (precision + recall)
                };
                ClassMetrics {
                    class: c,
                    precision,
                    recall,
                    f1,
                    support,
                }
            })
            .collect()
    }

    /// Return the underlying matrix rows.
    #[must_use]
    pub fn as_rows(&self) -> &[Vec<usize>] {
        &self.matrix
    }

    /// Per-class count of samples with no prediction.
    #[must_use]
    pub fn unpredicted(&self) -> &[usize] {
        &self.unpredicted
    }

    /// Return the number of classes.
    #[must_use]
    pub fn n_classes(&self) -> usize {
        self.n_classes
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>8}", "")?;
        for j in 0..self.n_classes {
            write!(f, " pred_{j:>3}")?;
        }
        writeln!(f, "    none")?;

        for (i, row) in self.matrix.iter().enumerate() {
            write!(f, "true_{i:>3}")?;
            for val in row {
                write!(f, " {val:>7}")?;
            }
            writeln!(f, " {:>7}", self.unpredicted[i])?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn some(labels: &[usize]) -> Vec<Option<usize>> {
        labels.iter().copied().map(Some).collect()
    }

    #[test]
    fn perfect_predictions() {
        let true_labels = vec![0, 0, 1, 1, 2, 2];
        let cm = ConfusionMatrix::from_predictions(&true_labels, &some(&true_labels), 3).unwrap();
        assert!((cm.accuracy() - 1.0).abs() < f64::EPSILON);

        for m in cm.class_metrics() {
            assert!((m.precision - 1.0).abs() < f64::EPSILON);
            assert!((m.recall - 1.0).abs() < f64::EPSILON);
            assert!((m.f1 - 1.0).abs() < f64::EPSILON);
        }
    }

    #[test]
    fn known_confusion_matrix() {
        // Pred: [0,0,1, 1,1,2, 2,2,0]
        let true_labels = vec![0, 0, 0, 1, 1, 1, 2, 2, 2];
        let predicted = some(&[0, 0, 1, 1, 1, 2, 2, 2, 0]);
        let cm = ConfusionMatrix::from_predictions(&true_labels, &predicted, 3).unwrap();

        let metrics = cm.class_metrics();
        assert!((metrics[0].precision - 2.0 / 3.0).abs() < 1e-10);
        assert!((metrics[0].recall - 2.0 / 3.0).abs() < 1e-10);
        assert_eq!(metrics[0].support, 3);
        assert!((cm.accuracy() - 6.0 / 9.0).abs() < 1e-10);
    }

    #[test]
    fn unpredicted_samples_count_as_misses() {
        let true_labels = vec![0, 0, 1, 1];
        let predicted = vec![Some(0), None, Some(1), None];
        let cm = ConfusionMatrix::from_predictions(&true_labels, &predicted, 2).unwrap();

        assert_eq!(cm.unpredicted(), &[1, 1]);
        assert_eq!(cm.total(), 4);
        assert!((cm.accuracy() - 0.5).abs() < 1e-10);

        let metrics = cm.class_metrics();
        assert_eq!(metrics[0].support, 2);
        assert!((metrics[0].precision - 1.0).abs() < 1e-10);
        assert!((metrics[0].recall - 0.5).abs() < 1e-10);
    }

    #[test]
    fn empty_labels_error() {
        let err = ConfusionMatrix::from_predictions(&[], &[], 3).unwrap_err();
        assert!(matches!(err, RfError::EmptyDataset));
    }

    #[test]
    fn length_mismatch_error() {
        let err = ConfusionMatrix::from_predictions(&[0, 1], &[Some(0)], 2).unwrap_err();
        assert!(matches!(
            err,
            RfError::PredictionCountMismatch {
                expected: 2,
                predicted: 1
            }
        ));
    }

    #[test]
    fn out_of_range_prediction_error() {
        let err = ConfusionMatrix::from_predictions(&[0, 1], &[Some(0), Some(5)], 2).unwrap_err();
        assert!(matches!(
            err,
            RfError::LabelOutOfRange {
                sample_index: 1,
                label: 5,
                ..
            }
        ));
    }

    #[test]
    fn display_formatting() {
        let cm = ConfusionMatrix::from_predictions(&[0, 1], &[Some(0), None], 2).unwrap();
        let output = format!("{cm}");
        assert!(output.contains("pred_"));
        assert!(output.contains("true_"));
        assert!(output.contains("none"));
    }

    #[test]
    fn as_rows_returns_matrix() {
        let true_labels = vec![0, 0, 1, 1];
        let predicted = some(&[0, 1, 0, 1]);
        let cm = ConfusionMatrix::from_predictions(&true_labels, &predicted, 2).unwrap();
        let rows = cm.as_rows();
        assert_eq!(rows[0], vec![1, 1]);
        assert_eq!(rows[1], vec![1, 1]);
    }

    #[test]
    fn zero_support_class_metrics() {
        let true_labels = vec![0, 0, 1, 1];
        let cm = ConfusionMatrix::from_predictions(&true_labels, &some(&true_labels), 3).unwrap();
        let metrics = cm.class_metrics();
        assert_eq!(metrics[2].support, 0);
        assert!((metrics[2].recall - 0.0).abs() < f64::EPSILON);
    }
}
