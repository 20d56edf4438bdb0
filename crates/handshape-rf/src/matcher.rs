//! Debounce filter over a stream of per-frame predictions.

/// Number of raw predictions remembered.
pub const HISTORY_LEN: usize = 5;

/// Consecutive agreeing predictions needed to confirm a label.
pub const CONFIRM_RUN: usize = 3;

/// Outcome of feeding one frame to a [`Matcher`].
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct MatchUpdate {
    /// Whether this frame confirmed its label.
    pub confirmed: bool,
    /// The confirmed label after this frame, if any.
    pub label: Option<usize>,
    /// Score recorded when `label` was confirmed.
    pub score: f64,
}

/// Temporal smoothing for one live prediction stream.
///
/// A label is confirmed only once the newest [`CONFIRM_RUN`] raw
/// predictions agree on it. Disagreeing frames leave the confirmed label
/// untouched, so single-frame flicker never reaches the caller.
///
/// One instance per stream; the matcher holds no reference to the forest.
#[derive(Debug, Clone, PartialEq)]
pub struct Matcher {
    history: [Option<usize>; HISTORY_LEN],
    confirmed: Option<(usize, f64)>,
}

impl Default for Matcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Matcher {
    /// Create a matcher with empty history and nothing confirmed.
    #[must_use]
    pub fn new() -> Self {
        Self {
            history: [None; HISTORY_LEN],
            confirmed: None,
        }
    }

    /// Feed the raw prediction for the next frame.
    ///
    /// `None` (no prediction) is recorded in the history and can never be
    /// confirmed.
    pub fn update(&mut self, label: Option<usize>, score: f64) -> MatchUpdate {
        self.history.rotate_right(1);
        self.history[0] = label;

        let confirmed = match label {
            Some(l) => self.history[..CONFIRM_RUN].iter().all(|&h| h == Some(l)),
            None => false,
        };
        if confirmed && let Some(l) = label {
            if self.confirmed.map(|(c, _)| c) != Some(l) {
                tracing::debug!(label = l, score, "label confirmed");
            }
            self.confirmed = Some((l, score));
        }

        MatchUpdate {
            confirmed,
            label: self.confirmed.map(|(l, _)| l),
            score: self.confirmed.map_or(0.0, |(_, s)| s),
        }
    }

    /// Forget the history and the confirmed label.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// The confirmed label and its score.
    #[must_use]
    pub fn confirmed(&self) -> Option<(usize, f64)> {
        self.confirmed
    }

    /// Raw predictions, most recent first.
    #[must_use]
    pub fn history(&self) -> &[Option<usize>; HISTORY_LEN] {
        &self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: usize = 4;
    const B: usize = 7;

    fn feed(labels: &[Option<usize>]) -> (Matcher, Vec<MatchUpdate>) {
        let mut m = Matcher::new();
        let updates = labels
            .iter()
            .enumerate()
            .map(|(i, &l)| m.update(l, i as f64))
            .collect();
        (m, updates)
    }

    #[test]
    fn confirms_after_third_agreeing_frame() {
        let (_, updates) = feed(&[Some(A), Some(A), Some(A), Some(B)]);
        assert!(!updates[0].confirmed);
        assert!(!updates[1].confirmed);
        assert!(updates[2].confirmed);
        assert_eq!(updates[2].label, Some(A));

        assert!(!updates[3].confirmed);
        assert_eq!(updates[3].label, Some(A));
        assert_eq!(updates[3].score, 2.0);
    }

    #[test]
    fn switches_after_three_new_frames() {
        let (m, updates) = feed(&[Some(A), Some(A), Some(A), Some(B), Some(B), Some(B)]);
        assert_eq!(updates[4].label, Some(A));
        assert!(updates[5].confirmed);
        assert_eq!(updates[5].label, Some(B));
        assert_eq!(m.confirmed(), Some((B, 5.0)));
    }

    #[test]
    fn stays_confirmed_while_stable() {
        let (_, updates) = feed(&[Some(A); 5]);
        assert!(updates[2..].iter().all(|u| u.confirmed && u.label == Some(A)));
    }

    #[test]
    fn flicker_never_confirms() {
        let (m, updates) = feed(&[Some(A), Some(B), Some(A), Some(B), Some(A)]);
        assert!(updates.iter().all(|u| !u.confirmed && u.label.is_none()));
        assert_eq!(m.history()[0], Some(A));
        assert_eq!(m.history()[1], Some(B));
    }

    #[test]
    fn no_prediction_never_confirms() {
        let (_, updates) = feed(&[None, None, None, None]);
        assert!(updates.iter().all(|u| !u.confirmed && u.label.is_none()));
    }

    #[test]
    fn reset_clears_state() {
        let (mut m, _) = feed(&[Some(A), Some(A), Some(A)]);
        m.reset();
        assert_eq!(m, Matcher::new());
        assert!(!m.update(Some(A), 0.0).confirmed);
    }
}
