//! Accuracy regression tests for handshape-rf.
//!
//! These tests verify that algorithmic changes do not degrade forest
//! accuracy on deterministic synthetic silhouettes, and that trained
//! forests survive a save/load cycle unchanged.

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tempfile::TempDir;

use handshape_rf::{
    BitImage, CONFIRM_RUN, Dataset, Forest, ForestReader, LearnerKind, Matcher, Node, TrainingConfig, categorize, entropy,
    train_forest,
};

// ---------------------------------------------------------------------------
// Helper: deterministic synthetic shape dataset
// ---------------------------------------------------------------------------

/// Generate `per_class` noisy copies of each of four silhouettes: a vertical
/// bar, a horizontal bar, a lower-left triangle and a centered disk.
///
/// Every pixel flips with probability 0.02, and each copy is offset by up to
/// two pixels.
fn make_shapes(per_class: usize, seed: u64) -> Dataset {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut ds = Dataset::new();
    for _ in 0..per_class {
        for class in 0..4usize {
            let dx = rng.gen_range(0..5usize);
            let dy = rng.gen_range(0..5usize);
            let image = BitImage::from_fn(|x, y| {
                let (x, y) = (x + dx, y + dy);
                let inside = match class {
                    0 => (26..38).contains(&x),
                    1 => (26..38).contains(&y),
                    2 => y > x + 4,
                    _ => {
                        let (cx, cy) = (x as i64 - 34, y as i64 - 34);
                        cx * cx + cy * cy < 225
                    }
                };
                inside != (rng.r#gen::<f64>() < 0.02)
            });
            ds.push(image, class);
        }
    }
    ds
}

fn train(ds: &Dataset, n_trees: usize, learner: LearnerKind) -> Forest {
    TrainingConfig::new(4)
        .unwrap()
        .with_n_trees(n_trees)
        .with_max_depth(6)
        .with_generations(300)
        .with_learner(learner)
        .with_seed(42)
        .fit(ds)
        .unwrap()
        .into_forest()
}

// ---------------------------------------------------------------------------
// a) separable quadrant scenario
// ---------------------------------------------------------------------------

/// Two images with an empty top-left quadrant (label 0) and two with a full
/// one (label 1); a single depth-2 tree must separate them perfectly.
#[test]
fn separable_quadrants_are_learned_exactly() {
    let speck = |x: usize, y: usize| x == 60 && y == 60;
    let mut ds = Dataset::new();
    ds.push(BitImage::blank(), 0);
    ds.push(BitImage::from_fn(speck), 0);
    ds.push(BitImage::from_fn(|x, y| x < 32 && y < 32), 1);
    ds.push(BitImage::from_fn(|x, y| (x < 32 && y < 32) || speck(x, y)), 1);

    let forest = train_forest(&ds, 2, 2, 1, 1000).unwrap();
    assert!((forest.evaluate(&ds) - 1.0).abs() < f64::EPSILON);
    for (image, &label) in ds.images().iter().zip(ds.labels()) {
        assert_eq!(categorize(forest.classify(image).as_slice()), Some(label));
    }
}

// ---------------------------------------------------------------------------
// b) accuracy thresholds
// ---------------------------------------------------------------------------

/// Held-out accuracy must exceed 0.85 for the default learner.
#[test]
fn held_out_accuracy_above_threshold() {
    let train_set = make_shapes(15, 42);
    let test_set = make_shapes(10, 7);
    let forest = train(&train_set, 8, LearnerKind::default());

    let accuracy = forest.evaluate(&test_set);
    assert!(accuracy > 0.85, "held-out accuracy {accuracy} <= 0.85");
}

/// Every learner family separates the four shapes on the training set.
#[test]
fn every_learner_fits_training_set() {
    let ds = make_shapes(8, 42);
    for kind in [
        LearnerKind::default(),
        LearnerKind::PixelThreshold,
        LearnerKind::RowMask,
        LearnerKind::NibbleMask { tests: 2 },
        LearnerKind::Exemplar,
        LearnerKind::Haar,
    ] {
        let accuracy = train(&ds, 4, kind).evaluate(&ds);
        assert!(accuracy > 0.8, "{} training accuracy {accuracy} <= 0.8", kind.name());
    }
}

/// Accuracy does not collapse when trees are added.
#[test]
fn report_tracks_accuracy_per_tree() {
    let ds = make_shapes(10, 42);
    let result = TrainingConfig::new(4)
        .unwrap()
        .with_n_trees(6)
        .with_max_depth(6)
        .with_generations(300)
        .fit(&ds)
        .unwrap();
    let report = result.report();
    assert_eq!(report.accuracy_per_tree.len(), 6);
    assert_eq!(report.trees.len(), 6);
    assert!(report.final_accuracy() >= report.accuracy_per_tree[0] - 0.1);
    assert!((report.final_accuracy() - result.forest().evaluate(&ds)).abs() < 1e-12);
}

// ---------------------------------------------------------------------------
// c) structural properties
// ---------------------------------------------------------------------------

#[test]
fn distributions_are_normalized_or_zero() {
    let ds = make_shapes(10, 42);
    let forest = train(&ds, 5, LearnerKind::default());
    for d in forest.classify_batch(make_shapes(5, 3).images()) {
        let sum: f64 = d.as_slice().iter().sum();
        assert!((sum - 1.0).abs() < 1e-9 || d.as_slice().iter().all(|&p| p == 0.0));
    }
}

#[test]
fn leaf_entropy_is_bounded() {
    let ds = make_shapes(10, 42);
    let forest = train(&ds, 3, LearnerKind::RowMask);
    let max = (forest.n_categories() as f64).ln();
    for tree in forest.trees() {
        for node in tree.nodes() {
            if let Node::Leaf { distribution, .. } = node {
                let h = entropy(distribution);
                assert!((0.0..=max + 1e-12).contains(&h));
            }
        }
    }
}

#[test]
fn loaded_leaves_hold_majority_label_samples() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("shapes.forest");
    let ds = make_shapes(10, 42);
    train(&ds, 3, LearnerKind::default()).save(&path).unwrap();

    let forest = Forest::load(&path).unwrap();
    for tree in forest.trees() {
        for node in tree.nodes() {
            if let Node::Leaf {
                samples,
                distribution,
            } = node
                && distribution.iter().any(|&p| p == 1.0)
            {
                let majority = categorize(distribution).unwrap();
                assert!(samples.iter().all(|&s| ds.label(s as usize) == majority));
            }
        }
    }
}

#[test]
fn exemplar_forest_round_trips_with_training_images() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("exemplar.forest");
    let ds = make_shapes(6, 42);
    let forest = train(&ds, 3, LearnerKind::Exemplar);
    forest.save(&path).unwrap();

    let loaded = ForestReader::new(LearnerKind::Exemplar)
        .with_exemplars(ds.images())
        .read(&path)
        .unwrap();
    assert_eq!(forest, loaded);
    assert_eq!(forest.categorize_batch(ds.images()), loaded.categorize_batch(ds.images()));
}

// ---------------------------------------------------------------------------
// d) streaming
// ---------------------------------------------------------------------------

/// A steady stream of one shape confirms that shape after three frames.
#[test]
fn matcher_confirms_steady_stream() {
    let ds = make_shapes(10, 42);
    let forest = train(&ds, 5, LearnerKind::default());
    let frames = make_shapes(3, 11);
    let disk: Vec<_> = frames
        .images()
        .iter()
        .zip(frames.labels())
        .filter(|&(_, &l)| l == 3)
        .map(|(img, _)| img)
        .collect();

    let predictions: Vec<Option<usize>> = disk.iter().map(|img| forest.categorize(img)).collect();
    assert!(predictions.len() >= CONFIRM_RUN);

    // A frame confirms exactly when it closes a run of CONFIRM_RUN equal labels.
    let mut matcher = Matcher::new();
    let mut expected_label = None;
    for (i, &predicted) in predictions.iter().enumerate() {
        let update = matcher.update(predicted, 1.0);
        let closes_run = predicted.is_some()
            && i + 1 >= CONFIRM_RUN
            && predictions[i + 1 - CONFIRM_RUN..=i].iter().all(|&p| p == predicted);
        if closes_run {
            expected_label = predicted;
        }
        assert_eq!(update.confirmed, closes_run, "frame {i} of {predictions:?}");
        assert_eq!(update.label, expected_label, "frame {i} of {predictions:?}");
    }

    // A steady disk stream followed by dropouts stays confirmed on disk.
    let mut matcher = Matcher::new();
    for _ in 0..CONFIRM_RUN {
        matcher.update(Some(3), 0.9);
    }
    let after_dropout = matcher.update(None, 0.0);
    assert!(!after_dropout.confirmed);
    assert_eq!(after_dropout.label, Some(3));
    assert_eq!(matcher.confirmed(), Some((3, 0.9)));
}

#[test]
fn shifted_copies_improve_offset_query() {
    let mut ds = Dataset::new();
    ds.push(BitImage::from_fn(|x, _| (30..34).contains(&x)), 0);
    ds.push(BitImage::from_fn(|_, y| (30..34).contains(&y)), 1);
    let augmented = ds.with_shifted_copies();
    let forest = TrainingConfig::new(2)
        .unwrap()
        .with_n_trees(3)
        .with_generations(500)
        .fit(&augmented)
        .unwrap()
        .into_forest();

    let query = BitImage::from_fn(|x, _| (31..35).contains(&x));
    assert_eq!(forest.categorize(&query), Some(0));
}

#[test]
fn confusion_matches_evaluate() {
    let ds = make_shapes(10, 42);
    let forest = train(&ds, 4, LearnerKind::default());
    let cm = forest.confusion(&ds).unwrap();
    assert_eq!(cm.total(), ds.len());
    assert!((cm.accuracy() - forest.evaluate(&ds)).abs() < 1e-12);
}
