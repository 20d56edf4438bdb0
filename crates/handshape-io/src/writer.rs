//! JSON result writer for training, evaluation, and classification outputs.

use std::fs;
use std::path::{Path, PathBuf};

use handshape_rf::{ConfusionMatrix, MatchUpdate, TrainingReport};
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::IoError;
use crate::domain::{ExperimentName, ShapeName};

/// Per-frame outcome of a classification run, as consumed by
/// [`ResultWriter::write_classification`].
#[derive(Debug, Clone)]
pub struct FrameResult {
    /// Raw per-frame prediction, `None` when the forest had no answer.
    pub predicted: Option<usize>,
    /// Probability of `predicted`.
    pub confidence: f64,
    /// Highest-probability categories, best first.
    pub top_k: Vec<(usize, f64)>,
    /// Closest matched library image and its shift-tolerant score.
    pub nearest_exemplar: Option<(u32, u32)>,
    /// Matcher state after this frame.
    pub matcher: MatchUpdate,
}

/// Writes training, evaluation, and classification results to JSON files.
///
/// Creates the output directory on construction if it does not exist.
/// Output files are named `{experiment}_train.json`,
/// `{experiment}_evaluate.json` and `{experiment}_classify.json`.
pub struct ResultWriter {
    output_dir: PathBuf,
    experiment: ExperimentName,
}

impl ResultWriter {
    /// Create a new writer targeting the given directory and experiment name.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::OutputDirCreate`] if the directory cannot be created.
    #[instrument(skip_all, fields(dir = %output_dir.display(), experiment = %experiment))]
    pub fn new(output_dir: &Path, experiment: ExperimentName) -> Result<Self, IoError> {
        fs::create_dir_all(output_dir).map_err(|e| IoError::OutputDirCreate {
            path: output_dir.to_path_buf(),
            source: e,
        })?;
        debug!("output directory ready");
        Ok(Self {
            output_dir: output_dir.to_path_buf(),
            experiment,
        })
    }

    /// Write a training report to `{experiment}_train.json`.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::WriteFile`] if the file cannot be written.
    #[instrument(skip_all)]
    pub fn write_training(
        &self,
        report: &TrainingReport,
        shape_names: &[ShapeName],
        model_path: &Path,
    ) -> Result<PathBuf, IoError> {
        let artifact = TrainArtifact {
            experiment: self.experiment.as_str(),
            model_path: model_path.display().to_string(),
            shapes: shape_names,
            final_accuracy: report.final_accuracy(),
            report,
        };
        let path = self.write_json("train", &artifact)?;
        info!(path = %path.display(), "training result written");
        Ok(path)
    }

    /// Write evaluation results to `{experiment}_evaluate.json`.
    ///
    /// `shape_names` labels the per-class entries; classes beyond its
    /// length are written without a name.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::WriteFile`] if the file cannot be written.
    #[instrument(skip_all)]
    pub fn write_evaluation(
        &self,
        confusion: &ConfusionMatrix,
        shape_names: &[ShapeName],
    ) -> Result<PathBuf, IoError> {
        let classes: Vec<ClassEntry> = confusion
            .class_metrics()
            .into_iter()
            .zip(confusion.unpredicted())
            .map(|(m, &unpredicted)| ClassEntry {
                class: m.class,
                name: shape_names.get(m.class).map(ShapeName::as_str),
                precision: m.precision,
                recall: m.recall,
                f1: m.f1,
                support: m.support,
                unpredicted,
            })
            .collect();

        let artifact = EvaluateArtifact {
            experiment: self.experiment.as_str(),
            n_samples: confusion.total(),
            n_classes: confusion.n_classes(),
            accuracy: confusion.accuracy(),
            confusion_matrix: confusion.as_rows(),
            class_metrics: classes,
        };
        let path = self.write_json("evaluate", &artifact)?;
        info!(path = %path.display(), accuracy = artifact.accuracy, "evaluation result written");
        Ok(path)
    }

    /// Write per-frame classifications to `{experiment}_classify.json`.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::WriteFile`] if the file cannot be written.
    #[instrument(skip_all, fields(n_frames = frames.len()))]
    pub fn write_classification(
        &self,
        frames: &[FrameResult],
        shape_names: &[ShapeName],
    ) -> Result<PathBuf, IoError> {
        let name = |label: Option<usize>| label.and_then(|l| shape_names.get(l)).map(ShapeName::as_str);
        let entries: Vec<FrameEntry> = frames
            .iter()
            .enumerate()
            .map(|(frame, r)| FrameEntry {
                frame,
                predicted: r.predicted,
                predicted_name: name(r.predicted),
                confidence: r.confidence,
                top_k: r
                    .top_k
                    .iter()
                    .map(|&(class, probability)| PredictionClass { class, probability })
                    .collect(),
                exemplar: r.nearest_exemplar.map(|(sample, _)| sample),
                exemplar_score: r.nearest_exemplar.map(|(_, score)| score),
                confirmed: r.matcher.confirmed,
                confirmed_label: r.matcher.label,
                confirmed_name: name(r.matcher.label),
                confirmed_score: r.matcher.score,
            })
            .collect();

        let artifact = ClassifyArtifact {
            experiment: self.experiment.as_str(),
            n_frames: frames.len(),
            n_unpredicted: frames.iter().filter(|r| r.predicted.is_none()).count(),
            final_label: frames.last().and_then(|r| r.matcher.label),
            frames: entries,
        };
        let path = self.write_json("classify", &artifact)?;
        info!(path = %path.display(), "classification result written");
        Ok(path)
    }

    /// Return the path where the forest file should be saved.
    ///
    /// Does not write anything. Computes `{output_dir}/{experiment}.forest`.
    #[must_use]
    pub fn model_path(&self) -> PathBuf {
        self.output_dir
            .join(format!("{}.forest", self.experiment.as_str()))
    }

    fn write_json(&self, kind: &'static str, artifact: &impl Serialize) -> Result<PathBuf, IoError> {
        let path = self
            .output_dir
            .join(format!("{}_{kind}.json", self.experiment.as_str()));
        let json = serde_json::to_string_pretty(artifact)
            .map_err(|e| IoError::SerializeJson { what: kind, source: e })?;
        fs::write(&path, &json).map_err(|e| IoError::WriteFile {
            path: path.clone(),
            source: e,
        })?;
        Ok(path)
    }
}

// --- Shadow structs for JSON serialization ---

#[derive(Serialize)]
struct TrainArtifact<'a> {
    experiment: &'a str,
    model_path: String,
    shapes: &'a [ShapeName],
    final_accuracy: f64,
    report: &'a TrainingReport,
}

#[derive(Serialize)]
struct EvaluateArtifact<'a> {
    experiment: &'a str,
    n_samples: usize,
    n_classes: usize,
    accuracy: f64,
    confusion_matrix: &'a [Vec<usize>],
    class_metrics: Vec<ClassEntry<'a>>,
}

#[derive(Serialize)]
struct ClassEntry<'a> {
    class: usize,
    name: Option<&'a str>,
    precision: f64,
    recall: f64,
    f1: f64,
    support: usize,
    unpredicted: usize,
}

#[derive(Serialize)]
struct ClassifyArtifact<'a> {
    experiment: &'a str,
    n_frames: usize,
    n_unpredicted: usize,
    final_label: Option<usize>,
    frames: Vec<FrameEntry<'a>>,
}

#[derive(Serialize)]
struct FrameEntry<'a> {
    frame: usize,
    predicted: Option<usize>,
    predicted_name: Option<&'a str>,
    confidence: f64,
    top_k: Vec<PredictionClass>,
    exemplar: Option<u32>,
    exemplar_score: Option<u32>,
    confirmed: bool,
    confirmed_label: Option<usize>,
    confirmed_name: Option<&'a str>,
    confirmed_score: f64,
}

#[derive(Serialize)]
struct PredictionClass {
    class: usize,
    probability: f64,
}
