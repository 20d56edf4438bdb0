use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};

use handshape_io::{
    DEFAULT_MAX_PER_SHAPE, ExperimentName, FrameResult, ResultWriter, ShapeLibraryReader, ShapeName, read_raw_frames,
};
use handshape_rf::{BitImage, Dataset, Forest, ForestReader, LearnerKind, MatchBuffer, Matcher, TrainingConfig};

#[derive(Parser)]
#[command(name = "handshape")]
#[command(about = "Random-forest hand-shape classification over 64x64 silhouettes")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// RNG seed for reproducibility
    #[arg(long, default_value_t = 42, global = true)]
    seed: u64,

    /// Enable verbose (debug-level) logging
    #[arg(long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(long, global = true)]
    quiet: bool,

    /// Number of threads for parallel inference (defaults to all cores)
    #[arg(long, global = true)]
    threads: Option<usize>,
}

/// Weak-learner family and its parameters.
#[derive(Args, Debug, Clone)]
struct LearnerArgs {
    /// Split rule family: "pixel-window", "pixel-threshold", "row-mask",
    /// "nibble-mask", "exemplar", or "haar"
    #[arg(long, default_value = "pixel-window")]
    learner: String,

    /// Window radius for pixel-window rules
    #[arg(long, default_value_t = 2)]
    radius: usize,

    /// Nibble tests per nibble-mask rule
    #[arg(long, default_value_t = 1)]
    tests: usize,
}

/// Where the labelled shapes come from.
#[derive(Args, Debug, Clone)]
struct LibraryArgs {
    /// Directory of handshape_<name>.bin files
    #[arg(long)]
    shapes: PathBuf,

    /// Maximum images read per shape file
    #[arg(long, default_value_t = DEFAULT_MAX_PER_SHAPE)]
    max_per_shape: usize,

    /// Add the eight one-pixel shifts of every image
    #[arg(long, default_value_t = false)]
    shift_augment: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Train a forest on a shape library and save it
    Train {
        #[command(flatten)]
        library: LibraryArgs,

        /// Experiment name for output files (must match [a-zA-Z0-9_-]+)
        #[arg(long)]
        experiment: String,

        /// Output directory for result files
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,

        /// Number of trees in the forest
        #[arg(long, default_value_t = 1)]
        n_trees: usize,

        /// Maximum tree depth
        #[arg(long, default_value_t = 3)]
        max_depth: usize,

        /// Random weak learners tried per split search round
        #[arg(long, default_value_t = 1000)]
        generations: usize,

        #[command(flatten)]
        learner: LearnerArgs,
    },

    /// Measure a saved forest against a shape library
    Evaluate {
        /// Path to the forest file
        #[arg(long)]
        model: PathBuf,

        #[command(flatten)]
        library: LibraryArgs,

        /// Experiment name for output files
        #[arg(long)]
        experiment: String,

        /// Output directory for result files
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,

        #[command(flatten)]
        learner: LearnerArgs,
    },

    /// Classify a stream of raw frames with a saved forest
    Classify {
        /// Path to the forest file
        #[arg(long)]
        model: PathBuf,

        /// File of concatenated 64x64 8-bit frames
        #[arg(long)]
        frames: PathBuf,

        /// Shape library the forest was trained on, for shape names and
        /// the nearest matched exemplar of each frame
        #[arg(long)]
        shapes: Option<PathBuf>,

        /// Maximum images read per shape file
        #[arg(long, default_value_t = DEFAULT_MAX_PER_SHAPE)]
        max_per_shape: usize,

        /// Add the eight one-pixel shifts of every library image
        #[arg(long, default_value_t = false)]
        shift_augment: bool,

        /// Number of top-k classes to output per frame
        #[arg(long, default_value_t = 3)]
        top_k: usize,

        /// Mirror frames horizontally before classifying
        #[arg(long, default_value_t = false)]
        mirror: bool,

        /// Experiment name for output files
        #[arg(long)]
        experiment: String,

        /// Output directory for result files
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,

        #[command(flatten)]
        learner: LearnerArgs,
    },
}

// --- JSON stdout output structs ---

#[derive(Serialize)]
struct TrainOutput {
    experiment: String,
    model: String,
    n_shapes: usize,
    n_images: usize,
    n_trees: usize,
    learner: &'static str,
    training_accuracy: f64,
}

#[derive(Serialize)]
struct EvaluateOutput {
    experiment: String,
    n_images: usize,
    model_n_trees: usize,
    model_n_categories: usize,
    accuracy: f64,
}

#[derive(Serialize)]
struct ClassifyOutput {
    experiment: String,
    n_frames: usize,
    n_confirmations: usize,
    final_label: Option<usize>,
    final_name: Option<String>,
}

fn parse_learner(args: &LearnerArgs) -> Result<LearnerKind> {
    let kind = match args.learner.as_str() {
        "pixel-window" => LearnerKind::PixelWindow { radius: args.radius },
        "pixel-threshold" => LearnerKind::PixelThreshold,
        "row-mask" => LearnerKind::RowMask,
        "nibble-mask" => LearnerKind::NibbleMask { tests: args.tests },
        "exemplar" => LearnerKind::Exemplar,
        "haar" => LearnerKind::Haar,
        other => anyhow::bail!(
            "unknown learner: {other} (expected pixel-window, pixel-threshold, row-mask, nibble-mask, exemplar, or haar)"
        ),
    };
    kind.validate()?;
    Ok(kind)
}

/// Read a library and apply shift augmentation if requested.
fn load_library(
    shapes: &std::path::Path,
    max_per_shape: usize,
    shift_augment: bool,
) -> Result<(Vec<ShapeName>, Dataset)> {
    let library = ShapeLibraryReader::new(shapes)
        .with_max_per_shape(max_per_shape)
        .read()
        .context("failed to read shape library")?;
    let names = library.names().to_vec();
    let mut dataset = library.into_dataset();
    if shift_augment {
        dataset = dataset.with_shifted_copies();
        info!(n_images = dataset.len(), "library augmented with shifted copies");
    }
    Ok((names, dataset))
}

fn load_forest(model: &std::path::Path, kind: LearnerKind, exemplars: &[BitImage]) -> Result<Forest> {
    let forest = ForestReader::new(kind)
        .with_exemplars(exemplars)
        .read(model)
        .with_context(|| format!("failed to load forest from {}", model.display()))?;
    info!(
        n_trees = forest.n_trees(),
        n_categories = forest.n_categories(),
        "forest loaded"
    );
    Ok(forest)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match (cli.verbose, cli.quiet) {
        (true, _) => "debug",
        (_, true) => "error",
        _ => "info",
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Configure Rayon thread pool
    if let Some(threads) = cli.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("failed to configure thread pool")?;
        info!(threads, "thread pool configured");
    }

    match cli.command {
        Command::Train {
            library,
            experiment,
            output_dir,
            n_trees,
            max_depth,
            generations,
            learner,
        } => {
            let experiment_name = ExperimentName::new(experiment.clone())?;
            let kind = parse_learner(&learner)?;
            let (names, dataset) = load_library(&library.shapes, library.max_per_shape, library.shift_augment)?;

            let config = TrainingConfig::new(names.len())?
                .with_n_trees(n_trees)
                .with_max_depth(max_depth)
                .with_generations(generations)
                .with_learner(kind)
                .with_seed(cli.seed);
            let result = config.fit(&dataset).context("training failed")?;

            // Save forest and write JSON artifact
            let writer = ResultWriter::new(&output_dir, experiment_name)?;
            let model_path = writer.model_path();
            result.forest().save(&model_path)?;
            writer.write_training(result.report(), &names, &model_path)?;

            let output = TrainOutput {
                experiment,
                model: model_path.display().to_string(),
                n_shapes: names.len(),
                n_images: dataset.len(),
                n_trees: result.forest().n_trees(),
                learner: kind.name(),
                training_accuracy: result.report().final_accuracy(),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }

        Command::Evaluate {
            model,
            library,
            experiment,
            output_dir,
            learner,
        } => {
            let experiment_name = ExperimentName::new(experiment.clone())?;
            let kind = parse_learner(&learner)?;
            let (names, dataset) = load_library(&library.shapes, library.max_per_shape, library.shift_augment)?;
            let forest = load_forest(&model, kind, dataset.images())?;
            if forest.n_categories() != names.len() {
                warn!(
                    model_categories = forest.n_categories(),
                    library_shapes = names.len(),
                    "model and library disagree on the shape count"
                );
            }

            let confusion = forest
                .confusion(&dataset)
                .context("evaluation failed")?;
            let writer = ResultWriter::new(&output_dir, experiment_name)?;
            writer.write_evaluation(&confusion, &names)?;

            let output = EvaluateOutput {
                experiment,
                n_images: dataset.len(),
                model_n_trees: forest.n_trees(),
                model_n_categories: forest.n_categories(),
                accuracy: confusion.accuracy(),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }

        Command::Classify {
            model,
            frames,
            shapes,
            max_per_shape,
            shift_augment,
            top_k,
            mirror,
            experiment,
            output_dir,
            learner,
        } => {
            let experiment_name = ExperimentName::new(experiment.clone())?;
            let kind = parse_learner(&learner)?;
            let (names, exemplars) = match &shapes {
                Some(dir) => load_library(dir, max_per_shape, shift_augment)?,
                None => (Vec::new(), Dataset::new()),
            };
            let forest = load_forest(&model, kind, exemplars.images())?;

            let mut images = read_raw_frames(&frames).context("failed to read frames")?;
            if mirror {
                images.iter_mut().for_each(|image| *image = image.mirrored());
            }

            // Frames arrive in order; one matcher debounces the whole stream.
            let mut matcher = Matcher::new();
            let mut buffer = MatchBuffer::for_forest(&forest);
            let mut results = Vec::with_capacity(images.len());
            for image in &images {
                forest.match_into(image, &mut buffer)?;
                let scores = buffer.distribution();
                let predicted = handshape_rf::categorize(scores);
                let confidence = predicted.map_or(0.0, |p| scores[p]);
                let mut ranked: Vec<(usize, f64)> = scores.iter().copied().enumerate().collect();
                ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
                ranked.truncate(top_k);
                results.push(FrameResult {
                    predicted,
                    confidence,
                    top_k: ranked,
                    nearest_exemplar: buffer.nearest_exemplar(image, exemplars.images()),
                    matcher: matcher.update(predicted, confidence),
                });
            }

            let writer = ResultWriter::new(&output_dir, experiment_name)?;
            writer.write_classification(&results, &names)?;

            let final_label = matcher.confirmed().map(|(label, _)| label);
            let output = ClassifyOutput {
                experiment,
                n_frames: results.len(),
                n_confirmations: results.iter().filter(|r| r.matcher.confirmed).count(),
                final_label,
                final_name: final_label
                    .and_then(|l| names.get(l))
                    .map(ToString::to_string),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}
