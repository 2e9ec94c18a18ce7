//! GSN training binary.
//!
//! Trains a Generative Stochastic Network on a numeric matrix file (one
//! example per row) or on a synthetic binary dataset. Writes JSONL metrics,
//! periodic checkpoints, and optionally a sample chain from the trained model.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use gsn::checkpoint::{load_checkpoint, save_checkpoint};
use gsn::data::{binarize, load_matrix, normalize, synthetic_patterns, train_eval_split, write_matrix};
use gsn::utils::{closest_to_square_factors, format_duration};
use gsn::{Corruption, Dataset, Gsn, GsnConfig, Trainer};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "gsn-train", about = "Train a GSN with walkback")]
struct Args {
    /// JSON config file; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Training matrix (CSV or whitespace separated); synthetic data when absent
    #[arg(long)]
    train: Option<PathBuf>,

    /// Validation matrix
    #[arg(long)]
    valid: Option<PathBuf>,

    /// Test matrix
    #[arg(long)]
    test: Option<PathBuf>,

    /// Hold out this fraction of the training rows for validation when no --valid is given
    #[arg(long, default_value_t = 0.0)]
    eval_fraction: f32,

    /// Binarize inputs at this threshold after loading
    #[arg(long)]
    binarize: Option<f32>,

    /// Rescale inputs to [0, 1] after loading
    #[arg(long, default_value_t = false)]
    normalize: bool,

    #[arg(long)]
    layers: Option<usize>,

    #[arg(long)]
    hidden_size: Option<usize>,

    #[arg(long)]
    walkbacks: Option<usize>,

    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    learning_rate: Option<f32>,

    #[arg(long)]
    momentum: Option<f32>,

    #[arg(long)]
    annealing: Option<f32>,

    /// Input corruption level
    #[arg(long)]
    salt_and_pepper: Option<f32>,

    /// Hidden Gaussian noise standard deviation
    #[arg(long)]
    hidden_sigma: Option<f32>,

    /// Use salt-and-pepper corruption instead of masking
    #[arg(long, default_value_t = false)]
    salt_and_pepper_corruption: bool,

    #[arg(long)]
    seed: Option<u64>,

    /// Synthetic dataset size (rows) when no --train file is given
    #[arg(long, default_value_t = 1000)]
    synthetic_rows: usize,

    /// Synthetic dataset width when no --train file is given
    #[arg(long, default_value_t = 64)]
    synthetic_width: usize,

    /// Output directory for checkpoints and samples
    #[arg(long, default_value = "data/gsn")]
    output_dir: PathBuf,

    /// Output metrics file (JSONL)
    #[arg(long, default_value = "data/gsn/metrics.jsonl")]
    metrics_file: PathBuf,

    /// Resume from checkpoint file
    #[arg(long)]
    resume: Option<PathBuf>,

    /// Number of samples to draw after training (0 = none)
    #[arg(long, default_value_t = 100)]
    samples: usize,
}

fn build_config(args: &Args) -> Result<GsnConfig> {
    let mut config = match &args.config {
        Some(path) => GsnConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => GsnConfig::default(),
    };
    if let Some(v) = args.layers {
        config.layers = v;
    }
    if let Some(v) = args.hidden_size {
        config.hidden_size = v;
    }
    if let Some(v) = args.walkbacks {
        config.walkbacks = v;
    }
    if let Some(v) = args.epochs {
        config.n_epoch = v;
    }
    if let Some(v) = args.batch_size {
        config.batch_size = v;
    }
    if let Some(v) = args.learning_rate {
        config.learning_rate = v;
    }
    if let Some(v) = args.momentum {
        config.momentum = v;
    }
    if let Some(v) = args.annealing {
        config.annealing = v;
    }
    if let Some(v) = args.salt_and_pepper {
        config.input_salt_and_pepper = v;
    }
    if let Some(v) = args.hidden_sigma {
        config.hidden_add_noise_sigma = v;
    }
    if args.salt_and_pepper_corruption {
        config.input_corruption = Corruption::SaltAndPepper;
    }
    if let Some(v) = args.seed {
        config.seed = v;
    }
    config.validate()?;
    Ok(config)
}

fn load_split(args: &Args, path: &Path) -> Result<ndarray::Array2<f32>> {
    let mut data = load_matrix(path).with_context(|| format!("loading {}", path.display()))?;
    if args.normalize {
        normalize(&mut data, 0.0, 1.0);
    }
    if let Some(threshold) = args.binarize {
        data = binarize(&data, threshold);
    }
    Ok(data)
}

fn load_dataset(args: &Args, config: &GsnConfig, rng: &mut StdRng) -> Result<Dataset> {
    let train = match &args.train {
        Some(path) => load_split(args, path)?,
        None => {
            info!(
                rows = args.synthetic_rows,
                width = args.synthetic_width,
                "no --train file, using synthetic patterns"
            );
            synthetic_patterns(args.synthetic_rows, args.synthetic_width, 10, 0.05, rng)
        }
    };

    let mut dataset = match &args.valid {
        Some(path) => Dataset::new(train).with_valid(load_split(args, path)?),
        None if args.eval_fraction > 0.0 => {
            let (train, valid) = train_eval_split(&train, args.eval_fraction);
            Dataset::new(train).with_valid(valid)
        }
        None => Dataset::new(train),
    };
    if let Some(path) = &args.test {
        dataset = dataset.with_test(load_split(args, path)?);
    }

    let width = dataset.input_size()?;
    if let Some(expected) = config.input_size {
        anyhow::ensure!(
            expected == width,
            "config input_size {expected} does not match data width {width}"
        );
    }
    Ok(dataset)
}

fn write_event(file: &mut File, event: serde_json::Value) -> Result<()> {
    writeln!(file, "{event}").context("writing metrics event")?;
    file.flush().context("flushing metrics")?;
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = build_config(&args)?;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let dataset = load_dataset(&args, &config, &mut rng)?;

    fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("creating {}", args.output_dir.display()))?;
    if let Some(parent) = args.metrics_file.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut metrics_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&args.metrics_file)
        .with_context(|| format!("opening {}", args.metrics_file.display()))?;

    config.to_json_file(&args.output_dir.join("config.json"))?;

    let (model, resumed) = match &args.resume {
        Some(path) => {
            let (data, model) = load_checkpoint(path)?;
            info!(path = %path.display(), epoch = data.epoch, cost = data.cost, "resumed from checkpoint");
            anyhow::ensure!(
                model.input_size() == dataset.train.ncols(),
                "checkpoint visible width {} does not match data width {}",
                model.input_size(),
                dataset.train.ncols()
            );
            (model, Some(data))
        }
        None => (Gsn::from_config(&config, Some(&dataset.train), &mut rng)?, None),
    };

    info!(
        layer_sizes = ?model.layer_sizes,
        walkbacks = model.walkbacks,
        train_rows = dataset.train.nrows(),
        valid_rows = dataset.valid.as_ref().map_or(0, |v| v.nrows()),
        test_rows = dataset.test.as_ref().map_or(0, |t| t.nrows()),
        "GSN training"
    );
    write_event(
        &mut metrics_file,
        serde_json::json!({
            "type": "run_start",
            "layer_sizes": model.layer_sizes,
            "walkbacks": model.walkbacks,
            "config": config,
        }),
    )?;

    let mut trainer = match &resumed {
        Some(data) => Trainer::resume(model, config.clone(), data)?,
        None => Trainer::new(model, config.clone())?,
    };
    let output_dir = args.output_dir.clone();

    let summary = trainer.fit(&dataset, |report, model| {
        let event = serde_json::json!({
            "type": "epoch",
            "epoch": report.epoch,
            "train_cost": report.train_cost,
            "valid_cost": report.valid_cost,
            "test_cost": report.test_cost,
            "learning_rate": report.learning_rate,
            "salt_and_pepper": report.salt_and_pepper,
            "patience": report.patience,
            "improved": report.improved,
            "elapsed": report.elapsed.as_secs_f64(),
        });
        if let Err(e) = write_event(&mut metrics_file, event) {
            warn!("metrics write failed: {e:#}");
        }

        if report.save_due {
            let path = output_dir.join(format!("gsn_epoch_{:04}.json", report.epoch));
            let cost = report.valid_cost.unwrap_or(report.train_cost);
            match save_checkpoint(model, &path, report.epoch, cost, report.next_learning_rate) {
                Ok(()) => {
                    info!(path = %path.display(), "checkpoint saved");
                    let event = serde_json::json!({
                        "type": "checkpoint",
                        "epoch": report.epoch,
                        "path": path.display().to_string(),
                    });
                    if let Err(e) = write_event(&mut metrics_file, event) {
                        warn!("metrics write failed: {e:#}");
                    }
                }
                Err(e) => error!("checkpoint save failed: {e}"),
            }
        }
        Ok(())
    })?;

    let final_path = args.output_dir.join("gsn_final.json");
    save_checkpoint(
        trainer.model(),
        &final_path,
        summary.epochs,
        summary.best_cost,
        trainer.state().learning_rate,
    )?;
    info!(
        epochs = summary.epochs,
        best_cost = summary.best_cost,
        reason = ?summary.reason,
        elapsed = %format_duration(summary.elapsed),
        "training complete"
    );
    write_event(
        &mut metrics_file,
        serde_json::json!({
            "type": "run_complete",
            "epochs": summary.epochs,
            "best_cost": summary.best_cost,
            "reason": format!("{:?}", summary.reason),
            "elapsed": summary.elapsed.as_secs_f64(),
            "checkpoint": final_path.display().to_string(),
        }),
    )?;

    if args.samples > 0 {
        let seed = dataset.train.slice(ndarray::s![0..1, ..]).to_owned();
        let samples = trainer.sample(&seed, args.samples, 0)?;
        let views: Vec<_> = samples.samples.iter().map(|s| s.view()).collect();
        let stacked = ndarray::concatenate(ndarray::Axis(0), &views)?;
        let path = args.output_dir.join("samples.csv");
        write_matrix(&path, &stacked)?;
        let (rows, cols) = closest_to_square_factors(args.samples);
        info!(
            path = %path.display(),
            samples = args.samples,
            grid = %format!("{rows}x{cols}"),
            "samples written"
        );
    }

    Ok(())
}
