//! Training and summary pipelines behind the CLI subcommands.

use std::path::PathBuf;
use std::time::Instant;

use burn::backend::ndarray::NdArray;
use burn::backend::Autodiff;

use dynemb::training::checkpoint::{load_meta, load_model, load_optimizer};
use dynemb::{RecurrentDynamics, RecurrentDynamicsConfig, TrainingCycle};
use interactions::StreamReader;

use crate::config::{build_training_config, TrainOverrides};

type TrainBackend = Autodiff<NdArray<f32>>;
type TrainModel = RecurrentDynamics<TrainBackend>;

/// Arguments for the `train` subcommand.
#[derive(Debug)]
pub struct TrainArgs {
    /// Path to the interaction stream Parquet file.
    pub stream: PathBuf,
    /// Optional training config TOML file.
    pub config: Option<PathBuf>,
    /// CLI overrides applied on top of the TOML values.
    pub overrides: TrainOverrides,
    /// Checkpoint directory to resume from.
    pub resume: Option<PathBuf>,
}

/// Arguments for the `summary` subcommand.
#[derive(Debug)]
pub struct SummaryArgs {
    pub stream: PathBuf,
    pub json: bool,
}

/// Train embeddings on a stream and write checkpoints.
pub fn run_train(args: TrainArgs) -> anyhow::Result<()> {
    let start = Instant::now();

    // 1. Build and validate config before touching the data
    let config = build_training_config(args.config.as_deref(), &args.overrides)?;
    tracing::info!(
        epochs = config.epochs,
        embedding_dim = config.embedding_dim,
        train_proportion = config.train_proportion,
        state_change = config.state_change,
        num_windows = config.num_windows,
        "Training config ready"
    );

    // 2. Load stream
    let stream = StreamReader::read(&args.stream)?;
    let stats = stream.stats();
    println!("--- Network Statistics ---");
    println!("{stats}");

    // 3. Build model and optimizer, optionally restoring a checkpoint
    let device = Default::default();
    let mut model = RecurrentDynamicsConfig::for_stream(&stream, config.embedding_dim).init::<TrainBackend>(&device);
    let mut optimizer = config.optimizer::<TrainBackend, TrainModel>();
    let mut start_epoch = 0;
    if let Some(dir) = &args.resume {
        let meta = load_meta(dir)?;
        if meta.num_interactions != stream.len() || meta.embedding_dim != config.embedding_dim {
            anyhow::bail!(
                "Checkpoint {} was trained on {} interactions with d={}, got {} interactions with d={}",
                dir.display(),
                meta.num_interactions,
                meta.embedding_dim,
                stream.len(),
                config.embedding_dim
            );
        }
        model = load_model(model, dir, &device)?;
        optimizer = load_optimizer::<TrainBackend, TrainModel, _>(optimizer, dir, &device)?;
        start_epoch = meta.epoch + 1;
        tracing::info!(path = %dir.display(), start_epoch, "Resumed from checkpoint");
    }
    if start_epoch >= config.epochs {
        tracing::warn!(start_epoch, epochs = config.epochs, "No epochs left to run");
    }

    // 4. Train
    let checkpoint_dir = config.checkpoint_dir.clone();
    let mut cycle = TrainingCycle::new(config, model, optimizer, &stream, &device)?.with_start_epoch(start_epoch);
    let split = cycle.split();
    println!(
        "Training on interactions 0..{}, validation {}..{}, test {}..{}",
        split.train_end, split.validation_start, split.test_start, split.test_start, split.test_end
    );
    let summaries = cycle.train(&stream)?;

    // 5. Print summary
    println!("\n--- Training Summary ---");
    for s in &summaries {
        println!(
            "Epoch {:>3}: loss {:.4} (recon {:.4}, actor {:.4}, target {:.4}, state {:.4}) {} windows, {} batches, {:.1}s",
            s.epoch,
            s.total_loss,
            s.terms.reconstruction,
            s.terms.actor_smoothness,
            s.terms.target_smoothness,
            s.terms.state_change,
            s.windows,
            s.batches,
            s.elapsed_secs
        );
    }
    println!("Checkpoints: {checkpoint_dir}");
    println!("Elapsed: {:.1}s", start.elapsed().as_secs_f64());

    Ok(())
}

/// Print statistics from an interaction stream Parquet file.
pub fn run_summary(args: SummaryArgs) -> anyhow::Result<()> {
    let stats = StreamReader::read_summary(&args.stream)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("--- Stream Summary ---");
    println!("File: {}", args.stream.display());
    println!("Actors: {}", stats.num_actors);
    println!("Targets: {}", stats.num_targets);
    println!("Interactions: {}", stats.num_interactions);
    println!("Positive labels: {}", stats.positive_labels);
    println!("Feature dim: {}", stats.feature_dim);
    println!("Timespan: {:.1}", stats.timespan);
    if stats.num_interactions > 0 {
        let rate = stats.positive_labels as f64 / stats.num_interactions as f64 * 100.0;
        println!("Positive rate: {rate:.2}%");
    }

    Ok(())
}
