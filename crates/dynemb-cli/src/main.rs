mod config;
mod pipeline;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use config::TrainOverrides;
use pipeline::{SummaryArgs, TrainArgs};

/// dynemb: dynamic actor/target embeddings trained over temporal batches.
#[derive(Parser)]
#[command(name = "dynemb", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Train embeddings on a normalized interaction stream.
    Train {
        /// Path to the interaction stream Parquet file.
        #[arg(long)]
        stream: PathBuf,
        /// Path to a training config TOML file (e.g. configs/train.toml).
        #[arg(long)]
        config: Option<PathBuf>,
        /// Override the number of epochs.
        #[arg(long)]
        epochs: Option<usize>,
        /// Override the dynamic embedding width.
        #[arg(long)]
        embedding_dim: Option<usize>,
        /// Override the training fraction (at most 0.8).
        #[arg(long)]
        train_proportion: Option<f64>,
        /// Drop the state-change classification loss.
        #[arg(long)]
        no_state_change: bool,
        /// Override the checkpoint directory.
        #[arg(long)]
        output_dir: Option<PathBuf>,
        /// Resume from a checkpoint directory (e.g. checkpoints/dynemb/epoch_4).
        #[arg(long)]
        resume: Option<PathBuf>,
    },
    /// Print statistics of an interaction stream Parquet file.
    Summary {
        /// Path to the interaction stream Parquet file.
        #[arg(long)]
        stream: PathBuf,
        /// Output as JSON instead of human-readable text.
        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Train {
            stream,
            config,
            epochs,
            embedding_dim,
            train_proportion,
            no_state_change,
            output_dir,
            resume,
        } => pipeline::run_train(TrainArgs {
            stream,
            config,
            overrides: TrainOverrides {
                epochs,
                embedding_dim,
                train_proportion,
                no_state_change,
                output_dir,
            },
            resume,
        }),
        Command::Summary { stream, json } => pipeline::run_summary(SummaryArgs { stream, json }),
    }
}
