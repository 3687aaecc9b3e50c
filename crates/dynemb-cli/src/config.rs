//! TOML config loading for the training CLI.
//!
//! Deserializes `configs/train.toml` which has a `[training]` section, then
//! merges with CLI overrides.

use std::path::{Path, PathBuf};

use dynemb::TrainingConfig;
use serde::Deserialize;

/// Top-level structure matching `configs/train.toml`.
#[derive(Debug, Default, Deserialize)]
pub struct TrainToml {
    /// Training parameters. Missing fields take their defaults.
    #[serde(default)]
    pub training: TrainingConfig,
}

/// Values given on the command line. `None` keeps the TOML value.
#[derive(Debug, Default, Clone)]
pub struct TrainOverrides {
    pub epochs: Option<usize>,
    pub embedding_dim: Option<usize>,
    pub train_proportion: Option<f64>,
    pub no_state_change: bool,
    pub output_dir: Option<PathBuf>,
}

/// Load and deserialize a `TrainToml` from a TOML file.
pub fn load_train_toml(path: &Path) -> anyhow::Result<TrainToml> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config {}: {e}", path.display()))?;
    let config: TrainToml = toml::from_str(&contents)?;
    tracing::info!(path = %path.display(), "Loaded training config");
    Ok(config)
}

/// Build the training config from defaults, an optional TOML file, and CLI
/// flags, then validate it.
///
/// Priority chain: defaults < TOML values < CLI flags.
pub fn build_training_config(
    path: Option<&Path>,
    overrides: &TrainOverrides,
) -> anyhow::Result<TrainingConfig> {
    let mut config = match path {
        Some(path) => load_train_toml(path)?.training,
        None => TrainingConfig::default(),
    };
    apply_overrides(&mut config, overrides);
    config.validate()?;
    Ok(config)
}

/// Apply CLI flags on top of `config`.
pub fn apply_overrides(config: &mut TrainingConfig, overrides: &TrainOverrides) {
    if let Some(n) = overrides.epochs {
        config.epochs = n;
    }
    if let Some(d) = overrides.embedding_dim {
        config.embedding_dim = d;
    }
    if let Some(p) = overrides.train_proportion {
        config.train_proportion = p;
    }
    if overrides.no_state_change {
        config.state_change = false;
    }
    if let Some(dir) = &overrides.output_dir {
        config.checkpoint_dir = dir.display().to_string();
    }
}
