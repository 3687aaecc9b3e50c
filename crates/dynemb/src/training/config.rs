use burn::module::AutodiffModule;
use burn::optim::decay::WeightDecayConfig;
use burn::optim::{AdamConfig, Optimizer};
use burn::tensor::backend::AutodiffBackend;

/// Errors found while validating a [`TrainingConfig`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error(
        "train_proportion = {0} is out of range (0, 0.8]; validation and test \
         splits need the remaining 20% of the stream"
    )]
    TrainProportion(f64),
    #[error("embedding_dim must be > 0")]
    EmbeddingDim,
    #[error("num_windows must be > 0")]
    NumWindows,
    #[error("learning_rate = {0} must be finite and > 0")]
    LearningRate(f64),
    #[error("weight_decay = {0} must be finite and >= 0")]
    WeightDecay(f64),
}

/// Largest accepted training fraction.
pub const MAX_TRAIN_PROPORTION: f64 = 0.8;

/// Training configuration loaded from the `[training]` TOML section.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct TrainingConfig {
    /// Number of passes over the training split.
    #[serde(default = "default_epochs")]
    pub epochs: usize,

    /// Dynamic embedding width.
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,

    /// Fraction of the stream used for training. Validation and test each
    /// take the following 10%.
    #[serde(default = "default_train_proportion")]
    pub train_proportion: f64,

    /// Whether the state-change classification loss is included.
    #[serde(default = "default_true")]
    pub state_change: bool,

    /// Nominal number of time windows the stream is split into.
    #[serde(default = "default_num_windows")]
    pub num_windows: usize,

    /// Adam learning rate.
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,

    /// Adam L2 weight decay.
    #[serde(default = "default_weight_decay")]
    pub weight_decay: f64,

    /// Directory receiving `epoch_{n}/` and `final/` checkpoints.
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: String,

    /// Show a progress bar over interactions.
    #[serde(default = "default_true")]
    pub show_progress: bool,
}

fn default_epochs() -> usize {
    50
}
fn default_embedding_dim() -> usize {
    128
}
fn default_train_proportion() -> f64 {
    0.8
}
fn default_true() -> bool {
    true
}
fn default_num_windows() -> usize {
    tbatch::DEFAULT_NUM_WINDOWS
}
fn default_learning_rate() -> f64 {
    1e-3
}
fn default_weight_decay() -> f64 {
    1e-5
}
fn default_checkpoint_dir() -> String {
    "checkpoints/dynemb".to_string()
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: default_epochs(),
            embedding_dim: default_embedding_dim(),
            train_proportion: default_train_proportion(),
            state_change: true,
            num_windows: default_num_windows(),
            learning_rate: default_learning_rate(),
            weight_decay: default_weight_decay(),
            checkpoint_dir: default_checkpoint_dir(),
            show_progress: true,
        }
    }
}

impl TrainingConfig {
    /// Adam with the configured L2 weight decay.
    pub fn optimizer<B: AutodiffBackend, M: AutodiffModule<B>>(&self) -> impl Optimizer<M, B> {
        AdamConfig::new()
            .with_weight_decay(Some(WeightDecayConfig::new(self.weight_decay as f32)))
            .init()
    }

    /// Reject configurations that cannot train. Call before loading data.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = self.train_proportion;
        if !(p > 0.0 && p <= MAX_TRAIN_PROPORTION) {
            return Err(ConfigError::TrainProportion(p));
        }
        if self.embedding_dim == 0 {
            return Err(ConfigError::EmbeddingDim);
        }
        if self.num_windows == 0 {
            return Err(ConfigError::NumWindows);
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(ConfigError::LearningRate(self.learning_rate));
        }
        if !(self.weight_decay.is_finite() && self.weight_decay >= 0.0) {
            return Err(ConfigError::WeightDecay(self.weight_decay));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let cfg = TrainingConfig::default();
        assert_eq!(cfg.epochs, 50);
        assert_eq!(cfg.embedding_dim, 128);
        assert!((cfg.train_proportion - 0.8).abs() < 1e-12);
        assert!(cfg.state_change);
        assert_eq!(cfg.num_windows, 500);
        assert!((cfg.learning_rate - 1e-3).abs() < 1e-12);
        assert!((cfg.weight_decay - 1e-5).abs() < 1e-12);
        assert_eq!(cfg.checkpoint_dir, "checkpoints/dynemb");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_override() {
        let toml_str = r#"
            epochs = 3
            state_change = false
        "#;
        let cfg: TrainingConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.epochs, 3);
        assert!(!cfg.state_change);
        // Defaults for unspecified fields
        assert_eq!(cfg.embedding_dim, 128);
        assert!(cfg.show_progress);
    }

    #[test]
    fn test_rejects_train_proportion_above_limit() {
        let cfg = TrainingConfig {
            train_proportion: 0.85,
            ..Default::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::TrainProportion(0.85)));
    }

    #[test]
    fn test_accepts_boundary_and_rejects_zero() {
        let ok = TrainingConfig {
            train_proportion: 0.8,
            ..Default::default()
        };
        assert!(ok.validate().is_ok());

        let zero = TrainingConfig {
            train_proportion: 0.0,
            ..Default::default()
        };
        assert!(zero.validate().is_err());

        let nan = TrainingConfig {
            train_proportion: f64::NAN,
            ..Default::default()
        };
        assert!(nan.validate().is_err());
    }

    #[test]
    fn test_rejects_degenerate_values() {
        let cases = [
            TrainingConfig { embedding_dim: 0, ..Default::default() },
            TrainingConfig { num_windows: 0, ..Default::default() },
            TrainingConfig { learning_rate: 0.0, ..Default::default() },
            TrainingConfig { weight_decay: -1.0, ..Default::default() },
        ];
        for cfg in cases {
            assert!(cfg.validate().is_err(), "{cfg:?} should be rejected");
        }
    }
}
