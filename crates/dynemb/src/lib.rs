//! Dynamic embeddings for two interacting populations.
//!
//! Every actor and every target carries an embedding that is updated after
//! each of its interactions by a pair of coupled recurrent cells. Training
//! walks the interaction stream in conflict-free t-batches, predicts the
//! next target from a time-projected actor embedding, and takes one
//! optimizer step per time window.
//!
//! # Layout
//!
//! - [`model`]: the differentiable transform ([`EmbeddingDynamics`] and its
//!   recurrent implementation) plus tensor helpers
//! - [`training`]: embedding tables, trajectory timelines, losses, config,
//!   the per-epoch training cycle, and checkpoints

pub mod model;
pub mod training;

pub use model::dynamics::{EmbeddingDynamics, EntityKind};
pub use model::recurrent::{RecurrentDynamics, RecurrentDynamicsConfig};
pub use training::config::{ConfigError, TrainingConfig};
pub use training::cycle::{EpochSummary, Phase, TrainError, TrainingCycle};
pub use training::loss::LossTerms;
pub use training::recorder::TrajectoryRecorder;
pub use training::store::EmbeddingStore;
