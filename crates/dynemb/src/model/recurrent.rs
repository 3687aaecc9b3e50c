use burn::module::Param;
use burn::nn::{Initializer, Linear, LinearConfig, Relu};
use burn::prelude::*;
use burn::tensor::Distribution;

use crate::model::bridge::l2_normalize;
use crate::model::dynamics::{EmbeddingDynamics, EntityKind};
use crate::model::rnn_cell::{RnnCell, RnnCellConfig};

/// Configuration for [`RecurrentDynamics`].
///
/// ```text
/// update(actor):  h' = normalize(tanh(W [target ⊕ Δt ⊕ features] + U h + b))
/// update(target): h' = normalize(tanh(W [actor  ⊕ Δt ⊕ features] + U h + b))
/// project:        e  * (1 + W_t Δt)
/// predict:        Linear(2d + |actors| + |targets|+1 → d + |targets|+1)
/// classify:       Linear(d → 50) → ReLU → Linear(50 → 2)
/// ```
#[derive(Config, Debug)]
pub struct RecurrentDynamicsConfig {
    /// Number of actors (actor identity width).
    pub num_actors: usize,
    /// Number of target rows, including the "no previous target" sentinel.
    pub target_rows: usize,
    /// Width of the per-interaction feature vector.
    pub num_features: usize,
    /// Dynamic embedding width.
    #[config(default = 128)]
    pub embedding_dim: usize,
    /// Hidden width of the state-change classifier.
    #[config(default = 50)]
    pub state_hidden: usize,
}

/// Coupled recurrent actor/target dynamics with a time projection.
#[derive(Module, Debug)]
pub struct RecurrentDynamics<B: Backend> {
    /// Shared starting point for every actor row, shape `(d,)`.
    initial_actor: Param<Tensor<B, 1>>,
    /// Shared starting point for every target row, shape `(d,)`.
    initial_target: Param<Tensor<B, 1>>,
    actor_cell: RnnCell<B>,
    target_cell: RnnCell<B>,
    /// Elapsed time → per-dimension drift, `1 → d`.
    time_projection: Linear<B>,
    predictor: Linear<B>,
    state_hidden: Linear<B>,
    state_activation: Relu,
    state_output: Linear<B>,
    embedding_dim: usize,
}

impl RecurrentDynamicsConfig {
    /// Build a config from stream shape and embedding width.
    pub fn for_stream(stream: &interactions::InteractionStream, embedding_dim: usize) -> Self {
        Self::new(stream.num_actors(), stream.target_rows(), stream.feature_dim())
            .with_embedding_dim(embedding_dim)
    }

    /// Input width of the next-target predictor.
    pub fn predictor_input(&self) -> usize {
        2 * self.embedding_dim + self.num_actors + self.target_rows
    }

    /// Output width of the next-target predictor.
    pub fn predictor_output(&self) -> usize {
        self.embedding_dim + self.target_rows
    }

    /// Initialize a model with random initial vectors and weights.
    pub fn init<B: Backend>(&self, device: &B::Device) -> RecurrentDynamics<B> {
        let d = self.embedding_dim;
        let cell_input = d + 1 + self.num_features;

        RecurrentDynamics {
            initial_actor: Param::from_tensor(unit_uniform(d, device)),
            initial_target: Param::from_tensor(unit_uniform(d, device)),
            actor_cell: RnnCellConfig::new(cell_input, d).init(device),
            target_cell: RnnCellConfig::new(cell_input, d).init(device),
            time_projection: LinearConfig::new(1, d)
                .with_initializer(Initializer::Normal { mean: 0.0, std: 1.0 })
                .init(device),
            predictor: LinearConfig::new(self.predictor_input(), self.predictor_output())
                .init(device),
            state_hidden: LinearConfig::new(d, self.state_hidden).init(device),
            state_activation: Relu::new(),
            state_output: LinearConfig::new(self.state_hidden, 2).init(device),
            embedding_dim: d,
        }
    }
}

/// Uniform `[0, 1)` vector scaled to unit L2 norm.
fn unit_uniform<B: Backend>(d: usize, device: &B::Device) -> Tensor<B, 1> {
    let v = Tensor::<B, 1>::random([d], Distribution::Uniform(0.0, 1.0), device);
    let norm = v.clone().powf_scalar(2.0).sum().sqrt().clamp_min(1e-12);
    v / norm
}

impl<B: Backend> EmbeddingDynamics<B> for RecurrentDynamics<B> {
    fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    fn initial_embedding(&self, kind: EntityKind) -> Tensor<B, 1> {
        match kind {
            EntityKind::Actor => self.initial_actor.val(),
            EntityKind::Target => self.initial_target.val(),
        }
    }

    fn project(
        &self,
        entity: Tensor<B, 2>,
        _counterpart: Tensor<B, 2>,
        elapsed: Tensor<B, 2>,
        _features: Tensor<B, 2>,
    ) -> Tensor<B, 2> {
        let drift = self.time_projection.forward(elapsed);
        entity * (drift + 1.0)
    }

    fn update(
        &self,
        kind: EntityKind,
        entity: Tensor<B, 2>,
        counterpart: Tensor<B, 2>,
        elapsed: Tensor<B, 2>,
        features: Tensor<B, 2>,
    ) -> Tensor<B, 2> {
        let x = Tensor::cat(vec![counterpart, elapsed, features], 1);
        let cell = match kind {
            EntityKind::Actor => &self.actor_cell,
            EntityKind::Target => &self.target_cell,
        };
        l2_normalize(cell.forward(x, entity))
    }

    fn predict_target(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        self.predictor.forward(input)
    }

    fn classify_state(&self, actor: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.state_hidden.forward(actor);
        let x = self.state_activation.forward(x);
        self.state_output.forward(x)
    }
}
