//! Contract between the training cycle and the differentiable transform.

use std::fmt;

use burn::prelude::*;

/// Which of the two populations an embedding belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Actor,
    Target,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Actor => write!(f, "actor"),
            EntityKind::Target => write!(f, "target"),
        }
    }
}

/// Batched, differentiable embedding transform.
///
/// All methods are pure functions of their inputs and the module's
/// parameters. Row `i` of every input belongs to the same interaction, and
/// rows are independent of each other.
///
/// Shapes: `entity`/`counterpart` are `(n, d)`, `elapsed` is `(n, 1)`,
/// `features` is `(n, f)`.
pub trait EmbeddingDynamics<B: Backend> {
    /// Embedding width `d`.
    fn embedding_dim(&self) -> usize;

    /// Learned initial vector shared by every row of a table, shape `(d,)`.
    fn initial_embedding(&self, kind: EntityKind) -> Tensor<B, 1>;

    /// Time-adjusted read of an embedding, used for prediction only.
    fn project(
        &self,
        entity: Tensor<B, 2>,
        counterpart: Tensor<B, 2>,
        elapsed: Tensor<B, 2>,
        features: Tensor<B, 2>,
    ) -> Tensor<B, 2>;

    /// Next embedding of an entity after it interacts with `counterpart`.
    fn update(
        &self,
        kind: EntityKind,
        entity: Tensor<B, 2>,
        counterpart: Tensor<B, 2>,
        elapsed: Tensor<B, 2>,
        features: Tensor<B, 2>,
    ) -> Tensor<B, 2>;

    /// Predict the next target's embedding (dynamic ⊕ static identity).
    ///
    /// `input` is projected actor ⊕ previous-target embedding ⊕
    /// previous-target identity ⊕ actor identity.
    fn predict_target(&self, input: Tensor<B, 2>) -> Tensor<B, 2>;

    /// State-change logits `(n, 2)` from actor embeddings.
    fn classify_state(&self, actor: Tensor<B, 2>) -> Tensor<B, 2>;
}
