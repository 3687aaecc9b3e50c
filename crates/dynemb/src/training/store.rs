//! Actor and target embedding tables.
//!
//! Both tables live on the autodiff graph while a window is being processed:
//! a later batch that reads a row written earlier in the same window sees
//! the written value and gradients flow through it. [`EmbeddingStore::detach`]
//! cuts the graph once the window's optimizer step is done.

use burn::prelude::*;

use crate::model::bridge::tensor_to_rows;
use crate::model::dynamics::{EmbeddingDynamics, EntityKind};

/// Current embedding of every actor and every target.
#[derive(Debug, Clone)]
pub struct EmbeddingStore<B: Backend> {
    actors: Tensor<B, 2>,
    targets: Tensor<B, 2>,
}

impl<B: Backend> EmbeddingStore<B> {
    /// Tables of `num_actors` and `target_rows` rows, all set to the model's
    /// initial vectors.
    pub fn new<M: EmbeddingDynamics<B>>(model: &M, num_actors: usize, target_rows: usize) -> Self {
        Self {
            actors: broadcast_rows(model.initial_embedding(EntityKind::Actor), num_actors),
            targets: broadcast_rows(model.initial_embedding(EntityKind::Target), target_rows),
        }
    }

    /// Overwrite every row of both tables with the model's current initial
    /// vectors.
    pub fn reset_epoch<M: EmbeddingDynamics<B>>(&mut self, model: &M) {
        let (num_actors, target_rows) = (self.num_rows(EntityKind::Actor), self.num_rows(EntityKind::Target));
        self.actors = broadcast_rows(model.initial_embedding(EntityKind::Actor), num_actors);
        self.targets = broadcast_rows(model.initial_embedding(EntityKind::Target), target_rows);
    }

    /// The whole table for `kind`.
    pub fn table(&self, kind: EntityKind) -> &Tensor<B, 2> {
        match kind {
            EntityKind::Actor => &self.actors,
            EntityKind::Target => &self.targets,
        }
    }

    fn table_mut(&mut self, kind: EntityKind) -> &mut Tensor<B, 2> {
        match kind {
            EntityKind::Actor => &mut self.actors,
            EntityKind::Target => &mut self.targets,
        }
    }

    pub fn num_rows(&self, kind: EntityKind) -> usize {
        self.table(kind).dims()[0]
    }

    pub fn embedding_dim(&self) -> usize {
        self.actors.dims()[1]
    }

    /// Rows for `ids`, shape `(n, d)`.
    pub fn read(&self, kind: EntityKind, ids: Tensor<B, 1, Int>) -> Tensor<B, 2> {
        self.table(kind).clone().select(0, ids)
    }

    /// Time-adjusted read for prediction. Leaves the table untouched.
    pub fn project<M: EmbeddingDynamics<B>>(
        &self,
        model: &M,
        entity: Tensor<B, 2>,
        counterpart: Tensor<B, 2>,
        elapsed: Tensor<B, 2>,
        features: Tensor<B, 2>,
    ) -> Tensor<B, 2> {
        model.project(entity, counterpart, elapsed, features)
    }

    /// Next embeddings after an interaction. The caller writes them back with
    /// [`EmbeddingStore::write`].
    pub fn update<M: EmbeddingDynamics<B>>(
        &self,
        model: &M,
        kind: EntityKind,
        entity: Tensor<B, 2>,
        counterpart: Tensor<B, 2>,
        elapsed: Tensor<B, 2>,
        features: Tensor<B, 2>,
    ) -> Tensor<B, 2> {
        model.update(kind, entity, counterpart, elapsed, features)
    }

    /// Replace rows `ids` with `values`. Ids must be distinct.
    ///
    /// The written rows hold `values` bit for bit, and gradients flow
    /// through them into whatever produced `values`.
    pub fn write(&mut self, kind: EntityKind, ids: Tensor<B, 1, Int>, values: Tensor<B, 2>) {
        let table = self.table_mut(kind);
        let [rows, d] = table.dims();
        let [n, _] = values.dims();
        let device = table.device();

        // select_assign accumulates, so scatter into zeros: 0 + v == v
        let mask = Tensor::<B, 2>::zeros([rows, d], &device)
            .select_assign(0, ids.clone(), Tensor::ones([n, d], &device))
            .greater_elem(0.5);
        let scattered = Tensor::<B, 2>::zeros([rows, d], &device).select_assign(0, ids, values);
        *table = table.clone().mask_where(mask, scattered);
    }

    /// Keep current values, drop their gradient history.
    pub fn detach(&mut self) {
        self.actors = self.actors.clone().detach();
        self.targets = self.targets.clone().detach();
    }

    /// Copy a table out as plain rows.
    pub fn rows(&self, kind: EntityKind) -> anyhow::Result<Vec<Vec<f32>>> {
        tensor_to_rows(self.table(kind).clone())
    }
}

fn broadcast_rows<B: Backend>(initial: Tensor<B, 1>, rows: usize) -> Tensor<B, 2> {
    let [d] = initial.dims();
    if rows == 0 {
        return Tensor::zeros([0, d], &initial.device());
    }
    initial.unsqueeze::<2>().repeat_dim(0, rows)
}
