//! Per-interaction embedding timeline.
//!
//! For each interaction index the recorder keeps the post-update actor and
//! target embeddings produced while processing it. Values are stored as plain
//! `f32` rows, outside any autodiff graph.

use burn::prelude::*;

use crate::model::bridge::tensor_to_rows;
use crate::model::dynamics::EntityKind;

/// Write-once-per-epoch timeline of actor and target embeddings.
#[derive(Debug, Clone)]
pub struct TrajectoryRecorder {
    num_interactions: usize,
    embedding_dim: usize,
    actors: Vec<f32>,
    targets: Vec<f32>,
    actor_written: Vec<bool>,
    target_written: Vec<bool>,
}

impl TrajectoryRecorder {
    pub fn new(num_interactions: usize, embedding_dim: usize) -> Self {
        Self {
            num_interactions,
            embedding_dim,
            actors: vec![0.0; num_interactions * embedding_dim],
            targets: vec![0.0; num_interactions * embedding_dim],
            actor_written: vec![false; num_interactions],
            target_written: vec![false; num_interactions],
        }
    }

    /// Zero both timelines and forget what was written.
    pub fn reset_epoch(&mut self) {
        self.actors.fill(0.0);
        self.targets.fill(0.0);
        self.actor_written.fill(false);
        self.target_written.fill(false);
    }

    pub fn num_interactions(&self) -> usize {
        self.num_interactions
    }

    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    /// Store `values` row `i` at interaction `indices[i]`.
    pub fn record<B: Backend>(
        &mut self,
        kind: EntityKind,
        indices: &[usize],
        values: Tensor<B, 2>,
    ) -> anyhow::Result<()> {
        let [rows, cols] = values.dims();
        if rows != indices.len() || cols != self.embedding_dim {
            anyhow::bail!(
                "{kind} trajectory rows have shape {rows}x{cols}, expected {}x{}",
                indices.len(),
                self.embedding_dim
            );
        }
        let values = tensor_to_rows(values.detach())?;
        let d = self.embedding_dim;
        let (timeline, written) = match kind {
            EntityKind::Actor => (&mut self.actors, &mut self.actor_written),
            EntityKind::Target => (&mut self.targets, &mut self.target_written),
        };
        for (&index, row) in indices.iter().zip(values) {
            if index >= self.num_interactions {
                anyhow::bail!(
                    "{kind} trajectory index {index} out of range ({} interactions)",
                    self.num_interactions
                );
            }
            if written[index] {
                anyhow::bail!("{kind} trajectory for interaction {index} written twice in one epoch");
            }
            timeline[index * d..(index + 1) * d].copy_from_slice(&row);
            written[index] = true;
        }
        Ok(())
    }

    /// Recorded embedding of interaction `index`, if written this epoch.
    pub fn get(&self, kind: EntityKind, index: usize) -> Option<&[f32]> {
        let (timeline, written) = self.timeline(kind);
        if !*written.get(index)? {
            return None;
        }
        let d = self.embedding_dim;
        Some(&timeline[index * d..(index + 1) * d])
    }

    /// Rows for `indices` as a `(n, d)` tensor.
    pub fn read<B: Backend>(&self, kind: EntityKind, indices: &[usize], device: &B::Device) -> Tensor<B, 2> {
        let (timeline, _) = self.timeline(kind);
        let d = self.embedding_dim;
        let mut flat = Vec::with_capacity(indices.len() * d);
        for &index in indices {
            flat.extend_from_slice(&timeline[index * d..(index + 1) * d]);
        }
        Tensor::from_data(burn::tensor::TensorData::new(flat, [indices.len(), d]), device)
    }

    /// First interaction below `end` lacking an entry for `kind`.
    pub fn first_missing(&self, kind: EntityKind, end: usize) -> Option<usize> {
        let (_, written) = self.timeline(kind);
        written.iter().take(end).position(|&w| !w)
    }

    /// Whether every interaction below `end` has both entries.
    pub fn is_complete(&self, end: usize) -> bool {
        self.first_missing(EntityKind::Actor, end).is_none()
            && self.first_missing(EntityKind::Target, end).is_none()
    }

    /// Whole timeline for `kind`, row-major `(num_interactions, d)`.
    pub fn values(&self, kind: EntityKind) -> &[f32] {
        self.timeline(kind).0
    }

    fn timeline(&self, kind: EntityKind) -> (&[f32], &[bool]) {
        match kind {
            EntityKind::Actor => (&self.actors, &self.actor_written),
            EntityKind::Target => (&self.targets, &self.target_written),
        }
    }
}
