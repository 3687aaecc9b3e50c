//! Batch, window, and assignment types shared by the scheduler and the cache.

use std::collections::HashSet;

use interactions::Interaction;

use crate::window::WindowBounds;

/// Errors raised by the scheduler cache.
#[derive(Debug, thiserror::Error)]
pub enum TbatchError {
    /// A replay epoch reached a window the first epoch never produced.
    #[error(
        "window {seq} is not cached (cache holds {cached} windows); \
         the interaction stream changed between epochs"
    )]
    MissingWindow { seq: usize, cached: usize },
    /// A replay epoch reached a cached window with a different extent.
    #[error(
        "window {seq} was cached over interactions {cached_start}..{cached_end} \
         but replay reached {start}..{end}"
    )]
    WindowMismatch {
        seq: usize,
        cached_start: usize,
        cached_end: usize,
        start: usize,
        end: usize,
    },
    /// A replay epoch finished without visiting every cached window.
    #[error("replay visited {replayed} windows but {cached} are cached")]
    UnconsumedWindows { replayed: usize, cached: usize },
    #[error("cache is sealed; window {seq} cannot be stored")]
    Sealed { seq: usize },
    #[error("cache is still being populated; replay needs a sealed cache")]
    NotSealed,
    #[error("window {seq} stored out of order (expected window {expected})")]
    OutOfOrder { seq: usize, expected: usize },
    /// A batch holds the same actor or target twice.
    #[error("batch {batch_id} of window {seq} repeats {kind} {id}")]
    Conflict {
        seq: usize,
        batch_id: usize,
        kind: &'static str,
        id: usize,
    },
}

/// One conflict-free batch in column form, ready to be turned into tensors.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TBatch {
    /// Batch id assigned by the scheduler (starts at 1).
    pub batch_id: usize,
    pub interaction_ids: Vec<usize>,
    pub actor_ids: Vec<usize>,
    pub target_ids: Vec<usize>,
    pub previous_target_ids: Vec<usize>,
    pub actor_time_deltas: Vec<f32>,
    pub target_time_deltas: Vec<f32>,
    /// Row-major `(len, feature_dim)` feature matrix.
    pub features: Vec<f32>,
    pub feature_dim: usize,
}

impl TBatch {
    pub fn new(batch_id: usize, feature_dim: usize) -> Self {
        Self {
            batch_id,
            feature_dim,
            ..Default::default()
        }
    }

    /// Append an interaction's fields.
    pub fn push(&mut self, interaction: &Interaction<'_>) {
        debug_assert_eq!(interaction.features.len(), self.feature_dim);
        self.interaction_ids.push(interaction.index);
        self.actor_ids.push(interaction.actor_id);
        self.target_ids.push(interaction.target_id);
        self.previous_target_ids.push(interaction.previous_target_id);
        self.actor_time_deltas.push(interaction.actor_time_delta);
        self.target_time_deltas.push(interaction.target_time_delta);
        self.features.extend_from_slice(interaction.features);
    }

    /// Number of interactions in the batch.
    pub fn len(&self) -> usize {
        self.interaction_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interaction_ids.is_empty()
    }

    /// Find a repeated actor or target, returned as `(kind, id)`.
    pub fn first_conflict(&self) -> Option<(&'static str, usize)> {
        let mut actors = HashSet::with_capacity(self.len());
        if let Some(&a) = self.actor_ids.iter().find(|&&a| !actors.insert(a)) {
            return Some(("actor", a));
        }
        let mut targets = HashSet::with_capacity(self.len());
        if let Some(&t) = self.target_ids.iter().find(|&&t| !targets.insert(t)) {
            return Some(("target", t));
        }
        None
    }
}

/// A closed time window and its batches in increasing batch-id order.
#[derive(Debug, Clone, PartialEq)]
pub struct FlushWindow {
    pub bounds: WindowBounds,
    pub batches: Vec<TBatch>,
}

impl FlushWindow {
    pub fn seq(&self) -> usize {
        self.bounds.seq
    }

    /// Total interactions across all batches.
    pub fn num_interactions(&self) -> usize {
        self.batches.iter().map(|b| b.len()).sum()
    }

    /// `(interaction index, batch id)` pairs in processing order.
    pub fn assignments(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.batches
            .iter()
            .flat_map(|b| b.interaction_ids.iter().map(move |&i| (i, b.batch_id)))
    }

    /// Check that no batch repeats an actor or a target.
    pub fn check_conflict_free(&self) -> Result<(), TbatchError> {
        for batch in &self.batches {
            if let Some((kind, id)) = batch.first_conflict() {
                return Err(TbatchError::Conflict {
                    seq: self.seq(),
                    batch_id: batch.batch_id,
                    kind,
                    id,
                });
            }
        }
        Ok(())
    }
}

/// Interaction index → `(window seq, batch id)` for one full pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TbatchAssignment {
    entries: Vec<Option<(usize, usize)>>,
}

impl TbatchAssignment {
    /// Build from windows covering interactions `0..num_interactions`.
    pub fn from_windows<'a>(
        windows: impl IntoIterator<Item = &'a FlushWindow>,
        num_interactions: usize,
    ) -> Self {
        let mut entries = vec![None; num_interactions];
        for window in windows {
            for (index, batch_id) in window.assignments() {
                if let Some(slot) = entries.get_mut(index) {
                    *slot = Some((window.seq(), batch_id));
                }
            }
        }
        Self { entries }
    }

    /// Window and batch of an interaction, if it was scheduled.
    pub fn get(&self, index: usize) -> Option<(usize, usize)> {
        self.entries.get(index).copied().flatten()
    }

    /// Number of scheduled interactions.
    pub fn scheduled(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
