//! Conflict-free batch assignment over time windows.

use std::collections::BTreeMap;

use interactions::{Interaction, InteractionStream};

use crate::types::{FlushWindow, TBatch};
use crate::window::{WindowBounds, WindowClock};

/// Assigns each interaction a batch id and groups batches into windows.
///
/// An interaction goes into the batch after the latest batch that already
/// holds its actor or its target, so no batch ever repeats an entity and each
/// entity's batch ids strictly increase. Batch-id counters carry across
/// window boundaries for the whole pass; a window only decides when the
/// accumulated batches are handed out.
#[derive(Debug, Clone)]
pub struct TbatchScheduler {
    clock: WindowClock,
    last_batch_of_actor: Vec<usize>,
    last_batch_of_target: Vec<usize>,
    pending: BTreeMap<usize, TBatch>,
    scheduled: usize,
}

impl TbatchScheduler {
    /// Create a scheduler closing windows every `window_span` time units.
    pub fn new(window_span: f64) -> Self {
        Self {
            clock: WindowClock::new(window_span),
            last_batch_of_actor: Vec::new(),
            last_batch_of_target: Vec::new(),
            pending: BTreeMap::new(),
            scheduled: 0,
        }
    }

    /// Create a scheduler sized for `stream`, splitting its timespan into
    /// `num_windows` equal spans.
    pub fn for_stream(stream: &InteractionStream, num_windows: usize) -> Self {
        Self {
            clock: WindowClock::for_stream(stream, num_windows),
            last_batch_of_actor: vec![0; stream.num_actors()],
            last_batch_of_target: vec![0; stream.target_rows()],
            pending: BTreeMap::new(),
            scheduled: 0,
        }
    }

    /// Run a full pass over the first `limit` interactions of `stream`.
    pub fn schedule(stream: &InteractionStream, num_windows: usize, limit: usize) -> Vec<FlushWindow> {
        let mut scheduler = Self::for_stream(stream, num_windows);
        let mut windows: Vec<FlushWindow> = stream
            .iter()
            .take(limit)
            .filter_map(|interaction| scheduler.push(&interaction))
            .collect();
        windows.extend(scheduler.finish());
        windows
    }

    /// Window span in stream time units.
    pub fn window_span(&self) -> f64 {
        self.clock.span()
    }

    /// Number of interactions assigned so far.
    pub fn scheduled(&self) -> usize {
        self.scheduled
    }

    /// Last batch id holding `actor_id`, 0 if it has not been seen.
    pub fn last_batch_of_actor(&self, actor_id: usize) -> usize {
        self.last_batch_of_actor.get(actor_id).copied().unwrap_or(0)
    }

    /// Last batch id holding `target_id`, 0 if it has not been seen.
    pub fn last_batch_of_target(&self, target_id: usize) -> usize {
        self.last_batch_of_target.get(target_id).copied().unwrap_or(0)
    }

    /// Assign the next batch id for an (actor, target) pair and record it.
    pub fn assign(&mut self, actor_id: usize, target_id: usize) -> usize {
        let batch_id = self.last_batch_of_actor(actor_id).max(self.last_batch_of_target(target_id)) + 1;
        set_grow(&mut self.last_batch_of_actor, actor_id, batch_id);
        set_grow(&mut self.last_batch_of_target, target_id, batch_id);
        batch_id
    }

    /// Feed the next interaction in arrival order.
    ///
    /// If its timestamp falls past the open window's span, the open window is
    /// closed and returned before the interaction is added to the next one.
    pub fn push(&mut self, interaction: &Interaction<'_>) -> Option<FlushWindow> {
        let flushed = self
            .clock
            .observe(interaction.index, interaction.timestamp)
            .map(|bounds| self.drain(bounds));

        let batch_id = self.assign(interaction.actor_id, interaction.target_id);
        self.pending
            .entry(batch_id)
            .or_insert_with(|| TBatch::new(batch_id, interaction.features.len()))
            .push(interaction);
        self.scheduled += 1;

        flushed
    }

    /// Flush the trailing window once the stream is exhausted.
    pub fn finish(&mut self) -> Option<FlushWindow> {
        let bounds = self.clock.finish()?;
        Some(self.drain(bounds))
    }

    fn drain(&mut self, bounds: WindowBounds) -> FlushWindow {
        let batches: Vec<TBatch> = std::mem::take(&mut self.pending).into_values().collect();
        tracing::debug!(
            window = bounds.seq,
            start = bounds.start_index,
            end = bounds.end_index,
            batches = batches.len(),
            "Closed window"
        );
        FlushWindow { bounds, batches }
    }
}

fn set_grow(table: &mut Vec<usize>, id: usize, value: usize) {
    if id >= table.len() {
        table.resize(id + 1, 0);
    }
    table[id] = value;
}

#[cfg(test)]
mod tests {
    use super::*;
    use interactions::InteractionEvent;

    const A: usize = 0;
    const B: usize = 1;
    const C: usize = 2;
    const X: usize = 0;
    const Y: usize = 1;
    const Z: usize = 2;

    fn stream(pairs: &[(usize, usize)], timestamps: &[f64]) -> InteractionStream {
        let events = pairs
            .iter()
            .zip(timestamps)
            .map(|(&(actor_id, target_id), &timestamp)| InteractionEvent {
                actor_id,
                target_id,
                timestamp,
                features: vec![timestamp as f32],
                state_label: false,
            })
            .collect();
        InteractionStream::from_events(events).unwrap()
    }

    #[test]
    fn test_five_interaction_scenario() {
        let s = stream(
            &[(A, X), (B, Y), (A, Y), (C, X), (A, Z)],
            &[0.0, 0.0, 0.0, 0.0, 0.0],
        );
        let mut scheduler = TbatchScheduler::new(1.0);
        for interaction in s.iter() {
            assert!(scheduler.push(&interaction).is_none());
        }
        let window = scheduler.finish().unwrap();

        let mut ids = vec![0; s.len()];
        for (index, batch_id) in window.assignments() {
            ids[index] = batch_id;
        }
        assert_eq!(ids, vec![1, 1, 2, 2, 3]);
        assert_eq!(window.batches.len(), 3);
        assert_eq!(window.batches[0].interaction_ids, vec![0, 1]);
        assert_eq!(window.batches[1].interaction_ids, vec![2, 3]);
        assert_eq!(window.batches[2].interaction_ids, vec![4]);
    }

    #[test]
    fn test_assign_grows_tables() {
        let mut scheduler = TbatchScheduler::new(1.0);
        assert_eq!(scheduler.assign(10, 3), 1);
        assert_eq!(scheduler.assign(10, 7), 2);
        assert_eq!(scheduler.assign(4, 7), 3);
        assert_eq!(scheduler.last_batch_of_actor(10), 2);
        assert_eq!(scheduler.last_batch_of_target(3), 1);
        assert_eq!(scheduler.last_batch_of_actor(99), 0);
    }

    #[test]
    fn test_batch_ids_continue_across_windows() {
        let s = stream(&[(A, X), (A, Y), (A, X), (B, Z)], &[0.0, 1.0, 10.0, 10.0]);
        let mut scheduler = TbatchScheduler::new(2.0);
        let mut windows = Vec::new();
        for interaction in s.iter() {
            windows.extend(scheduler.push(&interaction));
        }
        windows.extend(scheduler.finish());

        assert_eq!(windows.len(), 2);
        let first: Vec<usize> = windows[0].batches.iter().map(|b| b.batch_id).collect();
        let second: Vec<usize> = windows[1].batches.iter().map(|b| b.batch_id).collect();
        assert_eq!(first, vec![1, 2]);
        // A was last in batch 2, so its next interaction goes to batch 3
        assert_eq!(second, vec![1, 3]);
        assert_eq!(windows[1].bounds.start_index, 2);
    }

    #[test]
    fn test_schedule_respects_limit() {
        let s = stream(
            &[(A, X), (B, Y), (A, Y), (C, X), (A, Z)],
            &[0.0, 1.0, 2.0, 3.0, 4.0],
        );
        let windows = TbatchScheduler::schedule(&s, 2, 3);
        let total: usize = windows.iter().map(|w| w.num_interactions()).sum();
        assert_eq!(total, 3);
        assert_eq!(windows.last().unwrap().bounds.end_index, 3);
    }

    #[test]
    fn test_batches_carry_interaction_fields() {
        let s = stream(&[(A, X), (B, X)], &[0.0, 0.5]);
        let windows = TbatchScheduler::schedule(&s, 1, s.len());
        let second = &windows[0].batches[1];
        assert_eq!(second.actor_ids, vec![B]);
        assert_eq!(second.target_ids, vec![X]);
        assert_eq!(second.previous_target_ids, vec![s.none_target()]);
        assert_eq!(second.features, vec![0.5]);
        assert_eq!(second.feature_dim, 1);
    }
}
