//! Append-only store of first-pass windows, replayed on later epochs.
//!
//! Windows are indexed by their sequence number. On replay the caller
//! re-derives window boundaries from the stream timestamps alone and asks for
//! the cached batches of each boundary; the cached extent must match exactly.

use crate::types::{FlushWindow, TbatchAssignment, TbatchError};
use crate::window::WindowBounds;

/// Lifecycle of a [`TbatchCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// First pass: windows are being appended.
    Populating,
    /// Read-only: windows can only be replayed.
    Sealed,
}

/// Scheduler output of the first pass, one entry per closed window.
#[derive(Debug, Clone)]
pub struct TbatchCache {
    windows: Vec<FlushWindow>,
    state: CacheState,
}

impl Default for TbatchCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TbatchCache {
    pub fn new() -> Self {
        Self {
            windows: Vec::new(),
            state: CacheState::Populating,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> CacheState {
        self.state
    }

    pub fn is_sealed(&self) -> bool {
        self.state == CacheState::Sealed
    }

    /// Append the next closed window.
    ///
    /// Windows must arrive in sequence order and be conflict-free.
    pub fn store(&mut self, window: FlushWindow) -> Result<&FlushWindow, TbatchError> {
        if self.is_sealed() {
            return Err(TbatchError::Sealed { seq: window.seq() });
        }
        if window.seq() != self.windows.len() {
            return Err(TbatchError::OutOfOrder {
                seq: window.seq(),
                expected: self.windows.len(),
            });
        }
        window.check_conflict_free()?;

        tracing::debug!(
            window = window.seq(),
            batches = window.batches.len(),
            interactions = window.num_interactions(),
            "Cached window"
        );
        self.windows.push(window);
        Ok(&self.windows[self.windows.len() - 1])
    }

    /// Freeze the cache after the first pass.
    pub fn seal(&mut self) {
        if !self.is_sealed() {
            tracing::info!(
                windows = self.windows.len(),
                batches = self.num_batches(),
                interactions = self.num_interactions(),
                "Sealed t-batch cache"
            );
        }
        self.state = CacheState::Sealed;
    }

    /// Look up the cached window for boundaries re-derived on a later pass.
    pub fn replay(&self, bounds: &WindowBounds) -> Result<&FlushWindow, TbatchError> {
        if !self.is_sealed() {
            return Err(TbatchError::NotSealed);
        }
        let window = self
            .windows
            .get(bounds.seq)
            .ok_or(TbatchError::MissingWindow {
                seq: bounds.seq,
                cached: self.windows.len(),
            })?;
        let cached = &window.bounds;
        if cached.start_index != bounds.start_index || cached.end_index != bounds.end_index {
            return Err(TbatchError::WindowMismatch {
                seq: bounds.seq,
                cached_start: cached.start_index,
                cached_end: cached.end_index,
                start: bounds.start_index,
                end: bounds.end_index,
            });
        }
        Ok(window)
    }

    /// Check that a replay pass visited every cached window.
    pub fn check_replayed(&self, replayed: usize) -> Result<(), TbatchError> {
        if replayed != self.windows.len() {
            return Err(TbatchError::UnconsumedWindows {
                replayed,
                cached: self.windows.len(),
            });
        }
        Ok(())
    }

    /// Cached windows in sequence order.
    pub fn windows(&self) -> &[FlushWindow] {
        &self.windows
    }

    /// Number of cached windows.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Total batches across all windows.
    pub fn num_batches(&self) -> usize {
        self.windows.iter().map(|w| w.batches.len()).sum()
    }

    /// Total interactions across all windows.
    pub fn num_interactions(&self) -> usize {
        self.windows.iter().map(|w| w.num_interactions()).sum()
    }

    /// Interaction index → (window, batch) map over the cached pass.
    pub fn assignment(&self, num_interactions: usize) -> TbatchAssignment {
        TbatchAssignment::from_windows(&self.windows, num_interactions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TBatch;

    fn window(seq: usize, start: usize, end: usize) -> FlushWindow {
        let mut batch = TBatch::new(1, 0);
        batch.interaction_ids = (start..end).collect();
        batch.actor_ids = (start..end).collect();
        batch.target_ids = (start..end).collect();
        FlushWindow {
            bounds: WindowBounds {
                seq,
                start_index: start,
                end_index: end,
                start_timestamp: start as f64,
                closing_timestamp: (end - 1) as f64,
            },
            batches: vec![batch],
        }
    }

    fn sealed() -> TbatchCache {
        let mut cache = TbatchCache::new();
        cache.store(window(0, 0, 3)).unwrap();
        cache.store(window(1, 3, 5)).unwrap();
        cache.seal();
        cache
    }

    #[test]
    fn test_replay_returns_cached_window() {
        let cache = sealed();
        let replayed = cache.replay(&window(1, 3, 5).bounds).unwrap();
        assert_eq!(replayed, &cache.windows()[1]);
        assert!(cache.check_replayed(2).is_ok());
    }

    #[test]
    fn test_missing_window_is_fatal() {
        let cache = sealed();
        let err = cache.replay(&window(2, 5, 6).bounds).unwrap_err();
        assert!(matches!(err, TbatchError::MissingWindow { seq: 2, cached: 2 }));
    }

    #[test]
    fn test_mismatched_extent_is_fatal() {
        let cache = sealed();
        let err = cache.replay(&window(1, 3, 6).bounds).unwrap_err();
        assert!(matches!(err, TbatchError::WindowMismatch { seq: 1, cached_end: 5, end: 6, .. }));
    }

    #[test]
    fn test_unconsumed_windows() {
        let cache = sealed();
        let err = cache.check_replayed(1).unwrap_err();
        assert!(matches!(err, TbatchError::UnconsumedWindows { replayed: 1, cached: 2 }));
    }

    #[test]
    fn test_store_after_seal_fails() {
        let mut cache = sealed();
        assert!(matches!(cache.store(window(2, 5, 6)), Err(TbatchError::Sealed { seq: 2 })));
        assert_eq!(cache.state(), CacheState::Sealed);
    }

    #[test]
    fn test_store_out_of_order_fails() {
        let mut cache = TbatchCache::new();
        let err = cache.store(window(1, 0, 3)).unwrap_err();
        assert!(matches!(err, TbatchError::OutOfOrder { seq: 1, expected: 0 }));
    }

    #[test]
    fn test_replay_before_seal_fails() {
        let mut cache = TbatchCache::new();
        cache.store(window(0, 0, 3)).unwrap();
        assert!(matches!(cache.replay(&window(0, 0, 3).bounds), Err(TbatchError::NotSealed)));
    }

    #[test]
    fn test_counts_and_assignment() {
        let cache = sealed();
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.num_batches(), 2);
        assert_eq!(cache.num_interactions(), 5);
        let assignment = cache.assignment(5);
        assert_eq!(assignment.get(4), Some((1, 1)));
        assert_eq!(assignment.scheduled(), 5);
    }
}
