//! Data types for interaction streams, split boundaries, and label statistics.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Structural problems detected while building an [`InteractionStream`].
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// A column does not have one entry per interaction.
    #[error("column `{column}` has {actual} entries, expected {expected}")]
    LengthMismatch {
        column: &'static str,
        expected: usize,
        actual: usize,
    },
    /// Timestamps must be finite and non-decreasing in arrival order.
    #[error("timestamp {timestamp} at index {index} precedes {previous}")]
    NonMonotonicTimestamp {
        index: usize,
        timestamp: f64,
        previous: f64,
    },
    #[error("timestamp at index {index} is not finite")]
    NonFiniteTimestamp { index: usize },
    /// An actor id outside `0..num_actors`.
    #[error("actor id {id} at index {index} out of range (num_actors = {num_actors})")]
    ActorOutOfRange {
        index: usize,
        id: usize,
        num_actors: usize,
    },
    /// A target id outside `0..num_targets` (or `0..=num_targets` for previous targets).
    #[error("{column} {id} at index {index} out of range (num_targets = {num_targets})")]
    TargetOutOfRange {
        column: &'static str,
        index: usize,
        id: usize,
        num_targets: usize,
    },
    /// Feature vectors must all have the same width.
    #[error("feature vector at index {index} has width {actual}, expected {expected}")]
    FeatureWidth {
        index: usize,
        expected: usize,
        actual: usize,
    },
}

/// One interaction, borrowed from an [`InteractionStream`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interaction<'a> {
    /// Position in the stream (arrival order).
    pub index: usize,
    pub actor_id: usize,
    pub target_id: usize,
    pub timestamp: f64,
    /// Fixed-width feature vector.
    pub features: &'a [f32],
    /// Time since this actor's previous interaction.
    pub actor_time_delta: f32,
    /// Time since this target's previous interaction.
    pub target_time_delta: f32,
    /// Last target this actor interacted with, or [`InteractionStream::none_target`].
    pub previous_target_id: usize,
    /// Whether the actor changed state with this interaction.
    pub state_label: bool,
}

/// An id-mapped event before time deltas and previous targets are derived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionEvent {
    pub actor_id: usize,
    pub target_id: usize,
    pub timestamp: f64,
    pub features: Vec<f32>,
    pub state_label: bool,
}

/// Index-aligned columns used to build an [`InteractionStream`].
#[derive(Debug, Clone, Default)]
pub struct StreamColumns {
    pub actor_ids: Vec<usize>,
    pub target_ids: Vec<usize>,
    pub timestamps: Vec<f64>,
    pub features: Vec<Vec<f32>>,
    pub actor_time_deltas: Vec<f32>,
    pub target_time_deltas: Vec<f32>,
    pub previous_target_ids: Vec<usize>,
    pub state_labels: Vec<bool>,
    pub num_actors: usize,
    pub num_targets: usize,
}

/// A validated, chronologically ordered stream of interactions.
///
/// Stored column-wise with features flattened row-major. The target id space
/// reserves one extra id (`num_targets`) meaning "no previous target", so
/// target tables need [`target_rows`](Self::target_rows) rows.
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionStream {
    actor_ids: Vec<usize>,
    target_ids: Vec<usize>,
    timestamps: Vec<f64>,
    features: Vec<f32>,
    feature_dim: usize,
    actor_time_deltas: Vec<f32>,
    target_time_deltas: Vec<f32>,
    previous_target_ids: Vec<usize>,
    state_labels: Vec<bool>,
    num_actors: usize,
    num_targets: usize,
}

impl InteractionStream {
    /// Validate and assemble a stream from index-aligned columns.
    pub fn new(columns: StreamColumns) -> Result<Self, StreamError> {
        let n = columns.actor_ids.len();
        let lengths = [
            ("target_ids", columns.target_ids.len()),
            ("timestamps", columns.timestamps.len()),
            ("features", columns.features.len()),
            ("actor_time_deltas", columns.actor_time_deltas.len()),
            ("target_time_deltas", columns.target_time_deltas.len()),
            ("previous_target_ids", columns.previous_target_ids.len()),
            ("state_labels", columns.state_labels.len()),
        ];
        for (column, actual) in lengths {
            if actual != n {
                return Err(StreamError::LengthMismatch {
                    column,
                    expected: n,
                    actual,
                });
            }
        }

        let feature_dim = columns.features.first().map(|f| f.len()).unwrap_or(0);
        let mut features = Vec::with_capacity(n * feature_dim);
        let mut previous_ts = f64::NEG_INFINITY;

        for i in 0..n {
            let ts = columns.timestamps[i];
            if !ts.is_finite() {
                return Err(StreamError::NonFiniteTimestamp { index: i });
            }
            if ts < previous_ts {
                return Err(StreamError::NonMonotonicTimestamp {
                    index: i,
                    timestamp: ts,
                    previous: previous_ts,
                });
            }
            previous_ts = ts;

            if columns.actor_ids[i] >= columns.num_actors {
                return Err(StreamError::ActorOutOfRange {
                    index: i,
                    id: columns.actor_ids[i],
                    num_actors: columns.num_actors,
                });
            }
            if columns.target_ids[i] >= columns.num_targets {
                return Err(StreamError::TargetOutOfRange {
                    column: "target id",
                    index: i,
                    id: columns.target_ids[i],
                    num_targets: columns.num_targets,
                });
            }
            // The sentinel id `num_targets` is valid here.
            if columns.previous_target_ids[i] > columns.num_targets {
                return Err(StreamError::TargetOutOfRange {
                    column: "previous target id",
                    index: i,
                    id: columns.previous_target_ids[i],
                    num_targets: columns.num_targets,
                });
            }

            let row = &columns.features[i];
            if row.len() != feature_dim {
                return Err(StreamError::FeatureWidth {
                    index: i,
                    expected: feature_dim,
                    actual: row.len(),
                });
            }
            features.extend_from_slice(row);
        }

        Ok(Self {
            actor_ids: columns.actor_ids,
            target_ids: columns.target_ids,
            timestamps: columns.timestamps,
            features,
            feature_dim,
            actor_time_deltas: columns.actor_time_deltas,
            target_time_deltas: columns.target_time_deltas,
            previous_target_ids: columns.previous_target_ids,
            state_labels: columns.state_labels,
            num_actors: columns.num_actors,
            num_targets: columns.num_targets,
        })
    }

    /// Build a stream from id-mapped events in chronological order.
    ///
    /// Derives each actor's previous target and the per-entity elapsed time
    /// since the entity's last interaction (0 for a first appearance). Time
    /// deltas are standardized to zero mean and unit variance per column.
    pub fn from_events(events: Vec<InteractionEvent>) -> Result<Self, StreamError> {
        let num_actors = events.iter().map(|e| e.actor_id + 1).max().unwrap_or(0);
        let num_targets = events.iter().map(|e| e.target_id + 1).max().unwrap_or(0);
        let none_target = num_targets;

        let mut last_actor_ts: Vec<Option<f64>> = vec![None; num_actors];
        let mut last_target_ts: Vec<Option<f64>> = vec![None; num_targets];
        let mut last_target_of: Vec<usize> = vec![none_target; num_actors];

        let mut columns = StreamColumns {
            num_actors,
            num_targets,
            ..Default::default()
        };

        for event in events {
            let a = event.actor_id;
            let t = event.target_id;
            let ts = event.timestamp;

            columns
                .actor_time_deltas
                .push(last_actor_ts[a].map(|prev| (ts - prev) as f32).unwrap_or(0.0));
            columns
                .target_time_deltas
                .push(last_target_ts[t].map(|prev| (ts - prev) as f32).unwrap_or(0.0));
            columns.previous_target_ids.push(last_target_of[a]);

            last_actor_ts[a] = Some(ts);
            last_target_ts[t] = Some(ts);
            last_target_of[a] = t;

            columns.actor_ids.push(a);
            columns.target_ids.push(t);
            columns.timestamps.push(ts);
            columns.features.push(event.features);
            columns.state_labels.push(event.state_label);
        }

        standardize(&mut columns.actor_time_deltas);
        standardize(&mut columns.target_time_deltas);

        Self::new(columns)
    }

    /// Number of interactions.
    pub fn len(&self) -> usize {
        self.actor_ids.len()
    }

    /// Whether the stream has no interactions.
    pub fn is_empty(&self) -> bool {
        self.actor_ids.is_empty()
    }

    /// Interaction at position `index`.
    ///
    /// # Panics
    /// Panics if `index >= len()`.
    pub fn get(&self, index: usize) -> Interaction<'_> {
        let start = index * self.feature_dim;
        Interaction {
            index,
            actor_id: self.actor_ids[index],
            target_id: self.target_ids[index],
            timestamp: self.timestamps[index],
            features: &self.features[start..start + self.feature_dim],
            actor_time_delta: self.actor_time_deltas[index],
            target_time_delta: self.target_time_deltas[index],
            previous_target_id: self.previous_target_ids[index],
            state_label: self.state_labels[index],
        }
    }

    /// Iterate over all interactions in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = Interaction<'_>> + '_ {
        (0..self.len()).map(move |i| self.get(i))
    }

    pub fn num_actors(&self) -> usize {
        self.num_actors
    }

    /// Number of real targets (excluding the "none" sentinel).
    pub fn num_targets(&self) -> usize {
        self.num_targets
    }

    /// Sentinel id meaning "this actor has no previous target".
    pub fn none_target(&self) -> usize {
        self.num_targets
    }

    /// Rows needed in a target table, including the sentinel row.
    pub fn target_rows(&self) -> usize {
        self.num_targets + 1
    }

    pub fn feature_dim(&self) -> usize {
        self.feature_dim
    }

    pub fn timestamps(&self) -> &[f64] {
        &self.timestamps
    }

    pub fn state_labels(&self) -> &[bool] {
        &self.state_labels
    }

    pub fn actor_ids(&self) -> &[usize] {
        &self.actor_ids
    }

    pub fn target_ids(&self) -> &[usize] {
        &self.target_ids
    }

    pub fn previous_target_ids(&self) -> &[usize] {
        &self.previous_target_ids
    }

    pub fn actor_time_deltas(&self) -> &[f32] {
        &self.actor_time_deltas
    }

    pub fn target_time_deltas(&self) -> &[f32] {
        &self.target_time_deltas
    }

    /// Flattened row-major feature matrix.
    pub fn features(&self) -> &[f32] {
        &self.features
    }

    /// Time covered by the stream (last minus first timestamp).
    pub fn timespan(&self) -> f64 {
        match (self.timestamps.first(), self.timestamps.last()) {
            (Some(first), Some(last)) => last - first,
            _ => 0.0,
        }
    }

    /// Quick statistics for logging and the `summary` command.
    pub fn stats(&self) -> StreamStats {
        StreamStats {
            num_actors: self.num_actors,
            num_targets: self.num_targets,
            num_interactions: self.len(),
            positive_labels: self.state_labels.iter().filter(|&&l| l).count(),
            feature_dim: self.feature_dim,
            timespan: self.timespan(),
        }
    }
}

/// Z-score a column in place. A constant column is only centered.
fn standardize(values: &mut [f32]) {
    if values.is_empty() {
        return;
    }
    let n = values.len() as f64;
    let mean = values.iter().map(|&v| v as f64).sum::<f64>() / n;
    let var = values
        .iter()
        .map(|&v| (v as f64 - mean).powi(2))
        .sum::<f64>()
        / n;
    let std = var.sqrt();
    for v in values.iter_mut() {
        let centered = *v as f64 - mean;
        *v = if std > 0.0 {
            (centered / std) as f32
        } else {
            centered as f32
        };
    }
}

/// Summary statistics of an interaction stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamStats {
    pub num_actors: usize,
    pub num_targets: usize,
    pub num_interactions: usize,
    pub positive_labels: usize,
    pub feature_dim: usize,
    pub timespan: f64,
}

impl fmt::Display for StreamStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} actors, {} targets, {} interactions, {}/{} positive labels, {} features",
            self.num_actors,
            self.num_targets,
            self.num_interactions,
            self.positive_labels,
            self.num_interactions,
            self.feature_dim,
        )
    }
}

/// Train / validation / test boundaries over a stream of `n` interactions.
///
/// The first `floor(n * p)` interactions train; the next ten percent
/// validate; the ten percent after that test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitBoundaries {
    pub train_end: usize,
    pub validation_start: usize,
    pub test_start: usize,
    pub test_end: usize,
}

impl SplitBoundaries {
    pub fn new(num_interactions: usize, train_proportion: f64) -> Self {
        let n = num_interactions as f64;
        let at = |p: f64| ((n * p).floor() as usize).min(num_interactions);
        let train_end = at(train_proportion);
        Self {
            train_end,
            validation_start: train_end,
            test_start: at(train_proportion + 0.1),
            test_end: at(train_proportion + 0.2),
        }
    }
}

/// Weight for the positive state-change class: labeled interactions per
/// positive label. The denominator carries `+1` so a stream without any
/// positive labels still yields a finite weight.
pub fn positive_class_weight(labels: &[bool]) -> f64 {
    let positives = labels.iter().filter(|&&l| l).count();
    labels.len() as f64 / (1.0 + positives as f64)
}
