//! Window-by-window training over the interaction stream.
//!
//! One epoch walks the training split in arrival order. Interactions
//! accumulate into the open time window; when a window closes, each of its
//! batches is processed in batch-id order (project, predict, update, record),
//! the summed loss takes one optimizer step, and the embedding tables are
//! detached before the next window. The first epoch schedules batches and
//! fills the [`TbatchCache`]; later epochs re-derive only window boundaries
//! and replay the cached batches.

use std::path::{Path, PathBuf};
use std::time::Instant;

use burn::module::AutodiffModule;
use burn::optim::{GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::TensorData;
use indicatif::{ProgressBar, ProgressStyle};
use interactions::{positive_class_weight, InteractionStream, SplitBoundaries};
use tbatch::{FlushWindow, TBatch, TbatchCache, TbatchError, TbatchScheduler, WindowClock};

use crate::model::bridge::{
    column_to_tensor, ids_to_tensor, matrix_to_tensor, one_hot_rows, tensor_to_f64,
};
use crate::model::dynamics::{EmbeddingDynamics, EntityKind};
use crate::training::checkpoint::{save_checkpoint, CheckpointMeta, CheckpointName};
use crate::training::config::{ConfigError, TrainingConfig};
use crate::training::loss::{mse_loss, weighted_cross_entropy, LossTerms};
use crate::training::recorder::TrajectoryRecorder;
use crate::training::store::EmbeddingStore;

/// Where the cycle is within an epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Consuming interactions into the open window.
    Accumulating,
    /// Processing the batches of a closed window.
    Flushing,
    /// The last epoch run has completed; tables hold its final state.
    EpochDone,
    /// All configured epochs have run.
    Finished,
}

#[derive(Debug, thiserror::Error)]
pub enum TrainError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("t-batch cache: {0}")]
    Cache(#[from] TbatchError),
    #[error("non-finite loss {value} in window {window} of epoch {epoch}")]
    NonFiniteLoss { epoch: usize, window: usize, value: f64 },
    #[error("epoch {epoch}: no {kind} trajectory for interaction {index}")]
    IncompleteTrajectory {
        epoch: usize,
        kind: EntityKind,
        index: usize,
    },
    #[error("stream has {actual} interactions, training was set up for {expected}")]
    StreamMismatch { expected: usize, actual: usize },
    #[error("all {0} epochs have already run")]
    Finished(usize),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Outcome of one epoch.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct EpochSummary {
    pub epoch: usize,
    /// Sum of the per-window losses.
    pub total_loss: f64,
    pub terms: LossTerms,
    pub interactions: usize,
    pub windows: usize,
    pub batches: usize,
    pub elapsed_secs: f64,
    /// Whether batches came from the cache rather than the scheduler.
    pub replayed: bool,
}

#[derive(Debug, Default)]
struct EpochTotals {
    loss: f64,
    terms: LossTerms,
    interactions: usize,
    windows: usize,
    batches: usize,
}

/// Owns the model, optimizer, tables, timelines, and t-batch cache for a
/// training run.
pub struct TrainingCycle<B, M, O>
where
    B: AutodiffBackend,
    M: EmbeddingDynamics<B> + AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    config: TrainingConfig,
    model: M,
    optimizer: O,
    store: EmbeddingStore<B>,
    recorder: TrajectoryRecorder,
    cache: TbatchCache,
    split: SplitBoundaries,
    class_weights: [f32; 2],
    num_actors: usize,
    num_targets: usize,
    target_rows: usize,
    num_interactions: usize,
    phase: Phase,
    epoch: usize,
    device: B::Device,
}

impl<B, M, O> TrainingCycle<B, M, O>
where
    B: AutodiffBackend,
    M: EmbeddingDynamics<B> + AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    /// Set up training over `stream`.
    ///
    /// Validates `config`, derives the split boundaries and the positive
    /// class weight, and sizes the tables and timelines for the stream.
    pub fn new(
        config: TrainingConfig,
        model: M,
        optimizer: O,
        stream: &InteractionStream,
        device: &B::Device,
    ) -> Result<Self, TrainError> {
        config.validate()?;

        let split = SplitBoundaries::new(stream.len(), config.train_proportion);
        let weight = positive_class_weight(stream.state_labels());
        let store = EmbeddingStore::new(&model, stream.num_actors(), stream.target_rows());
        let recorder = TrajectoryRecorder::new(stream.len(), model.embedding_dim());

        tracing::info!(
            train_end = split.train_end,
            validation_start = split.validation_start,
            test_start = split.test_start,
            test_end = split.test_end,
            positive_class_weight = format!("{weight:.3}"),
            "Prepared training split"
        );

        Ok(Self {
            config,
            model,
            optimizer,
            store,
            recorder,
            cache: TbatchCache::new(),
            split,
            class_weights: [1.0, weight as f32],
            num_actors: stream.num_actors(),
            num_targets: stream.num_targets(),
            target_rows: stream.target_rows(),
            num_interactions: stream.len(),
            phase: Phase::Accumulating,
            epoch: 0,
            device: device.clone(),
        })
    }

    /// Start counting epochs at `epoch`, e.g. after restoring a checkpoint.
    pub fn with_start_epoch(mut self, epoch: usize) -> Self {
        self.epoch = epoch;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Index of the next epoch to run.
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn into_model(self) -> M {
        self.model
    }

    pub fn store(&self) -> &EmbeddingStore<B> {
        &self.store
    }

    pub fn recorder(&self) -> &TrajectoryRecorder {
        &self.recorder
    }

    pub fn cache(&self) -> &TbatchCache {
        &self.cache
    }

    pub fn split(&self) -> SplitBoundaries {
        self.split
    }

    /// Weight of the positive state-change class.
    pub fn positive_class_weight(&self) -> f32 {
        self.class_weights[1]
    }

    /// Run every remaining epoch, writing `epoch_{n}/` after each and
    /// `final/` after the last.
    pub fn train(&mut self, stream: &InteractionStream) -> Result<Vec<EpochSummary>, TrainError> {
        let root = PathBuf::from(&self.config.checkpoint_dir);
        let mut summaries = Vec::new();
        while self.epoch < self.config.epochs {
            let summary = self.run_epoch(stream)?;
            self.save_checkpoint(&root, CheckpointName::Epoch(summary.epoch), &summary)?;
            summaries.push(summary);
        }
        if let Some(last) = summaries.last() {
            self.save_checkpoint(&root, CheckpointName::Final, last)?;
        }
        self.phase = Phase::Finished;
        tracing::info!(epochs = summaries.len(), "Training complete");
        Ok(summaries)
    }

    /// Run one epoch over the training split.
    pub fn run_epoch(&mut self, stream: &InteractionStream) -> Result<EpochSummary, TrainError> {
        if self.phase == Phase::Finished {
            return Err(TrainError::Finished(self.config.epochs));
        }
        if stream.len() != self.num_interactions {
            return Err(TrainError::StreamMismatch {
                expected: self.num_interactions,
                actual: stream.len(),
            });
        }

        let start = Instant::now();
        let epoch = self.epoch;
        self.store.reset_epoch(&self.model);
        self.recorder.reset_epoch();
        self.phase = Phase::Accumulating;

        let replayed = self.cache.is_sealed();
        let progress = self.progress_bar(epoch);
        let mut totals = EpochTotals::default();

        let mut cache = std::mem::take(&mut self.cache);
        let walked = if replayed {
            self.replay_windows(stream, &cache, &progress, &mut totals)
        } else {
            self.schedule_windows(stream, &mut cache, &progress, &mut totals)
        };
        // A first pass that stopped early leaves a partial, unsealed cache
        self.cache = if walked.is_err() && !replayed {
            TbatchCache::new()
        } else {
            cache
        };
        walked?;
        progress.finish_and_clear();

        let train_end = self.split.train_end;
        for kind in [EntityKind::Actor, EntityKind::Target] {
            if let Some(index) = self.recorder.first_missing(kind, train_end) {
                return Err(TrainError::IncompleteTrajectory { epoch, kind, index });
            }
        }

        self.phase = Phase::EpochDone;
        self.epoch += 1;

        let summary = EpochSummary {
            epoch,
            total_loss: totals.loss,
            terms: totals.terms,
            interactions: totals.interactions,
            windows: totals.windows,
            batches: totals.batches,
            elapsed_secs: start.elapsed().as_secs_f64(),
            replayed,
        };
        tracing::info!(
            epoch,
            loss = format!("{:.4}", summary.total_loss),
            reconstruction = format!("{:.4}", summary.terms.reconstruction),
            actor_smoothness = format!("{:.4}", summary.terms.actor_smoothness),
            target_smoothness = format!("{:.4}", summary.terms.target_smoothness),
            state_change = format!("{:.4}", summary.terms.state_change),
            interactions = summary.interactions,
            windows = summary.windows,
            batches = summary.batches,
            replayed,
            elapsed_secs = format!("{:.1}", summary.elapsed_secs),
            "Epoch finished"
        );
        Ok(summary)
    }

    /// First pass: schedule batches, cache each closed window, then flush it.
    fn schedule_windows(
        &mut self,
        stream: &InteractionStream,
        cache: &mut TbatchCache,
        progress: &ProgressBar,
        totals: &mut EpochTotals,
    ) -> Result<(), TrainError> {
        let mut scheduler = TbatchScheduler::for_stream(stream, self.config.num_windows);
        for interaction in stream.iter().take(self.split.train_end) {
            if let Some(window) = scheduler.push(&interaction) {
                let window = cache.store(window)?;
                self.flush(window, stream, totals)?;
            }
            progress.inc(1);
        }
        if let Some(window) = scheduler.finish() {
            let window = cache.store(window)?;
            self.flush(window, stream, totals)?;
        }
        cache.seal();
        Ok(())
    }

    /// Later passes: re-derive window boundaries and replay cached batches.
    fn replay_windows(
        &mut self,
        stream: &InteractionStream,
        cache: &TbatchCache,
        progress: &ProgressBar,
        totals: &mut EpochTotals,
    ) -> Result<(), TrainError> {
        let mut clock = WindowClock::for_stream(stream, self.config.num_windows);
        for interaction in stream.iter().take(self.split.train_end) {
            if let Some(bounds) = clock.observe(interaction.index, interaction.timestamp) {
                self.flush(cache.replay(&bounds)?, stream, totals)?;
            }
            progress.inc(1);
        }
        if let Some(bounds) = clock.finish() {
            self.flush(cache.replay(&bounds)?, stream, totals)?;
        }
        cache.check_replayed(totals.windows)?;
        Ok(())
    }

    /// Process every batch of a closed window, then take one optimizer step.
    fn flush(
        &mut self,
        window: &FlushWindow,
        stream: &InteractionStream,
        totals: &mut EpochTotals,
    ) -> Result<(), TrainError> {
        self.phase = Phase::Flushing;

        let mut loss: Option<Tensor<B, 1>> = None;
        let mut terms = LossTerms::default();
        for batch in &window.batches {
            let (batch_loss, batch_terms) = self.process_batch(batch, stream)?;
            terms += batch_terms;
            loss = Some(match loss {
                Some(acc) => acc + batch_loss,
                None => batch_loss,
            });
        }

        if let Some(loss) = loss {
            let value = tensor_to_f64(loss.clone());
            if !value.is_finite() {
                return Err(TrainError::NonFiniteLoss {
                    epoch: self.epoch,
                    window: window.seq(),
                    value,
                });
            }
            let grads = GradientsParams::from_grads(loss.backward(), &self.model);
            self.model = self
                .optimizer
                .step(self.config.learning_rate, self.model.clone(), grads);
            totals.loss += value;
        }
        self.store.detach();

        tracing::debug!(
            window = window.seq(),
            batches = window.batches.len(),
            interactions = window.num_interactions(),
            loss = terms.total(),
            "Flushed window"
        );
        totals.terms += terms;
        totals.interactions += window.num_interactions();
        totals.windows += 1;
        totals.batches += window.batches.len();
        self.phase = Phase::Accumulating;
        Ok(())
    }

    /// Forward one conflict-free batch, write its updates, and return its
    /// summed loss with the per-term values.
    fn process_batch(
        &mut self,
        batch: &TBatch,
        stream: &InteractionStream,
    ) -> Result<(Tensor<B, 1>, LossTerms), TrainError> {
        let device = self.device.clone();
        let n = batch.len();

        let actor_ids = ids_to_tensor::<B>(&batch.actor_ids, &device);
        let target_ids = ids_to_tensor::<B>(&batch.target_ids, &device);
        let previous_ids = ids_to_tensor::<B>(&batch.previous_target_ids, &device);
        let features = matrix_to_tensor::<B>(&batch.features, n, batch.feature_dim, &device);
        let actor_elapsed = column_to_tensor::<B>(&batch.actor_time_deltas, &device);
        let target_elapsed = column_to_tensor::<B>(&batch.target_time_deltas, &device);

        let actor = self.store.read(EntityKind::Actor, actor_ids.clone());
        let target = self.store.read(EntityKind::Target, target_ids.clone());
        let previous = self.store.read(EntityKind::Target, previous_ids);

        // Predict the current target from the projected actor and the
        // actor's previous target
        let projected = self.store.project(
            &self.model,
            actor.clone(),
            previous.clone(),
            actor_elapsed.clone(),
            features.clone(),
        );
        let input = Tensor::cat(
            vec![
                projected,
                previous,
                one_hot_rows(&batch.previous_target_ids, self.target_rows, &device),
                one_hot_rows(&batch.actor_ids, self.num_actors, &device),
            ],
            1,
        );
        let predicted = self.model.predict_target(input);
        let truth = Tensor::cat(
            vec![
                target.clone(),
                one_hot_rows(&batch.target_ids, self.target_rows, &device),
            ],
            1,
        );
        let reconstruction = mse_loss(predicted, truth);

        let actor_next = self.store.update(
            &self.model,
            EntityKind::Actor,
            actor.clone(),
            target.clone(),
            actor_elapsed,
            features.clone(),
        );
        let target_next = self.store.update(
            &self.model,
            EntityKind::Target,
            target.clone(),
            actor.clone(),
            target_elapsed,
            features,
        );

        self.store.write(EntityKind::Actor, actor_ids, actor_next.clone());
        self.store.write(EntityKind::Target, target_ids, target_next.clone());
        self.recorder
            .record(EntityKind::Actor, &batch.interaction_ids, actor_next.clone())?;
        self.recorder
            .record(EntityKind::Target, &batch.interaction_ids, target_next.clone())?;

        let actor_smoothness = mse_loss(actor_next.clone(), actor);
        let target_smoothness = mse_loss(target_next, target);

        let mut terms = LossTerms {
            reconstruction: tensor_to_f64(reconstruction.clone()),
            actor_smoothness: tensor_to_f64(actor_smoothness.clone()),
            target_smoothness: tensor_to_f64(target_smoothness.clone()),
            state_change: 0.0,
        };
        let mut loss = reconstruction + actor_smoothness + target_smoothness;

        if self.config.state_change {
            let labels: Vec<i64> = batch
                .interaction_ids
                .iter()
                .map(|&i| i64::from(stream.state_labels()[i]))
                .collect();
            let labels = Tensor::<B, 1, Int>::from_data(TensorData::new(labels, [n]), &device);
            // The classifier reads the actor rows just recorded
            let logits = self.model.classify_state(actor_next);
            let state_change = weighted_cross_entropy(logits, labels, &self.class_weights);
            terms.state_change = tensor_to_f64(state_change.clone());
            loss = loss + state_change;
        }

        Ok((loss, terms))
    }

    fn progress_bar(&self, epoch: usize) -> ProgressBar {
        if !self.config.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(self.split.train_end as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        pb.set_message(format!("epoch {epoch}"));
        pb
    }

    /// Write a checkpoint of the current model, optimizer, tables, and
    /// timelines under `root`.
    pub fn save_checkpoint(
        &self,
        root: &Path,
        name: CheckpointName,
        summary: &EpochSummary,
    ) -> Result<PathBuf, TrainError> {
        let meta = CheckpointMeta {
            epoch: summary.epoch,
            train_end: self.split.train_end,
            num_interactions: self.num_interactions,
            num_actors: self.num_actors,
            num_targets: self.num_targets,
            embedding_dim: self.store.embedding_dim(),
            total_loss: summary.total_loss,
        };
        Ok(save_checkpoint(
            root,
            name,
            &self.model,
            &self.optimizer,
            &meta,
            &self.store,
            &self.recorder,
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::recurrent::{RecurrentDynamics, RecurrentDynamicsConfig};
    use burn::backend::ndarray::NdArray;
    use burn::backend::Autodiff;
    use interactions::InteractionEvent;

    type TestAutodiffBackend = Autodiff<NdArray<f32>>;

    fn stream() -> InteractionStream {
        let events = (0..40)
            .map(|i| InteractionEvent {
                actor_id: i % 5,
                target_id: (i * 3) % 4,
                timestamp: i as f64,
                features: vec![(i % 3) as f32, 1.0],
                state_label: i % 9 == 0,
            })
            .collect();
        InteractionStream::from_events(events).unwrap()
    }

    fn config() -> TrainingConfig {
        TrainingConfig {
            epochs: 2,
            embedding_dim: 4,
            train_proportion: 0.5,
            num_windows: 5,
            show_progress: false,
            ..Default::default()
        }
    }

    fn cycle(
        stream: &InteractionStream,
        config: TrainingConfig,
    ) -> TrainingCycle<TestAutodiffBackend, RecurrentDynamics<TestAutodiffBackend>, impl Optimizer<RecurrentDynamics<TestAutodiffBackend>, TestAutodiffBackend>> {
        let device = Default::default();
        let model = RecurrentDynamicsConfig::for_stream(stream, config.embedding_dim).init(&device);
        let optimizer = config.optimizer::<TestAutodiffBackend, RecurrentDynamics<TestAutodiffBackend>>();
        TrainingCycle::new(config, model, optimizer, stream, &device).unwrap()
    }

    #[test]
    fn test_first_epoch_populates_cache() {
        let s = stream();
        let mut c = cycle(&s, config());
        assert_eq!(c.split().train_end, 20);

        let summary = c.run_epoch(&s).unwrap();
        assert_eq!(summary.epoch, 0);
        assert!(!summary.replayed);
        assert_eq!(summary.interactions, 20);
        assert_eq!(summary.windows, c.cache().len());
        assert!(c.cache().is_sealed());
        assert!(summary.terms.is_well_formed());
        assert!(summary.total_loss.is_finite() && summary.total_loss >= 0.0);
        assert_eq!(c.phase(), Phase::EpochDone);
        assert!(c.recorder().is_complete(20));
    }

    #[test]
    fn test_second_epoch_replays() {
        let s = stream();
        let mut c = cycle(&s, config());
        let first = c.run_epoch(&s).unwrap();
        let second = c.run_epoch(&s).unwrap();
        assert!(second.replayed);
        assert_eq!(second.epoch, 1);
        assert_eq!(second.windows, first.windows);
        assert_eq!(second.batches, first.batches);
        assert_eq!(second.interactions, first.interactions);
    }

    #[test]
    fn test_rejects_invalid_config() {
        let s = stream();
        let device = Default::default();
        let cfg = TrainingConfig {
            train_proportion: 0.85,
            ..config()
        };
        let model = RecurrentDynamicsConfig::for_stream(&s, 4).init::<TestAutodiffBackend>(&device);
        let optimizer = cfg.optimizer::<TestAutodiffBackend, RecurrentDynamics<TestAutodiffBackend>>();
        let result = TrainingCycle::new(cfg, model, optimizer, &s, &device);
        assert!(matches!(result, Err(TrainError::Config(ConfigError::TrainProportion(_)))));
    }

    #[test]
    fn test_stream_mismatch() {
        let s = stream();
        let mut c = cycle(&s, config());
        let other = InteractionStream::from_events(vec![]).unwrap();
        assert!(matches!(
            c.run_epoch(&other),
            Err(TrainError::StreamMismatch { expected: 40, actual: 0 })
        ));
    }

    #[test]
    fn test_tables_match_last_trajectory_rows() {
        let s = stream();
        let mut c = cycle(&s, config());
        c.run_epoch(&s).unwrap();

        let train_end = c.split().train_end;
        let actors = c.store().rows(EntityKind::Actor).unwrap();
        let targets = c.store().rows(EntityKind::Target).unwrap();
        let mut last_actor = vec![None; s.num_actors()];
        let mut last_target = vec![None; s.target_rows()];
        for i in 0..train_end {
            last_actor[s.actor_ids()[i]] = Some(i);
            last_target[s.target_ids()[i]] = Some(i);
        }

        let mut checked = 0;
        for (id, last) in last_actor.iter().enumerate() {
            if let Some(i) = *last {
                assert_eq!(actors[id].as_slice(), c.recorder().get(EntityKind::Actor, i).unwrap());
                checked += 1;
            }
        }
        for (id, last) in last_target.iter().enumerate() {
            if let Some(i) = *last {
                assert_eq!(targets[id].as_slice(), c.recorder().get(EntityKind::Target, i).unwrap());
                checked += 1;
            }
        }
        assert_eq!(checked, 5 + 4);
    }

    #[test]
    fn test_without_state_change_term_is_zero() {
        let s = stream();
        let mut c = cycle(
            &s,
            TrainingConfig {
                state_change: false,
                ..config()
            },
        );
        let summary = c.run_epoch(&s).unwrap();
        assert_eq!(summary.terms.state_change, 0.0);
    }
}
