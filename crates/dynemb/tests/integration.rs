//! Integration tests for the dynemb crate.
//!
//! These exercise full training runs on small synthetic streams:
//! scheduling + caching on the first epoch, replay on later epochs,
//! trajectory completeness, loss sanity, and checkpoint output.

use burn::backend::ndarray::NdArray;
use burn::backend::Autodiff;
use burn::optim::Optimizer;
use burn::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

use dynemb::model::bridge::{column_to_tensor, matrix_to_tensor, tensor_to_rows};
use dynemb::training::checkpoint::{load_meta, load_model, read_embeddings, read_trajectories};
use dynemb::{
    EmbeddingDynamics, EntityKind, Phase, RecurrentDynamics, RecurrentDynamicsConfig,
    TrainError, TrainingConfig, TrainingCycle,
};
use interactions::{positive_class_weight, InteractionEvent, InteractionStream};

type TestBackend = Autodiff<NdArray<f32>>;
type Model = RecurrentDynamics<TestBackend>;

/// Helper: a seeded stream over a handful of actors and targets.
fn random_stream(n: usize, seed: u64, positive_rate: f64) -> InteractionStream {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut ts = 0.0;
    let events = (0..n)
        .map(|_| {
            ts += rng.gen_range(0.0..4.0);
            InteractionEvent {
                actor_id: rng.gen_range(0..8),
                target_id: rng.gen_range(0..6),
                timestamp: ts,
                features: vec![rng.gen::<f32>(), rng.gen::<f32>(), rng.gen::<f32>()],
                state_label: rng.gen_bool(positive_rate),
            }
        })
        .collect();
    InteractionStream::from_events(events).unwrap()
}

/// Helper: a small, quiet config.
fn small_config(epochs: usize, checkpoint_dir: &str) -> TrainingConfig {
    TrainingConfig {
        epochs,
        embedding_dim: 6,
        train_proportion: 0.8,
        num_windows: 10,
        checkpoint_dir: checkpoint_dir.to_string(),
        show_progress: false,
        ..Default::default()
    }
}

/// Helper: a cycle with a fresh recurrent model and Adam.
fn new_cycle(
    stream: &InteractionStream,
    config: TrainingConfig,
) -> TrainingCycle<TestBackend, Model, impl Optimizer<Model, TestBackend>> {
    let device = Default::default();
    let model = RecurrentDynamicsConfig::for_stream(stream, config.embedding_dim).init(&device);
    let optimizer = config.optimizer::<TestBackend, Model>();
    TrainingCycle::new(config, model, optimizer, stream, &device).unwrap()
}

fn as_row(v: Tensor<TestBackend, 1>) -> Vec<f32> {
    tensor_to_rows(v.unsqueeze::<2>()).unwrap().remove(0)
}

// ---------------------------------------------------------------------------
// Test 1: every training interaction gets both trajectory entries
// ---------------------------------------------------------------------------

#[test]
fn test_trajectory_complete_after_epoch() {
    let stream = random_stream(150, 1, 0.1);
    let mut cycle = new_cycle(&stream, small_config(1, "unused"));
    let train_end = cycle.split().train_end;
    assert_eq!(train_end, 120);

    cycle.run_epoch(&stream).unwrap();
    assert!(cycle.recorder().is_complete(train_end));
    // Interactions past the boundary are never processed
    assert!(cycle.recorder().get(EntityKind::Actor, train_end).is_none());
}

// ---------------------------------------------------------------------------
// Test 2: replay reproduces the first epoch's windows and batches
// ---------------------------------------------------------------------------

#[test]
fn test_replay_matches_first_epoch_for_several_epochs() {
    let stream = random_stream(200, 2, 0.1);
    let mut cycle = new_cycle(&stream, small_config(4, "unused"));

    let first = cycle.run_epoch(&stream).unwrap();
    let cached = cycle.cache().windows().to_vec();
    for epoch in 1..4 {
        let summary = cycle.run_epoch(&stream).unwrap();
        assert_eq!(summary.epoch, epoch);
        assert!(summary.replayed);
        assert_eq!(summary.windows, first.windows);
        assert_eq!(summary.batches, first.batches);
        assert_eq!(cycle.cache().windows(), cached.as_slice());
    }
}

// ---------------------------------------------------------------------------
// Test 3: every loss term is non-negative and finite
// ---------------------------------------------------------------------------

#[test]
fn test_loss_terms_non_negative() {
    let stream = random_stream(120, 3, 0.2);
    let mut cycle = new_cycle(&stream, small_config(2, "unused"));
    for _ in 0..2 {
        let summary = cycle.run_epoch(&stream).unwrap();
        assert!(summary.terms.is_well_formed(), "{:?}", summary.terms);
        assert!(summary.terms.reconstruction > 0.0);
        assert!(summary.total_loss >= 0.0);
        assert!((summary.total_loss - summary.terms.total()).abs() < 1e-3 * summary.total_loss.max(1.0));
    }
}

// ---------------------------------------------------------------------------
// Test 4: every epoch starts from the shared initial vectors
// ---------------------------------------------------------------------------

#[test]
fn test_second_epoch_starts_from_initial_vectors() {
    let stream = random_stream(100, 4, 0.1);
    let mut cycle = new_cycle(&stream, small_config(2, "unused"));
    cycle.run_epoch(&stream).unwrap();

    // Parameters in effect for the first batch of the next epoch
    let model = cycle.model().clone();
    let first = stream.get(0);
    let initial = |kind: EntityKind| model.initial_embedding(kind).unsqueeze::<2>();
    let trained = cycle.store().rows(EntityKind::Actor).unwrap();
    assert_ne!(trained[first.actor_id], as_row(model.initial_embedding(EntityKind::Actor)));

    cycle.run_epoch(&stream).unwrap();

    let device = Default::default();
    let features = matrix_to_tensor::<TestBackend>(first.features, 1, first.features.len(), &device);
    let expected_actor = model.update(
        EntityKind::Actor,
        initial(EntityKind::Actor),
        initial(EntityKind::Target),
        column_to_tensor(&[first.actor_time_delta], &device),
        features.clone(),
    );
    let expected_target = model.update(
        EntityKind::Target,
        initial(EntityKind::Target),
        initial(EntityKind::Actor),
        column_to_tensor(&[first.target_time_delta], &device),
        features,
    );

    for (kind, expected) in [(EntityKind::Actor, expected_actor), (EntityKind::Target, expected_target)] {
        let expected = tensor_to_rows(expected).unwrap().remove(0);
        let recorded = cycle.recorder().get(kind, 0).unwrap();
        for (a, b) in expected.iter().zip(recorded) {
            assert!((a - b).abs() < 1e-5, "{kind}: {expected:?} vs {recorded:?}");
        }
    }
}

// ---------------------------------------------------------------------------
// Test 5: optimizer steps move the learned initial vectors
// ---------------------------------------------------------------------------

#[test]
fn test_training_updates_parameters() {
    let stream = random_stream(100, 5, 0.1);
    let mut cycle = new_cycle(&stream, small_config(1, "unused"));
    let before = as_row(cycle.model().initial_embedding(EntityKind::Actor));
    cycle.run_epoch(&stream).unwrap();
    let after = as_row(cycle.model().initial_embedding(EntityKind::Actor));
    assert_ne!(before, after);
}

// ---------------------------------------------------------------------------
// Test 6: no positive labels still gives a finite weight and trains
// ---------------------------------------------------------------------------

#[test]
fn test_zero_positive_labels() {
    let stream = random_stream(1000, 6, 0.0);
    assert_eq!(stream.stats().positive_labels, 0);
    let weight = positive_class_weight(stream.state_labels());
    assert!(weight.is_finite());
    assert!((weight - 1000.0).abs() < 1e-9);

    let mut config = small_config(1, "unused");
    config.num_windows = 50;
    let mut cycle = new_cycle(&stream, config);
    assert!((cycle.positive_class_weight() - 1000.0).abs() < 1e-3);
    let summary = cycle.run_epoch(&stream).unwrap();
    assert!(summary.terms.state_change.is_finite());
}

// ---------------------------------------------------------------------------
// Test 7: train() writes epoch and final checkpoints
// ---------------------------------------------------------------------------

#[test]
fn test_train_writes_checkpoints() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("ckpt");
    let stream = random_stream(80, 7, 0.1);
    let mut cycle = new_cycle(&stream, small_config(2, root.to_str().unwrap()));

    let summaries = cycle.train(&stream).unwrap();
    assert_eq!(summaries.len(), 2);
    assert_eq!(cycle.phase(), Phase::Finished);
    assert!(matches!(cycle.run_epoch(&stream), Err(TrainError::Finished(2))));

    for name in ["epoch_0", "epoch_1", "final"] {
        let dir = root.join(name);
        for file in ["model.mpk", "optimizer.mpk", "meta.json", "embeddings.parquet", "trajectories.parquet"] {
            assert!(dir.join(file).exists(), "{name}/{file} missing");
        }
    }

    let meta = load_meta(&root.join("final")).unwrap();
    assert_eq!(meta.epoch, 1);
    assert_eq!(meta.train_end, 64);
    assert_eq!(meta.num_interactions, 80);
    assert_eq!(meta.embedding_dim, 6);

    let rows = read_embeddings(&root.join("final").join("embeddings.parquet")).unwrap();
    let actors: Vec<_> = rows.iter().filter(|r| r.kind == EntityKind::Actor).collect();
    let targets: Vec<_> = rows.iter().filter(|r| r.kind == EntityKind::Target).collect();
    assert_eq!(actors.len(), stream.num_actors());
    assert_eq!(targets.len(), stream.target_rows());
    assert_eq!(actors[0].values.len(), 6 + stream.num_actors());
    assert_eq!(targets[0].values.len(), 6 + stream.target_rows());
    // Static identity follows the dynamic part
    assert_eq!(targets[2].values[6 + 2], 1.0);

    let trajectories = read_trajectories(&root.join("final").join("trajectories.parquet")).unwrap();
    assert_eq!(trajectories.len(), 80);
    assert!(trajectories[..64].iter().all(|r| r.actor.iter().any(|&v| v != 0.0)));
}

// ---------------------------------------------------------------------------
// Test 8: a saved model can be restored
// ---------------------------------------------------------------------------

#[test]
fn test_restore_model_from_checkpoint() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("ckpt");
    let stream = random_stream(60, 8, 0.1);
    let mut cycle = new_cycle(&stream, small_config(1, root.to_str().unwrap()));
    cycle.train(&stream).unwrap();
    let trained = as_row(cycle.model().initial_embedding(EntityKind::Target));

    let device = Default::default();
    let fresh = RecurrentDynamicsConfig::for_stream(&stream, 6).init::<TestBackend>(&device);
    let restored = load_model(fresh, &root.join("final"), &device).unwrap();
    let loaded = as_row(restored.initial_embedding(EntityKind::Target));
    for (a, b) in trained.iter().zip(&loaded) {
        assert!((a - b).abs() < 1e-6);
    }
}

// ---------------------------------------------------------------------------
// Test 9: a non-finite loss aborts the run
// ---------------------------------------------------------------------------

/// Recurrent dynamics whose predictions are always NaN.
#[derive(Module, Debug)]
struct NanPredictor<B: Backend> {
    inner: RecurrentDynamics<B>,
}

impl<B: Backend> EmbeddingDynamics<B> for NanPredictor<B> {
    fn embedding_dim(&self) -> usize {
        self.inner.embedding_dim()
    }

    fn initial_embedding(&self, kind: EntityKind) -> Tensor<B, 1> {
        self.inner.initial_embedding(kind)
    }

    fn project(&self, e: Tensor<B, 2>, c: Tensor<B, 2>, dt: Tensor<B, 2>, f: Tensor<B, 2>) -> Tensor<B, 2> {
        self.inner.project(e, c, dt, f)
    }

    fn update(
        &self,
        kind: EntityKind,
        e: Tensor<B, 2>,
        c: Tensor<B, 2>,
        dt: Tensor<B, 2>,
        f: Tensor<B, 2>,
    ) -> Tensor<B, 2> {
        self.inner.update(kind, e, c, dt, f)
    }

    fn predict_target(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        self.inner.predict_target(input).mul_scalar(f32::NAN)
    }

    fn classify_state(&self, actor: Tensor<B, 2>) -> Tensor<B, 2> {
        self.inner.classify_state(actor)
    }
}

#[test]
fn test_non_finite_loss_is_fatal() {
    let stream = random_stream(50, 9, 0.1);
    let config = small_config(1, "unused");
    let device = Default::default();
    let model = NanPredictor {
        inner: RecurrentDynamicsConfig::for_stream(&stream, config.embedding_dim).init::<TestBackend>(&device),
    };
    let optimizer = config.optimizer::<TestBackend, NanPredictor<TestBackend>>();
    let mut cycle = TrainingCycle::new(config, model, optimizer, &stream, &device).unwrap();

    let err = cycle.run_epoch(&stream).unwrap_err();
    assert!(matches!(err, TrainError::NonFiniteLoss { epoch: 0, window: 0, .. }));

    // The aborted first pass leaves no partial cache behind, so a retry
    // schedules from scratch and hits the same loss again
    assert!(cycle.cache().is_empty());
    assert!(!cycle.cache().is_sealed());
    let err = cycle.run_epoch(&stream).unwrap_err();
    assert!(matches!(err, TrainError::NonFiniteLoss { epoch: 0, window: 0, .. }));
}

// ---------------------------------------------------------------------------
// Test 10: a rejected config never builds a cycle
// ---------------------------------------------------------------------------

#[test]
fn test_train_proportion_085_rejected() {
    let config = TrainingConfig {
        train_proportion: 0.85,
        ..small_config(1, "unused")
    };
    assert!(config.validate().is_err());

    let stream = random_stream(20, 10, 0.1);
    let device = Default::default();
    let model = RecurrentDynamicsConfig::for_stream(&stream, 6).init::<TestBackend>(&device);
    let optimizer = config.optimizer::<TestBackend, Model>();
    assert!(matches!(
        TrainingCycle::new(config, model, optimizer, &stream, &device),
        Err(TrainError::Config(_))
    ));
}
