//! Checkpoint persistence.
//!
//! Each checkpoint is a directory (`epoch_{n}/` or `final/`) holding:
//!
//! - `model.mpk`, `optimizer.mpk`: burn records
//! - `meta.json`: [`CheckpointMeta`]
//! - `embeddings.parquet`: one row per actor and target, dynamic embedding
//!   followed by the static one-hot identity
//! - `trajectories.parquet`: one row per interaction with the recorded
//!   actor and target embeddings

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::*;
use arrow::buffer::OffsetBuffer;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use burn::module::AutodiffModule;
use burn::optim::Optimizer;
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder};
use burn::tensor::backend::AutodiffBackend;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;

use crate::model::dynamics::EntityKind;
use crate::training::recorder::TrajectoryRecorder;
use crate::training::store::EmbeddingStore;

/// Metadata saved alongside each checkpoint.
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq)]
pub struct CheckpointMeta {
    /// Last completed epoch (0-based).
    pub epoch: usize,
    /// Training boundary index: interactions `0..train_end` were trained on.
    pub train_end: usize,
    pub num_interactions: usize,
    pub num_actors: usize,
    /// Target count, excluding the sentinel row.
    pub num_targets: usize,
    pub embedding_dim: usize,
    /// Summed loss of the last completed epoch.
    pub total_loss: f64,
}

/// Which checkpoint directory to write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointName {
    Epoch(usize),
    Final,
}

impl CheckpointName {
    pub fn dir_name(&self) -> String {
        match self {
            CheckpointName::Epoch(n) => format!("epoch_{n}"),
            CheckpointName::Final => "final".to_string(),
        }
    }
}

/// One row of `embeddings.parquet`.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRow {
    pub kind: EntityKind,
    pub id: usize,
    /// Dynamic embedding followed by the one-hot identity.
    pub values: Vec<f32>,
}

/// One row of `trajectories.parquet`.
#[derive(Debug, Clone, PartialEq)]
pub struct TrajectoryRow {
    pub index: usize,
    pub actor: Vec<f32>,
    pub target: Vec<f32>,
}

/// Write a complete checkpoint under `root/<name>/` and return its path.
pub fn save_checkpoint<B, M, O>(
    root: &Path,
    name: CheckpointName,
    model: &M,
    optimizer: &O,
    meta: &CheckpointMeta,
    store: &EmbeddingStore<B>,
    recorder: &TrajectoryRecorder,
) -> anyhow::Result<PathBuf>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    let dir = root.join(name.dir_name());
    std::fs::create_dir_all(&dir)?;
    let mpk = NamedMpkFileRecorder::<FullPrecisionSettings>::new();

    model
        .clone()
        .save_file(dir.join("model"), &mpk)
        .map_err(|e| anyhow::anyhow!("Failed to save model to {}: {e}", dir.display()))?;
    Recorder::<B>::record(&mpk, optimizer.to_record(), dir.join("optimizer"))
        .map_err(|e| anyhow::anyhow!("Failed to save optimizer to {}: {e}", dir.display()))?;

    serde_json::to_writer_pretty(std::fs::File::create(dir.join("meta.json"))?, meta)?;

    let mut rows = Vec::with_capacity(store.num_rows(EntityKind::Actor) + store.num_rows(EntityKind::Target));
    for kind in [EntityKind::Actor, EntityKind::Target] {
        let width = store.num_rows(kind);
        for (id, mut values) in store.rows(kind)?.into_iter().enumerate() {
            let offset = values.len();
            values.resize(offset + width, 0.0);
            values[offset + id] = 1.0;
            rows.push(EmbeddingRow { kind, id, values });
        }
    }
    write_embeddings(&rows, &dir.join("embeddings.parquet"))?;
    write_trajectories(recorder, &dir.join("trajectories.parquet"))?;

    tracing::info!(
        checkpoint = %dir.display(),
        epoch = meta.epoch,
        "Checkpoint saved (model + optimizer + meta + embeddings + trajectories)"
    );
    Ok(dir)
}

/// Load `meta.json` from a checkpoint directory.
pub fn load_meta(dir: &Path) -> anyhow::Result<CheckpointMeta> {
    let path = dir.join("meta.json");
    let file = std::fs::File::open(&path)
        .map_err(|e| anyhow::anyhow!("Failed to open {}: {e}", path.display()))?;
    serde_json::from_reader(file).map_err(|e| anyhow::anyhow!("Failed to parse {}: {e}", path.display()))
}

/// Load model weights from a checkpoint directory on top of `model`.
pub fn load_model<B: Backend, M: Module<B>>(model: M, dir: &Path, device: &B::Device) -> anyhow::Result<M> {
    model
        .load_file(dir.join("model"), &NamedMpkFileRecorder::<FullPrecisionSettings>::new(), device)
        .map_err(|e| anyhow::anyhow!("Failed to load model from {}: {e}", dir.display()))
}

/// Load optimizer state from a checkpoint directory into `optimizer`.
pub fn load_optimizer<B, M, O>(optimizer: O, dir: &Path, device: &B::Device) -> anyhow::Result<O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    let mpk = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    let record = Recorder::<B>::load(&mpk, dir.join("optimizer"), device)
        .map_err(|e| anyhow::anyhow!("Failed to load optimizer from {}: {e}", dir.display()))?;
    Ok(optimizer.load_record(record))
}

fn list_field() -> Arc<Field> {
    Arc::new(Field::new("item", DataType::Float32, false))
}

fn list_type() -> DataType {
    DataType::List(list_field())
}

/// Build a `List<Float32>` column from variable-width rows.
fn list_array<'a>(rows: impl Iterator<Item = &'a [f32]>) -> ListArray {
    let mut offsets = vec![0i32];
    let mut flat = Vec::new();
    for row in rows {
        flat.extend_from_slice(row);
        offsets.push(flat.len() as i32);
    }
    ListArray::new(
        list_field(),
        OffsetBuffer::new(offsets.into()),
        Arc::new(Float32Array::from(flat)),
        None,
    )
}

fn write_batch(schema: Arc<Schema>, columns: Vec<Arc<dyn Array>>, path: &Path) -> anyhow::Result<()> {
    let batch = RecordBatch::try_new(schema.clone(), columns)?;
    let file = std::fs::File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, schema, None)?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

/// Arrow schema for `embeddings.parquet`.
pub fn embeddings_schema() -> Schema {
    Schema::new(vec![
        Field::new("kind", DataType::Utf8, false),
        Field::new("id", DataType::UInt64, false),
        Field::new("embedding", list_type(), false),
    ])
}

/// Arrow schema for `trajectories.parquet`.
pub fn trajectories_schema() -> Schema {
    Schema::new(vec![
        Field::new("index", DataType::UInt64, false),
        Field::new("actor", list_type(), false),
        Field::new("target", list_type(), false),
    ])
}

pub fn write_embeddings(rows: &[EmbeddingRow], path: &Path) -> anyhow::Result<()> {
    let kinds: StringArray = rows.iter().map(|r| Some(r.kind.to_string())).collect();
    let ids: UInt64Array = rows.iter().map(|r| Some(r.id as u64)).collect();
    let values = list_array(rows.iter().map(|r| r.values.as_slice()));
    write_batch(
        Arc::new(embeddings_schema()),
        vec![Arc::new(kinds), Arc::new(ids), Arc::new(values)],
        path,
    )
}

pub fn write_trajectories(recorder: &TrajectoryRecorder, path: &Path) -> anyhow::Result<()> {
    let n = recorder.num_interactions();
    let d = recorder.embedding_dim();
    let indices: UInt64Array = (0..n).map(|i| Some(i as u64)).collect();
    let rows = |kind: EntityKind| {
        let values = recorder.values(kind);
        list_array((0..n).map(move |i| &values[i * d..(i + 1) * d]))
    };
    write_batch(
        Arc::new(trajectories_schema()),
        vec![
            Arc::new(indices),
            Arc::new(rows(EntityKind::Actor)),
            Arc::new(rows(EntityKind::Target)),
        ],
        path,
    )
}

fn open_batches(path: &Path) -> anyhow::Result<Vec<RecordBatch>> {
    let file = std::fs::File::open(path)
        .map_err(|e| anyhow::anyhow!("Failed to open {}: {e}", path.display()))?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
    Ok(reader.collect::<Result<Vec<_>, _>>()?)
}

fn list_row(list: &ListArray, i: usize) -> anyhow::Result<Vec<f32>> {
    let row = list.value(i);
    let row = row
        .as_any()
        .downcast_ref::<Float32Array>()
        .ok_or_else(|| anyhow::anyhow!("List values are not Float32Array"))?;
    Ok(row.values().to_vec())
}

pub fn read_embeddings(path: &Path) -> anyhow::Result<Vec<EmbeddingRow>> {
    let mut rows = Vec::new();
    for batch in open_batches(path)? {
        let kinds = batch
            .column(0)
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(|| anyhow::anyhow!("Column 0 (kind) is not StringArray"))?;
        let ids = batch
            .column(1)
            .as_any()
            .downcast_ref::<UInt64Array>()
            .ok_or_else(|| anyhow::anyhow!("Column 1 (id) is not UInt64Array"))?;
        let values = batch
            .column(2)
            .as_any()
            .downcast_ref::<ListArray>()
            .ok_or_else(|| anyhow::anyhow!("Column 2 (embedding) is not ListArray"))?;

        for i in 0..batch.num_rows() {
            let kind = match kinds.value(i) {
                "actor" => EntityKind::Actor,
                "target" => EntityKind::Target,
                other => anyhow::bail!("Unknown entity kind '{other}' in {}", path.display()),
            };
            rows.push(EmbeddingRow {
                kind,
                id: ids.value(i) as usize,
                values: list_row(values, i)?,
            });
        }
    }
    Ok(rows)
}

pub fn read_trajectories(path: &Path) -> anyhow::Result<Vec<TrajectoryRow>> {
    let mut rows = Vec::new();
    for batch in open_batches(path)? {
        let indices = batch
            .column(0)
            .as_any()
            .downcast_ref::<UInt64Array>()
            .ok_or_else(|| anyhow::anyhow!("Column 0 (index) is not UInt64Array"))?;
        let actors = batch
            .column(1)
            .as_any()
            .downcast_ref::<ListArray>()
            .ok_or_else(|| anyhow::anyhow!("Column 1 (actor) is not ListArray"))?;
        let targets = batch
            .column(2)
            .as_any()
            .downcast_ref::<ListArray>()
            .ok_or_else(|| anyhow::anyhow!("Column 2 (target) is not ListArray"))?;

        for i in 0..batch.num_rows() {
            rows.push(TrajectoryRow {
                index: indices.value(i) as usize,
                actor: list_row(actors, i)?,
                target: list_row(targets, i)?,
            });
        }
    }
    Ok(rows)
}
