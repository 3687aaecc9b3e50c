//! Writes normalized interaction streams to Parquet files using Arrow.

use crate::types::InteractionStream;
use arrow::array::*;
use arrow::buffer::OffsetBuffer;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Schema metadata key holding the actor count.
pub const NUM_ACTORS_KEY: &str = "num_actors";
/// Schema metadata key holding the target count (excluding the sentinel).
pub const NUM_TARGETS_KEY: &str = "num_targets";

/// Arrow schema for interaction stream Parquet files (8 columns).
pub fn stream_schema() -> Schema {
    Schema::new(vec![
        Field::new("actor_id", DataType::UInt64, false),
        Field::new("target_id", DataType::UInt64, false),
        Field::new("timestamp", DataType::Float64, false),
        Field::new(
            "features",
            DataType::List(Arc::new(Field::new("item", DataType::Float32, false))),
            false,
        ),
        Field::new("actor_time_delta", DataType::Float32, false),
        Field::new("target_time_delta", DataType::Float32, false),
        Field::new("previous_target_id", DataType::UInt64, false),
        Field::new("state_label", DataType::Boolean, false),
    ])
}

/// Static methods for writing interaction streams.
pub struct StreamWriter;

impl StreamWriter {
    /// Write the whole stream as a single Parquet row group.
    ///
    /// Entity counts are stored in the schema metadata so the sentinel target
    /// id survives a round trip even if the highest target id is unused.
    pub fn write(stream: &InteractionStream, path: &Path) -> anyhow::Result<()> {
        let metadata = HashMap::from([
            (NUM_ACTORS_KEY.to_string(), stream.num_actors().to_string()),
            (NUM_TARGETS_KEY.to_string(), stream.num_targets().to_string()),
        ]);
        let schema = Arc::new(stream_schema().with_metadata(metadata));
        let batch = build_record_batch(stream, schema.clone())?;

        let file = std::fs::File::create(path)?;
        let mut writer = ArrowWriter::try_new(file, schema, None)?;
        writer.write(&batch)?;
        writer.close()?;

        tracing::info!(
            interactions = stream.len(),
            actors = stream.num_actors(),
            targets = stream.num_targets(),
            path = %path.display(),
            "Wrote interaction stream Parquet file"
        );
        Ok(())
    }
}

/// Build an Arrow RecordBatch from a stream's columns.
fn build_record_batch(
    stream: &InteractionStream,
    schema: Arc<Schema>,
) -> anyhow::Result<RecordBatch> {
    let actor_ids: UInt64Array = stream.actor_ids().iter().map(|&v| Some(v as u64)).collect();
    let target_ids: UInt64Array = stream.target_ids().iter().map(|&v| Some(v as u64)).collect();
    let timestamps = Float64Array::from(stream.timestamps().to_vec());

    let dim = stream.feature_dim();
    let offsets: Vec<i32> = (0..=stream.len()).map(|i| (i * dim) as i32).collect();
    let features = ListArray::new(
        Arc::new(Field::new("item", DataType::Float32, false)),
        OffsetBuffer::new(offsets.into()),
        Arc::new(Float32Array::from(stream.features().to_vec())),
        None,
    );

    let actor_deltas = Float32Array::from(stream.actor_time_deltas().to_vec());
    let target_deltas = Float32Array::from(stream.target_time_deltas().to_vec());
    let previous: UInt64Array = stream
        .previous_target_ids()
        .iter()
        .map(|&v| Some(v as u64))
        .collect();
    let labels: BooleanArray = stream.state_labels().iter().map(|&l| Some(l)).collect();

    let columns: Vec<Arc<dyn Array>> = vec![
        Arc::new(actor_ids),
        Arc::new(target_ids),
        Arc::new(timestamps),
        Arc::new(features),
        Arc::new(actor_deltas),
        Arc::new(target_deltas),
        Arc::new(previous),
        Arc::new(labels),
    ];

    Ok(RecordBatch::try_new(schema, columns)?)
}
