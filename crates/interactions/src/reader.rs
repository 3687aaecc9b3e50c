//! Reads normalized interaction streams from Parquet files.

use crate::types::{InteractionStream, StreamColumns, StreamStats};
use crate::writer::{NUM_ACTORS_KEY, NUM_TARGETS_KEY};
use arrow::array::*;
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::path::Path;

/// Static methods for reading interaction streams.
pub struct StreamReader;

impl StreamReader {
    /// Read and validate a full stream from a Parquet file.
    ///
    /// Entity counts come from the schema metadata when present; otherwise
    /// they are inferred from the largest ids seen.
    pub fn read(path: &Path) -> anyhow::Result<InteractionStream> {
        let file = std::fs::File::open(path)?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
        let metadata = builder.schema().metadata().clone();
        let reader = builder.build()?;

        let mut columns = StreamColumns::default();
        for batch_result in reader {
            let batch = batch_result?;
            append_batch(&batch, &mut columns)?;
        }

        let parse_count = |key: &str| -> anyhow::Result<Option<usize>> {
            metadata
                .get(key)
                .map(|v| {
                    v.parse::<usize>()
                        .map_err(|e| anyhow::anyhow!("Invalid `{key}` metadata '{v}': {e}"))
                })
                .transpose()
        };
        columns.num_actors = match parse_count(NUM_ACTORS_KEY)? {
            Some(n) => n,
            None => columns.actor_ids.iter().map(|&a| a + 1).max().unwrap_or(0),
        };
        columns.num_targets = match parse_count(NUM_TARGETS_KEY)? {
            Some(n) => n,
            None => columns.target_ids.iter().map(|&t| t + 1).max().unwrap_or(0),
        };

        let stream = InteractionStream::new(columns)
            .map_err(|e| anyhow::anyhow!("Invalid interaction stream in {}: {e}", path.display()))?;

        tracing::info!(
            interactions = stream.len(),
            actors = stream.num_actors(),
            targets = stream.num_targets(),
            path = %path.display(),
            "Read interaction stream"
        );

        Ok(stream)
    }

    /// Compute summary statistics of a stream file.
    pub fn read_summary(path: &Path) -> anyhow::Result<StreamStats> {
        Ok(Self::read(path)?.stats())
    }
}

/// Append one Arrow RecordBatch to the column buffers.
fn append_batch(batch: &RecordBatch, columns: &mut StreamColumns) -> anyhow::Result<()> {
    let actor_ids = batch
        .column(0)
        .as_any()
        .downcast_ref::<UInt64Array>()
        .ok_or_else(|| anyhow::anyhow!("Column 0 (actor_id) is not UInt64Array"))?;

    let target_ids = batch
        .column(1)
        .as_any()
        .downcast_ref::<UInt64Array>()
        .ok_or_else(|| anyhow::anyhow!("Column 1 (target_id) is not UInt64Array"))?;

    let timestamps = batch
        .column(2)
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| anyhow::anyhow!("Column 2 (timestamp) is not Float64Array"))?;

    let features = batch
        .column(3)
        .as_any()
        .downcast_ref::<ListArray>()
        .ok_or_else(|| anyhow::anyhow!("Column 3 (features) is not ListArray"))?;

    let actor_deltas = batch
        .column(4)
        .as_any()
        .downcast_ref::<Float32Array>()
        .ok_or_else(|| anyhow::anyhow!("Column 4 (actor_time_delta) is not Float32Array"))?;

    let target_deltas = batch
        .column(5)
        .as_any()
        .downcast_ref::<Float32Array>()
        .ok_or_else(|| anyhow::anyhow!("Column 5 (target_time_delta) is not Float32Array"))?;

    let previous = batch
        .column(6)
        .as_any()
        .downcast_ref::<UInt64Array>()
        .ok_or_else(|| anyhow::anyhow!("Column 6 (previous_target_id) is not UInt64Array"))?;

    let labels = batch
        .column(7)
        .as_any()
        .downcast_ref::<BooleanArray>()
        .ok_or_else(|| anyhow::anyhow!("Column 7 (state_label) is not BooleanArray"))?;

    for i in 0..batch.num_rows() {
        let row = features.value(i);
        let row = row
            .as_any()
            .downcast_ref::<Float32Array>()
            .ok_or_else(|| anyhow::anyhow!("Feature values are not Float32Array"))?;

        columns.actor_ids.push(actor_ids.value(i) as usize);
        columns.target_ids.push(target_ids.value(i) as usize);
        columns.timestamps.push(timestamps.value(i));
        columns.features.push(row.values().to_vec());
        columns.actor_time_deltas.push(actor_deltas.value(i));
        columns.target_time_deltas.push(target_deltas.value(i));
        columns.previous_target_ids.push(previous.value(i) as usize);
        columns.state_labels.push(labels.value(i));
    }

    Ok(())
}
