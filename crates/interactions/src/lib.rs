//! Normalized actor/target interaction streams.
//!
//! Provides the column-oriented [`InteractionStream`] consumed by the
//! temporal batch scheduler and the training cycle, split boundaries, label
//! statistics, and Parquet I/O for streams that have already been decoded
//! into index-aligned sequences.

pub mod reader;
pub mod types;
pub mod writer;

pub use reader::StreamReader;
pub use types::{
    positive_class_weight, Interaction, InteractionEvent, InteractionStream, SplitBoundaries,
    StreamColumns, StreamError, StreamStats,
};
pub use writer::StreamWriter;
