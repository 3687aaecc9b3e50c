//! Temporal batching (t-batch) scheduler for interaction streams.
//!
//! Partitions a chronologically ordered stream into time windows, and each
//! window into batches in which no actor and no target appears twice, so a
//! whole batch can be embedded and updated as one vectorized step without
//! breaking causality. The partition of the first pass is cached and replayed
//! verbatim on later epochs.
//!
//! # Key types
//!
//! - [`WindowClock`]: detects window boundaries from timestamps
//! - [`TbatchScheduler`]: assigns batch ids and emits closed [`FlushWindow`]s
//! - [`TbatchCache`]: append-only store of first-epoch windows, replayed by
//!   window sequence number
//! - [`TbatchAssignment`]: interaction index → (window, batch) lookup

pub mod cache;
pub mod scheduler;
pub mod types;
pub mod window;

pub use cache::{CacheState, TbatchCache};
pub use scheduler::TbatchScheduler;
pub use types::{FlushWindow, TBatch, TbatchAssignment, TbatchError};
pub use window::{WindowBounds, WindowClock, DEFAULT_NUM_WINDOWS};
