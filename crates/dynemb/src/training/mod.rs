//! Training pipeline: embedding tables and timelines, losses, config, the
//! window-by-window training cycle, and checkpoint persistence.

pub mod checkpoint;
pub mod config;
pub mod cycle;
pub mod loss;
pub mod recorder;
pub mod store;
