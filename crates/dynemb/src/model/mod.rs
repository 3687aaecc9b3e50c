//! Model components: the transform contract, recurrent cells, and the
//! bridge between column buffers and burn tensors.

pub mod bridge;
pub mod dynamics;
pub mod recurrent;
pub mod rnn_cell;
