//! Checkpoint module for resumable stage execution.
//!
//! Provides:
//! - `CheckpointStore`: Durable count of rows annotated and written
//! - `Transaction`: Per-chunk append journal with crash recovery

mod store;
mod transaction;

pub use store::*;
pub use transaction::*;
