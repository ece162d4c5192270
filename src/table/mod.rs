//! Tabular input and output for annotation stages.

mod sink;
mod source;

pub use sink::*;
pub use source::*;
