//! Pipeline module - resumable annotation stages and their follow-ups.

mod annotate;
mod merge;
mod progress;
mod status;

pub use annotate::*;
pub use merge::*;
pub use progress::*;
pub use status::*;
