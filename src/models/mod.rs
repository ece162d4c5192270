//! Core data models for callscore.
//!
//! - `record`: rows, chunks, labels and annotations flowing through a stage
//! - `config`: file-backed configuration with per-stage defaults
//! - `error`: the failure taxonomy of an annotation run

mod config;
mod error;
mod record;

pub use config::*;
pub use error::*;
pub use record::*;
