//! callscore - resumable sentiment annotation of earnings-call transcripts.
//!
//! ## Architecture
//!
//! An annotation stage streams the cleaned speaker-block table in fixed-size
//! chunks, scores each chunk's text with one engine, appends the annotated
//! rows to the stage output and advances a durable checkpoint:
//! - **Chunk Source**: chunk-aligned CSV reader with row-level skip
//! - **Batch Scorer**: sub-batching and validation in front of an engine
//! - **Sink Writer**: staged, synced, append-only output
//! - **Checkpoint Store**: durable count of rows written
//!
//! ## Stages
//!
//! - **Lexicon**: in-process polarity lexicon
//! - **Classifier**: remote neural classifier
//!
//! Each stage resumes independently; `merge` joins the two outputs.
//!
//! ## Crash Safety
//!
//! - Output is written before the checkpoint advances
//! - A journal rolls back appends the checkpoint never covered
//! - Checkpoint 0 with existing output refuses to run

pub mod checkpoint;
pub mod client;
pub mod models;
pub mod pipeline;
pub mod scorer;
pub mod table;

// Re-exports for convenience
pub use checkpoint::{CheckpointStore, Transaction};
pub use client::ClassifierClient;
pub use models::{Annotation, CallscoreError, Config, Label, Result, Stage, StageSettings};
pub use pipeline::{AnnotationDriver, CancelFlag, DriverState, RunOutcome};
pub use scorer::{BatchScorer, ClassifierEngine, LexiconEngine, SentimentEngine};
pub use table::{ChunkSource, SinkWriter};
