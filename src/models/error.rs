//! Error types for callscore.
//!
//! Taxonomy:
//! - Fatal run errors: the source, the scorer, or the sink failed
//! - State errors: checkpoint and output disagree in a way that risks duplication
//! - Internal errors: invariant violations (bugs)

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for callscore.
#[derive(Debug, Error)]
pub enum CallscoreError {
    // ═══════════════════════════════════════════════════════════════════
    // RUN FAILURES: the pipeline aborts, only durable state survives
    // ═══════════════════════════════════════════════════════════════════

    #[error("Input unavailable: {path}: {source}")]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Scorer '{engine}' failed: {message}")]
    ScorerFailure { engine: String, message: String },

    #[error("Sink write failed: {context}")]
    SinkWriteFailure {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // ═══════════════════════════════════════════════════════════════════
    // STATE CONFLICT: checkpoint and output disagree, operator must act
    // ═══════════════════════════════════════════════════════════════════

    #[error(
        "Output {output} already exists but checkpoint {checkpoint} is 0; \
         refusing to append duplicate rows. Delete the output for a clean rebuild, \
         or delete the checkpoint to force one (or run `callscore reset`)"
    )]
    StateConflict { checkpoint: PathBuf, output: PathBuf },

    // ═══════════════════════════════════════════════════════════════════
    // INPUT / INFRASTRUCTURE
    // ═══════════════════════════════════════════════════════════════════

    #[error("Configuration error: {0}")]
    Config(#[from] super::ConfigError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Request timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // ═══════════════════════════════════════════════════════════════════
    // INVARIANT VIOLATED: bug, should not happen
    // ═══════════════════════════════════════════════════════════════════

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CallscoreError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a sink write error with context.
    pub fn sink(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::SinkWriteFailure {
            context: context.into(),
            source,
        }
    }

    /// Create a scorer failure for the named engine.
    pub fn scorer(engine: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ScorerFailure {
            engine: engine.into(),
            message: message.into(),
        }
    }

    /// Whether this error means checkpoint and output disagree.
    ///
    /// The operator has to clear an artifact before retrying; re-running alone
    /// will never succeed.
    pub fn is_state_conflict(&self) -> bool {
        matches!(self, Self::StateConflict { .. })
    }

    /// Whether a transport-level retry inside a scoring engine may help.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Network(_))
    }
}

/// Result type alias for callscore.
pub type Result<T> = std::result::Result<T, CallscoreError>;
