//! Read-only stage inspection and operator reset.

use crate::checkpoint::CheckpointStore;
use crate::models::{CallscoreError, Result, StageSettings};
use crate::table::SinkWriter;
use std::fs;
use std::path::Path;
use tracing::info;

/// What `annotate` would do for a stage right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    /// No checkpoint, no output: start at row 0
    Fresh,
    /// Resume after this many rows
    Resume(u64),
    /// Checkpoint without output: checkpoint discarded, start at row 0
    Restart,
    /// Output without checkpoint: refuses to run
    Rejected,
}

/// Snapshot of a stage's durable artifacts.
#[derive(Debug, Clone)]
pub struct StageStatus {
    pub checkpoint: u64,
    pub output_exists: bool,
    pub journal_pending: bool,
    pub plan: Plan,
}

impl StageStatus {
    /// Inspect a stage without modifying anything.
    ///
    /// A pending journal is reported but not resolved; `annotate` resolves it
    /// before deciding, so the plan may change once it runs.
    pub fn inspect(settings: &StageSettings) -> Result<Self> {
        let checkpoint = CheckpointStore::new(&settings.checkpoint).read()?;
        let output_exists =
            SinkWriter::new(&settings.output, settings.output_columns()).has_output();
        let journal_pending = settings.journal().exists();

        let plan = match (checkpoint, output_exists) {
            (0, false) => Plan::Fresh,
            (0, true) => Plan::Rejected,
            (_, false) => Plan::Restart,
            (n, true) => Plan::Resume(n),
        };

        Ok(Self {
            checkpoint,
            output_exists,
            journal_pending,
            plan,
        })
    }
}

/// Delete a stage's checkpoint, journal and output.
///
/// Returns how many of the three existed.
pub fn reset_stage(settings: &StageSettings) -> Result<usize> {
    let mut removed = 0;
    for path in [&settings.checkpoint, &settings.journal(), &settings.output] {
        if remove_if_exists(path)? {
            removed += 1;
        }
    }
    info!(stage = %settings.stage, removed, "Stage reset");
    Ok(removed)
}

fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(CallscoreError::io(format!("removing {}", path.display()), e)),
    }
}
