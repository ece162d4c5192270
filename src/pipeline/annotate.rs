//! Resumable annotation of one stage.
//!
//! Pipeline flow, per chunk:
//! Chunk Source → blank split → Batch Scorer → re-interleave → Sink → Checkpoint
//!
//! The checkpoint only advances after the chunk's rows are synced to the
//! output, and a journal makes each append all-or-nothing across crashes.
//! Cancellation is observed between chunks only.

use super::progress::{CancelFlag, NoProgress, ProgressObserver};
use crate::checkpoint::{CheckpointStore, Recovery, Transaction};
use crate::models::{is_blank, Annotation, CallscoreError, Chunk, Result, StageSettings};
use crate::scorer::BatchScorer;
use crate::table::{ChunkSource, SinkWriter};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Lifecycle of an annotation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Not started
    Uninitialized,
    /// Skipping rows already covered by the checkpoint
    Resuming,
    /// Scoring and committing chunks
    Streaming,
    /// Input exhausted, every row committed
    Done,
    /// Stopped at a chunk boundary on request; safe to resume
    Interrupted,
    /// Refused to run: checkpoint and output disagree
    Rejected,
}

/// Result of a run that ended normally or by cancellation.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// `Done` or `Interrupted`
    pub state: DriverState,
    /// Row the run started from
    pub resumed_from: u64,
    /// Checkpoint at exit; the next run resumes here
    pub checkpoint: u64,
    /// Rows appended by this run
    pub rows_written: u64,
    /// Blank rows given the sentinel by this run
    pub blank_rows: u64,
    /// Chunks committed by this run
    pub chunks: usize,
    /// Input rows, if counted
    pub total_rows: Option<u64>,
    /// What startup recovery did with a leftover journal
    pub recovery: Recovery,
    pub runtime_secs: f64,
}

impl RunOutcome {
    pub fn is_interrupted(&self) -> bool {
        self.state == DriverState::Interrupted
    }
}

/// Annotation driver for one stage.
///
/// Sole owner of the stage's checkpoint and output for the duration of a run.
pub struct AnnotationDriver {
    input: PathBuf,
    text_column: String,
    settings: StageSettings,
    scorer: BatchScorer,
    store: CheckpointStore,
    sink: SinkWriter,
    cancel: CancelFlag,
    progress: Box<dyn ProgressObserver>,
    count_total: bool,
    state: DriverState,
}

impl AnnotationDriver {
    /// Create a driver reading `input` and scoring `text_column`.
    pub fn new(
        input: impl Into<PathBuf>,
        text_column: impl Into<String>,
        settings: StageSettings,
        scorer: BatchScorer,
    ) -> Self {
        let store = CheckpointStore::new(&settings.checkpoint);
        let sink = SinkWriter::new(&settings.output, settings.output_columns());
        Self {
            input: input.into(),
            text_column: text_column.into(),
            settings,
            scorer,
            store,
            sink,
            cancel: CancelFlag::new(),
            progress: Box::new(NoProgress),
            count_total: true,
            state: DriverState::Uninitialized,
        }
    }

    /// Use `cancel` to stop between chunks.
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Report per-chunk progress to `progress`.
    pub fn with_progress(mut self, progress: Box<dyn ProgressObserver>) -> Self {
        self.progress = progress;
        self
    }

    /// Skip the upfront row count (progress then has no total).
    pub fn without_total(mut self) -> Self {
        self.count_total = false;
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> DriverState {
        self.state
    }

    fn transition(&mut self, to: DriverState) {
        debug!(stage = %self.settings.stage, from = ?self.state, to = ?to, "Driver state");
        self.state = to;
    }

    /// Run the stage to completion or cancellation.
    ///
    /// Fatal errors leave only state that was durable before the fault.
    pub async fn run(&mut self) -> Result<RunOutcome> {
        let start = Instant::now();
        if self.state != DriverState::Uninitialized {
            return Err(CallscoreError::Internal(format!(
                "driver already ran (state {:?})",
                self.state
            )));
        }

        ensure_parent(&self.settings.output)?;
        ensure_parent(&self.settings.checkpoint)?;

        let mut checkpoint = self.store.read()?;

        let recovery = Transaction::recover(
            &self.settings.journal(),
            &self.settings.output,
            checkpoint,
        )?;

        let output_existed = self.sink.has_output();

        if checkpoint > 0 && !output_existed {
            warn!(
                stage = %self.settings.stage,
                checkpoint,
                output = %self.settings.output.display(),
                "Checkpoint exists but output is missing, restarting from row 0"
            );
            self.store.clear()?;
            checkpoint = 0;
        }

        if checkpoint == 0 && output_existed {
            self.transition(DriverState::Rejected);
            return Err(CallscoreError::StateConflict {
                checkpoint: self.settings.checkpoint.clone(),
                output: self.settings.output.clone(),
            });
        }

        let mut source =
            ChunkSource::open(&self.input, &self.text_column, self.settings.chunk_rows)?;
        let total_rows = if self.count_total {
            Some(ChunkSource::count_rows(&self.input)?)
        } else {
            None
        };

        let resumed_from = checkpoint;
        info!(
            stage = %self.settings.stage,
            engine = self.scorer.engine_name(),
            from_row = resumed_from,
            total = ?total_rows,
            chunk_rows = self.settings.chunk_rows,
            "Starting annotation"
        );

        if checkpoint > 0 {
            self.transition(DriverState::Resuming);
            let skipped = source.skip_rows(checkpoint)?;
            if skipped < checkpoint {
                warn!(
                    stage = %self.settings.stage,
                    checkpoint,
                    input_rows = skipped,
                    "Checkpoint is past the end of the input, nothing left to process"
                );
            }
        }

        self.progress.on_start(checkpoint, total_rows);
        self.transition(DriverState::Streaming);

        let mut header_pending = !output_existed;
        let mut rows_written = 0u64;
        let mut blank_rows = 0u64;
        let mut chunks = 0usize;

        loop {
            if self.cancel.is_cancelled() {
                self.transition(DriverState::Interrupted);
                break;
            }

            let Some(chunk) = source.next_chunk()? else {
                self.transition(DriverState::Done);
                break;
            };

            if chunk.start != checkpoint {
                return Err(CallscoreError::Internal(format!(
                    "chunk starts at row {} but checkpoint is {}",
                    chunk.start, checkpoint
                )));
            }

            let rows = chunk.len() as u64;
            blank_rows += self.commit_chunk(chunk, checkpoint, header_pending).await?;
            header_pending = false;
            checkpoint += rows;
            rows_written += rows;
            chunks += 1;

            info!(stage = %self.settings.stage, rows = checkpoint, "Processed rows");
            self.progress.on_chunk(checkpoint, total_rows);
        }

        let interrupted = self.state == DriverState::Interrupted;
        self.progress.on_finish(checkpoint, interrupted);

        if interrupted {
            info!(
                stage = %self.settings.stage,
                resume_row = checkpoint,
                "Stopped by request. Progress saved; next run resumes from this row"
            );
        } else {
            info!(
                stage = %self.settings.stage,
                rows = checkpoint,
                output = %self.settings.output.display(),
                "Annotation complete"
            );
        }

        Ok(RunOutcome {
            state: self.state,
            resumed_from,
            checkpoint,
            rows_written,
            blank_rows,
            chunks,
            total_rows,
            recovery,
            runtime_secs: start.elapsed().as_secs_f64(),
        })
    }

    /// Score one chunk, append it and advance the checkpoint.
    ///
    /// Returns the number of blank rows in the chunk.
    async fn commit_chunk(
        &mut self,
        chunk: Chunk,
        checkpoint: u64,
        write_header: bool,
    ) -> Result<u64> {
        let (annotations, blanks) = {
            let (positions, texts) = split_blanks(&chunk);
            let blanks = (chunk.len() - positions.len()) as u64;
            let scored = if texts.is_empty() {
                Vec::new()
            } else {
                self.scorer.score(&texts).await?
            };
            (interleave(chunk.len(), &positions, scored)?, blanks)
        };

        let annotated = chunk.annotate(annotations)?;
        let rows = annotated.len() as u64;

        let tx = Transaction::begin(
            &self.settings.journal(),
            &self.settings.output,
            checkpoint,
            rows,
        )?;

        let written = self
            .sink
            .append(&annotated, write_header)
            .and_then(|_| self.store.write(checkpoint + rows));

        if let Err(e) = written {
            if let Err(rollback_err) = tx.rollback() {
                error!(error = %rollback_err, "Rollback failed, journal left for recovery");
            }
            return Err(e);
        }

        tx.commit()?;
        debug!(start = checkpoint, rows, blanks, "Chunk committed");
        Ok(blanks)
    }
}

/// Positions and texts of the non-blank rows, in row order.
pub fn split_blanks(chunk: &Chunk) -> (Vec<usize>, Vec<&str>) {
    chunk
        .texts()
        .enumerate()
        .filter(|(_, text)| !is_blank(text))
        .unzip()
}

/// Merge scorer results back into row positions.
///
/// One forward pass: a row listed in `scored_positions` takes the next
/// result, every other row takes the sentinel.
pub fn interleave(
    len: usize,
    scored_positions: &[usize],
    scored: Vec<Annotation>,
) -> Result<Vec<Annotation>> {
    if scored.len() != scored_positions.len() {
        return Err(CallscoreError::Internal(format!(
            "{} scored rows but {} results",
            scored_positions.len(),
            scored.len()
        )));
    }

    let mut positions = scored_positions.iter().copied().peekable();
    let mut results = scored.into_iter();
    let mut out = Vec::with_capacity(len);

    for row in 0..len {
        if positions.next_if_eq(&row).is_some() {
            match results.next() {
                Some(a) => out.push(a),
                None => return Err(CallscoreError::Internal("scorer results ran out".into())),
            }
        } else {
            out.push(Annotation::SENTINEL);
        }
    }

    if positions.next().is_some() {
        return Err(CallscoreError::Internal(
            "scored position outside the chunk or out of order".into(),
        ));
    }
    Ok(out)
}

fn ensure_parent(path: &Path) -> Result<()> {
    match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => fs::create_dir_all(parent)
            .map_err(|e| CallscoreError::io(format!("creating {}", parent.display()), e)),
        None => Ok(()),
    }
}
