//! Progress reporting and cooperative cancellation for annotation runs.

use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Observer of per-chunk progress.
pub trait ProgressObserver: Send {
    /// Called once before streaming, with the row the run resumes from.
    fn on_start(&mut self, _resume_from: u64, _total: Option<u64>) {}

    /// Called after each chunk is durably committed.
    fn on_chunk(&mut self, processed: u64, total: Option<u64>);

    /// Called when streaming stops, cleanly or not.
    fn on_finish(&mut self, _processed: u64, _interrupted: bool) {}
}

/// Observer that discards progress.
#[derive(Debug, Default)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_chunk(&mut self, _processed: u64, _total: Option<u64>) {}
}

/// Terminal progress bar.
pub struct ProgressBarObserver {
    label: String,
    bar: Option<ProgressBar>,
}

impl ProgressBarObserver {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            bar: None,
        }
    }
}

impl ProgressObserver for ProgressBarObserver {
    fn on_start(&mut self, resume_from: u64, total: Option<u64>) {
        let bar = match total {
            Some(total) => ProgressBar::new(total),
            None => ProgressBar::new_spinner(),
        };
        if let Ok(style) = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({percent}%) {msg}")
        {
            bar.set_style(style.progress_chars("##-"));
        }
        bar.set_message(self.label.clone());
        bar.set_position(resume_from);
        self.bar = Some(bar);
    }

    fn on_chunk(&mut self, processed: u64, _total: Option<u64>) {
        if let Some(bar) = &self.bar {
            bar.set_position(processed);
        }
    }

    fn on_finish(&mut self, processed: u64, interrupted: bool) {
        if let Some(bar) = self.bar.take() {
            if interrupted {
                bar.abandon_with_message(format!("{} stopped at row {processed}", self.label));
            } else {
                bar.finish_with_message(format!("{} done, {processed} rows", self.label));
            }
        }
    }
}

/// Cancellation signal observed by the driver between chunks.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop at the next chunk boundary.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Set this flag on Ctrl+C instead of terminating the process.
    ///
    /// Must be called from within a tokio runtime.
    pub fn cancel_on_ctrl_c(&self) {
        let flag = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, stopping after the current chunk");
                flag.cancel();
            }
        });
    }
}
