//! Append journal making each chunk append atomic across crashes.
//!
//! - Before a chunk is appended, the output length and the checkpoint value
//!   are recorded in a journal file (write-ahead)
//! - After the checkpoint advances, the journal is removed (commit)
//! - On restart, a leftover journal whose checkpoint still matches means the
//!   append was never committed: the output is truncated back (rollback)

use crate::models::{CallscoreError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Journal contents persisted to disk for recovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Transaction ID
    pub id: String,
    /// Output length in bytes before the append
    pub output_len: u64,
    /// Whether the output file existed before the append
    pub output_existed: bool,
    /// Checkpoint value before the append
    pub checkpoint: u64,
    /// Rows in the chunk being appended
    pub rows: u64,
    /// When the transaction started
    pub started_at: DateTime<Utc>,
}

/// What startup recovery found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// No journal, nothing to do
    Clean,
    /// The append was committed before the crash; journal removed
    Committed,
    /// The append was not committed; output restored to its prior length
    RolledBack { truncated_bytes: u64 },
    /// Checkpoint is behind the journal (cleared by the operator); journal dropped
    Discarded,
}

/// One in-flight chunk append.
pub struct Transaction {
    journal_path: PathBuf,
    output_path: PathBuf,
    entry: JournalEntry,
    /// Whether the transaction has been committed or rolled back
    finished: bool,
}

impl Transaction {
    /// Begin a transaction for appending `rows` rows at checkpoint `checkpoint`.
    ///
    /// The journal is durable when this returns.
    pub fn begin(
        journal_path: &Path,
        output_path: &Path,
        checkpoint: u64,
        rows: u64,
    ) -> Result<Self> {
        let (output_existed, output_len) = match fs::metadata(output_path) {
            Ok(meta) => (true, meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (false, 0),
            Err(e) => return Err(CallscoreError::io("inspecting output", e)),
        };

        let entry = JournalEntry {
            id: format!("tx_{}", Utc::now().format("%Y%m%d_%H%M%S_%3f")),
            output_len,
            output_existed,
            checkpoint,
            rows,
            started_at: Utc::now(),
        };

        persist(journal_path, &entry)?;
        debug!(tx_id = %entry.id, checkpoint, rows, output_len, "Transaction started");

        Ok(Self {
            journal_path: journal_path.to_path_buf(),
            output_path: output_path.to_path_buf(),
            entry,
            finished: false,
        })
    }

    /// Resolve a journal left behind by a crash, given the current checkpoint.
    pub fn recover(journal_path: &Path, output_path: &Path, checkpoint: u64) -> Result<Recovery> {
        let content = match fs::read_to_string(journal_path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Recovery::Clean),
            Err(e) => return Err(CallscoreError::io("reading journal", e)),
        };

        let entry: JournalEntry = serde_json::from_str(&content)
            .map_err(|e| CallscoreError::ParseError(format!("Invalid journal: {e}")))?;

        warn!(
            path = %journal_path.display(),
            tx_id = %entry.id,
            "Found pending append, recovering"
        );

        let recovery = if checkpoint > entry.checkpoint {
            debug!(tx_id = %entry.id, "Append was committed, cleaning up");
            Recovery::Committed
        } else if checkpoint == entry.checkpoint {
            let truncated_bytes = restore_output(output_path, &entry)?;
            warn!(
                tx_id = %entry.id,
                rows = entry.rows,
                truncated_bytes,
                "Append was not committed, rolled back output"
            );
            Recovery::RolledBack { truncated_bytes }
        } else {
            warn!(
                tx_id = %entry.id,
                journal_checkpoint = entry.checkpoint,
                checkpoint,
                "Checkpoint is behind the pending append, leaving output untouched"
            );
            Recovery::Discarded
        };

        remove_journal(journal_path)?;
        Ok(recovery)
    }

    /// Journal contents.
    pub fn entry(&self) -> &JournalEntry {
        &self.entry
    }

    /// Mark the append durable. Call after the checkpoint has advanced.
    pub fn commit(mut self) -> Result<()> {
        remove_journal(&self.journal_path)?;
        self.finished = true;
        debug!(tx_id = %self.entry.id, "Transaction committed");
        Ok(())
    }

    /// Undo a failed append, restoring the output to its prior state.
    pub fn rollback(mut self) -> Result<()> {
        let truncated_bytes = restore_output(&self.output_path, &self.entry)?;
        remove_journal(&self.journal_path)?;
        self.finished = true;
        debug!(tx_id = %self.entry.id, truncated_bytes, "Transaction rolled back");
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished {
            warn!(
                tx_id = %self.entry.id,
                rows = self.entry.rows,
                "Transaction dropped without commit/rollback - will be recovered on restart"
            );
        }
    }
}

/// Truncate the output back to the journaled length, or remove it if it did
/// not exist before. Returns the number of bytes dropped.
fn restore_output(output_path: &Path, entry: &JournalEntry) -> Result<u64> {
    let current_len = match fs::metadata(output_path) {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(CallscoreError::io("inspecting output", e)),
    };

    if !entry.output_existed {
        fs::remove_file(output_path).map_err(|e| CallscoreError::io("removing partial output", e))?;
        return Ok(current_len);
    }

    if current_len <= entry.output_len {
        return Ok(0);
    }

    let file = OpenOptions::new()
        .write(true)
        .open(output_path)
        .map_err(|e| CallscoreError::io("opening output for rollback", e))?;
    file.set_len(entry.output_len)
        .map_err(|e| CallscoreError::io("truncating output", e))?;
    file.sync_all()
        .map_err(|e| CallscoreError::io("syncing output", e))?;

    Ok(current_len - entry.output_len)
}

fn persist(journal_path: &Path, entry: &JournalEntry) -> Result<()> {
    let content = serde_json::to_string_pretty(entry)
        .map_err(|e| CallscoreError::Internal(format!("Serializing journal: {e}")))?;

    let mut temp_name = journal_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    temp_name.push(".tmp");
    let temp_path = journal_path.with_file_name(temp_name);

    {
        let mut file =
            File::create(&temp_path).map_err(|e| CallscoreError::io("creating journal", e))?;
        file.write_all(content.as_bytes())
            .map_err(|e| CallscoreError::io("writing journal", e))?;
        file.sync_all()
            .map_err(|e| CallscoreError::io("syncing journal", e))?;
    }

    fs::rename(&temp_path, journal_path).map_err(|e| CallscoreError::io("renaming journal", e))
}

fn remove_journal(journal_path: &Path) -> Result<()> {
    match fs::remove_file(journal_path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CallscoreError::io("removing journal", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Paths {
        _dir: TempDir,
        journal: PathBuf,
        output: PathBuf,
    }

    fn paths() -> Paths {
        let dir = TempDir::new().unwrap();
        Paths {
            journal: dir.path().join("ckpt.txt.journal"),
            output: dir.path().join("out.csv"),
            _dir: dir,
        }
    }

    fn append(path: &Path, bytes: &str) {
        let mut f = OpenOptions::new().create(true).append(true).open(path).unwrap();
        f.write_all(bytes.as_bytes()).unwrap();
    }

    #[test]
    fn commit_removes_journal() {
        let p = paths();
        append(&p.output, "h\n1\n");

        let tx = Transaction::begin(&p.journal, &p.output, 1, 2).unwrap();
        assert!(p.journal.exists());
        assert_eq!(tx.entry().output_len, 4);
        assert!(tx.entry().output_existed);

        append(&p.output, "2\n3\n");
        tx.commit().unwrap();

        assert!(!p.journal.exists());
        assert_eq!(fs::read_to_string(&p.output).unwrap(), "h\n1\n2\n3\n");
    }

    #[test]
    fn rollback_truncates_to_prior_length() {
        let p = paths();
        append(&p.output, "h\n1\n");

        let tx = Transaction::begin(&p.journal, &p.output, 1, 2).unwrap();
        append(&p.output, "2\n3");
        tx.rollback().unwrap();

        assert_eq!(fs::read_to_string(&p.output).unwrap(), "h\n1\n");
        assert!(!p.journal.exists());
    }

    #[test]
    fn rollback_removes_output_created_by_the_append() {
        let p = paths();
        let tx = Transaction::begin(&p.journal, &p.output, 0, 1).unwrap();
        assert!(!tx.entry().output_existed);
        append(&p.output, "h\n1\n");
        tx.rollback().unwrap();
        assert!(!p.output.exists());
    }

    #[test]
    fn recover_without_journal_is_clean() {
        let p = paths();
        assert_eq!(Transaction::recover(&p.journal, &p.output, 0).unwrap(), Recovery::Clean);
    }

    #[test]
    fn recover_rolls_back_uncommitted_append() {
        let p = paths();
        append(&p.output, "h\n1\n");
        let tx = Transaction::begin(&p.journal, &p.output, 1, 2).unwrap();
        append(&p.output, "2\n3");
        // Simulates a crash: the transaction is never finished
        std::mem::forget(tx);

        let recovery = Transaction::recover(&p.journal, &p.output, 1).unwrap();
        assert_eq!(recovery, Recovery::RolledBack { truncated_bytes: 3 });
        assert_eq!(fs::read_to_string(&p.output).unwrap(), "h\n1\n");
        assert!(!p.journal.exists());
    }

    #[test]
    fn recover_keeps_committed_append() {
        let p = paths();
        append(&p.output, "h\n1\n");
        let tx = Transaction::begin(&p.journal, &p.output, 1, 2).unwrap();
        append(&p.output, "2\n3\n");
        // Crash after the checkpoint advanced but before the journal was removed
        std::mem::forget(tx);

        let recovery = Transaction::recover(&p.journal, &p.output, 3).unwrap();
        assert_eq!(recovery, Recovery::Committed);
        assert_eq!(fs::read_to_string(&p.output).unwrap(), "h\n1\n2\n3\n");
    }

    #[test]
    fn recover_discards_journal_when_checkpoint_was_cleared() {
        let p = paths();
        append(&p.output, "h\n1\n");
        let tx = Transaction::begin(&p.journal, &p.output, 1, 1).unwrap();
        append(&p.output, "2\n");
        std::mem::forget(tx);

        let recovery = Transaction::recover(&p.journal, &p.output, 0).unwrap();
        assert_eq!(recovery, Recovery::Discarded);
        assert_eq!(fs::read_to_string(&p.output).unwrap(), "h\n1\n2\n");
        assert!(!p.journal.exists());
    }

    #[test]
    fn recover_rejects_garbled_journal() {
        let p = paths();
        fs::write(&p.journal, "{not json").unwrap();
        assert!(matches!(
            Transaction::recover(&p.journal, &p.output, 0),
            Err(CallscoreError::ParseError(_))
        ));
    }
}
