//! Durable row cursor for resumable stages.
//!
//! The checkpoint is a single non-negative integer in a small text file:
//! the number of input rows annotated and durably written to the output.
//! - A missing file means 0
//! - Writes go to a temp file, are synced, then renamed over the old value

use crate::models::{CallscoreError, Result};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Checkpoint store for one stage.
pub struct CheckpointStore {
    /// Path to the checkpoint file
    path: PathBuf,
    /// Last value read or written
    current: Option<u64>,
}

impl CheckpointStore {
    /// Create a store for `path`. Nothing is read or written yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            current: None,
        }
    }

    /// Path of the checkpoint file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a checkpoint file exists.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read the checkpoint, 0 if absent.
    ///
    /// Content that is not a plain non-negative integer reads as 0. The
    /// startup protocol then refuses to run if output exists, so a garbled
    /// checkpoint can never cause a duplicate append.
    pub fn read(&mut self) -> Result<u64> {
        let value = match fs::read_to_string(&self.path) {
            Ok(content) => {
                let trimmed = content.trim();
                match trimmed.parse::<u64>() {
                    Ok(n) => n,
                    Err(_) => {
                        warn!(
                            path = %self.path.display(),
                            content = trimmed,
                            "Checkpoint is not a row count, treating as 0"
                        );
                        0
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(CallscoreError::io("reading checkpoint", e)),
        };

        self.current = Some(value);
        Ok(value)
    }

    /// Durably replace the checkpoint value.
    ///
    /// Only call after the output rows it covers are synced to disk.
    pub fn write(&mut self, rows: u64) -> Result<()> {
        if let Some(current) = self.current {
            if rows < current {
                return Err(CallscoreError::Internal(format!(
                    "checkpoint would move backwards from {current} to {rows}"
                )));
            }
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| CallscoreError::io("creating checkpoint dir", e))?;
        }

        // Write to temp file
        let temp_path = self.temp_path();
        {
            let mut file = File::create(&temp_path)
                .map_err(|e| CallscoreError::io("creating temp checkpoint", e))?;
            write!(file, "{rows}").map_err(|e| CallscoreError::io("writing temp checkpoint", e))?;
            file.sync_all()
                .map_err(|e| CallscoreError::io("syncing temp checkpoint", e))?;
        }

        // Atomic rename
        fs::rename(&temp_path, &self.path)
            .map_err(|e| CallscoreError::io("renaming checkpoint", e))?;

        self.current = Some(rows);
        debug!(rows, "Checkpoint saved");
        Ok(())
    }

    /// Remove the checkpoint file. Missing is not an error.
    pub fn clear(&mut self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(CallscoreError::io("removing checkpoint", e)),
        }
        self.current = None;
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn absent_checkpoint_reads_zero() {
        let dir = TempDir::new().unwrap();
        let mut store = CheckpointStore::new(dir.path().join("ckpt.txt"));
        assert!(!store.exists());
        assert_eq!(store.read().unwrap(), 0);
    }

    #[test]
    fn write_then_read_across_instances() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("ckpt.txt");

        let mut store = CheckpointStore::new(&path);
        store.write(25).unwrap();
        store.write(50).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "50");

        // Simulates a process restart
        let mut reopened = CheckpointStore::new(&path);
        assert_eq!(reopened.read().unwrap(), 50);

        // No temp file left behind
        assert!(!dir.path().join("nested").join("ckpt.txt.tmp").exists());
    }

    #[test]
    fn garbage_reads_as_zero() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ckpt.txt");
        fs::write(&path, "twelve").unwrap();
        assert_eq!(CheckpointStore::new(&path).read().unwrap(), 0);

        fs::write(&path, " 42\n").unwrap();
        assert_eq!(CheckpointStore::new(&path).read().unwrap(), 42);
    }

    #[test]
    fn refuses_to_move_backwards() {
        let dir = TempDir::new().unwrap();
        let mut store = CheckpointStore::new(dir.path().join("ckpt.txt"));
        store.write(30).unwrap();
        assert!(matches!(store.write(10), Err(CallscoreError::Internal(_))));
        assert_eq!(store.read().unwrap(), 30);
    }

    #[test]
    fn clear_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut store = CheckpointStore::new(dir.path().join("ckpt.txt"));
        store.write(5).unwrap();
        store.clear().unwrap();
        store.clear().unwrap();
        assert!(!store.exists());
        assert_eq!(store.read().unwrap(), 0);
    }
}
