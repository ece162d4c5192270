//! Append-only writer for annotated chunks.
//!
//! A chunk is serialized into a staging buffer in full, then appended with a
//! single write and synced. Nothing is ever rewritten in place.

use crate::models::{AnnotatedChunk, CallscoreError, OutputColumns, Result};
use csv::WriterBuilder;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Sink writer for one stage output.
pub struct SinkWriter {
    path: PathBuf,
    columns: OutputColumns,
}

impl SinkWriter {
    pub fn new(path: impl Into<PathBuf>, columns: OutputColumns) -> Self {
        Self {
            path: path.into(),
            columns,
        }
    }

    /// Output path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the output holds any bytes. An empty file counts as absent.
    pub fn has_output(&self) -> bool {
        fs::metadata(&self.path).map(|m| m.len() > 0).unwrap_or(false)
    }

    /// Append `chunk` rows in order, preceded by the header if `write_header`.
    ///
    /// Returns the number of bytes appended. On error some bytes may have
    /// reached the file; the caller's transaction restores it.
    pub fn append(&self, chunk: &AnnotatedChunk, write_header: bool) -> Result<u64> {
        let staged = self.stage(chunk, write_header)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| CallscoreError::sink("opening output file", e))?;

        file.write_all(&staged)
            .map_err(|e| CallscoreError::sink("appending to output", e))?;
        file.sync_all()
            .map_err(|e| CallscoreError::sink("syncing output", e))?;

        debug!(
            rows = chunk.len(),
            bytes = staged.len(),
            header = write_header,
            "Appended chunk"
        );
        Ok(staged.len() as u64)
    }

    /// Serialize a chunk into an in-memory CSV buffer.
    fn stage(&self, chunk: &AnnotatedChunk, write_header: bool) -> Result<Vec<u8>> {
        let mut writer = WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());

        if write_header {
            writer.write_record(&chunk.output_header(&self.columns))?;
        }
        for row in chunk.output_rows(&self.columns) {
            writer.write_record(&row)?;
        }

        writer
            .into_inner()
            .map_err(|e| CallscoreError::Internal(format!("Flushing staged chunk: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Annotation, Chunk, Label};
    use csv::StringRecord;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn columns() -> OutputColumns {
        OutputColumns::new("label", "confidence")
    }

    fn annotated(start: u64, texts: &[&str]) -> AnnotatedChunk {
        let chunk = Chunk {
            start,
            headers: Arc::new(StringRecord::from(vec!["id", "clean_text"])),
            text_column: 1,
            rows: texts
                .iter()
                .enumerate()
                .map(|(i, t)| {
                    StringRecord::from(vec![(start + i as u64).to_string(), t.to_string()])
                })
                .collect(),
        };
        let annotations = texts
            .iter()
            .map(|t| {
                if t.is_empty() {
                    Annotation::SENTINEL
                } else {
                    Annotation::new(Label::Positive, 0.5)
                }
            })
            .collect();
        chunk.annotate(annotations).unwrap()
    }

    #[test]
    fn header_written_only_when_asked() {
        let dir = TempDir::new().unwrap();
        let sink = SinkWriter::new(dir.path().join("out.csv"), columns());
        assert!(!sink.has_output());

        sink.append(&annotated(0, &["up", ""]), true).unwrap();
        sink.append(&annotated(2, &["a, quoted \"text\""]), false).unwrap();
        assert!(sink.has_output());

        let content = fs::read_to_string(sink.path()).unwrap();
        assert_eq!(
            content,
            "id,clean_text,label,confidence\n\
             0,up,positive,0.5\n\
             1,,neutral,0\n\
             2,\"a, quoted \"\"text\"\"\",positive,0.5\n"
        );
    }

    #[test]
    fn appends_never_rewrite_existing_bytes() {
        let dir = TempDir::new().unwrap();
        let sink = SinkWriter::new(dir.path().join("out.csv"), columns());

        let first = sink.append(&annotated(0, &["x"]), true).unwrap();
        let before = fs::read(sink.path()).unwrap();
        let second = sink.append(&annotated(1, &["y"]), false).unwrap();
        let after = fs::read(sink.path()).unwrap();

        assert_eq!(before.len() as u64, first);
        assert_eq!(after.len() as u64, first + second);
        assert_eq!(&after[..before.len()], &before[..]);
    }

    #[test]
    fn empty_file_counts_as_absent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.csv");
        fs::write(&path, "").unwrap();
        assert!(!SinkWriter::new(&path, columns()).has_output());
    }

    #[test]
    fn unwritable_output_is_sink_failure() {
        let dir = TempDir::new().unwrap();
        // A directory cannot be opened for appending
        let sink = SinkWriter::new(dir.path(), columns());
        let err = sink.append(&annotated(0, &["x"]), true).unwrap_err();
        assert!(matches!(err, CallscoreError::SinkWriteFailure { .. }));
    }
}
