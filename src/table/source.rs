//! Chunked, restartable reader over the input table.
//!
//! Chunk boundaries are aligned to multiples of the chunk size in source
//! order, so after skipping into the middle of a chunk the next chunk is the
//! remainder of that chunk rather than a re-aligned window. At most one
//! chunk of rows is held in memory.

use crate::models::{CallscoreError, Chunk, Result};
use csv::{Reader, ReaderBuilder, StringRecord};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Ordered, finite sequence of row chunks read from a CSV file.
pub struct ChunkSource {
    path: PathBuf,
    reader: Reader<File>,
    headers: Arc<StringRecord>,
    text_column: usize,
    chunk_rows: usize,
    /// Rows consumed so far (emitted or skipped)
    position: u64,
    exhausted: bool,
}

impl ChunkSource {
    /// Open `path` for reading in chunks of `chunk_rows`.
    ///
    /// Fails with `SourceUnavailable` if the file cannot be opened, and with
    /// `InvalidInput` if the header lacks `text_column`.
    pub fn open(path: &Path, text_column: &str, chunk_rows: usize) -> Result<Self> {
        if chunk_rows == 0 {
            return Err(CallscoreError::InvalidInput(
                "chunk size must be at least 1 row".to_string(),
            ));
        }

        let file = File::open(path).map_err(|e| CallscoreError::SourceUnavailable {
            path: path.to_path_buf(),
            source: e,
        })?;

        let mut reader = ReaderBuilder::new().has_headers(true).from_reader(file);
        let headers = reader.headers()?.clone();

        let text_idx = headers
            .iter()
            .position(|h| h == text_column)
            .ok_or_else(|| {
                CallscoreError::InvalidInput(format!(
                    "{} has no '{}' column",
                    path.display(),
                    text_column
                ))
            })?;

        debug!(path = %path.display(), columns = headers.len(), chunk_rows, "Opened chunk source");

        Ok(Self {
            path: path.to_path_buf(),
            reader,
            headers: Arc::new(headers),
            text_column: text_idx,
            chunk_rows,
            position: 0,
            exhausted: false,
        })
    }

    /// Count data rows in `path` without holding them in memory.
    pub fn count_rows(path: &Path) -> Result<u64> {
        let file = File::open(path).map_err(|e| CallscoreError::SourceUnavailable {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut reader = ReaderBuilder::new().has_headers(true).from_reader(file);
        let mut record = StringRecord::new();
        let mut count = 0u64;
        while reader.read_record(&mut record)? {
            count += 1;
        }
        Ok(count)
    }

    /// Input path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Input header.
    pub fn headers(&self) -> &Arc<StringRecord> {
        &self.headers
    }

    /// Rows consumed so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Discard the next `rows` rows, one at a time.
    ///
    /// Returns how many rows were actually skipped; fewer than requested
    /// means the source is exhausted.
    pub fn skip_rows(&mut self, rows: u64) -> Result<u64> {
        let mut record = StringRecord::new();
        let mut skipped = 0u64;

        while skipped < rows && !self.exhausted {
            if self.reader.read_record(&mut record)? {
                skipped += 1;
                self.position += 1;
            } else {
                self.exhausted = true;
            }
        }

        debug!(skipped, position = self.position, "Skipped rows");
        Ok(skipped)
    }

    /// Read the next chunk, `None` once the input is exhausted.
    pub fn next_chunk(&mut self) -> Result<Option<Chunk>> {
        if self.exhausted {
            return Ok(None);
        }

        let start = self.position;
        let size = self.chunk_rows as u64;
        let end = (start / size + 1) * size;
        let mut rows = Vec::with_capacity((end - start) as usize);

        while self.position < end {
            let mut record = StringRecord::new();
            if !self.reader.read_record(&mut record)? {
                self.exhausted = true;
                break;
            }
            rows.push(record);
            self.position += 1;
        }

        if rows.is_empty() {
            return Ok(None);
        }

        Ok(Some(Chunk {
            start,
            headers: Arc::clone(&self.headers),
            text_column: self.text_column,
            rows,
        }))
    }
}

impl Iterator for ChunkSource {
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_chunk().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt::Write as _;
    use tempfile::TempDir;

    fn write_input(dir: &TempDir, rows: usize) -> PathBuf {
        let path = dir.path().join("blocks.csv");
        let mut content = String::from("symbol,clean_text\n");
        for i in 0..rows {
            writeln!(content, "SYM,row {i}").unwrap();
        }
        std::fs::write(&path, content).unwrap();
        path
    }

    fn ranges(source: ChunkSource) -> Vec<(u64, u64)> {
        source.map(|c| c.map(|c| (c.start, c.end())).unwrap()).collect()
    }

    #[test]
    fn fresh_source_emits_aligned_chunks() {
        let dir = TempDir::new().unwrap();
        let path = write_input(&dir, 55);
        let source = ChunkSource::open(&path, "clean_text", 25).unwrap();
        assert_eq!(ranges(source), vec![(0, 25), (25, 50), (50, 55)]);
    }

    #[test]
    fn skip_inside_a_chunk_keeps_its_remainder() {
        let dir = TempDir::new().unwrap();
        let path = write_input(&dir, 55);
        let mut source = ChunkSource::open(&path, "clean_text", 25).unwrap();

        assert_eq!(source.skip_rows(30).unwrap(), 30);
        let first = source.next_chunk().unwrap().unwrap();
        assert_eq!((first.start, first.end()), (30, 50));
        assert_eq!(first.texts().next(), Some("row 30"));

        assert_eq!(ranges(source), vec![(50, 55)]);
    }

    #[test]
    fn skip_on_a_boundary_drops_whole_chunks() {
        let dir = TempDir::new().unwrap();
        let path = write_input(&dir, 55);
        let mut source = ChunkSource::open(&path, "clean_text", 25).unwrap();
        source.skip_rows(50).unwrap();
        assert_eq!(ranges(source), vec![(50, 55)]);
    }

    #[test]
    fn skip_past_the_end_exhausts_cleanly() {
        let dir = TempDir::new().unwrap();
        let path = write_input(&dir, 10);
        let mut source = ChunkSource::open(&path, "clean_text", 4).unwrap();
        assert_eq!(source.skip_rows(25).unwrap(), 10);
        assert!(source.next_chunk().unwrap().is_none());
    }

    #[test]
    fn missing_input_is_source_unavailable() {
        let dir = TempDir::new().unwrap();
        let err = ChunkSource::open(&dir.path().join("nope.csv"), "clean_text", 5)
            .err()
            .unwrap();
        assert!(matches!(err, CallscoreError::SourceUnavailable { .. }));
    }

    #[test]
    fn missing_text_column_is_invalid_input() {
        let dir = TempDir::new().unwrap();
        let path = write_input(&dir, 3);
        let err = ChunkSource::open(&path, "text", 5).err().unwrap();
        assert!(matches!(err, CallscoreError::InvalidInput(_)));
    }

    #[test]
    fn quoted_multiline_text_is_one_row() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blocks.csv");
        std::fs::write(&path, "symbol,clean_text\nA,\"line one\nline two\"\nB,\n").unwrap();

        let mut source = ChunkSource::open(&path, "clean_text", 10).unwrap();
        let chunk = source.next_chunk().unwrap().unwrap();
        assert_eq!(chunk.texts().collect::<Vec<_>>(), vec!["line one\nline two", ""]);
        assert_eq!(ChunkSource::count_rows(&path).unwrap(), 2);
    }

    #[test]
    fn header_only_input_is_empty() {
        let dir = TempDir::new().unwrap();
        let path = write_input(&dir, 0);
        let mut source = ChunkSource::open(&path, "clean_text", 10).unwrap();
        assert!(source.next_chunk().unwrap().is_none());
        assert_eq!(ChunkSource::count_rows(&path).unwrap(), 0);
    }
}
