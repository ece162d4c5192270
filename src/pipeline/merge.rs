//! Merge of the lexicon and classifier stage outputs.
//!
//! Both outputs preserve input row order, so the join is a lockstep walk
//! over the two files. Key columns are compared on every row; any
//! disagreement aborts instead of producing a misaligned table.

use crate::models::{CallscoreError, Result, StageSettings};
use csv::{Reader, ReaderBuilder, StringRecord, WriterBuilder};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::info;

/// Summary of a merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeStats {
    pub rows: u64,
    pub columns: usize,
    pub output: PathBuf,
}

/// Join `left` and `right` stage outputs row by row into `output`.
///
/// The result holds every column of `left` (its score column included) plus
/// the right stage's label, confidence and score columns. It is written to a
/// temp file and renamed into place, so a failed merge leaves no partial output.
pub fn merge_stage_outputs(
    left: &StageSettings,
    right: &StageSettings,
    keys: &[String],
    output: &Path,
) -> Result<MergeStats> {
    let mut left_reader = open(&left.output)?;
    let mut right_reader = open(&right.output)?;

    let left_headers = left_reader.headers()?.clone();
    let right_headers = right_reader.headers()?.clone();

    let key_columns: Vec<(usize, usize, &str)> = keys
        .iter()
        .map(|key| {
            Ok((
                column(&left_headers, key, &left.output)?,
                column(&right_headers, key, &right.output)?,
                key.as_str(),
            ))
        })
        .collect::<Result<_>>()?;

    let right_columns = right.output_columns();
    let mut names = vec![&right_columns.label, &right_columns.confidence];
    names.extend(right_columns.score.as_ref());
    let carried: Vec<(usize, &str)> = names
        .into_iter()
        .map(|name| Ok((column(&right_headers, name, &right.output)?, name.as_str())))
        .collect::<Result<_>>()?;

    let mut header = left_headers.clone();
    for &(_, name) in &carried {
        header.push_field(name);
    }

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| CallscoreError::io("creating merge dir", e))?;
    }
    let temp_path = temp_path(output);
    let file = File::create(&temp_path)
        .map_err(|e| CallscoreError::io("creating merge output", e))?;
    let mut writer = WriterBuilder::new().from_writer(file);
    writer.write_record(&header)?;

    let result = (|| -> Result<u64> {
        let mut left_row = StringRecord::new();
        let mut right_row = StringRecord::new();
        let mut rows = 0u64;

        loop {
            let has_left = left_reader.read_record(&mut left_row)?;
            let has_right = right_reader.read_record(&mut right_row)?;

            match (has_left, has_right) {
                (false, false) => break,
                (true, false) | (false, true) => {
                    return Err(CallscoreError::InvalidInput(format!(
                        "{} and {} differ in length after {rows} rows; finish both stages first",
                        left.output.display(),
                        right.output.display()
                    )));
                }
                (true, true) => {}
            }

            for &(l, r, key) in &key_columns {
                if left_row.get(l) != right_row.get(r) {
                    return Err(CallscoreError::InvalidInput(format!(
                        "row {rows}: key '{key}' differs ({:?} vs {:?})",
                        left_row.get(l).unwrap_or(""),
                        right_row.get(r).unwrap_or("")
                    )));
                }
            }

            let mut merged = left_row.clone();
            for &(idx, _) in &carried {
                merged.push_field(right_row.get(idx).unwrap_or(""));
            }
            writer.write_record(&merged)?;
            rows += 1;
        }

        writer
            .flush()
            .map_err(|e| CallscoreError::io("flushing merge output", e))?;
        Ok(rows)
    })();
    drop(writer);

    let rows = match result {
        Ok(rows) => rows,
        Err(e) => {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }
    };

    fs::rename(&temp_path, output).map_err(|e| CallscoreError::io("renaming merge output", e))?;

    info!(
        left = %left.output.display(),
        right = %right.output.display(),
        rows,
        output = %output.display(),
        "Merged stage outputs"
    );

    Ok(MergeStats {
        rows,
        columns: header.len(),
        output: output.to_path_buf(),
    })
}

fn open(path: &Path) -> Result<Reader<File>> {
    let file = File::open(path).map_err(|e| CallscoreError::SourceUnavailable {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(ReaderBuilder::new().has_headers(true).from_reader(file))
}

fn column(headers: &StringRecord, name: &str, path: &Path) -> Result<usize> {
    headers.iter().position(|h| h == name).ok_or_else(|| {
        CallscoreError::InvalidInput(format!("{} has no '{}' column", path.display(), name))
    })
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
