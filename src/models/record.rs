//! Row, chunk, and annotation types.
//!
//! These types carry data from the chunk source through the scorer to the sink.
//! Identity columns are opaque: rows are kept as raw CSV records.

use csv::StringRecord;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Sentiment label.
///
/// The label set is a fixed enumeration shared by every engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Negative,
    Neutral,
    Positive,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Negative => "negative",
            Label::Neutral => "neutral",
            Label::Positive => "positive",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Label {
    type Err = String;

    /// Parses engine labels case-insensitively (`POSITIVE`, `Neutral`, ...).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "negative" | "neg" => Ok(Label::Negative),
            "neutral" | "neu" => Ok(Label::Neutral),
            "positive" | "pos" => Ok(Label::Positive),
            other => Err(format!("unknown sentiment label '{other}'")),
        }
    }
}

/// One sentiment judgment: a label and a confidence in [0, 1].
///
/// Engines with a signed polarity (the lexicon compound) also report it as
/// `score` in [-1, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub label: Label,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl Annotation {
    /// Result assigned to blank text. Never produced by an engine call.
    pub const SENTINEL: Annotation = Annotation {
        label: Label::Neutral,
        confidence: 0.0,
        score: Some(0.0),
    };

    pub fn new(label: Label, confidence: f64) -> Self {
        Self {
            label,
            confidence,
            score: None,
        }
    }

    /// Attach a signed polarity score.
    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    /// Whether the confidence is a finite value in [0, 1] and the score, if
    /// any, a finite value in [-1, 1].
    pub fn is_well_formed(&self) -> bool {
        let score_ok = self
            .score
            .map_or(true, |s| s.is_finite() && (-1.0..=1.0).contains(&s));
        score_ok && self.confidence.is_finite() && (0.0..=1.0).contains(&self.confidence)
    }
}

/// Whether a text cell counts as blank (empty or whitespace only).
pub fn is_blank(text: &str) -> bool {
    text.trim().is_empty()
}

/// A contiguous, ordered slice of input rows.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Source index of the first row in this chunk
    pub start: u64,
    /// Input header shared by every chunk of one source
    pub headers: Arc<StringRecord>,
    /// Column holding the text to score
    pub text_column: usize,
    /// Rows in source order
    pub rows: Vec<StringRecord>,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Source index one past the last row in this chunk.
    pub fn end(&self) -> u64 {
        self.start + self.rows.len() as u64
    }

    /// Text of each row; a missing cell reads as empty.
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.rows
            .iter()
            .map(move |row| row.get(self.text_column).unwrap_or(""))
    }

    /// Attach one annotation per row, in row order.
    pub fn annotate(self, annotations: Vec<Annotation>) -> crate::Result<AnnotatedChunk> {
        if annotations.len() != self.rows.len() {
            return Err(crate::CallscoreError::Internal(format!(
                "chunk at row {} has {} rows but {} annotations",
                self.start,
                self.rows.len(),
                annotations.len()
            )));
        }
        Ok(AnnotatedChunk {
            chunk: self,
            annotations,
        })
    }
}

/// A chunk with its annotation columns attached.
#[derive(Debug, Clone)]
pub struct AnnotatedChunk {
    pub chunk: Chunk,
    pub annotations: Vec<Annotation>,
}

impl AnnotatedChunk {
    pub fn len(&self) -> usize {
        self.chunk.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunk.is_empty()
    }

    /// Output header: input columns followed by the annotation columns.
    pub fn output_header(&self, columns: &OutputColumns) -> StringRecord {
        let mut header = (*self.chunk.headers).clone();
        header.push_field(&columns.label);
        header.push_field(&columns.confidence);
        if let Some(score) = &columns.score {
            header.push_field(score);
        }
        header
    }

    /// Output rows in input order.
    ///
    /// An annotation without a score leaves the score cell empty.
    pub fn output_rows<'a>(
        &'a self,
        columns: &'a OutputColumns,
    ) -> impl Iterator<Item = StringRecord> + 'a {
        self.chunk
            .rows
            .iter()
            .zip(&self.annotations)
            .map(move |(row, annotation)| {
                let mut out = row.clone();
                out.push_field(annotation.label.as_str());
                out.push_field(&annotation.confidence.to_string());
                if columns.score.is_some() {
                    let score = annotation.score.map(|s| s.to_string()).unwrap_or_default();
                    out.push_field(&score);
                }
                out
            })
    }
}

/// Names of the columns a stage appends to each input row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputColumns {
    pub label: String,
    pub confidence: String,
    /// Signed polarity column, for engines that report one
    pub score: Option<String>,
}

impl OutputColumns {
    pub fn new(label: impl Into<String>, confidence: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            confidence: confidence.into(),
            score: None,
        }
    }

    pub fn with_score(mut self, score: Option<String>) -> Self {
        self.score = score;
        self
    }
}
