//! Remote neural classifier engine.

use super::SentimentEngine;
use crate::client::{ClassifierClient, LabelScore};
use crate::models::{Annotation, CallscoreError, Label, Result};
use async_trait::async_trait;
use tracing::debug;

/// Sentiment engine backed by a classification server.
///
/// The top-scoring class becomes the label and its score the confidence.
pub struct ClassifierEngine {
    client: ClassifierClient,
    max_text_len: Option<usize>,
}

impl ClassifierEngine {
    pub fn new(client: ClassifierClient, max_text_len: Option<usize>) -> Self {
        Self {
            client,
            max_text_len,
        }
    }
}

#[async_trait]
impl SentimentEngine for ClassifierEngine {
    fn name(&self) -> &str {
        "classifier"
    }

    fn max_text_len(&self) -> Option<usize> {
        self.max_text_len
    }

    async fn predict(&self, texts: &[String]) -> Result<Vec<Annotation>> {
        let result = self.client.predict(texts).await?;

        debug!(
            model = self.client.model(),
            texts = texts.len(),
            duration_ms = result.duration.as_millis() as u64,
            "Classifier predicted batch"
        );

        result.scores.iter().map(|scores| top_label(scores)).collect()
    }
}

/// Pick the highest-scoring known label.
///
/// Ties keep the first class listed, so identical responses always map to
/// the same annotation.
pub fn top_label(scores: &[LabelScore]) -> Result<Annotation> {
    let mut best: Option<Annotation> = None;

    for class in scores {
        let label: Label = class
            .label
            .parse()
            .map_err(|e: String| CallscoreError::scorer("classifier", e))?;
        if best.map_or(true, |b| class.score > b.confidence) {
            best = Some(Annotation::new(label, class.score));
        }
    }

    best.ok_or_else(|| CallscoreError::scorer("classifier", "empty score list"))
}
