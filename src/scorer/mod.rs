//! Scoring engines and the batch adapter in front of them.
//!
//! - `SentimentEngine`: narrow capability interface, one call per sub-batch
//! - `BatchScorer`: truncation, sub-batching and result validation
//! - `LexiconEngine`: in-process polarity lexicon
//! - `ClassifierEngine`: remote neural classifier

mod classifier;
mod lexicon;

pub use classifier::*;
pub use lexicon::*;

use crate::models::{Annotation, CallscoreError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// A sentiment scoring engine.
///
/// Implementations receive non-empty texts already truncated to
/// [`SentimentEngine::max_text_len`] and must return one annotation per
/// text, in input order.
#[async_trait]
pub trait SentimentEngine: Send + Sync {
    /// Engine name used in logs and errors.
    fn name(&self) -> &str;

    /// Maximum characters per text the engine accepts, if bounded.
    fn max_text_len(&self) -> Option<usize> {
        None
    }

    /// Score one sub-batch.
    async fn predict(&self, texts: &[String]) -> Result<Vec<Annotation>>;
}

/// Batch scorer adapter.
///
/// Hides sub-batching from the caller: `score` returns exactly one result
/// per input text, in the same order, or fails.
pub struct BatchScorer {
    engine: Arc<dyn SentimentEngine>,
    batch_size: usize,
    max_text_len: Option<usize>,
}

impl BatchScorer {
    /// Wrap `engine`, calling it with at most `batch_size` texts at a time.
    ///
    /// `max_text_len` tightens the engine's own limit; the smaller one wins.
    pub fn new(
        engine: Arc<dyn SentimentEngine>,
        batch_size: usize,
        max_text_len: Option<usize>,
    ) -> Self {
        let max_text_len = match (engine.max_text_len(), max_text_len) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Self {
            engine,
            batch_size: batch_size.max(1),
            max_text_len,
        }
    }

    /// Name of the wrapped engine.
    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    /// Score non-blank texts, preserving order.
    pub async fn score(&self, texts: &[&str]) -> Result<Vec<Annotation>> {
        if texts.is_empty() {
            return Err(CallscoreError::Internal(
                "scorer called with no texts".to_string(),
            ));
        }

        let mut results = Vec::with_capacity(texts.len());

        for (batch_idx, batch) in texts.chunks(self.batch_size).enumerate() {
            let prepared: Vec<String> = batch
                .iter()
                .map(|t| truncate_chars(t, self.max_text_len).to_string())
                .collect();

            let annotations = self.engine.predict(&prepared).await.map_err(|e| match e {
                CallscoreError::ScorerFailure { .. } => e,
                other => CallscoreError::scorer(self.engine.name(), other.to_string()),
            })?;

            if annotations.len() != prepared.len() {
                return Err(CallscoreError::scorer(
                    self.engine.name(),
                    format!(
                        "sub-batch {batch_idx}: sent {} texts, got {} results",
                        prepared.len(),
                        annotations.len()
                    ),
                ));
            }
            if let Some(bad) = annotations.iter().find(|a| !a.is_well_formed()) {
                return Err(CallscoreError::scorer(
                    self.engine.name(),
                    format!(
                        "sub-batch {batch_idx}: confidence {} or score {:?} out of range",
                        bad.confidence, bad.score
                    ),
                ));
            }

            debug!(
                engine = self.engine.name(),
                batch = batch_idx,
                size = prepared.len(),
                "Scored sub-batch"
            );
            results.extend(annotations);
        }

        Ok(results)
    }
}

/// Cut `text` to at most `max` characters, on a char boundary.
pub fn truncate_chars(text: &str, max: Option<usize>) -> &str {
    match max {
        Some(max) => match text.char_indices().nth(max) {
            Some((idx, _)) => &text[..idx],
            None => text,
        },
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Label;
    use std::sync::Mutex;

    /// Records every call; labels by text length parity.
    struct Recording {
        calls: Mutex<Vec<Vec<String>>>,
        limit: Option<usize>,
    }

    impl Recording {
        fn new(limit: Option<usize>) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                limit,
            })
        }
    }

    #[async_trait]
    impl SentimentEngine for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        fn max_text_len(&self) -> Option<usize> {
            self.limit
        }

        async fn predict(&self, texts: &[String]) -> Result<Vec<Annotation>> {
            self.calls.lock().unwrap().push(texts.to_vec());
            Ok(texts
                .iter()
                .map(|t| {
                    let label = if t.len() % 2 == 0 { Label::Positive } else { Label::Negative };
                    Annotation::new(label, t.len() as f64 / 100.0)
                })
                .collect())
        }
    }

    struct Broken(Vec<Annotation>);

    #[async_trait]
    impl SentimentEngine for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn predict(&self, _texts: &[String]) -> Result<Vec<Annotation>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn sub_batches_preserve_order() {
        let engine = Recording::new(None);
        let scorer = BatchScorer::new(engine.clone(), 2, None);

        let texts = ["a", "bb", "ccc", "dddd", "eeeee"];
        let results = scorer.score(&texts).await.unwrap();

        let confidences: Vec<f64> = results.iter().map(|a| a.confidence).collect();
        assert_eq!(confidences, vec![0.01, 0.02, 0.03, 0.04, 0.05]);

        let calls = engine.calls.lock().unwrap();
        let sizes: Vec<usize> = calls.iter().map(|c| c.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[tokio::test]
    async fn truncation_uses_the_tighter_limit() {
        let engine = Recording::new(Some(4));
        let scorer = BatchScorer::new(engine.clone(), 8, Some(6));
        scorer.score(&["ééééééé", "ok"]).await.unwrap();

        let calls = engine.calls.lock().unwrap();
        assert_eq!(calls[0], vec!["éééé".to_string(), "ok".to_string()]);
    }

    #[tokio::test]
    async fn empty_input_is_rejected() {
        let scorer = BatchScorer::new(Recording::new(None), 4, None);
        assert!(matches!(scorer.score(&[]).await, Err(CallscoreError::Internal(_))));
    }

    #[tokio::test]
    async fn short_results_are_scorer_failures() {
        let scorer = BatchScorer::new(Arc::new(Broken(vec![Annotation::SENTINEL])), 4, None);
        let err = scorer.score(&["a", "b"]).await.unwrap_err();
        assert!(matches!(err, CallscoreError::ScorerFailure { .. }));
    }

    #[tokio::test]
    async fn out_of_range_confidence_is_scorer_failure() {
        let scorer = BatchScorer::new(
            Arc::new(Broken(vec![Annotation::new(Label::Positive, 1.2)])),
            4,
            None,
        );
        let err = scorer.score(&["a"]).await.unwrap_err();
        assert!(matches!(err, CallscoreError::ScorerFailure { .. }));
    }

    #[test]
    fn truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo", Some(2)), "hé");
        assert_eq!(truncate_chars("hi", Some(10)), "hi");
        assert_eq!(truncate_chars("hi", None), "hi");
        assert_eq!(truncate_chars("hi", Some(0)), "");
    }
}
