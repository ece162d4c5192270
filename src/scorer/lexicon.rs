//! # Lexicon Engine
//!
//! Rule-based polarity scoring over a general plus financial word list,
//! with negation and intensifier handling. Scores are normalized into a
//! compound value in [-1, 1] the way VADER does.

use super::SentimentEngine;
use crate::models::{Annotation, Label, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};

/// Normalization constant approximating the maximum expected raw score.
const ALPHA: f64 = 15.0;

/// Scale applied to a word's valence when a negation precedes it.
const NEGATION_SCALAR: f64 = -0.74;

/// Tokens before a sentiment word searched for negations.
const NEGATION_WINDOW: usize = 3;

/// Compound magnitude below which text is neutral.
const NEUTRAL_BAND: f64 = 0.05;

/// Polarity lexicon with negations and intensifiers.
pub struct LexiconEngine {
    /// Word to valence, roughly in [-4, 4]
    words: HashMap<String, f64>,
    negations: HashSet<String>,
    /// Intensifier to boost (negative boosts dampen)
    intensifiers: HashMap<String, f64>,
}

impl Default for LexiconEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl LexiconEngine {
    /// Create an engine with the built-in word lists.
    pub fn new() -> Self {
        let positive = [
            ("good", 1.9),
            ("great", 3.1),
            ("excellent", 2.7),
            ("strong", 2.3),
            ("strength", 2.2),
            ("pleased", 1.9),
            ("happy", 2.7),
            ("confident", 2.2),
            ("optimistic", 2.0),
            ("growth", 1.6),
            ("grow", 1.4),
            ("growing", 1.4),
            ("gain", 2.0),
            ("gains", 2.0),
            ("profit", 1.9),
            ("profitable", 1.9),
            ("improve", 1.9),
            ("improved", 2.1),
            ("improvement", 2.0),
            ("record", 1.2),
            ("exceed", 1.6),
            ("exceeded", 1.6),
            ("beat", 1.4),
            ("outperform", 1.8),
            ("momentum", 1.2),
            ("opportunity", 1.8),
            ("opportunities", 1.8),
            ("robust", 1.6),
            ("solid", 1.3),
            ("success", 2.7),
            ("successful", 2.8),
            ("win", 2.8),
            ("benefit", 2.0),
            ("efficient", 1.8),
            ("resilient", 1.7),
            ("upside", 1.5),
            ("favorable", 2.1),
            ("recovery", 1.4),
            ("rebound", 1.3),
            ("excited", 1.4),
            ("thank", 1.5),
            ("thanks", 1.9),
            ("congratulations", 2.9),
        ];

        let negative = [
            ("bad", -2.5),
            ("weak", -1.9),
            ("weakness", -1.9),
            ("decline", -1.5),
            ("declined", -1.5),
            ("decrease", -1.4),
            ("loss", -1.3),
            ("losses", -1.7),
            ("miss", -1.2),
            ("missed", -1.3),
            ("headwind", -1.5),
            ("headwinds", -1.5),
            ("pressure", -1.2),
            ("challenge", -0.9),
            ("challenging", -1.1),
            ("difficult", -1.5),
            ("concern", -1.4),
            ("concerns", -1.4),
            ("risk", -1.1),
            ("uncertain", -1.2),
            ("uncertainty", -1.4),
            ("volatile", -1.0),
            ("volatility", -1.0),
            ("disappointing", -2.2),
            ("disappointed", -1.9),
            ("impairment", -1.6),
            ("downturn", -1.9),
            ("slowdown", -1.4),
            ("shortfall", -1.6),
            ("problem", -1.7),
            ("problems", -1.7),
            ("fail", -2.5),
            ("failed", -2.3),
            ("worse", -2.1),
            ("worst", -3.1),
            ("litigation", -1.3),
            ("layoffs", -1.8),
            ("crisis", -3.1),
            ("unfortunately", -1.8),
        ];

        let words = positive
            .into_iter()
            .chain(negative)
            .map(|(w, v)| (w.to_string(), v))
            .collect();

        let negations = [
            "not", "no", "never", "neither", "nor", "none", "nothing", "nobody", "cannot",
            "cant", "can't", "don't", "dont", "doesn't", "doesnt", "didn't", "didnt", "won't",
            "wont", "wouldn't", "wouldnt", "isn't", "isnt", "aren't", "arent", "wasn't", "wasnt",
            "weren't", "werent", "without", "hardly", "barely",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        let intensifiers = [
            ("very", 0.293),
            ("extremely", 0.293),
            ("really", 0.293),
            ("significantly", 0.293),
            ("substantially", 0.293),
            ("incredibly", 0.293),
            ("remarkably", 0.293),
            ("particularly", 0.293),
            ("highly", 0.293),
            ("slightly", -0.293),
            ("somewhat", -0.293),
            ("marginally", -0.293),
            ("modestly", -0.293),
        ]
        .into_iter()
        .map(|(w, b)| (w.to_string(), b))
        .collect();

        Self {
            words,
            negations,
            intensifiers,
        }
    }

    /// Compound polarity of `text` in [-1, 1].
    pub fn compound(&self, text: &str) -> f64 {
        let tokens = tokenize(text);
        let mut sum = 0.0;

        for (i, token) in tokens.iter().enumerate() {
            let Some(&valence) = self.words.get(token.as_str()) else {
                continue;
            };
            let mut v = valence;

            if i > 0 {
                if let Some(&boost) = self.intensifiers.get(tokens[i - 1].as_str()) {
                    v += boost * v.signum();
                }
            }

            let window = i.saturating_sub(NEGATION_WINDOW)..i;
            if tokens[window].iter().any(|t| self.negations.contains(t)) {
                v *= NEGATION_SCALAR;
            }

            sum += v;
        }

        normalize(sum)
    }

    /// Annotate one text.
    ///
    /// Polar labels carry |compound| as confidence; neutral text carries how
    /// close the compound is to zero. The signed compound is kept as the score.
    pub fn annotate(&self, text: &str) -> Annotation {
        let compound = self.compound(text);
        let annotation = if compound >= NEUTRAL_BAND {
            Annotation::new(Label::Positive, compound)
        } else if compound <= -NEUTRAL_BAND {
            Annotation::new(Label::Negative, -compound)
        } else {
            Annotation::new(Label::Neutral, 1.0 - compound.abs() / NEUTRAL_BAND)
        };
        annotation.with_score(compound)
    }
}

#[async_trait]
impl SentimentEngine for LexiconEngine {
    fn name(&self) -> &str {
        "lexicon"
    }

    async fn predict(&self, texts: &[String]) -> Result<Vec<Annotation>> {
        Ok(texts.iter().map(|t| self.annotate(t)).collect())
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .filter(|t| !t.is_empty())
        .map(|t| t.trim_matches('\'').to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

fn normalize(score: f64) -> f64 {
    (score / (score * score + ALPHA).sqrt()).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_and_negative_text() {
        let engine = LexiconEngine::new();
        let up = engine.annotate("We delivered strong growth and record profit this quarter.");
        assert_eq!(up.label, Label::Positive);
        assert!(up.confidence > 0.5);

        let down = engine.annotate("Margins declined on weak demand and difficult headwinds.");
        assert_eq!(down.label, Label::Negative);
        assert!(down.confidence > 0.5);
    }

    #[test]
    fn text_without_sentiment_words_is_neutral() {
        let engine = LexiconEngine::new();
        let a = engine.annotate("Next question comes from the line of Jane Smith.");
        assert_eq!(a.label, Label::Neutral);
        assert_eq!(a.confidence, 1.0);
    }

    #[test]
    fn score_keeps_the_signed_compound() {
        let engine = LexiconEngine::new();
        let text = "The outlook is weak.";
        let a = engine.annotate(text);
        assert_eq!(a.score, Some(engine.compound(text)));
        assert!(a.score.unwrap() < 0.0);

        let neutral = engine.annotate("Next question comes from the line of Jane Smith.");
        assert_eq!(neutral.score, Some(0.0));
    }

    #[test]
    fn negation_flips_polarity() {
        let engine = LexiconEngine::new();
        assert!(engine.compound("results were good") > 0.0);
        assert!(engine.compound("results were not good") < 0.0);
        assert!(engine.compound("we don't see any weakness") > 0.0);
    }

    #[test]
    fn intensifiers_boost_and_dampen() {
        let engine = LexiconEngine::new();
        let plain = engine.compound("strong quarter");
        assert!(engine.compound("very strong quarter") > plain);
        assert!(engine.compound("slightly strong quarter") < plain);
    }

    #[test]
    fn compound_stays_in_range() {
        let engine = LexiconEngine::new();
        let text = "great ".repeat(200);
        let c = engine.compound(&text);
        assert!(c <= 1.0 && c > 0.99);
        assert!(engine.annotate(&text).is_well_formed());
    }

    #[test]
    fn scoring_is_deterministic() {
        let engine = LexiconEngine::new();
        let text = "Uncertainty remains, but we are confident in our momentum.";
        assert_eq!(engine.compound(text), engine.compound(text));
    }

    #[tokio::test]
    async fn predict_returns_one_result_per_text() {
        let engine = LexiconEngine::new();
        let texts = vec!["good".to_string(), "bad".to_string(), "table".to_string()];
        let results = engine.predict(&texts).await.unwrap();
        let labels: Vec<Label> = results.iter().map(|a| a.label).collect();
        assert_eq!(labels, vec![Label::Positive, Label::Negative, Label::Neutral]);
    }
}
