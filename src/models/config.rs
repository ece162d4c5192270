//! Configuration models for callscore.
//!
//! Every tunable of the pipeline lives here. Each section and field has a
//! default, so an empty file (or no file at all) yields a runnable setup.

use super::record::OutputColumns;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;

/// Top-level configuration for callscore.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Input table settings
    pub input: InputConfig,

    /// Per-stage output and batching settings
    pub stages: StagesConfig,

    /// Remote classifier endpoint
    pub classifier: ClassifierConfig,

    /// Merge of the two stage outputs
    pub merge: MergeConfig,
}

/// Input table configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Cleaned speaker-block table (CSV with header)
    pub path: PathBuf,

    /// Name of the column holding the text to score
    pub text_column: String,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/processed/speaker_blocks_cleaned.csv"),
            text_column: "clean_text".to_string(),
        }
    }
}

/// A scoring stage. Each stage is an independent resumable pipeline with
/// its own output and checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// In-process lexicon polarity scoring
    Lexicon,
    /// Remote neural text classifier
    Classifier,
}

impl Stage {
    pub const ALL: [Stage; 2] = [Stage::Lexicon, Stage::Classifier];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Lexicon => "lexicon",
            Stage::Classifier => "classifier",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lexicon" => Ok(Stage::Lexicon),
            "classifier" => Ok(Stage::Classifier),
            other => Err(format!("unknown stage '{other}'")),
        }
    }
}

/// Both stages' settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StagesConfig {
    pub lexicon: StageConfig,
    pub classifier: StageConfig,
}

/// Raw per-stage settings as written in the file.
///
/// Unset fields fall back to stage-specific defaults in [`StageSettings`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    /// Annotated output table
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,

    /// Checkpoint file (row count durably written)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<PathBuf>,

    /// Rows read, scored and committed as one unit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_rows: Option<usize>,

    /// Texts per engine call
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,

    /// Maximum characters sent to the engine per text (0 = unbounded)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_text_len: Option<usize>,

    /// Output column for the label
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_column: Option<String>,

    /// Output column for the confidence
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_column: Option<String>,

    /// Output column for the signed polarity score ("" = omit)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_column: Option<String>,
}

/// Fully resolved settings for one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSettings {
    pub stage: Stage,
    pub output: PathBuf,
    pub checkpoint: PathBuf,
    pub chunk_rows: usize,
    pub batch_size: usize,
    pub max_text_len: Option<usize>,
    pub label_column: String,
    pub confidence_column: String,
    /// Signed polarity column; only engines reporting a score fill it
    pub score_column: Option<String>,
}

impl StageSettings {
    /// Built-in defaults for a stage.
    pub fn defaults(stage: Stage) -> Self {
        match stage {
            Stage::Lexicon => Self {
                stage,
                output: PathBuf::from("data/processed/speaker_blocks_with_vader.csv"),
                checkpoint: PathBuf::from("data/processed/vader_checkpoint.txt"),
                chunk_rows: 5000,
                batch_size: 1000,
                max_text_len: None,
                label_column: "vader_sentiment".to_string(),
                confidence_column: "vader_confidence".to_string(),
                score_column: Some("vader_compound".to_string()),
            },
            Stage::Classifier => Self {
                stage,
                output: PathBuf::from("data/processed/speaker_blocks_with_finbert.csv"),
                checkpoint: PathBuf::from("data/processed/finbert_checkpoint.txt"),
                chunk_rows: 500,
                batch_size: 16,
                max_text_len: Some(1024),
                label_column: "finbert_sentiment".to_string(),
                confidence_column: "finbert_confidence".to_string(),
                score_column: None,
            },
        }
    }

    /// Columns this stage appends to each input row.
    pub fn output_columns(&self) -> OutputColumns {
        OutputColumns::new(&self.label_column, &self.confidence_column)
            .with_score(self.score_column.clone())
    }

    /// Journal recording an in-flight append, kept next to the checkpoint.
    pub fn journal(&self) -> PathBuf {
        let mut name = self
            .checkpoint
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".journal");
        self.checkpoint.with_file_name(name)
    }
}

/// Upper bound on classifier attempts per request.
pub const MAX_RETRIES: u32 = 10;

/// Remote classifier endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Base URL of the inference server (exposes `POST /predict`)
    pub base_url: String,

    /// Model identifier, informational (logged and sent as a header)
    pub model: String,

    /// API key (supports ${ENV_VAR} expansion)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Environment variable holding the API key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Transport-level retries per request
    pub max_retries: u32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            model: "ProsusAI/finbert".to_string(),
            api_key: None,
            api_key_env: None,
            timeout_secs: 180,
            max_retries: 3,
        }
    }
}

impl ClassifierConfig {
    /// Resolve the API key from config or environment.
    ///
    /// Local endpoints without auth resolve to `None`.
    pub fn resolve_api_key(&self) -> Result<Option<String>, ConfigError> {
        if let Some(key) = &self.api_key {
            return Ok(Some(expand_env_vars(key)));
        }

        match &self.api_key_env {
            Some(env_var) => std::env::var(env_var)
                .map(Some)
                .map_err(|_| ConfigError::MissingApiKey {
                    env_var: env_var.clone(),
                }),
            None => Ok(None),
        }
    }
}

/// Merge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Combined output table
    pub output: PathBuf,

    /// Identity columns that must agree row by row between stage outputs
    pub keys: Vec<String>,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            output: PathBuf::from("data/processed/speaker_blocks_with_sentiment.csv"),
            keys: [
                "symbol",
                "company_name",
                "year",
                "quarter",
                "date",
                "speaker",
                "speaker_role",
                "clean_text",
                "block_length",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_owned(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise use defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Resolved settings for a stage.
    pub fn stage(&self, stage: Stage) -> StageSettings {
        let raw = match stage {
            Stage::Lexicon => &self.stages.lexicon,
            Stage::Classifier => &self.stages.classifier,
        };
        let defaults = StageSettings::defaults(stage);

        StageSettings {
            stage,
            output: raw.output.clone().unwrap_or(defaults.output),
            checkpoint: raw.checkpoint.clone().unwrap_or(defaults.checkpoint),
            chunk_rows: raw.chunk_rows.unwrap_or(defaults.chunk_rows),
            batch_size: raw.batch_size.unwrap_or(defaults.batch_size),
            max_text_len: match raw.max_text_len {
                Some(0) => None,
                Some(n) => Some(n),
                None => defaults.max_text_len,
            },
            label_column: raw.label_column.clone().unwrap_or(defaults.label_column),
            confidence_column: raw
                .confidence_column
                .clone()
                .unwrap_or(defaults.confidence_column),
            score_column: match &raw.score_column {
                Some(name) if name.is_empty() => None,
                Some(name) => Some(name.clone()),
                None => defaults.score_column,
            },
        }
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.input.text_column.trim().is_empty() {
            return Err(ConfigError::Invalid("input.text_column is empty".to_string()));
        }

        if self.classifier.max_retries > MAX_RETRIES {
            return Err(ConfigError::Invalid(format!(
                "classifier.max_retries must be at most {MAX_RETRIES}"
            )));
        }

        let mut artifacts: Vec<(String, PathBuf)> =
            vec![("input.path".into(), self.input.path.clone())];

        for stage in Stage::ALL {
            let s = self.stage(stage);
            if s.chunk_rows == 0 {
                return Err(ConfigError::Invalid(format!("stages.{stage}.chunk_rows must be > 0")));
            }
            if s.batch_size == 0 {
                return Err(ConfigError::Invalid(format!("stages.{stage}.batch_size must be > 0")));
            }
            let columns = s.output_columns();
            let distinct = columns.label != columns.confidence
                && columns
                    .score
                    .as_ref()
                    .map_or(true, |c| *c != columns.label && *c != columns.confidence);
            if !distinct {
                return Err(ConfigError::Invalid(format!(
                    "stages.{stage}: label, confidence and score columns must differ"
                )));
            }
            artifacts.push((format!("stages.{stage}.output"), s.output.clone()));
            artifacts.push((format!("stages.{stage}.checkpoint"), s.checkpoint.clone()));
        }
        artifacts.push(("merge.output".into(), self.merge.output.clone()));

        for (i, (name_a, path_a)) in artifacts.iter().enumerate() {
            for (name_b, path_b) in &artifacts[i + 1..] {
                if path_a == path_b {
                    return Err(ConfigError::Invalid(format!(
                        "{name_a} and {name_b} point at the same file {}",
                        path_a.display()
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Expand environment variables in a string.
///
/// Supports ${VAR_NAME} syntax.
/// If the variable is not set, the placeholder is left unchanged.
pub fn expand_env_vars(s: &str) -> String {
    static ENV_VAR: OnceLock<Regex> = OnceLock::new();
    let re = ENV_VAR.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("static regex"));

    let mut result = s.to_string();
    for cap in re.captures_iter(s) {
        if let Ok(value) = std::env::var(&cap[1]) {
            result = result.replace(&cap[0], &value);
        }
    }
    result
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Missing classifier API key: set {env_var} or classifier.api_key in config")]
    MissingApiKey { env_var: String },
}
