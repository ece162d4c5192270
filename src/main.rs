//! callscore CLI - resumable sentiment annotation of earnings-call transcripts.

use anyhow::{Context, Result, bail};
use callscore::client::ClassifierClient;
use callscore::pipeline::{
    AnnotationDriver, CancelFlag, Plan, ProgressBarObserver, RunOutcome, StageStatus,
    merge_stage_outputs, reset_stage,
};
use callscore::scorer::{BatchScorer, ClassifierEngine, LexiconEngine, SentimentEngine};
use callscore::{Config, Stage};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "callscore")]
#[command(version)]
#[command(about = "Resumable sentiment annotation of earnings-call speaker blocks")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file (defaults apply if it does not exist)
    #[arg(short, long, global = true, default_value = "callscore.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum StageArg {
    Lexicon,
    Classifier,
    All,
}

impl StageArg {
    fn stages(self) -> Vec<Stage> {
        match self {
            StageArg::Lexicon => vec![Stage::Lexicon],
            StageArg::Classifier => vec![Stage::Classifier],
            StageArg::All => Stage::ALL.to_vec(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Annotate the input table, resuming from the stage checkpoint
    Annotate {
        /// Stage to run
        #[arg(short, long, value_enum, default_value = "all")]
        stage: StageArg,

        /// Input table (overrides config)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Rows per chunk (overrides config)
        #[arg(long)]
        chunk_rows: Option<usize>,

        /// Skip the upfront row count used for progress
        #[arg(long)]
        no_count: bool,
    },

    /// Join the lexicon and classifier outputs into one table
    Merge {
        /// Merged output table (overrides config)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show checkpoint and output state for each stage
    Status,

    /// Delete a stage's checkpoint, journal and output
    Reset {
        #[arg(short, long, value_enum)]
        stage: StageArg,
    },

    /// Validate configuration file
    Validate,

    /// Show example configuration
    Example,
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("tracing subscriber already installed");
    }
}

const EXAMPLE_CONFIG: &str = r#"# callscore configuration file

[input]
path = "data/processed/speaker_blocks_cleaned.csv"
text_column = "clean_text"

[stages.lexicon]
output = "data/processed/speaker_blocks_with_vader.csv"
checkpoint = "data/processed/vader_checkpoint.txt"
chunk_rows = 5000
batch_size = 1000
label_column = "vader_sentiment"
confidence_column = "vader_confidence"
score_column = "vader_compound"  # signed compound, "" = omit

[stages.classifier]
output = "data/processed/speaker_blocks_with_finbert.csv"
checkpoint = "data/processed/finbert_checkpoint.txt"
chunk_rows = 500
batch_size = 16
max_text_len = 1024  # characters, 0 = unbounded
label_column = "finbert_sentiment"
confidence_column = "finbert_confidence"

[classifier]
base_url = "http://localhost:8080"
model = "ProsusAI/finbert"
# api_key = "${CLASSIFIER_API_KEY}"
# api_key_env = "CLASSIFIER_API_KEY"
timeout_secs = 180
max_retries = 3

[merge]
output = "data/processed/speaker_blocks_with_sentiment.csv"
keys = [
    "symbol", "company_name", "year", "quarter", "date",
    "speaker", "speaker_role", "clean_text", "block_length",
]
"#;

fn load_config(path: &PathBuf) -> Result<Config> {
    Config::load_or_default(path).with_context(|| format!("Failed to load config from {path:?}"))
}

fn build_engine(
    config: &Config,
    stage: Stage,
    max_text_len: Option<usize>,
) -> Result<Arc<dyn SentimentEngine>> {
    Ok(match stage {
        Stage::Lexicon => Arc::new(LexiconEngine::new()),
        Stage::Classifier => {
            let api_key = config
                .classifier
                .resolve_api_key()
                .context("Failed to resolve classifier API key")?;
            let client = ClassifierClient::new(&config.classifier, api_key)
                .context("Failed to create classifier client")?;
            Arc::new(ClassifierEngine::new(client, max_text_len))
        }
    })
}

fn print_outcome(stage: Stage, outcome: &RunOutcome) {
    let title = if outcome.is_interrupted() {
        "Interrupted"
    } else {
        "Complete"
    };
    println!("\n=== {stage} annotation {title} ===");
    println!("Resumed from: {}", outcome.resumed_from);
    println!("Rows written: {}", outcome.rows_written);
    println!("Blank rows:   {}", outcome.blank_rows);
    println!("Chunks:       {}", outcome.chunks);
    if let Some(total) = outcome.total_rows {
        println!("Input rows:   {total}");
    }
    println!("Runtime:      {:.1}s", outcome.runtime_secs);
    if outcome.is_interrupted() {
        println!(
            "Progress saved at row {}. Re-run to resume from there.",
            outcome.checkpoint
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Example => {
            println!("{EXAMPLE_CONFIG}");
        }

        Commands::Validate => {
            let config = Config::from_file(&cli.config)
                .with_context(|| format!("Failed to load config from {:?}", cli.config))?;
            config
                .classifier
                .resolve_api_key()
                .context("Failed to resolve classifier API key")?;

            info!("Configuration is valid");
            info!("  Input: {:?} (column '{}')", config.input.path, config.input.text_column);
            for stage in Stage::ALL {
                let s = config.stage(stage);
                info!(
                    "  {stage}: {:?}, chunk {} rows, batch {}",
                    s.output, s.chunk_rows, s.batch_size
                );
            }
        }

        Commands::Annotate {
            stage,
            input,
            chunk_rows,
            no_count,
        } => {
            let config = load_config(&cli.config)?;
            let input = input.unwrap_or_else(|| config.input.path.clone());

            let cancel = CancelFlag::new();
            cancel.cancel_on_ctrl_c();

            for stage in stage.stages() {
                let mut settings = config.stage(stage);
                if let Some(rows) = chunk_rows {
                    if rows == 0 {
                        bail!("--chunk-rows must be > 0");
                    }
                    settings.chunk_rows = rows;
                }

                let engine = build_engine(&config, stage, settings.max_text_len)?;
                let scorer = BatchScorer::new(engine, settings.batch_size, settings.max_text_len);

                let mut driver =
                    AnnotationDriver::new(&input, &config.input.text_column, settings, scorer)
                        .with_cancel(cancel.clone())
                        .with_progress(Box::new(ProgressBarObserver::new(stage.as_str())));
                if no_count {
                    driver = driver.without_total();
                }

                let outcome = driver
                    .run()
                    .await
                    .with_context(|| format!("{stage} annotation failed"))?;
                print_outcome(stage, &outcome);

                if outcome.is_interrupted() {
                    break;
                }
            }
        }

        Commands::Merge { output } => {
            let config = load_config(&cli.config)?;
            let output = output.unwrap_or_else(|| config.merge.output.clone());

            let stats = merge_stage_outputs(
                &config.stage(Stage::Lexicon),
                &config.stage(Stage::Classifier),
                &config.merge.keys,
                &output,
            )
            .context("Merge failed")?;

            println!("\n=== Merge Complete ===");
            println!("Rows:    {}", stats.rows);
            println!("Columns: {}", stats.columns);
            println!("Output:  {:?}", stats.output);
        }

        Commands::Status => {
            let config = load_config(&cli.config)?;
            for stage in Stage::ALL {
                let settings = config.stage(stage);
                let status = StageStatus::inspect(&settings)
                    .with_context(|| format!("Failed to inspect {stage}"))?;

                let plan = match status.plan {
                    Plan::Fresh => "fresh start".to_string(),
                    Plan::Resume(row) => format!("resume from row {row}"),
                    Plan::Restart => "checkpoint without output, restart from row 0".to_string(),
                    Plan::Rejected => "rejected: output exists without checkpoint".to_string(),
                };

                println!("{stage}:");
                println!("  Checkpoint: {} ({:?})", status.checkpoint, settings.checkpoint);
                println!(
                    "  Output:     {} ({:?})",
                    if status.output_exists { "present" } else { "absent" },
                    settings.output
                );
                if status.journal_pending {
                    println!("  Journal:    pending, resolved on next annotate");
                }
                println!("  Next run:   {plan}");
            }
        }

        Commands::Reset { stage } => {
            let config = load_config(&cli.config)?;
            for stage in stage.stages() {
                let removed = reset_stage(&config.stage(stage))
                    .with_context(|| format!("Failed to reset {stage}"))?;
                if removed == 0 {
                    warn!("{stage}: nothing to reset");
                } else {
                    println!("{stage}: removed {removed} file(s)");
                }
            }
        }
    }

    Ok(())
}
