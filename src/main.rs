use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use cvreview_lib::config::{self, PipelineConfig};
use cvreview_lib::db;
use cvreview_lib::pipeline::batch::{
    reconcile_directory, BatchPipeline, BatchRunSummary, CancellationToken, PipelineSettings,
    PollEvent, ReconcileOutcome, SqliteDocumentStore,
};
use cvreview_lib::pipeline::dataset::{self, DEFAULT_VALIDATION_RATIO};
use cvreview_lib::pipeline::openai::OpenAiBatchClient;
use cvreview_lib::pipeline::prompt_templates::{FINE_TUNE_SYSTEM_PROMPT, TRANSCRIPTION_SYSTEM_PROMPT};
use cvreview_lib::pipeline::render::PdfiumRenderer;
use cvreview_lib::pipeline::source::{load_input_data, prepare_documents};

#[derive(Parser)]
#[command(name = "cvreview", version)]
#[command(about = "Batch transcription of CV reviews into a fine-tuning dataset", long_about = None)]
struct Cli {
    /// SQLite database (defaults to the app data directory)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render, submit, poll and reconcile every document in an input file
    Run {
        /// JSON object of {doc_id: {messages, pdf_filepath}}
        #[arg(long)]
        input: PathBuf,
        /// Byte budget per batch file (overrides CVREVIEW_MAX_BATCH_BYTES)
        #[arg(long)]
        max_batch_bytes: Option<usize>,
        /// Stop polling after this many minutes
        #[arg(long)]
        timeout_mins: Option<u64>,
    },
    /// Poll previously submitted batches and reconcile them
    Resume {
        #[arg(required = true)]
        batch_ids: Vec<String>,
        #[arg(long)]
        timeout_mins: Option<u64>,
    },
    /// Re-apply every archived out-*.jsonl file in a directory
    ReconcileDir {
        /// Defaults to the api_call_results directory
        dir: Option<PathBuf>,
    },
    /// Write <base>_train.jsonl and <base>_val.jsonl
    Dataset {
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long, default_value_t = DEFAULT_VALIDATION_RATIO)]
        validation_ratio: f64,
        /// Directory of archived batch outputs to take document ids from
        #[arg(long)]
        results_dir: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    cvreview_lib::init_tracing();

    let cli = Cli::parse();
    let db_path = cli.database.unwrap_or_else(config::database_path);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    info!(version = config::APP_VERSION, database = %db_path.display(), "{} starting", config::APP_NAME);

    match cli.command {
        Commands::Run {
            input,
            max_batch_bytes,
            timeout_mins,
        } => {
            let mut config = PipelineConfig::from_env()?;
            if let Some(bytes) = max_batch_bytes.filter(|b| *b > 0) {
                config.max_batch_bytes = bytes;
            }
            let store = Arc::new(SqliteDocumentStore::open(&db_path)?);
            let renderer = PdfiumRenderer::new().context("PDFium is required to render resumes")?;

            let data = load_input_data(&input)
                .with_context(|| format!("Failed to load {}", input.display()))?;
            let documents = prepare_documents(&data, &renderer, &*store)?;

            let pipeline = build_pipeline(&config, store, timeout_mins)?;
            let summary = pipeline.run(&documents, &CancellationToken::new(), Some(&log_poll_event))?;
            report(&summary);
        }
        Commands::Resume {
            batch_ids,
            timeout_mins,
        } => {
            let config = PipelineConfig::from_env()?;
            let store = Arc::new(SqliteDocumentStore::open(&db_path)?);
            let pipeline = build_pipeline(&config, store, timeout_mins)?;
            let summary = pipeline.await_and_reconcile(
                &batch_ids,
                &CancellationToken::new(),
                Some(&log_poll_event),
            )?;
            report(&summary);
        }
        Commands::ReconcileDir { dir } => {
            let dir = dir.unwrap_or_else(config::results_dir);
            let store = SqliteDocumentStore::open(&db_path)?;
            let reports = reconcile_directory(&store, &dir)
                .with_context(|| format!("Failed to reconcile {}", dir.display()))?;
            let applied: u32 = reports.iter().map(|r| r.records_applied).sum();
            let skipped: usize = reports.iter().map(|r| r.skipped.len()).sum();
            info!(files = reports.len(), applied, skipped, "Directory reconciled");
        }
        Commands::Dataset {
            out,
            validation_ratio,
            results_dir,
        } => {
            let out = out.unwrap_or_else(|| config::fine_tune_dir().join("dataset.jsonl"));
            let results_dir = results_dir.unwrap_or_else(config::results_dir);
            let conn = db::open_database(&db_path)?;
            let files = dataset::write_dataset(
                &conn,
                &results_dir,
                &out,
                validation_ratio,
                FINE_TUNE_SYSTEM_PROMPT,
                &mut rand::thread_rng(),
            )?;
            info!(
                train = %files.train_path.display(),
                validation = %files.validation_path.display(),
                "Dataset ready"
            );
        }
    }

    Ok(())
}

fn build_pipeline(
    config: &PipelineConfig,
    store: Arc<SqliteDocumentStore>,
    timeout_mins: Option<u64>,
) -> Result<BatchPipeline> {
    let api = Arc::new(OpenAiBatchClient::from_config(config)?);
    let mut settings = PipelineSettings::from_config(config, TRANSCRIPTION_SYSTEM_PROMPT);
    settings.poll_timeout = timeout_mins.map(|m| Duration::from_secs(m * 60));
    Ok(BatchPipeline::new(api, store, settings))
}

fn log_poll_event(event: PollEvent) {
    match event {
        PollEvent::StatusChanged { batch_id, status } => {
            info!(batch_id = %batch_id, status = %status, "Batch status");
        }
        PollEvent::PassCompleted {
            pass,
            pending,
            finished,
        } => {
            info!(pass, pending, finished, "Poll pass complete");
        }
        PollEvent::Finished { total, passes } => {
            info!(total, passes, "All batches terminal");
        }
    }
}

fn report(summary: &BatchRunSummary) {
    for outcome in &summary.outcomes {
        match outcome {
            ReconcileOutcome::Applied(r) => info!(
                batch_id = r.batch_id.as_deref().unwrap_or("-"),
                applied = r.records_applied,
                skipped = r.skipped.len(),
                "Batch applied"
            ),
            ReconcileOutcome::ErrorFile { batch_id, .. } => {
                warn!(batch_id = %batch_id, "Batch returned an error file")
            }
            ReconcileOutcome::NotCompleted { batch_id, status } => {
                warn!(batch_id = %batch_id, status = %status, "Batch not completed")
            }
        }
    }
    for error in &summary.errors {
        warn!(error = %error, "Batch failed");
    }
    info!(
        batches = summary.batch_ids.len(),
        records = summary.records_applied(),
        "Run finished"
    );
}
