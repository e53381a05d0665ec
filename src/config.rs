use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Application-level constants
pub const APP_NAME: &str = "CvReview";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Hard upper bound the bulk service accepts for one input file.
pub const SERVICE_MAX_BATCH_BYTES: usize = 200 * 1024 * 1024;

/// Default per-file budget. Lower than the service limit so a single batch
/// stays inside the per-batch enqueued-token allowance.
pub const DEFAULT_MAX_BATCH_BYTES: usize = 50 * 1024 * 1024;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 300;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {var}: {value}")]
    InvalidValue { var: &'static str, value: String },
}

/// Default tracing filter when RUST_LOG is unset.
pub fn default_log_filter() -> &'static str {
    if cfg!(debug_assertions) {
        "cvreview=debug,cvreview_lib=debug"
    } else {
        "cvreview=info,cvreview_lib=info"
    }
}

/// Get the application data directory.
/// `CVREVIEW_DATA_DIR` if set, else ~/CvReview/.
pub fn app_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("CVREVIEW_DATA_DIR") {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// Batch input files (`batchinput_<n>.jsonl`).
pub fn batches_dir() -> PathBuf {
    app_data_dir().join("batches")
}

/// Downloaded batch outputs (`out-<batch_id>.jsonl`).
pub fn results_dir() -> PathBuf {
    app_data_dir().join("api_call_results")
}

pub fn fine_tune_dir() -> PathBuf {
    app_data_dir().join("fine_tune_data")
}

pub fn database_path() -> PathBuf {
    app_data_dir().join("cvreview.db")
}

/// Settings for one pipeline run, resolved from the environment.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_batch_bytes: usize,
    pub poll_interval: Duration,
    pub http_timeout_secs: u64,
    pub batch_dir: PathBuf,
    pub results_dir: PathBuf,
}

impl PipelineConfig {
    /// Read `OPENAI_API_KEY` (required) plus the optional `OPENAI_BASE_URL`,
    /// `CVREVIEW_MODEL`, `CVREVIEW_MAX_BATCH_BYTES`,
    /// `CVREVIEW_POLL_INTERVAL_SECS` and `CVREVIEW_HTTP_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_key = lookup("OPENAI_API_KEY")
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::MissingVar("OPENAI_API_KEY"))?;

        let max_batch_bytes =
            parse_var(&lookup, "CVREVIEW_MAX_BATCH_BYTES", DEFAULT_MAX_BATCH_BYTES)?;
        if max_batch_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                var: "CVREVIEW_MAX_BATCH_BYTES",
                value: "0".into(),
            });
        }

        Ok(Self {
            api_key,
            base_url: lookup("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: lookup("CVREVIEW_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            max_batch_bytes,
            poll_interval: Duration::from_secs(parse_var(
                &lookup,
                "CVREVIEW_POLL_INTERVAL_SECS",
                DEFAULT_POLL_INTERVAL_SECS,
            )?),
            http_timeout_secs: parse_var(
                &lookup,
                "CVREVIEW_HTTP_TIMEOUT_SECS",
                DEFAULT_HTTP_TIMEOUT_SECS,
            )?,
            batch_dir: batches_dir(),
            results_dir: results_dir(),
        })
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(var) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { var, value }),
    }
}
