//! Error types for the batch submission / polling / reconciliation pipeline.

use thiserror::Error;

use super::types::BatchHandle;
use crate::db::DatabaseError;
use crate::pipeline::render::RenderError;

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Batch service returned error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("Response parsing error: {0}")]
    ResponseParsing(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid request line: {0}")]
    InvalidRequest(String),

    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("Batch {0} completed without an output file")]
    MissingOutputFile(String),

    #[error("Polling cancelled with {pending} batch(es) still pending")]
    Cancelled {
        pending: usize,
        finished: Vec<BatchHandle>,
    },

    #[error("Polling deadline passed with {pending} batch(es) still pending")]
    TimedOut {
        pending: usize,
        finished: Vec<BatchHandle>,
    },
}
