//! Data types shared by the batch pipeline stages.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::MessageRole;

/// Newline separator counted against the byte budget for every line.
pub const LINE_SEPARATOR_BYTES: usize = 1;

/// Only transcription version written by reconciliation.
pub const TRANSCRIPTION_VERSION: u32 = 1;

// ═══════════════════════════════════════════
// Request side
// ═══════════════════════════════════════════

/// One serialized inference request, destined for exactly one line of a batch file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub document_id: String,
    pub payload: String,
}

impl RequestLine {
    /// Bytes this line occupies in a batch file, separator included.
    pub fn encoded_len(&self) -> usize {
        self.payload.len() + LINE_SEPARATOR_BYTES
    }
}

/// Ordered run of request lines submitted together as one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchGroup {
    lines: Vec<RequestLine>,
    encoded_bytes: usize,
}

impl BatchGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, line: RequestLine) {
        self.encoded_bytes += line.encoded_len();
        self.lines.push(line);
    }

    pub fn lines(&self) -> &[RequestLine] {
        &self.lines
    }

    pub fn into_lines(self) -> Vec<RequestLine> {
        self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Sum of line bytes plus one separator per line.
    pub fn encoded_bytes(&self) -> usize {
        self.encoded_bytes
    }

    pub fn document_ids(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(|l| l.document_id.as_str())
    }

    /// Newline-delimited file body, trailing newline included.
    pub fn to_jsonl(&self) -> String {
        let mut out = String::with_capacity(self.encoded_bytes);
        for line in &self.lines {
            out.push_str(&line.payload);
            out.push('\n');
        }
        out
    }
}

/// Registration payload for a bulk job against an uploaded file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateBatchRequest {
    pub input_file_id: String,
    pub endpoint: String,
    pub completion_window: String,
    pub metadata: BTreeMap<String, String>,
}

// ═══════════════════════════════════════════
// Batch handles
// ═══════════════════════════════════════════

/// Lifecycle status reported by the bulk service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Validating,
    Queued,
    InProgress,
    Finalizing,
    Completed,
    Failed,
    Cancelling,
    #[serde(alias = "canceled")]
    Cancelled,
    Expired,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validating => "validating",
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::Finalizing => "finalizing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelling => "cancelling",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    /// No further transition happens from a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Expired
        )
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to an externally owned bulk job. Only ever refreshed by polling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchHandle {
    pub id: String,
    pub status: BatchStatus,
    #[serde(default)]
    pub error_file_id: Option<String>,
    #[serde(default)]
    pub output_file_id: Option<String>,
}

impl BatchHandle {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Status transitions surfaced while polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollEvent {
    StatusChanged {
        batch_id: String,
        status: BatchStatus,
    },
    PassCompleted {
        pass: u32,
        pending: usize,
        finished: usize,
    },
    Finished {
        total: usize,
        passes: u32,
    },
}

/// All handles in a terminal status, and how many passes that took.
#[derive(Debug, Clone)]
pub struct PollOutcome {
    pub handles: Vec<BatchHandle>,
    pub passes: u32,
}

// ═══════════════════════════════════════════
// Output side
// ═══════════════════════════════════════════

/// Raw shape of one output line. Everything optional: validation happens
/// in `parse_output_line`, not in serde.
#[derive(Debug, Deserialize)]
pub(crate) struct RawOutputLine {
    #[serde(default)]
    pub custom_id: Option<String>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
    #[serde(default)]
    pub response: Option<RawResponse>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawResponse {
    #[serde(default)]
    pub body: Option<RawResponseBody>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawResponseBody {
    #[serde(default)]
    pub choices: Vec<RawChoice>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawChoice {
    pub message: RawChoiceMessage,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

/// Model output conforming to the declared response schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelOutput {
    pub document_representation: String,
    pub conversation_translation: Vec<TranslatedTurn>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TranslatedTurn {
    #[serde(rename = "type")]
    pub speaker_role: MessageRole,
    pub content: String,
}

/// A validated output line, ready to persist.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputRecord {
    pub document_id: String,
    pub conversation_turns: Vec<TranslatedTurn>,
    pub document_representation: String,
}

/// Why a single output line was skipped.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LineFailure {
    #[error("malformed JSON: {0}")]
    MalformedJson(String),

    #[error("missing custom_id")]
    MissingCustomId,

    #[error("item {document_id} carries an error: {error}")]
    ItemError { document_id: String, error: String },

    #[error("item {document_id} has no message content")]
    MissingContent { document_id: String },

    #[error("item {document_id} violates the output schema: {reason}")]
    SchemaViolation { document_id: String, reason: String },
}

impl LineFailure {
    pub fn document_id(&self) -> Option<&str> {
        match self {
            Self::MalformedJson(_) | Self::MissingCustomId => None,
            Self::ItemError { document_id, .. }
            | Self::MissingContent { document_id }
            | Self::SchemaViolation { document_id, .. } => Some(document_id),
        }
    }
}

/// A skipped line and its 1-based position in the output stream.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedLine {
    pub line_number: usize,
    pub failure: LineFailure,
}

/// Counts from applying one output stream to the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    pub batch_id: Option<String>,
    pub records_applied: u32,
    pub messages_inserted: u32,
    pub messages_updated: u32,
    pub transcriptions_inserted: u32,
    pub transcriptions_updated: u32,
    pub skipped: Vec<SkippedLine>,
}

/// What reconciliation did with one terminal batch.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// Terminal but not completed: nothing to apply.
    NotCompleted { batch_id: String, status: BatchStatus },
    /// The service produced an error file; its content is surfaced instead.
    ErrorFile { batch_id: String, content: String },
    Applied(ReconcileReport),
}

/// Summary of an end-to-end pipeline run.
#[derive(Debug, Default)]
pub struct BatchRunSummary {
    pub batch_ids: Vec<String>,
    pub outcomes: Vec<ReconcileOutcome>,
    pub errors: Vec<String>,
}

impl BatchRunSummary {
    pub fn records_applied(&self) -> u32 {
        self.outcomes
            .iter()
            .map(|o| match o {
                ReconcileOutcome::Applied(report) => report.records_applied,
                _ => 0,
            })
            .sum()
    }
}
