//! Applies a completed batch's output to the document store.
//!
//! Every line is parsed and validated on its own; a bad line is logged and
//! recorded in the report while its siblings carry on. Writes are upserts on
//! natural keys, so applying the same output any number of times leaves the
//! store in the same state.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::error::BatchError;
use super::traits::{BatchApi, DocumentStore};
use super::types::{
    BatchHandle, BatchStatus, LineFailure, ModelOutput, OutputRecord, RawOutputLine,
    ReconcileOutcome, ReconcileReport, SkippedLine, TranslatedTurn, TRANSCRIPTION_VERSION,
};
use crate::db::UpsertOutcome;
use crate::models::MessageRole;

pub struct Reconciler {
    api: Arc<dyn BatchApi>,
    store: Arc<dyn DocumentStore>,
    archive_dir: Option<PathBuf>,
}

impl Reconciler {
    pub fn new(api: Arc<dyn BatchApi>, store: Arc<dyn DocumentStore>) -> Self {
        Self {
            api,
            store,
            archive_dir: None,
        }
    }

    /// Keep a copy of each downloaded output as `out-<batch_id>.jsonl`.
    pub fn with_archive_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.archive_dir = Some(dir.into());
        self
    }

    /// Reconcile one batch.
    ///
    /// An error file takes precedence over everything else: its content is
    /// surfaced and nothing is persisted. A batch that did not complete is
    /// skipped. Store failures abort the rest of this batch.
    pub fn reconcile(&self, handle: &BatchHandle) -> Result<ReconcileOutcome, BatchError> {
        if let Some(error_file_id) = &handle.error_file_id {
            let content = self.api.file_content(error_file_id)?;
            error!(
                batch_id = %handle.id,
                error_file_id = %error_file_id,
                content = %content.trim_end(),
                "Batch produced an error file; nothing persisted"
            );
            return Ok(ReconcileOutcome::ErrorFile {
                batch_id: handle.id.clone(),
                content,
            });
        }

        if handle.status != BatchStatus::Completed {
            warn!(batch_id = %handle.id, status = %handle.status, "Batch did not complete; skipping");
            return Ok(ReconcileOutcome::NotCompleted {
                batch_id: handle.id.clone(),
                status: handle.status,
            });
        }

        let output_file_id = handle
            .output_file_id
            .as_deref()
            .ok_or_else(|| BatchError::MissingOutputFile(handle.id.clone()))?;
        let content = self.api.file_content(output_file_id)?;

        if let Some(dir) = &self.archive_dir {
            let path = archive_path(dir, &handle.id);
            fs::create_dir_all(dir)?;
            fs::write(&path, &content)?;
            debug!(path = %path.display(), "Archived batch output");
        }

        let mut report = self.apply_output(&content)?;
        report.batch_id = Some(handle.id.clone());
        info!(
            batch_id = %handle.id,
            applied = report.records_applied,
            skipped = report.skipped.len(),
            "Reconciled batch"
        );
        Ok(ReconcileOutcome::Applied(report))
    }

    /// Re-apply a previously archived output file.
    pub fn reconcile_file(&self, path: &Path) -> Result<ReconcileReport, BatchError> {
        reconcile_file(self.store.as_ref(), path)
    }

    pub fn apply_output(&self, content: &str) -> Result<ReconcileReport, BatchError> {
        apply_output(self.store.as_ref(), content)
    }
}

/// Re-apply an archived output file; the batch id is taken from an
/// `out-<batch_id>.jsonl` file name.
pub fn reconcile_file(store: &dyn DocumentStore, path: &Path) -> Result<ReconcileReport, BatchError> {
    let content = fs::read_to_string(path)?;
    let mut report = apply_output(store, &content)?;
    report.batch_id = path
        .file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.strip_prefix("out-").unwrap_or(s).to_string());
    Ok(report)
}

/// Parse and persist every non-empty line of a batch output stream.
pub fn apply_output(store: &dyn DocumentStore, content: &str) -> Result<ReconcileReport, BatchError> {
    let mut report = ReconcileReport::default();

    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_output_line(line) {
            Ok(record) => persist(store, &record, &mut report)?,
            Err(failure) => {
                warn!(
                    line = index + 1,
                    document_id = failure.document_id().unwrap_or("-"),
                    reason = %failure,
                    "Skipping output line"
                );
                report.skipped.push(SkippedLine {
                    line_number: index + 1,
                    failure,
                });
            }
        }
    }

    Ok(report)
}

fn persist(
    store: &dyn DocumentStore,
    record: &OutputRecord,
    report: &mut ReconcileReport,
) -> Result<(), BatchError> {
    let roles = resolve_roles(&record.conversation_turns);
    for (turn_index, (turn, role)) in record.conversation_turns.iter().zip(roles).enumerate() {
        match store.upsert_message(&record.document_id, &turn.content, role, turn_index as u32)? {
            UpsertOutcome::Inserted => report.messages_inserted += 1,
            UpsertOutcome::Updated | UpsertOutcome::Unchanged => report.messages_updated += 1,
        }
    }

    match store.upsert_transcription(
        &record.document_id,
        TRANSCRIPTION_VERSION,
        &record.document_representation,
    )? {
        UpsertOutcome::Inserted => report.transcriptions_inserted += 1,
        UpsertOutcome::Updated | UpsertOutcome::Unchanged => report.transcriptions_updated += 1,
    }

    report.records_applied += 1;
    debug!(
        document_id = %record.document_id,
        turns = record.conversation_turns.len(),
        "Persisted output record"
    );
    Ok(())
}

/// `out-<batch_id>.jsonl` inside `dir`.
pub fn archive_path(dir: &Path, batch_id: &str) -> PathBuf {
    dir.join(format!("out-{batch_id}.jsonl"))
}

/// Validate one output line into a record.
pub fn parse_output_line(line: &str) -> Result<OutputRecord, LineFailure> {
    let raw: RawOutputLine =
        serde_json::from_str(line).map_err(|e| LineFailure::MalformedJson(e.to_string()))?;

    let document_id = raw
        .custom_id
        .filter(|id| !id.trim().is_empty())
        .ok_or(LineFailure::MissingCustomId)?;

    if let Some(error) = raw.error {
        return Err(LineFailure::ItemError {
            document_id,
            error: error.to_string(),
        });
    }

    let content = raw
        .response
        .and_then(|r| r.body)
        .and_then(|b| b.choices.into_iter().next())
        .and_then(|c| c.message.content);
    let Some(content) = content else {
        return Err(LineFailure::MissingContent { document_id });
    };

    let output: ModelOutput = match serde_json::from_str(&content) {
        Ok(output) => output,
        Err(e) => {
            return Err(LineFailure::SchemaViolation {
                document_id,
                reason: e.to_string(),
            })
        }
    };

    Ok(OutputRecord {
        document_id,
        conversation_turns: output.conversation_translation,
        document_representation: output.document_representation,
    })
}

/// Persisted role for each turn. A lone turn is always the assistant's:
/// the model tends to mislabel single-reply threads as `user`.
pub fn resolve_roles(turns: &[TranslatedTurn]) -> Vec<MessageRole> {
    if turns.len() == 1 {
        return vec![MessageRole::Assistant];
    }
    turns.iter().map(|t| t.speaker_role).collect()
}
