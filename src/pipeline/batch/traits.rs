//! Seams between the pipeline stages and the outside world.
//!
//! - BatchApi: the remote bulk inference service
//! - DocumentStore: the persistent document store

use std::path::Path;

use super::error::BatchError;
use super::types::{BatchHandle, CreateBatchRequest};
use crate::db::{DatabaseError, UpsertOutcome};
use crate::models::MessageRole;

/// Remote bulk inference service.
pub trait BatchApi: Send + Sync {
    /// Upload a batch input file and return the service's file id.
    fn upload_batch_file(&self, path: &Path) -> Result<String, BatchError>;

    /// Register a bulk job against an uploaded file.
    fn create_batch(&self, request: &CreateBatchRequest) -> Result<BatchHandle, BatchError>;

    /// Fetch the current status of a job.
    fn retrieve_batch(&self, batch_id: &str) -> Result<BatchHandle, BatchError>;

    /// Download a file's text content.
    fn file_content(&self, file_id: &str) -> Result<String, BatchError>;
}

/// Idempotent writes keyed on natural keys.
pub trait DocumentStore: Send + Sync {
    /// Create-only; an existing row is left untouched.
    fn upsert_document(
        &self,
        document_id: &str,
        mime_type: &str,
        document_blob: &str,
    ) -> Result<UpsertOutcome, DatabaseError>;

    /// Keyed on (document_id, content).
    fn upsert_message(
        &self,
        document_id: &str,
        content: &str,
        role: MessageRole,
        turn_index: u32,
    ) -> Result<UpsertOutcome, DatabaseError>;

    /// Keyed on (document_id, version).
    fn upsert_transcription(
        &self,
        document_id: &str,
        version: u32,
        document_representation: &str,
    ) -> Result<UpsertOutcome, DatabaseError>;
}
