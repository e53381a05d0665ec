use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::MessageRole;

/// A resume attachment, stored as the base64 PNG sent to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub mime_type: String,
    pub document_blob: String,
    pub created_at: NaiveDateTime,
}

/// One translated conversation turn attached to a document.
///
/// Natural key is `(document_id, content)`; `turn_index` only orders turns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMessage {
    pub id: Uuid,
    pub document_id: String,
    pub role: MessageRole,
    pub content: String,
    pub turn_index: u32,
    pub updated_at: NaiveDateTime,
}

/// Structured text representation of a document, keyed by `(document_id, version)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentTranscription {
    pub document_id: String,
    pub version: u32,
    pub document_representation: String,
    pub updated_at: NaiveDateTime,
}
