//! Input loading and document preparation.
//!
//! The input file is a JSON object keyed by document id:
//!
//! ```json
//! { "doc_1": { "messages": ["...", "..."], "pdf_filepath": "/cvs/doc_1.pdf" } }
//! ```
//!
//! Entry order is preserved so batch files list documents in input order.

use std::fmt;
use std::fs;
use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::batch::{BatchError, DocumentStore, PipelineDocument};
use super::render::{PageRenderer, DEFAULT_RENDER_DPI};

pub const PDF_MIME_TYPE: &str = "application/pdf";

/// One message of a review thread, as exported.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum InputMessage {
    Text(String),
    Turn { role: String, content: String },
    Other(Value),
}

impl InputMessage {
    /// Single-line text form used in the request's conversation text.
    pub fn render(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Turn { role, content } => {
                serde_json::json!({ "role": role, "content": content }).to_string()
            }
            Self::Other(value) => value.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct InputDocument {
    #[serde(default)]
    pub messages: Vec<InputMessage>,
    #[serde(default)]
    pub pdf_filepath: Option<String>,
}

impl InputDocument {
    /// Messages joined with newlines.
    pub fn conversation_text(&self) -> String {
        self.messages
            .iter()
            .map(InputMessage::render)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Path of the resume, if it is a PDF.
    pub fn pdf_path(&self) -> Option<&Path> {
        self.pdf_filepath
            .as_deref()
            .filter(|p| p.to_lowercase().ends_with(".pdf"))
            .map(Path::new)
    }
}

/// Documents in input-file order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InputData {
    pub documents: Vec<(String, InputDocument)>,
}

impl<'de> Deserialize<'de> for InputData {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedVisitor;

        impl<'de> Visitor<'de> for OrderedVisitor {
            type Value = InputData;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object mapping document ids to documents")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<InputData, A::Error> {
                let mut documents = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((id, doc)) = map.next_entry::<String, InputDocument>()? {
                    documents.push((id, doc));
                }
                Ok(InputData { documents })
            }
        }

        deserializer.deserialize_map(OrderedVisitor)
    }
}

pub fn load_input_data(path: &Path) -> Result<InputData, BatchError> {
    let text = fs::read_to_string(path)?;
    let data: InputData = serde_json::from_str(&text)?;
    info!(path = %path.display(), documents = data.documents.len(), "Loaded input data");
    Ok(data)
}

/// Render each PDF's first page, record it in the store and pair it with the
/// conversation text.
///
/// An unreadable or unrenderable PDF is logged and the document goes out
/// without an image. Store failures propagate.
pub fn prepare_documents(
    input: &InputData,
    renderer: &dyn PageRenderer,
    store: &dyn DocumentStore,
) -> Result<Vec<PipelineDocument>, BatchError> {
    let mut prepared = Vec::with_capacity(input.documents.len());

    for (id, doc) in &input.documents {
        let image_png_base64 = match doc.pdf_path() {
            Some(path) => match render_pdf(path, renderer) {
                Ok(b64) => {
                    store.upsert_document(id, PDF_MIME_TYPE, &b64)?;
                    debug!(document_id = %id, "Stored rendered document");
                    Some(b64)
                }
                Err(e) => {
                    warn!(document_id = %id, path = %path.display(), error = %e, "Could not render resume");
                    None
                }
            },
            None => None,
        };

        prepared.push(PipelineDocument {
            id: id.clone(),
            conversation: doc.conversation_text(),
            image_png_base64,
        });
    }

    Ok(prepared)
}

fn render_pdf(path: &Path, renderer: &dyn PageRenderer) -> Result<String, BatchError> {
    let bytes = fs::read(path)?;
    let png = renderer.render_first_page(&bytes, DEFAULT_RENDER_DPI)?;
    Ok(STANDARD.encode(png))
}
