//! Uploads a batch file and registers a bulk job against it.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use tracing::info;

use super::chunker::write_batch_file;
use super::error::BatchError;
use super::request::CHAT_COMPLETIONS_URL;
use super::traits::BatchApi;
use super::types::{BatchGroup, BatchHandle, CreateBatchRequest};

pub const DEFAULT_COMPLETION_WINDOW: &str = "24h";
pub const DEFAULT_JOB_DESCRIPTION: &str = "Nightly CV transcription job";

pub struct BatchSubmitter {
    api: Arc<dyn BatchApi>,
    completion_window: String,
    description: String,
}

impl BatchSubmitter {
    pub fn new(api: Arc<dyn BatchApi>) -> Self {
        Self {
            api,
            completion_window: DEFAULT_COMPLETION_WINDOW.to_string(),
            description: DEFAULT_JOB_DESCRIPTION.to_string(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Upload `path` and create a job for it. Either failure propagates;
    /// no job is created when the upload fails.
    pub fn submit_file(&self, path: &Path) -> Result<BatchHandle, BatchError> {
        let file_id = self.api.upload_batch_file(path)?;

        let request = CreateBatchRequest {
            input_file_id: file_id.clone(),
            endpoint: CHAT_COMPLETIONS_URL.to_string(),
            completion_window: self.completion_window.clone(),
            metadata: BTreeMap::from([("description".to_string(), self.description.clone())]),
        };
        let handle = self.api.create_batch(&request)?;

        info!(
            batch_id = %handle.id,
            file_id = %file_id,
            path = %path.display(),
            "Submitted batch"
        );
        Ok(handle)
    }

    /// Write `group` to `path`, then submit it.
    pub fn submit_group(&self, group: &BatchGroup, path: &Path) -> Result<BatchHandle, BatchError> {
        write_batch_file(group, path)?;
        self.submit_file(path)
    }
}
