//! In-memory `BatchApi` for tests and dry runs.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::error::BatchError;
use super::traits::BatchApi;
use super::types::{BatchHandle, BatchStatus, CreateBatchRequest};

/// Scripted bulk service.
///
/// Created batches get ids `batch_1`, `batch_2`, ... Each retrieve pops the
/// next status from the batch's script; the last status repeats forever.
/// Batches without a script report `completed` on the first retrieve.
pub struct MockBatchApi {
    state: Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    next_batch: u32,
    fail_uploads: bool,
    failing_retrieves: HashMap<String, u32>,
    status_scripts: HashMap<String, VecDeque<BatchStatus>>,
    output_files: HashMap<String, (String, String)>,
    error_files: HashMap<String, (String, String)>,
    uploaded: Vec<(PathBuf, String)>,
    created: Vec<CreateBatchRequest>,
    retrieve_calls: u32,
}

impl MockBatchApi {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
        }
    }

    /// Statuses returned by successive retrieves of `batch_id`.
    pub fn with_status_sequence(self, batch_id: &str, statuses: &[BatchStatus]) -> Self {
        self.lock()
            .status_scripts
            .insert(batch_id.to_string(), statuses.iter().copied().collect());
        self
    }

    /// Output file attached to `batch_id` once it reports completed.
    pub fn with_output_file(self, batch_id: &str, file_id: &str, content: &str) -> Self {
        self.lock().output_files.insert(
            batch_id.to_string(),
            (file_id.to_string(), content.to_string()),
        );
        self
    }

    pub fn with_error_file(self, batch_id: &str, file_id: &str, content: &str) -> Self {
        self.lock().error_files.insert(
            batch_id.to_string(),
            (file_id.to_string(), content.to_string()),
        );
        self
    }

    /// Every upload fails with an HTTP error.
    pub fn failing_uploads(self) -> Self {
        self.lock().fail_uploads = true;
        self
    }

    /// The next `times` retrieves of `batch_id` fail before the script resumes.
    pub fn with_failing_retrieves(self, batch_id: &str, times: u32) -> Self {
        self.lock()
            .failing_retrieves
            .insert(batch_id.to_string(), times);
        self
    }

    pub fn uploaded_files(&self) -> Vec<(PathBuf, String)> {
        self.lock().uploaded.clone()
    }

    pub fn created_batches(&self) -> Vec<CreateBatchRequest> {
        self.lock().created.clone()
    }

    pub fn retrieve_calls(&self) -> u32 {
        self.lock().retrieve_calls
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        // A panic in another test thread must not cascade here.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MockBatchApi {
    fn default() -> Self {
        Self::new()
    }
}

impl MockState {
    fn handle(&self, batch_id: &str, status: BatchStatus) -> BatchHandle {
        let completed = status == BatchStatus::Completed;
        BatchHandle {
            id: batch_id.to_string(),
            status,
            output_file_id: self
                .output_files
                .get(batch_id)
                .filter(|_| completed)
                .map(|(id, _)| id.clone()),
            error_file_id: self
                .error_files
                .get(batch_id)
                .filter(|_| status.is_terminal())
                .map(|(id, _)| id.clone()),
        }
    }
}

impl BatchApi for MockBatchApi {
    fn upload_batch_file(&self, path: &Path) -> Result<String, BatchError> {
        let mut state = self.lock();
        if state.fail_uploads {
            return Err(BatchError::HttpClient("mock upload failure".into()));
        }
        let file_id = format!("file-in-{}", state.uploaded.len() + 1);
        state.uploaded.push((path.to_path_buf(), file_id.clone()));
        Ok(file_id)
    }

    fn create_batch(&self, request: &CreateBatchRequest) -> Result<BatchHandle, BatchError> {
        let mut state = self.lock();
        state.next_batch += 1;
        let batch_id = format!("batch_{}", state.next_batch);
        state.created.push(request.clone());
        Ok(state.handle(&batch_id, BatchStatus::Validating))
    }

    fn retrieve_batch(&self, batch_id: &str) -> Result<BatchHandle, BatchError> {
        let mut state = self.lock();
        state.retrieve_calls += 1;

        if let Some(remaining) = state.failing_retrieves.get_mut(batch_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(BatchError::HttpClient(format!(
                    "mock retrieve failure for {batch_id}"
                )));
            }
        }

        let status = match state.status_scripts.get_mut(batch_id) {
            Some(script) if script.len() > 1 => script.pop_front().unwrap_or(BatchStatus::Completed),
            Some(script) => script.front().copied().unwrap_or(BatchStatus::Completed),
            None => BatchStatus::Completed,
        };
        Ok(state.handle(batch_id, status))
    }

    fn file_content(&self, file_id: &str) -> Result<String, BatchError> {
        let state = self.lock();
        state
            .output_files
            .values()
            .chain(state.error_files.values())
            .find(|(id, _)| id == file_id)
            .map(|(_, content)| content.clone())
            .ok_or_else(|| BatchError::Api {
                status: 404,
                body: format!("No such file: {file_id}"),
            })
    }
}
