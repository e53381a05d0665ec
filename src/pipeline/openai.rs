//! HTTP client for the OpenAI Files + Batches API.

use std::path::Path;
use std::time::Duration;

use reqwest::blocking::{multipart, Client, RequestBuilder, Response};
use serde::Deserialize;
use tracing::debug;

use super::batch::{BatchApi, BatchError, BatchHandle, CreateBatchRequest};
use crate::config::PipelineConfig;

const FILE_PURPOSE_BATCH: &str = "batch";

pub struct OpenAiBatchClient {
    base_url: String,
    api_key: String,
    client: Client,
    timeout_secs: u64,
}

#[derive(Deserialize)]
struct FileObject {
    id: String,
}

impl OpenAiBatchClient {
    pub fn new(base_url: &str, api_key: &str, timeout_secs: u64) -> Result<Self, BatchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| BatchError::HttpClient(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client,
            timeout_secs,
        })
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self, BatchError> {
        Self::new(&config.base_url, &config.api_key, config.http_timeout_secs)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn send(&self, request: RequestBuilder) -> Result<Response, BatchError> {
        let response = request
            .bearer_auth(&self.api_key)
            .send()
            .map_err(|e| {
                if e.is_connect() {
                    BatchError::HttpClient(format!("Cannot connect to {}", self.base_url))
                } else if e.is_timeout() {
                    BatchError::HttpClient(format!(
                        "Request timed out after {}s",
                        self.timeout_secs
                    ))
                } else {
                    BatchError::HttpClient(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(BatchError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

impl BatchApi for OpenAiBatchClient {
    fn upload_batch_file(&self, path: &Path) -> Result<String, BatchError> {
        let form = multipart::Form::new()
            .text("purpose", FILE_PURPOSE_BATCH)
            .file("file", path)?;

        let response = self.send(self.client.post(self.url("/files")).multipart(form))?;
        let file: FileObject = response
            .json()
            .map_err(|e| BatchError::ResponseParsing(e.to_string()))?;

        debug!(file_id = %file.id, path = %path.display(), "Uploaded batch file");
        Ok(file.id)
    }

    fn create_batch(&self, request: &CreateBatchRequest) -> Result<BatchHandle, BatchError> {
        let response = self.send(self.client.post(self.url("/batches")).json(request))?;
        response
            .json()
            .map_err(|e| BatchError::ResponseParsing(e.to_string()))
    }

    fn retrieve_batch(&self, batch_id: &str) -> Result<BatchHandle, BatchError> {
        let response = self.send(self.client.get(self.url(&format!("/batches/{batch_id}"))))?;
        response
            .json()
            .map_err(|e| BatchError::ResponseParsing(e.to_string()))
    }

    fn file_content(&self, file_id: &str) -> Result<String, BatchError> {
        let response = self.send(self.client.get(self.url(&format!("/files/{file_id}/content"))))?;
        response
            .text()
            .map_err(|e| BatchError::ResponseParsing(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = OpenAiBatchClient::new("https://api.openai.com/v1/", "sk-test", 30).unwrap();
        assert_eq!(client.base_url(), "https://api.openai.com/v1");
        assert_eq!(client.url("/batches"), "https://api.openai.com/v1/batches");
    }

    #[test]
    fn unreachable_host_maps_to_http_error() {
        // Port 9 (discard) on localhost is closed in test environments
        let client = OpenAiBatchClient::new("http://127.0.0.1:9", "sk-test", 2).unwrap();
        let err = client.retrieve_batch("batch_1").unwrap_err();
        assert!(matches!(err, BatchError::HttpClient(_)));
    }

    #[test]
    fn missing_upload_file_is_io_error() {
        let client = OpenAiBatchClient::new("http://127.0.0.1:9", "sk-test", 2).unwrap();
        let err = client
            .upload_batch_file(Path::new("/nonexistent/batchinput_1.jsonl"))
            .unwrap_err();
        assert!(matches!(err, BatchError::Io(_)));
    }

    #[test]
    fn client_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<OpenAiBatchClient>();
    }
}
