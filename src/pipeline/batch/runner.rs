//! End-to-end batch run: build → chunk → submit → poll → reconcile.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use super::chunker::{chunk_request_lines, write_batch_files};
use super::error::BatchError;
use super::poller::{BatchPoller, CancellationToken};
use super::reconciler::{reconcile_file, Reconciler};
use super::request::RequestLineBuilder;
use super::submitter::BatchSubmitter;
use super::traits::{BatchApi, DocumentStore};
use super::types::{BatchHandle, BatchRunSummary, PollEvent, ReconcileReport, RequestLine};
use crate::config::PipelineConfig;

/// One document ready to be turned into a request line.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineDocument {
    pub id: String,
    pub conversation: String,
    /// Base64 PNG of the resume's first page, if it could be rendered.
    pub image_png_base64: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub system_prompt: String,
    pub model: String,
    pub max_batch_bytes: usize,
    pub poll_interval: Duration,
    pub poll_timeout: Option<Duration>,
    pub batch_dir: PathBuf,
    pub archive_dir: Option<PathBuf>,
}

impl PipelineSettings {
    pub fn from_config(config: &PipelineConfig, system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            model: config.model.clone(),
            max_batch_bytes: config.max_batch_bytes,
            poll_interval: config.poll_interval,
            poll_timeout: None,
            batch_dir: config.batch_dir.clone(),
            archive_dir: Some(config.results_dir.clone()),
        }
    }
}

pub struct BatchPipeline {
    builder: RequestLineBuilder,
    submitter: BatchSubmitter,
    poller: BatchPoller,
    reconciler: Reconciler,
    max_batch_bytes: usize,
    batch_dir: PathBuf,
}

impl BatchPipeline {
    pub fn new(
        api: Arc<dyn BatchApi>,
        store: Arc<dyn DocumentStore>,
        settings: PipelineSettings,
    ) -> Self {
        let mut poller = BatchPoller::new(api.clone(), settings.poll_interval);
        if let Some(timeout) = settings.poll_timeout {
            poller = poller.with_timeout(timeout);
        }
        let mut reconciler = Reconciler::new(api.clone(), store);
        if let Some(dir) = settings.archive_dir {
            reconciler = reconciler.with_archive_dir(dir);
        }

        Self {
            builder: RequestLineBuilder::new(settings.system_prompt, settings.model),
            submitter: BatchSubmitter::new(api),
            poller,
            reconciler,
            max_batch_bytes: settings.max_batch_bytes,
            batch_dir: settings.batch_dir,
        }
    }

    /// One request line per document. Document ids must be unique.
    pub fn build_lines(&self, documents: &[PipelineDocument]) -> Result<Vec<RequestLine>, BatchError> {
        let mut seen = HashSet::new();
        documents
            .iter()
            .map(|doc| {
                if !seen.insert(doc.id.as_str()) {
                    return Err(BatchError::InvalidRequest(format!(
                        "duplicate document id {}",
                        doc.id
                    )));
                }
                self.builder
                    .build(&doc.id, doc.image_png_base64.as_deref(), &doc.conversation)
            })
            .collect()
    }

    /// Chunk, write and submit every group in order. The first failed
    /// submission aborts the rest.
    pub fn submit(&self, lines: Vec<RequestLine>) -> Result<Vec<BatchHandle>, BatchError> {
        let groups = chunk_request_lines(lines, self.max_batch_bytes);
        let paths = write_batch_files(&groups, &self.batch_dir)?;
        info!(
            groups = groups.len(),
            max_batch_bytes = self.max_batch_bytes,
            dir = %self.batch_dir.display(),
            "Prepared batch files"
        );

        let mut handles = Vec::with_capacity(paths.len());
        for path in &paths {
            handles.push(self.submitter.submit_file(path)?);
        }
        Ok(handles)
    }

    /// Wait for `batch_ids` and reconcile each terminal batch. A batch whose
    /// reconciliation fails is recorded in `errors`; the others still run.
    pub fn await_and_reconcile(
        &self,
        batch_ids: &[String],
        cancel: &CancellationToken,
        progress: Option<&dyn Fn(PollEvent)>,
    ) -> Result<BatchRunSummary, BatchError> {
        let outcome = self.poller.poll_until_terminal(batch_ids, cancel, progress)?;

        let mut summary = BatchRunSummary {
            batch_ids: batch_ids.to_vec(),
            ..Default::default()
        };
        for handle in &outcome.handles {
            match self.reconciler.reconcile(handle) {
                Ok(result) => summary.outcomes.push(result),
                Err(e) => {
                    warn!(batch_id = %handle.id, error = %e, "Reconciliation failed");
                    summary.errors.push(format!("Batch {}: {e}", handle.id));
                }
            }
        }
        Ok(summary)
    }

    /// Full run over prepared documents.
    pub fn run(
        &self,
        documents: &[PipelineDocument],
        cancel: &CancellationToken,
        progress: Option<&dyn Fn(PollEvent)>,
    ) -> Result<BatchRunSummary, BatchError> {
        let lines = self.build_lines(documents)?;
        let handles = self.submit(lines)?;
        let ids: Vec<String> = handles.into_iter().map(|h| h.id).collect();
        info!(batches = ids.len(), batch_ids = ?ids, "All batches submitted");
        self.await_and_reconcile(&ids, cancel, progress)
    }
}

/// Re-apply every `*.jsonl` file in `dir`, in file-name order.
pub fn reconcile_directory(
    store: &dyn DocumentStore,
    dir: &Path,
) -> Result<Vec<ReconcileReport>, BatchError> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "jsonl"))
        .collect();
    paths.sort();

    let mut reports = Vec::with_capacity(paths.len());
    for path in &paths {
        let report = reconcile_file(store, path)?;
        info!(
            path = %path.display(),
            applied = report.records_applied,
            skipped = report.skipped.len(),
            "Re-applied output file"
        );
        reports.push(report);
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::MessageRole;
    use crate::pipeline::batch::mock::MockBatchApi;
    use crate::pipeline::batch::store::SqliteDocumentStore;
    use crate::pipeline::batch::types::{BatchStatus, ReconcileOutcome};

    fn settings(dir: &Path, max_batch_bytes: usize) -> PipelineSettings {
        PipelineSettings {
            system_prompt: "sys".into(),
            model: "m".into(),
            max_batch_bytes,
            poll_interval: Duration::ZERO,
            poll_timeout: None,
            batch_dir: dir.join("batches"),
            archive_dir: Some(dir.join("results")),
        }
    }

    fn doc(id: &str, conversation: &str) -> PipelineDocument {
        PipelineDocument {
            id: id.into(),
            conversation: conversation.into(),
            image_png_base64: None,
        }
    }

    fn output(doc: &str, rep: &str, reply: &str) -> String {
        let content = serde_json::json!({
            "document_representation": rep,
            "conversation_translation": [{"type": "assistant", "content": reply}],
        })
        .to_string();
        serde_json::json!({
            "custom_id": doc,
            "response": {"body": {"choices": [{"message": {"content": content}}]}}
        })
        .to_string()
    }

    #[test]
    fn duplicate_document_ids_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = BatchPipeline::new(
            Arc::new(MockBatchApi::new()),
            Arc::new(SqliteDocumentStore::in_memory().unwrap()),
            settings(dir.path(), 1024),
        );
        let err = pipeline
            .build_lines(&[doc("a", "x"), doc("a", "y")])
            .unwrap_err();
        assert!(matches!(err, BatchError::InvalidRequest(_)));
    }

    #[test]
    fn small_budget_submits_one_batch_per_document() {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(MockBatchApi::new());
        let pipeline = BatchPipeline::new(
            api.clone(),
            Arc::new(SqliteDocumentStore::in_memory().unwrap()),
            settings(dir.path(), 1),
        );

        let lines = pipeline.build_lines(&[doc("a", "x"), doc("b", "y")]).unwrap();
        let handles = pipeline.submit(lines).unwrap();

        assert_eq!(handles.len(), 2);
        assert_eq!(api.uploaded_files().len(), 2);
        assert!(dir.path().join("batches/batchinput_2.jsonl").exists());
    }

    #[test]
    fn one_bad_batch_does_not_block_others() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteDocumentStore::in_memory().unwrap());
        let api = Arc::new(
            MockBatchApi::new()
                .with_output_file("batch_1", "file-1", &output("a", "rep-a", "hi a"))
                .with_status_sequence("batch_2", &[BatchStatus::Completed]),
        );
        let pipeline = BatchPipeline::new(api, store.clone(), settings(dir.path(), 1));

        let summary = pipeline
            .run(&[doc("a", "x"), doc("b", "y")], &CancellationToken::new(), None)
            .unwrap();

        // batch_2 completed without an output file
        assert_eq!(summary.outcomes.len(), 1);
        assert_eq!(summary.errors.len(), 1);
        assert!(summary.errors[0].contains("batch_2"));
        assert_eq!(summary.records_applied(), 1);

        let messages = store
            .with_connection(|conn| db::get_messages_by_document(conn, "a"))
            .unwrap();
        assert_eq!(messages[0].role, MessageRole::Assistant);
    }

    #[test]
    fn resume_reconciles_existing_batches() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteDocumentStore::in_memory().unwrap());
        let api = Arc::new(
            MockBatchApi::new()
                .with_status_sequence("batch_old", &[BatchStatus::InProgress, BatchStatus::Completed])
                .with_output_file("batch_old", "file-old", &output("z", "rep-z", "done")),
        );
        let pipeline = BatchPipeline::new(api.clone(), store, settings(dir.path(), 1024));

        let summary = pipeline
            .await_and_reconcile(&["batch_old".to_string()], &CancellationToken::new(), None)
            .unwrap();

        assert!(matches!(summary.outcomes[0], ReconcileOutcome::Applied(_)));
        assert!(api.uploaded_files().is_empty());
        assert!(dir.path().join("results/out-batch_old.jsonl").exists());
    }

    #[test]
    fn directory_reapply_reads_only_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("out-b1.jsonl"), output("a", "rep", "hi")).unwrap();
        std::fs::write(dir.path().join("out-b2.jsonl"), output("b", "rep", "yo")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignore me").unwrap();

        let store = SqliteDocumentStore::in_memory().unwrap();
        let reports = reconcile_directory(&store, dir.path()).unwrap();

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].batch_id.as_deref(), Some("b1"));
        assert!(reports.iter().all(|r| r.records_applied == 1));
    }
}
