//! One document through build → chunk → submit → poll → reconcile.

use std::sync::Arc;
use std::time::Duration;

use cvreview_lib::db;
use cvreview_lib::models::MessageRole;
use cvreview_lib::pipeline::batch::{
    BatchPipeline, BatchStatus, CancellationToken, MockBatchApi, PipelineDocument,
    PipelineSettings, ReconcileOutcome, SqliteDocumentStore,
};

const OUTPUT_LINE: &str = r#"{"custom_id":"doc1","response":{"body":{"choices":[{"message":{"content":"{\"document_representation\":\"rep\",\"conversation_translation\":[{\"type\":\"assistant\",\"content\":\"hi\"}]}"}}]}}}"#;

fn settings(dir: &std::path::Path) -> PipelineSettings {
    PipelineSettings {
        system_prompt: "transcribe".into(),
        model: "gpt-4o-mini".into(),
        max_batch_bytes: 1024 * 1024,
        poll_interval: Duration::ZERO,
        poll_timeout: Some(Duration::from_secs(30)),
        batch_dir: dir.join("batches"),
        archive_dir: Some(dir.join("api_call_results")),
    }
}

#[test]
fn single_document_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteDocumentStore::in_memory().unwrap());
    let api = Arc::new(
        MockBatchApi::new()
            .with_status_sequence("batch_1", &[BatchStatus::InProgress, BatchStatus::Completed])
            .with_output_file("batch_1", "file-out-1", OUTPUT_LINE),
    );
    let pipeline = BatchPipeline::new(api.clone(), store.clone(), settings(dir.path()));

    let documents = vec![PipelineDocument {
        id: "doc1".into(),
        conversation: "hello".into(),
        image_png_base64: None,
    }];
    let summary = pipeline
        .run(&documents, &CancellationToken::new(), None)
        .unwrap();

    // One group, one upload, one job
    assert_eq!(api.uploaded_files().len(), 1);
    assert_eq!(summary.batch_ids, vec!["batch_1".to_string()]);
    assert!(summary.errors.is_empty());
    assert!(matches!(summary.outcomes[0], ReconcileOutcome::Applied(_)));

    let batch_file = std::fs::read_to_string(dir.path().join("batches/batchinput_1.jsonl")).unwrap();
    assert_eq!(batch_file.lines().count(), 1);
    assert!(batch_file.contains("\"custom_id\":\"doc1\""));

    let (messages, transcription) = store
        .with_connection(|conn| {
            Ok((
                db::get_messages_by_document(conn, "doc1")?,
                db::get_latest_transcription(conn, "doc1")?,
            ))
        })
        .unwrap();

    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, MessageRole::Assistant);
    assert_eq!(messages[0].content, "hi");

    let transcription = transcription.unwrap();
    assert_eq!(transcription.version, 1);
    assert_eq!(transcription.document_representation, "rep");

    assert!(dir.path().join("api_call_results/out-batch_1.jsonl").exists());
}

#[test]
fn rerunning_reconciliation_changes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteDocumentStore::in_memory().unwrap());
    let api = Arc::new(MockBatchApi::new().with_output_file("batch_1", "file-out-1", OUTPUT_LINE));
    let pipeline = BatchPipeline::new(api, store.clone(), settings(dir.path()));

    let ids = vec!["batch_1".to_string()];
    pipeline
        .await_and_reconcile(&ids, &CancellationToken::new(), None)
        .unwrap();
    pipeline
        .await_and_reconcile(&ids, &CancellationToken::new(), None)
        .unwrap();

    let (messages, transcriptions) = store
        .with_connection(|conn| {
            Ok((
                db::count_messages(conn, "doc1")?,
                db::count_transcriptions(conn, "doc1")?,
            ))
        })
        .unwrap();
    assert_eq!(messages, 1);
    assert_eq!(transcriptions, 1);
}
