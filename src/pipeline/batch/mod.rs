//! Bulk inference pipeline.
//!
//! Request lines are packed into size-bounded batch files, submitted to an
//! externally paced bulk service, polled until terminal and reconciled back
//! into the document store with idempotent upserts.
//!
//! The remote service and the store sit behind the `BatchApi` and
//! `DocumentStore` traits and are injected as `Arc<dyn _>`.

pub mod chunker;
pub mod error;
pub mod mock;
pub mod poller;
pub mod reconciler;
pub mod request;
pub mod runner;
pub mod store;
pub mod submitter;
pub mod traits;
pub mod types;

pub use chunker::{chunk_request_lines, write_batch_files};
pub use error::BatchError;
pub use mock::MockBatchApi;
pub use poller::{BatchPoller, CancellationToken};
pub use reconciler::{apply_output, parse_output_line, reconcile_file, resolve_roles, Reconciler};
pub use request::RequestLineBuilder;
pub use runner::{reconcile_directory, BatchPipeline, PipelineDocument, PipelineSettings};
pub use store::SqliteDocumentStore;
pub use submitter::BatchSubmitter;
pub use traits::{BatchApi, DocumentStore};
pub use types::*;
