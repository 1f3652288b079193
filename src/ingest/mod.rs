//! Ingestion: documents -> extraction trees -> graph nodes and relationships

mod builder;
mod guard;
mod materialize;
mod pipeline;
mod purge;

pub use builder::{ChildSlot, ExtractionError, ExtractionNode, RelationChildren, TreeBuilder};
pub use guard::{provenance_from_path, DuplicateGuard, GuardDecision};
pub use materialize::{
    AbsorbedError, ErrorClass, ErrorPolicy, MaterializeError, MaterializeReport, Materializer,
};
pub use pipeline::{DocumentFailure, DocumentOutcome, IngestPipeline, RunSummary};
pub use purge::{purge_source, PurgeReport};

use crate::document::DocumentError;
use crate::storage::StorageError;
use thiserror::Error;

/// Errors that abort one document (or, for pool errors, the run)
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("document has an empty provenance identifier")]
    EmptyProvenance,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Document error: {0}")]
    Document(#[from] DocumentError),

    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Materialization error: {0}")]
    Materialize(#[from] MaterializeError),

    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("worker pool closed")]
    PoolClosed,
}
