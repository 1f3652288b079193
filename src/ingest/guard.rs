//! Store-backed exactly-once ingestion guard

use crate::graph::SOURCE_PROPERTY;
use crate::storage::{GraphStore, NodeFilter, StorageResult};
use std::path::Path;

/// Whether a document should be materialized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    Proceed,
    /// Nodes from this provenance already exist
    Skip,
}

/// Skips documents whose provenance tag is already present in the store.
///
/// The state lives in the graph itself, so separate runs and separate
/// processes sharing a store agree on what has been ingested.
#[derive(Debug, Clone, Copy)]
pub struct DuplicateGuard {
    enabled: bool,
}

impl DuplicateGuard {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn check(&self, store: &dyn GraphStore, provenance: &str) -> StorageResult<GuardDecision> {
        if !self.enabled {
            return Ok(GuardDecision::Proceed);
        }
        let seen = store.exists(&NodeFilter::new().with_property(SOURCE_PROPERTY, provenance))?;
        Ok(if seen {
            GuardDecision::Skip
        } else {
            GuardDecision::Proceed
        })
    }
}

impl Default for DuplicateGuard {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Provenance identifier for a document file: its stem (`paper-42.xml` -> `paper-42`).
pub fn provenance_from_path(path: &Path) -> String {
    path.file_stem()
        .or_else(|| path.file_name())
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}
