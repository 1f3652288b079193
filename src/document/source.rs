//! Document sources feeding the ingestion pipeline

use super::{Document, DocumentError, Format};
use crate::ingest::provenance_from_path;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// A document ready for ingestion
#[derive(Debug, Clone)]
pub struct SourceDocument {
    /// Provenance identifier stamped on every node built from this document
    pub provenance: String,
    pub root: Document,
}

impl SourceDocument {
    pub fn new(provenance: impl Into<String>, root: Document) -> Self {
        Self {
            provenance: provenance.into(),
            root,
        }
    }
}

/// Yields documents one at a time.
///
/// An `Err` item covers one unreadable document; the source continues with
/// the next. `None` means exhausted.
#[async_trait]
pub trait DocumentSource: Send {
    async fn next_document(&mut self) -> Option<Result<SourceDocument, DocumentError>>;
}

/// Reads `.xml` and `.json` files from a directory tree, in path order
pub struct DirectorySource {
    pending: VecDeque<PathBuf>,
}

impl DirectorySource {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, DocumentError> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(DocumentError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("not a directory: {}", dir.display()),
            )));
        }

        let mut pending = VecDeque::new();
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry?;
            if entry.file_type().is_file() && Format::from_path(entry.path()).is_some() {
                pending.push_back(entry.into_path());
            }
        }
        debug!(dir = %dir.display(), files = pending.len(), "scanned document directory");

        Ok(Self { pending })
    }

    /// Number of documents not yet read
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    async fn load(path: &Path) -> Result<SourceDocument, DocumentError> {
        let format = Format::from_path(path)
            .ok_or_else(|| DocumentError::UnsupportedFormat(path.display().to_string()))?;
        let text = tokio::fs::read_to_string(path).await?;
        let root = Document::parse(format, &text)?;
        Ok(SourceDocument::new(provenance_from_path(path), root))
    }
}

#[async_trait]
impl DocumentSource for DirectorySource {
    async fn next_document(&mut self) -> Option<Result<SourceDocument, DocumentError>> {
        let path = self.pending.pop_front()?;
        Some(Self::load(&path).await.map_err(|e| DocumentError::At {
            path: path.display().to_string(),
            source: Box::new(e),
        }))
    }
}

/// In-memory documents, mostly for tests and embedding
pub struct MemorySource {
    documents: VecDeque<SourceDocument>,
}

impl MemorySource {
    pub fn new(documents: impl IntoIterator<Item = SourceDocument>) -> Self {
        Self {
            documents: documents.into_iter().collect(),
        }
    }
}

#[async_trait]
impl DocumentSource for MemorySource {
    async fn next_document(&mut self) -> Option<Result<SourceDocument, DocumentError>> {
        self.documents.pop_front().map(Ok)
    }
}
