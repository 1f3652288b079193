//! Document adapters: parsed inputs behind one navigation interface

mod element;
mod json;
mod markup;
mod source;

pub use element::Element;
pub use markup::{XmlElement, XmlNode};
pub use source::{DirectorySource, DocumentSource, MemorySource, SourceDocument};

use std::path::Path;
use thiserror::Error;

/// Errors raised while reading or parsing a document
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("directory walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("malformed document: {0}")]
    Malformed(String),

    #[error("document has no root element")]
    Empty,

    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("{path}: {source}")]
    At {
        path: String,
        #[source]
        source: Box<DocumentError>,
    },
}

impl DocumentError {
    /// File the error was raised for, when known
    pub fn path(&self) -> Option<&Path> {
        match self {
            DocumentError::At { path, .. } => Some(Path::new(path)),
            DocumentError::Walk(e) => e.path(),
            _ => None,
        }
    }
}

/// Input formats with an adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Markup,
    Json,
}

impl Format {
    /// Format implied by a file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "xml" | "nxml" | "jats" => Some(Format::Markup),
            "json" => Some(Format::Json),
            _ => None,
        }
    }
}

/// A parsed document root
#[derive(Debug, Clone)]
pub enum Document {
    Markup(XmlElement),
    Json(serde_json::Value),
}

impl Document {
    pub fn parse(format: Format, text: &str) -> Result<Self, DocumentError> {
        match format {
            Format::Markup => Ok(Document::Markup(XmlElement::parse(text)?)),
            Format::Json => Ok(Document::Json(serde_json::from_str(text)?)),
        }
    }

    pub fn format(&self) -> Format {
        match self {
            Document::Markup(_) => Format::Markup,
            Document::Json(_) => Format::Json,
        }
    }
}
