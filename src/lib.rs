//! panelgraph: publication figures as a property graph
//!
//! Two batch stages over one graph store:
//!
//! - **Ingestion**: documents (article markup, bibliographic JSON) are walked
//!   by a declarative [`SchemaModel`] into extraction trees and materialized
//!   as provenance-tagged nodes and ordered relationships.
//! - **Resolution**: raw tag mentions on panels are condensed into CondTags,
//!   resolved to corpus-wide Entities and Terms, and paired into hypothesis
//!   edges. A periodic topic pass annotates Entities with communities and
//!   centrality highlights.
//!
//! # Example
//!
//! ```
//! use panelgraph::{OpenStore, Resolver, SqliteStore};
//!
//! let store = SqliteStore::open_in_memory().unwrap();
//! let report = Resolver::new(&store).run().unwrap();
//! assert_eq!(report.hypotheses, 0);
//! ```

pub mod config;
pub mod document;
pub mod graph;
pub mod ingest;
pub mod resolve;
pub mod schema;
pub mod storage;
pub mod topics;

pub use config::{ConfigError, PipelineConfig};
pub use document::{DirectorySource, Document, DocumentError, DocumentSource, SourceDocument};
pub use graph::{Edge, EdgeId, Node, NodeId, Properties, PropertyValue};
pub use ingest::{
    purge_source, DuplicateGuard, ErrorClass, ErrorPolicy, IngestError, IngestPipeline, PurgeReport,
    RunSummary,
};
pub use resolve::{list_hypotheses, Hypothesis, ResolutionConfig, ResolutionReport, ResolveError, Resolver};
pub use schema::{SchemaError, SchemaModel, SchemaRegistry};
pub use storage::{GraphStore, OpenStore, SharedStore, SqliteStore, StorageError, StorageResult};
pub use topics::{TopicConfig, TopicDeriver, TopicError, TopicReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
