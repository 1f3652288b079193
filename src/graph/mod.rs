//! Core graph value types shared by the store and the pipeline

mod edge;
mod node;

pub use edge::{Edge, EdgeId};
pub use node::{Node, NodeId, NodeMetadata, Properties, PropertyValue};

/// Node property holding the provenance tag (source document identifier).
pub const SOURCE_PROPERTY: &str = "source";

/// Relationship property holding a child's zero-based position in its relation.
pub const POSITION_PROPERTY: &str = "position";
