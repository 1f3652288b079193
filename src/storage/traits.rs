//! Storage trait definitions

use crate::graph::{Edge, EdgeId, Node, NodeId, Properties, PropertyValue};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A uniqueness constraint rejected a write
    #[error("Constraint violation: {label}.{property} = {value} already exists")]
    Constraint {
        label: String,
        property: String,
        value: String,
    },

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Date parsing error: {0}")]
    DateParse(String),

    #[error("Store lock poisoned")]
    Poisoned,
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Filter criteria for querying nodes
#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    /// Filter by node label (e.g., "panel", "Entity")
    pub label: Option<String>,
    /// Exact property matches, all of which must hold
    pub properties: Vec<(String, PropertyValue)>,
    /// Maximum number of results
    pub limit: Option<usize>,
}

impl NodeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.push((key.into(), value.into()));
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Filter criteria for querying edges
#[derive(Debug, Clone, Default)]
pub struct EdgeFilter {
    /// Filter by relationship type
    pub relationship: Option<String>,
    /// Filter by source node
    pub source: Option<NodeId>,
    /// Filter by target node
    pub target: Option<NodeId>,
    /// Maximum number of results
    pub limit: Option<usize>,
}

impl EdgeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_relationship(mut self, relationship: impl Into<String>) -> Self {
        self.relationship = Some(relationship.into());
        self
    }

    pub fn with_source(mut self, source: NodeId) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_target(mut self, target: NodeId) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Outcome of a merge: the identity plus whether this call created it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Merged<I> {
    pub id: I,
    pub created: bool,
}

/// Body of a transaction. Receives a store view bound to the open
/// transaction; returning an error rolls the whole body back.
pub type TxBody<'a> = dyn FnMut(&dyn GraphStore) -> StorageResult<()> + 'a;

/// Narrow property-graph interface consumed by the pipeline
///
/// Nodes are created or merged, relationships are created or merged, and
/// both can have properties overlaid afterwards. The only deletions are
/// `delete_nodes` (maintenance purge) and `remove_node_properties`.
///
/// The trait itself carries no `Send + Sync` bound so that a transaction
/// can hand its body a connection-bound view; shared handles use
/// [`SharedStore`].
pub trait GraphStore {
    // === Constraints ===

    /// Declare that no two `label` nodes may share a value for `property`.
    fn ensure_unique(&self, label: &str, property: &str) -> StorageResult<()>;

    // === Node Operations ===

    /// Create a node unconditionally, returning its new ID
    fn create_node(&self, label: &str, properties: &Properties) -> StorageResult<NodeId>;

    /// Find the `label` node identified by `key`, creating it with
    /// `key ∪ on_create` if absent. Existing nodes are left untouched.
    fn merge_node(
        &self,
        label: &str,
        key: &Properties,
        on_create: &Properties,
    ) -> StorageResult<Merged<NodeId>>;

    /// Overlay `set` onto a node's properties. Returns false if absent.
    fn update_node(&self, id: &NodeId, set: &Properties) -> StorageResult<bool>;

    /// Load a node by ID
    fn load_node(&self, id: &NodeId) -> StorageResult<Option<Node>>;

    /// Find nodes matching filter criteria
    fn find_nodes(&self, filter: &NodeFilter) -> StorageResult<Vec<Node>>;

    /// Whether any node matches the filter
    fn exists(&self, filter: &NodeFilter) -> StorageResult<bool>;

    /// Strip the given property keys from every node with `label`
    fn remove_node_properties(&self, label: &str, keys: &[&str]) -> StorageResult<()>;

    /// Delete matching nodes and every edge touching them
    fn delete_nodes(&self, filter: &NodeFilter) -> StorageResult<usize>;

    fn node_count(&self, label: Option<&str>) -> StorageResult<usize>;

    // === Relationship Operations ===

    /// Create a directed relationship unconditionally
    fn create_relationship(
        &self,
        from: &NodeId,
        to: &NodeId,
        relationship: &str,
        properties: &Properties,
    ) -> StorageResult<EdgeId>;

    /// Find the `relationship` edge from `from` to `to`, creating it with
    /// `on_create` if absent. At most one such edge is ever created here.
    fn merge_relationship(
        &self,
        from: &NodeId,
        to: &NodeId,
        relationship: &str,
        on_create: &Properties,
    ) -> StorageResult<Merged<EdgeId>>;

    /// Overlay `set` onto an edge's properties. Returns false if absent.
    fn update_relationship(&self, id: &EdgeId, set: &Properties) -> StorageResult<bool>;

    /// Edges originating from a node, optionally of one relationship type
    fn edges_from(&self, id: &NodeId, relationship: Option<&str>) -> StorageResult<Vec<Edge>>;

    /// Edges targeting a node, optionally of one relationship type
    fn edges_to(&self, id: &NodeId, relationship: Option<&str>) -> StorageResult<Vec<Edge>>;

    fn find_edges(&self, filter: &EdgeFilter) -> StorageResult<Vec<Edge>>;

    fn edge_count(&self, relationship: Option<&str>) -> StorageResult<usize>;

    // === Transactions ===

    /// Run `body` atomically. Nested calls join the enclosing transaction
    /// as a savepoint.
    fn transaction(&self, body: &mut TxBody<'_>) -> StorageResult<()>;
}

/// Store handle shared across worker threads
pub type SharedStore = Arc<dyn GraphStore + Send + Sync>;

/// Run `f` in a transaction and hand back its value.
pub fn with_transaction<T>(
    store: &dyn GraphStore,
    mut f: impl FnMut(&dyn GraphStore) -> StorageResult<T>,
) -> StorageResult<T> {
    let mut out = None;
    store.transaction(&mut |tx| {
        out = Some(f(tx)?);
        Ok(())
    })?;
    // The body only returns Ok after setting `out`
    out.ok_or(StorageError::Poisoned)
}

/// Extension trait for opening stores from paths
pub trait OpenStore: GraphStore + Sized {
    /// Open or create a store at the given path
    fn open(path: impl AsRef<Path>) -> StorageResult<Self>;

    /// Create an in-memory store (useful for testing)
    fn open_in_memory() -> StorageResult<Self>;
}
