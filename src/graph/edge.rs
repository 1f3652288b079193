//! Relationship (typed, directed edge) representation

use super::node::{NodeId, Properties, PropertyValue};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Unique identifier for an edge
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeId(String);

impl EdgeId {
    /// Create a new random EdgeId
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create an EdgeId from an existing string
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for EdgeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EdgeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A persisted directed relationship
///
/// Relationships are additive: the pipeline creates or merges them and
/// updates their annotations, it never deletes them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    /// Unique identifier
    pub id: EdgeId,
    /// Source node
    pub source: NodeId,
    /// Target node
    pub target: NodeId,
    /// Type of relationship (e.g., "has_figure", "identified_by", "hypothesis")
    pub relationship: String,
    /// When the edge was created
    pub created_at: DateTime<Utc>,
    /// Annotations (position index, observation counters, ...)
    pub properties: Properties,
}

impl Edge {
    /// Create a new edge
    pub fn new(source: NodeId, target: NodeId, relationship: impl Into<String>) -> Self {
        Self {
            id: EdgeId::new(),
            source,
            target,
            relationship: relationship.into(),
            created_at: Utc::now(),
            properties: HashMap::new(),
        }
    }

    /// Add an annotation to the edge
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Zero-based position of the target within its parent relation.
    pub fn position(&self) -> Option<i64> {
        self.properties
            .get(super::POSITION_PROPERTY)
            .and_then(PropertyValue::as_int)
    }

    /// Integer annotation, defaulting to zero.
    pub fn counter(&self, key: &str) -> i64 {
        self.properties
            .get(key)
            .and_then(PropertyValue::as_int)
            .unwrap_or(0)
    }

    pub fn flag(&self, key: &str) -> bool {
        self.properties
            .get(key)
            .and_then(PropertyValue::as_bool)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_default_to_zero() {
        let edge = Edge::new(NodeId::from_string("a"), NodeId::from_string("b"), "hypothesis");
        assert_eq!(edge.counter("panel_count"), 0);
        assert!(!edge.flag("self_test"));
        assert_eq!(edge.position(), None);
    }

    #[test]
    fn position_reads_back() {
        let edge = Edge::new(NodeId::from_string("a"), NodeId::from_string("b"), "has_panel")
            .with_property("position", 2i64);
        assert_eq!(edge.position(), Some(2));
    }
}
