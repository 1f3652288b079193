//! Node representation in the property graph

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Namespace for deterministic (merge-keyed) node IDs.
const MERGE_NS: Uuid = Uuid::from_bytes([
    0x3f, 0x6a, 0x12, 0x90, 0x51, 0xc4, 0x4e, 0x0b,
    0x9d, 0x21, 0x7e, 0x55, 0xa0, 0x18, 0xcc, 0x42,
]);

/// Unique identifier for a node
///
/// Serializes as a plain string: a random UUID for created nodes, a
/// UUID v5 of label + key for merged nodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Create a new random NodeId
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create a NodeId from an existing string
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Deterministic ID for a node merged under `label` by `key`.
    ///
    /// The same label and key always produce the same ID, which is what
    /// makes `merge_node` idempotent across runs and processes.
    pub fn for_key(label: &str, key: &Properties) -> Self {
        // BTreeMap gives a stable key order regardless of insertion order
        let ordered: BTreeMap<&String, &PropertyValue> = key.iter().collect();
        let mut material = String::from(label);
        for (k, v) in ordered {
            material.push('\u{1f}');
            material.push_str(k);
            material.push('=');
            material.push_str(&v.as_text());
        }
        Self(Uuid::new_v5(&MERGE_NS, material.as_bytes()).to_string())
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Typed property values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<PropertyValue>),
}

impl PropertyValue {
    /// Empty string, empty array; scalars are never empty.
    pub fn is_empty(&self) -> bool {
        match self {
            PropertyValue::String(s) => s.is_empty(),
            PropertyValue::Array(a) => a.is_empty(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(i) => Some(*i),
            PropertyValue::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            PropertyValue::Float(f) => Some(*f),
            PropertyValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[PropertyValue]> {
        match self {
            PropertyValue::Array(a) => Some(a.as_slice()),
            _ => None,
        }
    }

    /// Strings contained in an array value (non-strings skipped).
    pub fn string_items(&self) -> Vec<String> {
        match self {
            PropertyValue::Array(a) => a
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            PropertyValue::String(s) if !s.is_empty() => vec![s.clone()],
            _ => Vec::new(),
        }
    }

    /// Flat text rendering, used for keys and comparisons.
    pub fn as_text(&self) -> String {
        match self {
            PropertyValue::String(s) => s.clone(),
            PropertyValue::Int(i) => i.to_string(),
            PropertyValue::Float(f) => f.to_string(),
            PropertyValue::Bool(b) => b.to_string(),
            PropertyValue::Array(a) => a
                .iter()
                .map(PropertyValue::as_text)
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::String(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        PropertyValue::String(s)
    }
}

impl From<i64> for PropertyValue {
    fn from(i: i64) -> Self {
        PropertyValue::Int(i)
    }
}

impl From<f64> for PropertyValue {
    fn from(f: f64) -> Self {
        PropertyValue::Float(f)
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        PropertyValue::Bool(b)
    }
}

impl From<Vec<String>> for PropertyValue {
    fn from(items: Vec<String>) -> Self {
        PropertyValue::Array(items.into_iter().map(PropertyValue::String).collect())
    }
}

/// Properties collection
pub type Properties = HashMap<String, PropertyValue>;

/// Node metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeMetadata {
    /// When the node was created
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
    /// When the node was last modified
    pub modified_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// A persisted node in the property graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier
    pub id: NodeId,
    /// Node label (e.g. "article", "panel", "Entity")
    pub label: String,
    /// Node properties, including the `source` provenance tag
    pub properties: Properties,
    /// Node metadata
    pub metadata: NodeMetadata,
}

impl Node {
    /// Create a new node with a random ID
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            id: NodeId::new(),
            label: label.into(),
            properties: HashMap::new(),
            metadata: NodeMetadata {
                created_at: Some(chrono::Utc::now()),
                ..Default::default()
            },
        }
    }

    /// Add a property to the node
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// String property, if present and a string
    pub fn text(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(PropertyValue::as_str)
    }

    /// The provenance tag, if any
    pub fn source(&self) -> Option<&str> {
        self.text(crate::graph::SOURCE_PROPERTY)
    }
}
