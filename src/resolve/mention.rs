//! Raw tag mentions as read back from the graph

use crate::graph::{Node, NodeId};
use crate::schema::collapse_whitespace;

/// Separator between multiple external identifiers on one mention
pub const EXT_ID_SEPARATOR: &str = "///";

/// Property names on mention (tag) nodes
pub mod props {
    pub const TEXT: &str = "text";
    pub const ROLE: &str = "role";
    pub const TYPE: &str = "type";
    pub const CATEGORY: &str = "category";
    pub const EXT_IDS: &str = "ext_ids";
}

/// One upstream entity mention attached to a container (panel)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMention {
    pub node: NodeId,
    pub role: String,
    pub entity_type: String,
    pub category: String,
    /// Canonical external identifiers, if any
    pub ext_ids: Option<String>,
    /// Whitespace-collapsed text, original casing
    pub text: String,
}

/// Why a mention was left out of condensation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    EmptyText,
    /// No external identifier, no category and no type
    Unclassifiable,
}

impl RawMention {
    pub fn new(
        node: NodeId,
        role: &str,
        entity_type: &str,
        category: &str,
        ext_ids: Option<&str>,
        text: &str,
    ) -> Self {
        Self {
            node,
            role: role.trim().to_lowercase(),
            entity_type: entity_type.trim().to_lowercase(),
            category: category.trim().to_lowercase(),
            ext_ids: ext_ids.and_then(canonical_ext_ids),
            text: clean_text(text),
        }
    }

    /// Read a mention from a tag node. Missing properties read as empty.
    pub fn from_node(node: &Node) -> Self {
        Self::new(
            node.id.clone(),
            node.text(props::ROLE).unwrap_or_default(),
            node.text(props::TYPE).unwrap_or_default(),
            node.text(props::CATEGORY).unwrap_or_default(),
            node.text(props::EXT_IDS),
            node.text(props::TEXT).unwrap_or_default(),
        )
    }

    pub fn is_identified(&self) -> bool {
        self.ext_ids.is_some()
    }

    /// Lowercased text used for grouping and term identity
    pub fn normalized_text(&self) -> String {
        self.text.to_lowercase()
    }

    /// Whether this mention can take part in condensation
    pub fn check(&self) -> Result<(), DropReason> {
        if self.text.is_empty() {
            return Err(DropReason::EmptyText);
        }
        if !self.is_identified() && self.category.is_empty() && self.entity_type.is_empty() {
            return Err(DropReason::Unclassifiable);
        }
        Ok(())
    }
}

/// Split on `///`, trim, drop empties, sort, dedupe and rejoin.
pub fn canonical_ext_ids(raw: &str) -> Option<String> {
    let mut ids: Vec<&str> = raw
        .split(EXT_ID_SEPARATOR)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .collect();
    if ids.is_empty() {
        return None;
    }
    ids.sort_unstable();
    ids.dedup();
    Some(ids.join(EXT_ID_SEPARATOR))
}

/// Collapse whitespace, keep casing.
pub fn clean_text(text: &str) -> String {
    collapse_whitespace(text)
}

/// Identity form of a text variant: cleaned and lowercased.
pub fn normalize_text(text: &str) -> String {
    clean_text(text).to_lowercase()
}
