//! Persists extraction trees with per-sub-tree failure isolation

use super::builder::{position_value, ChildSlot, ExtractionError, ExtractionNode};
use crate::graph::{NodeId, Properties, POSITION_PROPERTY, SOURCE_PROPERTY};
use crate::storage::{with_transaction, GraphStore, StorageError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::{debug, warn};

/// Failure classes a caller may choose to absorb
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// A uniqueness constraint rejected the write
    Constraint,
    /// The element could not be extracted into the expected shape
    Malformed,
    /// Any other store failure
    Store,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorClass::Constraint => write!(f, "constraint"),
            ErrorClass::Malformed => write!(f, "malformed"),
            ErrorClass::Store => write!(f, "store"),
        }
    }
}

/// Which failure classes are absorbed at the sub-tree that raised them.
///
/// Absorbed failures are logged and counted; the failing sub-tree is
/// dropped and its siblings still persist. Anything else aborts the
/// document (sub-trees already committed stay committed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPolicy {
    absorbed: BTreeSet<ErrorClass>,
}

impl ErrorPolicy {
    /// Absorb exactly the given classes
    pub fn absorbing(classes: impl IntoIterator<Item = ErrorClass>) -> Self {
        Self {
            absorbed: classes.into_iter().collect(),
        }
    }

    /// Absorb nothing: the first failure aborts the document
    pub fn strict() -> Self {
        Self::absorbing([])
    }

    pub fn absorbs(&self, class: ErrorClass) -> bool {
        self.absorbed.contains(&class)
    }

    pub fn classes(&self) -> impl Iterator<Item = ErrorClass> + '_ {
        self.absorbed.iter().copied()
    }
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        Self::absorbing([ErrorClass::Constraint, ErrorClass::Malformed])
    }
}

/// A failure that was absorbed rather than propagated
#[derive(Debug, Clone, PartialEq)]
pub struct AbsorbedError {
    pub class: ErrorClass,
    pub label: String,
    pub position: usize,
    pub message: String,
}

/// Counters for one document's materialization
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaterializeReport {
    pub nodes_created: usize,
    pub nodes_merged: usize,
    pub relationships_created: usize,
    pub absorbed: Vec<AbsorbedError>,
}

impl MaterializeReport {
    pub fn absorbed_count(&self, class: ErrorClass) -> usize {
        self.absorbed.iter().filter(|e| e.class == class).count()
    }
}

/// A failure that the policy did not absorb
#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error("provenance identifier is empty")]
    EmptyProvenance,

    #[error("malformed {label} at position {position}: {source}")]
    Malformed {
        label: String,
        position: usize,
        #[source]
        source: ExtractionError,
    },

    #[error("{class} failure writing {label} at position {position}: {source}")]
    Store {
        class: ErrorClass,
        label: String,
        position: usize,
        #[source]
        source: StorageError,
    },
}

enum SubtreeFailure {
    Extraction(ExtractionError),
    Storage(StorageError),
}

/// Writes extraction trees to a store under an explicit error policy.
///
/// Each node and the relationship attaching it to its parent are written
/// in one transaction, parents before children, siblings in position order.
pub struct Materializer<'s> {
    store: &'s dyn GraphStore,
    policy: ErrorPolicy,
}

impl<'s> Materializer<'s> {
    pub fn new(store: &'s dyn GraphStore, policy: ErrorPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &ErrorPolicy {
        &self.policy
    }

    /// Persist `node` and its descendants, every node stamped with `provenance`.
    ///
    /// Returns the root's ID, or `None` if the root itself failed with an
    /// absorbed error class.
    pub fn materialize(
        &self,
        node: &ExtractionNode,
        provenance: &str,
        report: &mut MaterializeReport,
    ) -> Result<Option<NodeId>, MaterializeError> {
        if provenance.trim().is_empty() {
            return Err(MaterializeError::EmptyProvenance);
        }

        match self.write_subtree_root(node, provenance, None, report) {
            Ok(id) => {
                self.materialize_children(&id, node, provenance, report)?;
                Ok(Some(id))
            }
            Err(failure) => {
                self.absorb_or_fail(&node.label, node.position, failure, report)?;
                Ok(None)
            }
        }
    }

    fn materialize_children(
        &self,
        parent: &NodeId,
        node: &ExtractionNode,
        provenance: &str,
        report: &mut MaterializeReport,
    ) -> Result<(), MaterializeError> {
        for relation in &node.relations {
            for slot in &relation.children {
                match slot {
                    ChildSlot::Failed { position, error } => {
                        let label = child_label(node, &relation.relationship);
                        self.absorb_or_fail(
                            &label,
                            *position,
                            SubtreeFailure::Extraction(error.clone()),
                            report,
                        )?;
                    }
                    ChildSlot::Built(child) => {
                        let attach = Some((parent, relation.relationship.as_str()));
                        match self.write_subtree_root(child, provenance, attach, report) {
                            Ok(id) => self.materialize_children(&id, child, provenance, report)?,
                            Err(failure) => {
                                self.absorb_or_fail(&child.label, child.position, failure, report)?
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Write one node, plus its incoming relationship when `attach` is set,
    /// in a single transaction.
    fn write_subtree_root(
        &self,
        node: &ExtractionNode,
        provenance: &str,
        attach: Option<(&NodeId, &str)>,
        report: &mut MaterializeReport,
    ) -> Result<NodeId, SubtreeFailure> {
        let mut properties = node.properties.clone();
        properties.insert(SOURCE_PROPERTY.to_string(), provenance.into());

        let merge_key = if node.is_canonical() {
            Some(node.merge_key().map_err(SubtreeFailure::Extraction)?)
        } else {
            None
        };

        let mut edge_props = Properties::new();
        edge_props.insert(POSITION_PROPERTY.to_string(), position_value(node.position));

        let (id, created, linked) = with_transaction(self.store, |tx| {
            let (id, created) = match &merge_key {
                Some(key) => {
                    let merged = tx.merge_node(&node.label, key, &properties)?;
                    (merged.id, merged.created)
                }
                None => (tx.create_node(&node.label, &properties)?, true),
            };

            let linked = match attach {
                None => false,
                // Canonical nodes are shared, so their incoming edge is merged
                Some((parent, rel)) if merge_key.is_some() => {
                    tx.merge_relationship(parent, &id, rel, &edge_props)?.created
                }
                Some((parent, rel)) => {
                    tx.create_relationship(parent, &id, rel, &edge_props)?;
                    true
                }
            };
            Ok((id.clone(), created, linked))
        })
        .map_err(SubtreeFailure::Storage)?;

        if created {
            report.nodes_created += 1;
        } else {
            report.nodes_merged += 1;
        }
        if linked {
            report.relationships_created += 1;
        }
        debug!(label = %node.label, position = node.position, id = %id, "materialized node");
        Ok(id)
    }

    fn absorb_or_fail(
        &self,
        label: &str,
        position: usize,
        failure: SubtreeFailure,
        report: &mut MaterializeReport,
    ) -> Result<(), MaterializeError> {
        let class = match &failure {
            SubtreeFailure::Extraction(_) => ErrorClass::Malformed,
            SubtreeFailure::Storage(StorageError::Constraint { .. }) => ErrorClass::Constraint,
            SubtreeFailure::Storage(_) => ErrorClass::Store,
        };

        if !self.policy.absorbs(class) {
            return Err(match failure {
                SubtreeFailure::Extraction(source) => MaterializeError::Malformed {
                    label: label.to_string(),
                    position,
                    source,
                },
                SubtreeFailure::Storage(source) => MaterializeError::Store {
                    class,
                    label: label.to_string(),
                    position,
                    source,
                },
            });
        }

        let message = match &failure {
            SubtreeFailure::Extraction(e) => e.to_string(),
            SubtreeFailure::Storage(e) => e.to_string(),
        };
        warn!(%class, label, position, error = %message, "absorbed sub-tree failure");
        report.absorbed.push(AbsorbedError {
            class,
            label: label.to_string(),
            position,
            message,
        });
        Ok(())
    }
}

/// Label used when reporting a child that failed before it had one.
fn child_label(parent: &ExtractionNode, relationship: &str) -> String {
    format!("{}.{}", parent.label, relationship)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::PropertyValue;
    use crate::ingest::builder::RelationChildren;
    use crate::storage::{NodeFilter, OpenStore, SqliteStore};

    fn leaf(label: &str, position: usize, pairs: &[(&str, &str)]) -> ExtractionNode {
        ExtractionNode {
            label: label.into(),
            properties: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), PropertyValue::from(*v)))
                .collect(),
            relations: Vec::new(),
            position,
            merge_on: Vec::new(),
        }
    }

    fn with_children(mut node: ExtractionNode, rel: &str, slots: Vec<ChildSlot>) -> ExtractionNode {
        node.relations.push(RelationChildren {
            relationship: rel.into(),
            children: slots,
        });
        node
    }

    fn malformed(position: usize) -> ChildSlot {
        ChildSlot::Failed {
            position,
            error: ExtractionError::MissingRequired {
                label: "author".into(),
                property: "family".into(),
            },
        }
    }

    #[test]
    fn stamps_provenance_and_positions() {
        let store = SqliteStore::open_in_memory().unwrap();
        let tree = with_children(
            leaf("article", 0, &[("title", "T")]),
            "has_author",
            vec![
                ChildSlot::Built(leaf("author", 0, &[("family", "A")])),
                ChildSlot::Built(leaf("author", 1, &[("family", "B")])),
                ChildSlot::Built(leaf("author", 2, &[("family", "C")])),
            ],
        );

        let mut report = MaterializeReport::default();
        let root = Materializer::new(&store, ErrorPolicy::default())
            .materialize(&tree, "paper-1", &mut report)
            .unwrap()
            .unwrap();

        assert_eq!(report.nodes_created, 4);
        assert_eq!(report.relationships_created, 3);
        let all = store.find_nodes(&NodeFilter::new()).unwrap();
        assert!(all.iter().all(|n| n.source() == Some("paper-1")));

        let mut edges = store.edges_from(&root, Some("has_author")).unwrap();
        edges.sort_by_key(|e| e.position());
        let families: Vec<_> = edges
            .iter()
            .map(|e| {
                let n = store.load_node(&e.target).unwrap().unwrap();
                (e.position().unwrap(), n.text("family").unwrap().to_string())
            })
            .collect();
        assert_eq!(
            families,
            vec![(0, "A".to_string()), (1, "B".to_string()), (2, "C".to_string())]
        );
    }

    #[test]
    fn malformed_child_is_absorbed_by_default() {
        let store = SqliteStore::open_in_memory().unwrap();
        let tree = with_children(
            leaf("article", 0, &[]),
            "has_author",
            vec![ChildSlot::Built(leaf("author", 0, &[("family", "A")])), malformed(1)],
        );

        let mut report = MaterializeReport::default();
        let root = Materializer::new(&store, ErrorPolicy::default())
            .materialize(&tree, "p", &mut report)
            .unwrap();

        assert!(root.is_some());
        assert_eq!(report.absorbed_count(ErrorClass::Malformed), 1);
        assert_eq!(store.node_count(Some("author")).unwrap(), 1);
    }

    #[test]
    fn strict_policy_propagates_but_keeps_committed_siblings() {
        let store = SqliteStore::open_in_memory().unwrap();
        let tree = with_children(
            leaf("article", 0, &[]),
            "has_author",
            vec![ChildSlot::Built(leaf("author", 0, &[("family", "A")])), malformed(1)],
        );

        let mut report = MaterializeReport::default();
        let err = Materializer::new(&store, ErrorPolicy::strict())
            .materialize(&tree, "p", &mut report)
            .unwrap_err();

        assert!(matches!(err, MaterializeError::Malformed { position: 1, .. }));
        assert_eq!(store.node_count(Some("author")).unwrap(), 1);
    }

    #[test]
    fn constraint_violation_drops_only_that_subtree() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.ensure_unique("class", "key").unwrap();

        let dup = with_children(
            leaf("class", 1, &[("key", "GO:1")]),
            "has_synonym",
            vec![ChildSlot::Built(leaf("synonym", 0, &[("text", "lost")]))],
        );
        let tree = with_children(
            leaf("ontology", 0, &[]),
            "has_class",
            vec![
                ChildSlot::Built(leaf("class", 0, &[("key", "GO:1")])),
                ChildSlot::Built(dup),
                ChildSlot::Built(leaf("class", 2, &[("key", "GO:2")])),
            ],
        );

        let mut report = MaterializeReport::default();
        Materializer::new(&store, ErrorPolicy::default())
            .materialize(&tree, "onto", &mut report)
            .unwrap();

        assert_eq!(report.absorbed_count(ErrorClass::Constraint), 1);
        assert_eq!(store.node_count(Some("class")).unwrap(), 2);
        assert_eq!(store.node_count(Some("synonym")).unwrap(), 0);
        // The failed transaction left no dangling relationship
        assert_eq!(store.edge_count(Some("has_class")).unwrap(), 2);
    }

    #[test]
    fn canonical_children_merge_across_documents() {
        let store = SqliteStore::open_in_memory().unwrap();
        let journal = |pos| {
            let mut j = leaf("journal", pos, &[("name", "Cell")]);
            j.merge_on = vec!["name".into()];
            j
        };

        for provenance in ["a", "b"] {
            let tree = with_children(
                leaf("article", 0, &[]),
                "published_in",
                vec![ChildSlot::Built(journal(0))],
            );
            let mut report = MaterializeReport::default();
            Materializer::new(&store, ErrorPolicy::default())
                .materialize(&tree, provenance, &mut report)
                .unwrap();
        }

        assert_eq!(store.node_count(Some("journal")).unwrap(), 1);
        assert_eq!(store.node_count(Some("article")).unwrap(), 2);
        assert_eq!(store.edge_count(Some("published_in")).unwrap(), 2);
    }

    #[test]
    fn empty_provenance_is_rejected() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut report = MaterializeReport::default();
        let err = Materializer::new(&store, ErrorPolicy::default())
            .materialize(&leaf("article", 0, &[]), "  ", &mut report)
            .unwrap_err();
        assert!(matches!(err, MaterializeError::EmptyProvenance));
        assert_eq!(store.node_count(None).unwrap(), 0);
    }
}
