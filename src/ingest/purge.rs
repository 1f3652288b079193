//! Maintenance purge of one document's nodes
//!
//! Canonical nodes are shared: a merged `journal` keeps the provenance of
//! whichever document created it first. Purging that document must not take
//! the shared node away from the others, so any node still referenced from
//! another document is handed over to that document instead of deleted.

use crate::graph::{NodeId, Properties, SOURCE_PROPERTY};
use crate::storage::{with_transaction, GraphStore, NodeFilter, StorageResult};
use std::collections::{HashMap, HashSet};
use tracing::info;

/// Outcome of a purge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeReport {
    /// Nodes deleted, along with every edge touching them
    pub removed: usize,
    /// Shared nodes kept and reassigned to a remaining document
    pub retained: Vec<(NodeId, String)>,
}

/// Delete every node ingested from `provenance`.
///
/// A node still reached by an edge from a node of another document is kept
/// and its `source` moves to that document (the smallest provenance when
/// several qualify). Retention propagates downwards through the kept node's
/// own children. Runs in one transaction.
pub fn purge_source(store: &dyn GraphStore, provenance: &str) -> StorageResult<PurgeReport> {
    let report = with_transaction(store, |tx| {
        let filter = NodeFilter::new().with_property(SOURCE_PROPERTY, provenance);
        let owned: Vec<NodeId> = tx.find_nodes(&filter)?.into_iter().map(|n| n.id).collect();
        let mut doomed: HashSet<NodeId> = owned.iter().cloned().collect();
        let mut heirs: HashMap<NodeId, String> = HashMap::new();
        let mut retained = Vec::new();

        loop {
            let mut progressed = false;
            for id in &owned {
                if !doomed.contains(id) {
                    continue;
                }
                let mut heir: Option<String> = None;
                for edge in tx.edges_to(id, None)? {
                    if doomed.contains(&edge.source) {
                        continue;
                    }
                    let source = match heirs.get(&edge.source) {
                        Some(source) => Some(source.clone()),
                        None => tx
                            .load_node(&edge.source)?
                            .and_then(|n| n.source().map(str::to_string)),
                    };
                    if let Some(source) = source {
                        if heir.as_ref().map_or(true, |h| source < *h) {
                            heir = Some(source);
                        }
                    }
                }
                if let Some(heir) = heir {
                    doomed.remove(id);
                    heirs.insert(id.clone(), heir.clone());
                    retained.push((id.clone(), heir));
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }

        for (id, heir) in &retained {
            let mut set = Properties::new();
            set.insert(SOURCE_PROPERTY.into(), heir.as_str().into());
            tx.update_node(id, &set)?;
        }
        let removed = tx.delete_nodes(&filter)?;

        Ok(PurgeReport { removed, retained })
    })?;

    info!(
        provenance,
        removed = report.removed,
        retained = report.retained.len(),
        "Purged document"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{OpenStore, SqliteStore};

    fn node(store: &SqliteStore, label: &str, source: &str) -> NodeId {
        let mut p = Properties::new();
        p.insert(SOURCE_PROPERTY.into(), source.into());
        store.create_node(label, &p).unwrap()
    }

    fn link(store: &SqliteStore, from: &NodeId, to: &NodeId, rel: &str) {
        store
            .create_relationship(from, to, rel, &Properties::new())
            .unwrap();
    }

    #[test]
    fn unshared_document_is_removed_entirely() {
        let store = SqliteStore::open_in_memory().unwrap();
        let article = node(&store, "article", "doc-1");
        let figure = node(&store, "figure", "doc-1");
        link(&store, &article, &figure, "has_figure");
        node(&store, "article", "doc-2");

        let report = purge_source(&store, "doc-1").unwrap();

        assert_eq!(report.removed, 2);
        assert!(report.retained.is_empty());
        assert_eq!(store.node_count(None).unwrap(), 1);
        assert_eq!(store.edge_count(None).unwrap(), 0);
    }

    #[test]
    fn shared_node_and_its_children_move_to_another_document() {
        let store = SqliteStore::open_in_memory().unwrap();
        let a1 = node(&store, "article", "doc-1");
        let journal = node(&store, "journal", "doc-1");
        let publisher = node(&store, "publisher", "doc-1");
        link(&store, &a1, &journal, "published_in");
        link(&store, &journal, &publisher, "has_publisher");

        let a3 = node(&store, "article", "doc-3");
        let a2 = node(&store, "article", "doc-2");
        link(&store, &a3, &journal, "published_in");
        link(&store, &a2, &journal, "published_in");

        let report = purge_source(&store, "doc-1").unwrap();

        assert_eq!(report.removed, 1);
        assert_eq!(
            report.retained,
            vec![
                (journal.clone(), "doc-2".to_string()),
                (publisher.clone(), "doc-2".to_string())
            ]
        );
        assert!(store.load_node(&a1).unwrap().is_none());
        assert_eq!(store.load_node(&journal).unwrap().unwrap().source(), Some("doc-2"));
        assert_eq!(store.edges_to(&journal, Some("published_in")).unwrap().len(), 2);
        assert_eq!(store.edges_from(&journal, None).unwrap().len(), 1);
    }

    #[test]
    fn unknown_source_removes_nothing() {
        let store = SqliteStore::open_in_memory().unwrap();
        node(&store, "article", "doc-1");
        assert_eq!(purge_source(&store, "doc-9").unwrap(), PurgeReport::default());
        assert_eq!(store.node_count(None).unwrap(), 1);
    }
}
