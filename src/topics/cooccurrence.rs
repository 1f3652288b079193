//! Entity co-occurrence graph over hypothesis-qualifying panels

use crate::graph::{Node, NodeId};
use crate::resolve::mention::props;
use crate::resolve::{labels, rels, ResolutionConfig};
use crate::storage::{GraphStore, NodeFilter, StorageResult};
use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::unionfind::UnionFind;
use petgraph::visit::EdgeRef;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// A panel with both an intervention and an assayed CondTag
#[derive(Debug, Clone)]
pub struct QualifyingPanel {
    pub panel: Node,
    /// Salient Entities resolved from the panel's CondTags
    pub entities: BTreeSet<NodeId>,
}

/// Undirected Entity graph; edge weight is the number of shared panels.
#[derive(Debug, Clone, Default)]
pub struct CooccurrenceGraph {
    pub graph: UnGraph<NodeId, f64>,
    pub panels: Vec<QualifyingPanel>,
    index: HashMap<NodeId, NodeIndex>,
}

impl CooccurrenceGraph {
    /// Build from the store, keeping Entities whose type is in `salient`
    /// (all types when empty) and pairs seen in at least `min_cooccurrence`
    /// panels.
    pub fn build(
        store: &dyn GraphStore,
        resolution: &ResolutionConfig,
        salient: &[String],
        min_cooccurrence: u32,
    ) -> StorageResult<Self> {
        let mut entity_types: HashMap<NodeId, bool> = HashMap::new();
        let mut panels = Vec::new();

        for panel in store.find_nodes(&NodeFilter::new().with_label(&resolution.panel_label))? {
            let mut has_intervention = false;
            let mut has_assayed = false;
            let mut entities = BTreeSet::new();

            for edge in store.edges_from(&panel.id, Some(rels::HAS_CONDTAG))? {
                let Some(condtag) = store.load_node(&edge.target)? else {
                    continue;
                };
                let role = condtag.text(props::ROLE).unwrap_or_default();
                has_intervention |= role == resolution.intervention_role;
                has_assayed |= role == resolution.assayed_role;

                for link in store.edges_from(&condtag.id, Some(rels::IDENTIFIED_BY))? {
                    let salient_entity = match entity_types.get(&link.target) {
                        Some(s) => *s,
                        None => {
                            let s = store
                                .load_node(&link.target)?
                                .map(|e| is_salient(&e, salient))
                                .unwrap_or(false);
                            entity_types.insert(link.target.clone(), s);
                            s
                        }
                    };
                    if salient_entity {
                        entities.insert(link.target);
                    }
                }
            }

            if has_intervention && has_assayed && !entities.is_empty() {
                panels.push(QualifyingPanel { panel, entities });
            }
        }

        Ok(Self::from_panels(panels, min_cooccurrence))
    }

    /// Build from already-collected panels.
    pub fn from_panels(panels: Vec<QualifyingPanel>, min_cooccurrence: u32) -> Self {
        let mut pairs: BTreeMap<(NodeId, NodeId), u32> = BTreeMap::new();
        for p in &panels {
            let members: Vec<&NodeId> = p.entities.iter().collect();
            for (i, a) in members.iter().enumerate() {
                for b in &members[i + 1..] {
                    *pairs.entry(((*a).clone(), (*b).clone())).or_default() += 1;
                }
            }
        }

        let mut graph = UnGraph::default();
        let mut index: HashMap<NodeId, NodeIndex> = HashMap::new();
        let kept: Vec<_> = pairs
            .into_iter()
            .filter(|(_, n)| *n >= min_cooccurrence.max(1))
            .collect();

        let mut nodes: BTreeSet<&NodeId> = BTreeSet::new();
        for ((a, b), _) in &kept {
            nodes.insert(a);
            nodes.insert(b);
        }
        for id in nodes {
            index.insert(id.clone(), graph.add_node(id.clone()));
        }
        for ((a, b), n) in &kept {
            graph.add_edge(index[a], index[b], f64::from(*n));
        }

        Self { graph, panels, index }
    }

    pub fn node(&self, id: &NodeId) -> Option<NodeIndex> {
        self.index.get(id).copied()
    }

    /// Nodes of the largest connected component. Ties go to the component
    /// holding the smallest Entity id.
    pub fn largest_component(&self) -> Vec<NodeIndex> {
        let mut sets = UnionFind::new(self.graph.node_count());
        for edge in self.graph.edge_references() {
            sets.union(edge.source().index(), edge.target().index());
        }

        let mut components: BTreeMap<usize, Vec<NodeIndex>> = BTreeMap::new();
        for idx in self.graph.node_indices() {
            components.entry(sets.find(idx.index())).or_default().push(idx);
        }

        components
            .into_values()
            .max_by(|a, b| {
                a.len()
                    .cmp(&b.len())
                    .then_with(|| self.min_id(b).cmp(self.min_id(a)))
            })
            .unwrap_or_default()
    }

    fn min_id(&self, nodes: &[NodeIndex]) -> &str {
        nodes
            .iter()
            .map(|i| self.graph[*i].as_str())
            .min()
            .unwrap_or_default()
    }

    /// Induced subgraph over `nodes`, re-indexed from zero in the given order.
    pub fn subgraph(&self, nodes: &[NodeIndex]) -> UnGraph<NodeId, f64> {
        let mut sub = UnGraph::default();
        let mut mapping: HashMap<NodeIndex, NodeIndex> = HashMap::new();
        for idx in nodes {
            mapping.insert(*idx, sub.add_node(self.graph[*idx].clone()));
        }
        for edge in self.graph.edge_references() {
            if let (Some(a), Some(b)) = (mapping.get(&edge.source()), mapping.get(&edge.target())) {
                sub.add_edge(*a, *b, *edge.weight());
            }
        }
        sub
    }
}

fn is_salient(entity: &Node, salient: &[String]) -> bool {
    if entity.label != labels::ENTITY {
        return false;
    }
    if salient.is_empty() {
        return true;
    }
    let ty = entity.text(props::TYPE).unwrap_or_default();
    salient.iter().any(|s| s.eq_ignore_ascii_case(ty))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qp(panel: &str, entities: &[&str]) -> QualifyingPanel {
        let mut node = Node::new("panel");
        node.id = NodeId::from_string(panel);
        QualifyingPanel {
            panel: node,
            entities: entities.iter().map(|e| NodeId::from_string(*e)).collect(),
        }
    }

    #[test]
    fn weights_count_shared_panels() {
        let g = CooccurrenceGraph::from_panels(
            vec![qp("p1", &["a", "b"]), qp("p2", &["a", "b", "c"])],
            1,
        );
        assert_eq!(g.graph.node_count(), 3);
        let a = g.node(&NodeId::from_string("a")).unwrap();
        let b = g.node(&NodeId::from_string("b")).unwrap();
        let e = g.graph.find_edge(a, b).unwrap();
        assert_eq!(g.graph[e], 2.0);
    }

    #[test]
    fn threshold_drops_rare_pairs() {
        let g = CooccurrenceGraph::from_panels(
            vec![qp("p1", &["a", "b"]), qp("p2", &["a", "b", "c"])],
            2,
        );
        assert_eq!(g.graph.node_count(), 2);
        assert_eq!(g.graph.edge_count(), 1);
        assert!(g.node(&NodeId::from_string("c")).is_none());
    }

    #[test]
    fn largest_component_wins() {
        let g = CooccurrenceGraph::from_panels(
            vec![qp("p1", &["a", "b", "c"]), qp("p2", &["x", "y"])],
            1,
        );
        let component = g.largest_component();
        assert_eq!(component.len(), 3);
        let sub = g.subgraph(&component);
        assert_eq!(sub.node_count(), 3);
        assert_eq!(sub.edge_count(), 3);
    }
}
