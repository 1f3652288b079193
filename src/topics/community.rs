//! Louvain community detection on a weighted undirected graph
//!
//! Local moving of single nodes between neighbouring communities while the
//! modularity gain is positive, then aggregation of each community into one
//! node, repeated until a level moves nothing.

use petgraph::graph::UnGraph;
use petgraph::visit::EdgeRef;
use std::collections::BTreeMap;

const MAX_PASSES: usize = 100;
const MAX_LEVELS: usize = 32;
const EPSILON: f64 = 1e-12;

/// One level of the hierarchy: a weighted edge list over `n` nodes.
/// Self-loops carry intra-community weight after aggregation.
struct Level {
    n: usize,
    edges: Vec<(usize, usize, f64)>,
}

impl Level {
    fn from_graph<N>(graph: &UnGraph<N, f64>) -> Self {
        Self {
            n: graph.node_count(),
            edges: graph
                .edge_references()
                .map(|e| (e.source().index(), e.target().index(), *e.weight()))
                .collect(),
        }
    }

    /// Move nodes greedily; returns each node's community (dense ids) and
    /// whether anything moved.
    fn local_moving(&self) -> (Vec<usize>, bool) {
        let mut degree = vec![0.0; self.n];
        let mut adjacency: Vec<Vec<(usize, f64)>> = vec![Vec::new(); self.n];
        for &(u, v, w) in &self.edges {
            degree[u] += w;
            degree[v] += w;
            if u != v {
                adjacency[u].push((v, w));
                adjacency[v].push((u, w));
            }
        }
        let m2: f64 = degree.iter().sum();
        let mut community: Vec<usize> = (0..self.n).collect();
        if m2 <= 0.0 {
            return (community, false);
        }

        let mut total = degree.clone();
        let mut moved_any = false;

        for _ in 0..MAX_PASSES {
            let mut moved = false;
            for node in 0..self.n {
                let current = community[node];
                let mut links: BTreeMap<usize, f64> = BTreeMap::new();
                for &(other, w) in &adjacency[node] {
                    *links.entry(community[other]).or_default() += w;
                }

                total[current] -= degree[node];
                let gain = |c: usize, k_in: f64| k_in - total[c] * degree[node] / m2;

                let mut best = current;
                let mut best_gain = gain(current, links.get(&current).copied().unwrap_or(0.0));
                for (&c, &k_in) in &links {
                    let g = gain(c, k_in);
                    if g > best_gain + EPSILON {
                        best = c;
                        best_gain = g;
                    }
                }

                total[best] += degree[node];
                if best != current {
                    community[node] = best;
                    moved = true;
                }
            }
            if !moved {
                break;
            }
            moved_any = true;
        }

        (dense(&community), moved_any)
    }

    fn aggregate(&self, community: &[usize]) -> Level {
        let n = community.iter().max().map_or(0, |m| m + 1);
        let mut weights: BTreeMap<(usize, usize), f64> = BTreeMap::new();
        for &(u, v, w) in &self.edges {
            let (a, b) = (community[u], community[v]);
            *weights.entry((a.min(b), a.max(b))).or_default() += w;
        }
        Level {
            n,
            edges: weights.into_iter().map(|((a, b), w)| (a, b, w)).collect(),
        }
    }
}

/// Renumber labels densely in order of first appearance.
fn dense(labels: &[usize]) -> Vec<usize> {
    let mut map: BTreeMap<usize, usize> = BTreeMap::new();
    let mut out = Vec::with_capacity(labels.len());
    for &label in labels {
        let next = map.len();
        out.push(*map.entry(label).or_insert(next));
    }
    out
}

/// Community id for every node of `graph`, indexed like its node indices.
/// Ids are dense and numbered in order of first appearance.
pub fn louvain<N>(graph: &UnGraph<N, f64>) -> Vec<usize> {
    let mut membership: Vec<usize> = (0..graph.node_count()).collect();
    let mut level = Level::from_graph(graph);

    for _ in 0..MAX_LEVELS {
        let (community, moved) = level.local_moving();
        if !moved {
            break;
        }
        for m in membership.iter_mut() {
            *m = community[*m];
        }
        level = level.aggregate(&community);
    }

    dense(&membership)
}

/// Newman modularity of a partition.
pub fn modularity<N>(graph: &UnGraph<N, f64>, membership: &[usize]) -> f64 {
    let mut degree = vec![0.0; graph.node_count()];
    let mut inside: BTreeMap<usize, f64> = BTreeMap::new();
    for e in graph.edge_references() {
        let (u, v, w) = (e.source().index(), e.target().index(), *e.weight());
        degree[u] += w;
        degree[v] += w;
        if membership[u] == membership[v] {
            *inside.entry(membership[u]).or_default() += 2.0 * w;
        }
    }
    let m2: f64 = degree.iter().sum();
    if m2 <= 0.0 {
        return 0.0;
    }

    let mut totals: BTreeMap<usize, f64> = BTreeMap::new();
    for (node, d) in degree.iter().enumerate() {
        *totals.entry(membership[node]).or_default() += d;
    }
    totals
        .iter()
        .map(|(c, tot)| inside.get(c).copied().unwrap_or(0.0) / m2 - (tot / m2).powi(2))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(n: usize, edges: &[(u32, u32)]) -> UnGraph<usize, f64> {
        let mut g = UnGraph::default();
        for i in 0..n {
            g.add_node(i);
        }
        for &(a, b) in edges {
            g.add_edge(a.into(), b.into(), 1.0);
        }
        g
    }

    #[test]
    fn two_triangles_split_at_the_bridge() {
        let g = graph(6, &[(0, 1), (1, 2), (0, 2), (3, 4), (4, 5), (3, 5), (2, 3)]);
        let communities = louvain(&g);

        assert_eq!(communities[0], communities[1]);
        assert_eq!(communities[1], communities[2]);
        assert_eq!(communities[3], communities[4]);
        assert_eq!(communities[4], communities[5]);
        assert_ne!(communities[0], communities[3]);
        assert!(modularity(&g, &communities) > 0.3);
    }

    #[test]
    fn single_clique_stays_together() {
        let g = graph(4, &[(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)]);
        let communities = louvain(&g);
        assert!(communities.iter().all(|c| *c == 0));
    }

    #[test]
    fn edgeless_graph_keeps_singletons() {
        let g = graph(3, &[]);
        assert_eq!(louvain(&g), vec![0, 1, 2]);
        assert_eq!(modularity(&g, &[0, 1, 2]), 0.0);
    }

    #[test]
    fn ids_are_dense() {
        assert_eq!(dense(&[5, 5, 2, 9, 2]), vec![0, 0, 1, 2, 1]);
    }
}
