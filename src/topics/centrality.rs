//! PageRank centrality over the co-occurrence graph

use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use std::collections::HashMap;

/// PageRank computation result
#[derive(Debug, Clone)]
pub struct PageRankResult {
    /// Score per node; sums to 1 over the ranked nodes
    pub scores: HashMap<NodeIndex, f64>,
    pub iterations: usize,
    /// L1 change of the last iteration
    pub delta: f64,
}

impl PageRankResult {
    pub fn score(&self, node: NodeIndex) -> f64 {
        self.scores.get(&node).copied().unwrap_or(0.0)
    }
}

/// Weighted PageRank restricted to `members`; each undirected edge is
/// walked both ways in proportion to its weight. Edges leaving `members`
/// are ignored.
pub fn pagerank<N>(
    graph: &UnGraph<N, f64>,
    members: &[NodeIndex],
    damping: f64,
    max_iterations: usize,
    tolerance: f64,
) -> PageRankResult {
    let n = members.len();
    if n == 0 {
        return PageRankResult {
            scores: HashMap::new(),
            iterations: 0,
            delta: 0.0,
        };
    }

    let position: HashMap<NodeIndex, usize> =
        members.iter().enumerate().map(|(i, idx)| (*idx, i)).collect();

    // Weighted neighbours and total outgoing weight per member
    let mut incoming: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n];
    let mut out_weight: Vec<f64> = vec![0.0; n];
    for edge in graph.edge_references() {
        if let (Some(&a), Some(&b)) = (position.get(&edge.source()), position.get(&edge.target())) {
            let w = *edge.weight();
            incoming[b].push((a, w));
            out_weight[a] += w;
            if a != b {
                incoming[a].push((b, w));
                out_weight[b] += w;
            }
        }
    }

    let mut scores = vec![1.0 / n as f64; n];
    let mut next = vec![0.0; n];
    let base = (1.0 - damping) / n as f64;
    let mut iterations = 0;
    let mut delta = f64::MAX;

    while iterations < max_iterations && delta > tolerance {
        // Dangling nodes spread their mass evenly
        let dangling: f64 = scores
            .iter()
            .zip(&out_weight)
            .filter(|(_, w)| **w <= 0.0)
            .map(|(s, _)| s)
            .sum();

        for i in 0..n {
            let mut sum = 0.0;
            for &(j, w) in &incoming[i] {
                sum += scores[j] * w / out_weight[j];
            }
            sum += dangling / n as f64;
            next[i] = base + damping * sum;
        }

        delta = scores.iter().zip(&next).map(|(old, new)| (old - new).abs()).sum();
        std::mem::swap(&mut scores, &mut next);
        iterations += 1;
    }

    PageRankResult {
        scores: members.iter().copied().zip(scores).collect(),
        iterations,
        delta,
    }
}

/// The top `fraction` of ranked nodes, at least one when `fraction > 0`.
/// Ties are broken by `tiebreak` ascending.
pub fn top_fraction<K: Ord>(
    result: &PageRankResult,
    fraction: f64,
    tiebreak: impl Fn(NodeIndex) -> K,
) -> Vec<NodeIndex> {
    if fraction <= 0.0 || result.scores.is_empty() {
        return Vec::new();
    }
    let n = result.scores.len();
    let keep = ((n as f64 * fraction).ceil() as usize).clamp(1, n);

    let mut ranked: Vec<(NodeIndex, f64)> = result.scores.iter().map(|(k, v)| (*k, *v)).collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| tiebreak(a.0).cmp(&tiebreak(b.0)))
    });
    ranked.into_iter().take(keep).map(|(idx, _)| idx).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn star() -> (UnGraph<&'static str, f64>, Vec<NodeIndex>) {
        let mut g = UnGraph::default();
        let hub = g.add_node("hub");
        let mut nodes = vec![hub];
        for name in ["a", "b", "c", "d"] {
            let leaf = g.add_node(name);
            g.add_edge(hub, leaf, 1.0);
            nodes.push(leaf);
        }
        (g, nodes)
    }

    #[test]
    fn hub_ranks_highest() {
        let (g, nodes) = star();
        let result = pagerank(&g, &nodes, 0.85, 100, 1e-9);

        let total: f64 = result.scores.values().sum();
        assert!((total - 1.0).abs() < 1e-6);
        for leaf in &nodes[1..] {
            assert!(result.score(nodes[0]) > result.score(*leaf));
        }
        assert!(result.iterations > 0);
    }

    #[test]
    fn restricting_members_ignores_outside_edges() {
        let (g, nodes) = star();
        let result = pagerank(&g, &nodes[1..3], 0.85, 100, 1e-9);
        assert_eq!(result.scores.len(), 2);
        assert!((result.score(nodes[1]) - 0.5).abs() < 1e-9);
        assert_eq!(result.score(nodes[0]), 0.0);
    }

    #[test]
    fn top_fraction_keeps_at_least_one() {
        let (g, nodes) = star();
        let result = pagerank(&g, &nodes, 0.85, 100, 1e-9);

        assert_eq!(top_fraction(&result, 0.1, |i| g[i]), vec![nodes[0]]);
        assert_eq!(top_fraction(&result, 0.4, |i| g[i]).len(), 2);
        assert!(top_fraction(&result, 0.0, |i| g[i]).is_empty());
    }

    #[test]
    fn empty_member_set() {
        let (g, _) = star();
        let result = pagerank(&g, &[], 0.85, 100, 1e-9);
        assert!(result.scores.is_empty());
        assert_eq!(result.iterations, 0);
    }
}
