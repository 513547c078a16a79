//! Structural validation for assembled region adjacency graphs.
//!
//! Useful for debugging, testing, and checking graphs read back from disk.

use crate::graph::GlobalGraph;
use crate::reconcile::UnionFind;
use crate::types::BACKGROUND;

/// Detailed validation report for a global graph.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    /// Number of nodes.
    pub num_nodes: usize,
    /// Number of edges.
    pub num_edges: usize,
    /// Connected components of the adjacency graph.
    pub components: usize,
    /// Nodes without any neighbour.
    pub isolated_nodes: usize,
    /// Largest node degree.
    pub max_degree: usize,
    /// True if node ids are exactly `1..=num_nodes`.
    pub compact: bool,

    /// Edges whose endpoints are missing, equal, or unordered.
    pub malformed_edges: usize,
    /// Adjacency entries that do not correspond to an edge, plus edges
    /// missing from either endpoint's list.
    pub adjacency_mismatches: usize,
    /// Nodes no leaf label maps to, when assignments are present.
    pub unassigned_nodes: usize,
    /// Edges with statistics but zero samples.
    pub unsampled_edges: usize,
}

impl ValidationReport {
    /// True if the graph is internally consistent.
    ///
    /// Isolated nodes and unsampled edges are allowed.
    pub fn is_valid(&self) -> bool {
        self.malformed_edges == 0 && self.adjacency_mismatches == 0 && self.unassigned_nodes == 0
    }

    /// Format a summary of any issues found.
    pub fn summary(&self) -> String {
        let mut issues = Vec::new();
        if self.malformed_edges > 0 {
            issues.push(format!("{} malformed edges", self.malformed_edges));
        }
        if self.adjacency_mismatches > 0 {
            issues.push(format!(
                "{} adjacency mismatches",
                self.adjacency_mismatches
            ));
        }
        if self.unassigned_nodes > 0 {
            issues.push(format!(
                "{} nodes without leaf labels",
                self.unassigned_nodes
            ));
        }
        if issues.is_empty() {
            "Valid".to_string()
        } else {
            issues.join(", ")
        }
    }
}

impl std::fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ValidationReport {{ V={}, E={}, components={}, isolated={}, max_degree={}, {} }}",
            self.num_nodes,
            self.num_edges,
            self.components,
            self.isolated_nodes,
            self.max_degree,
            self.summary()
        )
    }
}

/// Validate a global graph.
///
/// Checks:
/// - Every edge joins two distinct nodes, smaller id first
/// - The adjacency view (if present) lists exactly the edges, both ways
/// - Every node is reached by at least one leaf label (if assignments are present)
pub fn validate_graph(graph: &GlobalGraph) -> ValidationReport {
    let nodes = graph.nodes();
    let n = nodes.len();
    let index = |id| nodes.binary_search(&id).ok();

    let mut degree = vec![0usize; n];
    let mut uf = UnionFind::new(n);
    let mut malformed_edges = 0usize;
    for &[u, v] in graph.edges() {
        match (index(u), index(v)) {
            (Some(a), Some(b)) if u < v && u != BACKGROUND => {
                degree[a] += 1;
                degree[b] += 1;
                uf.union_keep_min(a as u32, b as u32);
            }
            _ => malformed_edges += 1,
        }
    }
    let components = (0..n as u32).filter(|&i| uf.find(i) == i).count();

    let mut adjacency_mismatches = 0usize;
    if let Some(adj) = graph.adjacency() {
        if adj.offsets().len() != n + 1 {
            adjacency_mismatches += n.max(1);
        } else {
            for (i, &id) in nodes.iter().enumerate() {
                let list = adj.neighbors_at(i);
                adjacency_mismatches += list.iter().filter(|&&m| !graph.has_edge(id, m)).count();
                adjacency_mismatches += degree[i].abs_diff(list.len());
            }
        }
    }

    let unassigned_nodes = match graph.assignments() {
        Some(a) => {
            let mut hit = vec![false; n];
            for &(_, id) in a.entries() {
                if let Some(i) = index(id) {
                    hit[i] = true;
                }
            }
            hit.iter().filter(|&&h| !h).count()
        }
        None => 0,
    };

    let unsampled_edges = graph
        .edge_stats()
        .map(|s| s.iter().filter(|e| e.count == 0).count())
        .unwrap_or(0);

    ValidationReport {
        num_nodes: n,
        num_edges: graph.num_edges(),
        components,
        isolated_nodes: degree.iter().filter(|&&d| d == 0).count(),
        max_degree: degree.iter().copied().max().unwrap_or(0),
        compact: nodes.iter().enumerate().all(|(i, &id)| id == i as u64 + 1),
        malformed_edges,
        adjacency_mismatches,
        unassigned_nodes,
        unsampled_edges,
    }
}
