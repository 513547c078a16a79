//! The volume-wide region adjacency graph and its persisted form.

use std::fs;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::assignments::NodeAssignments;
use crate::error::{GraphError, Result};
use crate::types::{EdgeStats, LeafRef, NodeId, BACKGROUND};
use crate::wire::{check_word_aligned, ensure_words, push_stats, push_u64, read_stats, read_u64};

const HEADER_WORDS: usize = 4;
const FLAG_STATS: u64 = 1;
const FLAG_ADJACENCY: u64 = 1 << 1;
const FLAG_ASSIGNMENTS: u64 = 1 << 2;
const KNOWN_FLAGS: u64 = FLAG_STATS | FLAG_ADJACENCY | FLAG_ASSIGNMENTS;

/// Sorted neighbour lists in CSR form, indexed like `GlobalGraph::nodes()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adjacency {
    offsets: Vec<u64>,
    neighbors: Vec<NodeId>,
}

impl Adjacency {
    fn build(nodes: &[NodeId], edges: &[[NodeId; 2]]) -> Self {
        let index = |id: NodeId| nodes.binary_search(&id).unwrap_or(0);
        let mut degree = vec![0u64; nodes.len()];
        for &[u, v] in edges {
            degree[index(u)] += 1;
            degree[index(v)] += 1;
        }
        let mut offsets = Vec::with_capacity(nodes.len() + 1);
        let mut total = 0u64;
        offsets.push(0);
        for d in &degree {
            total += d;
            offsets.push(total);
        }
        let mut fill: Vec<u64> = offsets[..nodes.len()].to_vec();
        let mut neighbors = vec![BACKGROUND; total as usize];
        for &[u, v] in edges {
            let (iu, iv) = (index(u), index(v));
            neighbors[fill[iu] as usize] = v;
            fill[iu] += 1;
            neighbors[fill[iv] as usize] = u;
            fill[iv] += 1;
        }
        for i in 0..nodes.len() {
            neighbors[offsets[i] as usize..offsets[i + 1] as usize].sort_unstable();
        }
        Self { offsets, neighbors }
    }

    pub fn offsets(&self) -> &[u64] {
        &self.offsets
    }

    pub fn flat_neighbors(&self) -> &[NodeId] {
        &self.neighbors
    }

    /// Neighbours of the node at position `index` in `nodes()`.
    #[inline]
    pub fn neighbors_at(&self, index: usize) -> &[NodeId] {
        &self.neighbors[self.offsets[index] as usize..self.offsets[index + 1] as usize]
    }
}

/// Header fields of an encoded graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphHeader {
    pub num_nodes: u64,
    pub num_edges: u64,
    pub max_node_id: NodeId,
    pub max_edge_id: u64,
    pub has_stats: bool,
    pub has_adjacency: bool,
    pub has_assignments: bool,
}

/// Final region adjacency graph.
///
/// Node ids are sorted but not necessarily consecutive; consumers must not
/// assume compact ids unless `compact_ids` was applied.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalGraph {
    nodes: Vec<NodeId>,
    edges: Vec<[NodeId; 2]>,
    stats: Option<Vec<EdgeStats>>,
    adjacency: Option<Adjacency>,
    assignments: Option<NodeAssignments>,
}

impl GlobalGraph {
    /// Build from sorted nodes and sorted, ordered, deduplicated edges.
    pub fn from_parts(
        nodes: Vec<NodeId>,
        edges: Vec<[NodeId; 2]>,
        stats: Option<Vec<EdgeStats>>,
    ) -> Result<Self> {
        if nodes.first() == Some(&BACKGROUND) {
            return Err(GraphError::decode("background id stored as a node"));
        }
        if !nodes.windows(2).all(|w| w[0] < w[1]) {
            return Err(GraphError::decode("node ids not strictly ascending"));
        }
        if !edges.windows(2).all(|w| w[0] < w[1]) {
            return Err(GraphError::decode("edges not strictly ascending"));
        }
        for &[u, v] in &edges {
            if u >= v || nodes.binary_search(&u).is_err() || nodes.binary_search(&v).is_err() {
                return Err(GraphError::decode(format!("invalid edge ({u}, {v})")));
            }
        }
        if stats.as_ref().is_some_and(|s| s.len() != edges.len()) {
            return Err(GraphError::decode("edge statistics do not match edges"));
        }
        Ok(Self {
            nodes,
            edges,
            stats,
            adjacency: None,
            assignments: None,
        })
    }

    /// Compute and attach the adjacency view.
    pub fn with_adjacency(mut self) -> Self {
        self.adjacency = Some(Adjacency::build(&self.nodes, &self.edges));
        self
    }

    /// Attach leaf label assignments. Every assigned id must be a node.
    pub fn with_assignments(mut self, assignments: NodeAssignments) -> Result<Self> {
        if let Some(&(leaf, id)) = assignments
            .entries()
            .iter()
            .find(|(_, id)| self.nodes.binary_search(id).is_err())
        {
            return Err(GraphError::decode(format!(
                "label {} of leaf block {} is assigned to missing node {id}",
                leaf.label(),
                leaf.block()
            )));
        }
        self.assignments = Some(assignments);
        Ok(self)
    }

    /// Relabel nodes to `1..=num_nodes()`, preserving order. Background stays 0.
    pub fn compact_ids(&mut self) {
        let nodes = std::mem::take(&mut self.nodes);
        let remap = |id: NodeId| {
            nodes
                .binary_search(&id)
                .map(|i| i as NodeId + 1)
                .unwrap_or(BACKGROUND)
        };
        for e in &mut self.edges {
            *e = [remap(e[0]), remap(e[1])];
        }
        if let Some(adj) = &mut self.adjacency {
            for n in &mut adj.neighbors {
                *n = remap(*n);
            }
        }
        if let Some(a) = &mut self.assignments {
            a.remap(remap);
        }
        self.nodes = (1..=nodes.len() as NodeId).collect();
    }

    #[inline]
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    /// Largest node id, or 0 for an empty graph.
    pub fn max_node_id(&self) -> NodeId {
        self.nodes.last().copied().unwrap_or(BACKGROUND)
    }

    /// Index of the last edge, or 0 for a graph without edges.
    pub fn max_edge_id(&self) -> u64 {
        (self.edges.len() as u64).saturating_sub(1)
    }

    #[inline]
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    #[inline]
    pub fn edges(&self) -> &[[NodeId; 2]] {
        &self.edges
    }

    pub fn edge_stats(&self) -> Option<&[EdgeStats]> {
        self.stats.as_deref()
    }

    /// Mean weight per edge, `None` where an edge has no samples.
    pub fn edge_means(&self) -> Option<Vec<Option<f64>>> {
        self.stats
            .as_ref()
            .map(|s| s.iter().map(EdgeStats::mean).collect())
    }

    pub fn adjacency(&self) -> Option<&Adjacency> {
        self.adjacency.as_ref()
    }

    pub fn assignments(&self) -> Option<&NodeAssignments> {
        self.assignments.as_ref()
    }

    pub fn has_node(&self, id: NodeId) -> bool {
        self.nodes.binary_search(&id).is_ok()
    }

    pub fn has_edge(&self, a: NodeId, b: NodeId) -> bool {
        let e = if a < b { [a, b] } else { [b, a] };
        self.edges.binary_search(&e).is_ok()
    }

    /// Sorted neighbours of `id`, when the adjacency view is present.
    pub fn neighbors(&self, id: NodeId) -> Option<&[NodeId]> {
        let adj = self.adjacency.as_ref()?;
        let i = self.nodes.binary_search(&id).ok()?;
        Some(adj.neighbors_at(i))
    }

    pub fn header(&self) -> GraphHeader {
        GraphHeader {
            num_nodes: self.nodes.len() as u64,
            num_edges: self.edges.len() as u64,
            max_node_id: self.max_node_id(),
            max_edge_id: self.max_edge_id(),
            has_stats: self.stats.is_some(),
            has_adjacency: self.adjacency.is_some(),
            has_assignments: self.assignments.is_some(),
        }
    }

    /// Encode as little-endian `u64` words:
    ///
    /// ```text
    /// header      num_nodes, num_edges, max_node_id, max_edge_id
    /// edges       num_edges pairs (u, v)
    /// adjacency   2 * num_edges neighbour ids, then num_nodes + 1 offsets  if ADJACENCY
    /// nodes       num_nodes ids
    /// stats       num_edges pairs (f64 sum bits, count)                    if STATS
    /// assignments count, then count pairs (leaf ref, node id)              if ASSIGNMENTS
    /// flags       one word, always last
    /// ```
    ///
    /// Readers that only know the header, edges and adjacency can stop there.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut flags = 0;
        if self.stats.is_some() {
            flags |= FLAG_STATS;
        }
        if self.adjacency.is_some() {
            flags |= FLAG_ADJACENCY;
        }
        if self.assignments.is_some() {
            flags |= FLAG_ASSIGNMENTS;
        }
        push_u64(&mut buf, self.nodes.len() as u64);
        push_u64(&mut buf, self.edges.len() as u64);
        push_u64(&mut buf, self.max_node_id());
        push_u64(&mut buf, self.max_edge_id());

        for &[u, v] in &self.edges {
            push_u64(&mut buf, u);
            push_u64(&mut buf, v);
        }
        if let Some(adj) = &self.adjacency {
            for &n in &adj.neighbors {
                push_u64(&mut buf, n);
            }
            for &o in &adj.offsets {
                push_u64(&mut buf, o);
            }
        }
        for &n in &self.nodes {
            push_u64(&mut buf, n);
        }
        if let Some(stats) = &self.stats {
            for &s in stats {
                push_stats(&mut buf, s);
            }
        }
        if let Some(a) = &self.assignments {
            push_u64(&mut buf, a.len() as u64);
            for &(leaf, id) in a.entries() {
                push_u64(&mut buf, leaf.as_u64());
                push_u64(&mut buf, id);
            }
        }
        push_u64(&mut buf, flags);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        check_word_aligned(data)?;
        let h = peek_header(data)?;
        let end = data.len() - 8;
        let body = &data[..end];
        let mut pos = HEADER_WORDS * 8;

        ensure_words(body, pos, h.num_edges.saturating_mul(2), "edges")?;
        let mut edges = Vec::with_capacity(h.num_edges as usize);
        for _ in 0..h.num_edges {
            let u = read_u64(body, &mut pos)?;
            let v = read_u64(body, &mut pos)?;
            edges.push([u, v]);
        }

        let stored_adjacency = if h.has_adjacency {
            let total = h.num_edges.saturating_mul(2);
            ensure_words(body, pos, total, "adjacency neighbours")?;
            let mut neighbors = Vec::with_capacity(total as usize);
            for _ in 0..total {
                neighbors.push(read_u64(body, &mut pos)?);
            }
            ensure_words(body, pos, h.num_nodes.saturating_add(1), "adjacency offsets")?;
            let mut offsets = Vec::with_capacity(h.num_nodes as usize + 1);
            for _ in 0..=h.num_nodes {
                offsets.push(read_u64(body, &mut pos)?);
            }
            Some(Adjacency { offsets, neighbors })
        } else {
            None
        };

        ensure_words(body, pos, h.num_nodes, "nodes")?;
        let mut nodes = Vec::with_capacity(h.num_nodes as usize);
        for _ in 0..h.num_nodes {
            nodes.push(read_u64(body, &mut pos)?);
        }
        let stats = if h.has_stats {
            ensure_words(body, pos, h.num_edges.saturating_mul(2), "edge stats")?;
            let mut stats = Vec::with_capacity(h.num_edges as usize);
            for _ in 0..h.num_edges {
                stats.push(read_stats(body, &mut pos)?);
            }
            Some(stats)
        } else {
            None
        };

        let mut graph = Self::from_parts(nodes, edges, stats)?;
        if graph.max_node_id() != h.max_node_id || graph.max_edge_id() != h.max_edge_id {
            return Err(GraphError::decode("header maxima disagree with body"));
        }
        if let Some(stored) = stored_adjacency {
            graph = graph.with_adjacency();
            if graph.adjacency.as_ref() != Some(&stored) {
                return Err(GraphError::decode("adjacency section disagrees with edges"));
            }
        }

        if h.has_assignments {
            let count = read_u64(body, &mut pos)?;
            ensure_words(body, pos, count.saturating_mul(2), "assignments")?;
            let mut entries = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let leaf = LeafRef::from(read_u64(body, &mut pos)?);
                let id = read_u64(body, &mut pos)?;
                entries.push((leaf, id));
            }
            graph = graph.with_assignments(NodeAssignments::from_sorted(entries)?)?;
        }

        if pos != end {
            return Err(GraphError::decode(format!(
                "{} trailing bytes after graph",
                end - pos
            )));
        }
        Ok(graph)
    }

    /// Write the encoded graph to `path` atomically: either the complete graph
    /// appears at `path` or nothing does.
    pub fn write(&self, path: &Path) -> Result<()> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&self.encode())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| GraphError::Io(e.error))?;
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self> {
        Self::decode(&fs::read(path)?)
    }
}

/// Header of an encoded graph, without decoding the body. Reads the four
/// leading words and the trailing flags word.
pub fn peek_header(data: &[u8]) -> Result<GraphHeader> {
    ensure_words(data, 0, (HEADER_WORDS + 1) as u64, "header")?;
    let mut pos = 0;
    let num_nodes = read_u64(data, &mut pos)?;
    let num_edges = read_u64(data, &mut pos)?;
    let max_node_id = read_u64(data, &mut pos)?;
    let max_edge_id = read_u64(data, &mut pos)?;
    let mut pos = data.len() - 8;
    let flags = read_u64(data, &mut pos)?;
    if flags & !KNOWN_FLAGS != 0 {
        return Err(GraphError::decode(format!("unknown flags {flags:#x}")));
    }
    Ok(GraphHeader {
        num_nodes,
        num_edges,
        max_node_id,
        max_edge_id,
        has_stats: flags & FLAG_STATS != 0,
        has_adjacency: flags & FLAG_ADJACENCY != 0,
        has_assignments: flags & FLAG_ASSIGNMENTS != 0,
    })
}
