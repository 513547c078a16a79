//! The unit exchanged between merge steps: nodes, edges, optional edge
//! statistics, and the boundary contacts still open on the block's faces.
//!
//! A `Subgraph` is always held in canonical form (sorted, deduplicated, no
//! background), so equal graphs encode to equal bytes and a repeated merge
//! step writes a byte-identical record.

mod codec;

pub use codec::{decode, encode, peek_counts};

use rustc_hash::FxHashSet;

use crate::blocking::Blocking;
use crate::error::{GraphError, Result};
use crate::types::{BlockId, Contact, ContactKind, EdgeStats, Face, LeafRef, NodeId, BACKGROUND};

/// Adjacency subgraph of one block at one scale.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Subgraph {
    nodes: Vec<NodeId>,
    edges: Vec<[NodeId; 2]>,
    stats: Option<Vec<EdgeStats>>,
    contacts: Vec<Contact>,
    /// Id changes made by the merge step that produced this subgraph:
    /// `(old, new)` sorted by `old`. For merges of leaf blocks `old` is a
    /// packed `LeafRef`; above that it is a global id of a child.
    relabel: Vec<(u64, NodeId)>,
}

impl Subgraph {
    /// Assemble a subgraph from parts, validating canonical form.
    pub fn from_parts(
        nodes: Vec<NodeId>,
        edges: Vec<[NodeId; 2]>,
        stats: Option<Vec<EdgeStats>>,
        contacts: Vec<Contact>,
        relabel: Vec<(u64, NodeId)>,
    ) -> Result<Self> {
        let graph = Self {
            nodes,
            edges,
            stats,
            contacts,
            relabel,
        };
        graph.check_canonical()?;
        Ok(graph)
    }

    /// Internal constructor for parts that are canonical by construction.
    pub(crate) fn from_sorted_parts(
        nodes: Vec<NodeId>,
        edges: Vec<[NodeId; 2]>,
        stats: Option<Vec<EdgeStats>>,
        contacts: Vec<Contact>,
        relabel: Vec<(u64, NodeId)>,
    ) -> Self {
        let graph = Self {
            nodes,
            edges,
            stats,
            contacts,
            relabel,
        };
        debug_assert!(
            graph.check_canonical().is_ok(),
            "non-canonical subgraph: {:?}",
            graph.check_canonical()
        );
        graph
    }

    fn check_canonical(&self) -> Result<()> {
        if self.nodes.first() == Some(&BACKGROUND) {
            return Err(GraphError::decode("background id stored as a node"));
        }
        if !self.nodes.windows(2).all(|w| w[0] < w[1]) {
            return Err(GraphError::decode("node ids not strictly ascending"));
        }
        if !self.edges.windows(2).all(|w| w[0] < w[1]) {
            return Err(GraphError::decode("edges not strictly ascending"));
        }
        for &[u, v] in &self.edges {
            if u >= v {
                return Err(GraphError::decode(format!("edge ({u}, {v}) not ordered")));
            }
            if !self.has_node(u) || !self.has_node(v) {
                return Err(GraphError::decode(format!(
                    "edge ({u}, {v}) references a missing node"
                )));
            }
        }
        if let Some(stats) = &self.stats {
            if stats.len() != self.edges.len() {
                return Err(GraphError::decode(format!(
                    "{} edge statistics for {} edges",
                    stats.len(),
                    self.edges.len()
                )));
            }
        }
        if !self
            .contacts
            .windows(2)
            .all(|w| w[0].sort_key() < w[1].sort_key())
        {
            return Err(GraphError::decode("contacts not strictly ascending"));
        }
        if let Some(c) = self.contacts.iter().find(|c| !self.has_node(c.node)) {
            return Err(GraphError::decode(format!(
                "contact on face {} references missing node {}",
                c.face.index(),
                c.node
            )));
        }
        if !self.relabel.windows(2).all(|w| w[0].0 < w[1].0) {
            return Err(GraphError::decode("relabel table not strictly ascending"));
        }
        Ok(())
    }

    #[inline]
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    #[inline]
    pub fn edges(&self) -> &[[NodeId; 2]] {
        &self.edges
    }

    /// Per-edge statistics, parallel to `edges()`, if the feature computer ran.
    #[inline]
    pub fn edge_stats(&self) -> Option<&[EdgeStats]> {
        self.stats.as_deref()
    }

    #[inline]
    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    #[inline]
    pub fn relabel(&self) -> &[(u64, NodeId)] {
        &self.relabel
    }

    #[inline]
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    #[inline]
    pub fn has_stats(&self) -> bool {
        self.stats.is_some()
    }

    #[inline]
    pub fn has_node(&self, node: NodeId) -> bool {
        self.nodes.binary_search(&node).is_ok()
    }

    /// Statistics of edge `i`, or zero when the subgraph carries none.
    #[inline]
    pub fn stats_at(&self, i: usize) -> EdgeStats {
        self.stats.as_ref().map(|s| s[i]).unwrap_or_default()
    }

    pub fn max_node_id(&self) -> Option<NodeId> {
        self.nodes.last().copied()
    }
}

/// Builds a canonical scale-0 subgraph from extractor output.
///
/// Labels are local to the leaf block. Label 0 is background: nodes, edges and
/// contacts touching it are dropped.
pub struct LeafBuilder<'a> {
    blocking: &'a Blocking,
    block: BlockId,
    with_stats: bool,
    nodes: FxHashSet<u32>,
    edges: Vec<([NodeId; 2], EdgeStats)>,
    contacts: Vec<Contact>,
}

impl<'a> LeafBuilder<'a> {
    pub fn new(blocking: &'a Blocking, block: BlockId) -> Result<Self> {
        blocking.grid_position(block)?;
        Ok(Self {
            blocking,
            block,
            with_stats: false,
            nodes: FxHashSet::default(),
            edges: Vec::new(),
            contacts: Vec::new(),
        })
    }

    /// Record per-edge statistics in the built subgraph.
    pub fn with_stats(mut self) -> Self {
        self.with_stats = true;
        self
    }

    pub fn block(&self) -> BlockId {
        self.block
    }

    pub fn add_node(&mut self, label: u32) {
        if label as NodeId != BACKGROUND {
            self.nodes.insert(label);
        }
    }

    pub fn add_edge(&mut self, a: u32, b: u32) {
        self.add_weighted_edge(a, b, EdgeStats::default());
    }

    pub fn add_weighted_edge(&mut self, a: u32, b: u32, stats: EdgeStats) {
        self.add_node(a);
        self.add_node(b);
        if a == b || a as NodeId == BACKGROUND || b as NodeId == BACKGROUND {
            return;
        }
        let (u, v) = if a < b { (a, b) } else { (b, a) };
        self.edges.push(([u as NodeId, v as NodeId], stats));
    }

    pub fn add_contact(
        &mut self,
        face: Face,
        inner_label: u32,
        outer_label: u32,
        kind: ContactKind,
    ) -> Result<()> {
        self.add_weighted_contact(face, inner_label, outer_label, kind, EdgeStats::default())
    }

    /// Record that `inner_label` touches `outer_label` of the neighbouring
    /// leaf block across `face`.
    pub fn add_weighted_contact(
        &mut self,
        face: Face,
        inner_label: u32,
        outer_label: u32,
        kind: ContactKind,
        stats: EdgeStats,
    ) -> Result<()> {
        let Some(outer_block) = self.blocking.neighbor(self.block, face)? else {
            let coord = self.blocking.coord(self.block)?;
            return Err(GraphError::InconsistentBoundary {
                inner: coord,
                outer: coord,
                reason: format!(
                    "contact across face {} which lies on the volume boundary",
                    face.index()
                ),
            });
        };
        self.add_node(inner_label);
        if inner_label as NodeId == BACKGROUND || outer_label as NodeId == BACKGROUND {
            return Ok(());
        }
        self.contacts.push(Contact {
            face,
            inner: LeafRef::new(self.block, inner_label),
            outer: LeafRef::new(outer_block, outer_label),
            kind,
            node: inner_label as NodeId,
            stats,
        });
        Ok(())
    }

    pub fn build(self) -> Result<Subgraph> {
        let mut nodes: Vec<NodeId> = self.nodes.into_iter().map(NodeId::from).collect();
        nodes.sort_unstable();

        let mut raw_edges = self.edges;
        raw_edges.sort_by_key(|(e, _)| *e);
        let mut edges: Vec<[NodeId; 2]> = Vec::with_capacity(raw_edges.len());
        let mut stats: Vec<EdgeStats> = Vec::with_capacity(raw_edges.len());
        for (e, s) in raw_edges {
            if edges.last() == Some(&e) {
                if let Some(last) = stats.last_mut() {
                    last.accumulate(s);
                }
            } else {
                edges.push(e);
                stats.push(s);
            }
        }

        let mut raw_contacts = self.contacts;
        raw_contacts.sort_by_key(|c| c.sort_key());
        let mut contacts: Vec<Contact> = Vec::with_capacity(raw_contacts.len());
        for c in raw_contacts {
            match contacts.last_mut() {
                Some(last) if last.sort_key() == c.sort_key() => {
                    if last.kind != c.kind {
                        return Err(GraphError::InconsistentBoundary {
                            inner: self.blocking.coord(c.inner.block())?,
                            outer: self.blocking.coord(c.outer.block())?,
                            reason: format!(
                                "labels {} and {} reported as both the same region and adjacent",
                                c.inner.label(),
                                c.outer.label()
                            ),
                        });
                    }
                    last.stats.accumulate(c.stats);
                }
                _ => contacts.push(c),
            }
        }
        if !self.with_stats {
            for c in &mut contacts {
                c.stats = EdgeStats::default();
            }
        }

        Ok(Subgraph::from_sorted_parts(
            nodes,
            edges,
            self.with_stats.then_some(stats),
            contacts,
            Vec::new(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::UVec3;

    fn two_leaves() -> Blocking {
        Blocking::new(UVec3::new(4, 4, 8), UVec3::splat(4)).unwrap()
    }

    #[test]
    fn test_builder_drops_background_and_self_edges() {
        let blocking = two_leaves();
        let mut b = LeafBuilder::new(&blocking, 0).unwrap();
        b.add_edge(0, 3);
        b.add_edge(3, 3);
        b.add_edge(5, 3);
        b.add_edge(3, 5);
        b.add_node(7);
        let g = b.build().unwrap();
        assert_eq!(g.nodes(), &[3, 5, 7]);
        assert_eq!(g.edges(), &[[3, 5]]);
        assert!(!g.has_stats());
    }

    #[test]
    fn test_builder_accumulates_duplicate_edge_stats() {
        let blocking = two_leaves();
        let mut b = LeafBuilder::new(&blocking, 0).unwrap().with_stats();
        b.add_weighted_edge(2, 1, EdgeStats::new(1.0, 1));
        b.add_weighted_edge(1, 2, EdgeStats::new(3.0, 2));
        let g = b.build().unwrap();
        assert_eq!(g.edges(), &[[1, 2]]);
        assert_eq!(g.edge_stats().unwrap(), &[EdgeStats::new(4.0, 3)]);
    }

    #[test]
    fn test_contact_targets_face_neighbor() {
        let blocking = two_leaves();
        let mut b = LeafBuilder::new(&blocking, 0).unwrap();
        b.add_contact(Face::upper(2), 1, 4, ContactKind::SameRegion)
            .unwrap();
        b.add_contact(Face::upper(2), 1, 4, ContactKind::SameRegion)
            .unwrap();
        let g = b.build().unwrap();
        assert_eq!(g.contacts().len(), 1);
        let c = g.contacts()[0];
        assert_eq!(c.inner, LeafRef::new(0, 1));
        assert_eq!(c.outer, LeafRef::new(1, 4));
        assert_eq!(c.node, 1);
        assert!(g.has_node(1));
    }

    #[test]
    fn test_contact_on_volume_boundary_is_rejected() {
        let blocking = two_leaves();
        let mut b = LeafBuilder::new(&blocking, 0).unwrap();
        let err = b
            .add_contact(Face::lower(0), 1, 1, ContactKind::Adjacent)
            .unwrap_err();
        assert!(matches!(err, GraphError::InconsistentBoundary { .. }));
    }

    #[test]
    fn test_contradictory_contact_kinds_are_rejected() {
        let blocking = two_leaves();
        let mut b = LeafBuilder::new(&blocking, 1).unwrap();
        b.add_contact(Face::lower(2), 2, 1, ContactKind::SameRegion)
            .unwrap();
        b.add_contact(Face::lower(2), 2, 1, ContactKind::Adjacent)
            .unwrap();
        assert!(matches!(
            b.build(),
            Err(GraphError::InconsistentBoundary { .. })
        ));
    }

    #[test]
    fn test_from_parts_rejects_non_canonical() {
        assert!(Subgraph::from_parts(vec![2, 1], vec![], None, vec![], vec![]).is_err());
        assert!(Subgraph::from_parts(vec![0, 1], vec![], None, vec![], vec![]).is_err());
        assert!(Subgraph::from_parts(vec![1, 2], vec![[2, 1]], None, vec![], vec![]).is_err());
        assert!(Subgraph::from_parts(vec![1, 2], vec![[1, 3]], None, vec![], vec![]).is_err());
        assert!(
            Subgraph::from_parts(vec![1, 2], vec![[1, 2]], Some(vec![]), vec![], vec![]).is_err()
        );
        assert!(Subgraph::from_parts(vec![1, 2], vec![[1, 2]], None, vec![], vec![]).is_ok());
    }
}
