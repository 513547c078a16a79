//! Id reconciliation for one merge step.
//!
//! A step takes the subgraphs of a sibling group (or of the whole top scale)
//! and produces one subgraph in which every region has exactly one id:
//!
//! 1. `(child slot, node)` pairs are mapped to dense indices, in slot order
//!    then ascending node order.
//! 2. Contacts whose outer leaf lies inside the group are paired with their
//!    mirror in the partner child. `SameRegion` pairs are unioned;
//!    `Adjacent` pairs become edges.
//! 3. Components receive ids: fresh ones from the allocator when the inputs
//!    are leaves, otherwise the smallest global id in the component.
//! 4. Edges are relabelled, self-edges dropped, duplicates coalesced with
//!    their statistics summed. Remaining contacts are carried up.

mod ids;
mod union_find;

pub(crate) use union_find::UnionFind;

pub use ids::{IdAllocator, IdScope, PartitionedRanges, SharedCounter};

use crate::blocking::Pyramid;
use crate::error::{GraphError, Result};
use crate::store::BlockKey;
use crate::subgraph::Subgraph;
use crate::types::{BlockId, Contact, ContactKind, EdgeStats, LeafRef, NodeId};

/// What a reconciliation step produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The parent `block` at `scale`, from its children at `scale - 1`.
    Parent { scale: u32, block: BlockId },
    /// The final graph, from every block at `scale`.
    Top { scale: u32 },
}

impl Step {
    /// Scale of the input subgraphs.
    pub fn child_scale(self) -> u32 {
        match self {
            Step::Parent { scale, .. } => scale.saturating_sub(1),
            Step::Top { scale } => scale,
        }
    }
}

fn boundary_error(pyramid: &Pyramid, contact: &Contact, reason: String) -> GraphError {
    let leaves = pyramid.leaves();
    match (
        leaves.coord(contact.inner.block()),
        leaves.coord(contact.outer.block()),
    ) {
        (Ok(inner), Ok(outer)) => GraphError::InconsistentBoundary {
            inner,
            outer,
            reason,
        },
        (Err(e), _) | (_, Err(e)) => e,
    }
}

/// Dense numbering of `(slot, node)` pairs.
struct DenseIndex<'a> {
    children: &'a [(BlockId, Subgraph)],
    offsets: Vec<u32>,
}

impl<'a> DenseIndex<'a> {
    fn new(children: &'a [(BlockId, Subgraph)]) -> Result<Self> {
        let mut offsets = Vec::with_capacity(children.len() + 1);
        let mut total = 0u64;
        offsets.push(0);
        for (_, g) in children {
            total += g.num_nodes() as u64;
            let offset = u32::try_from(total).map_err(|_| {
                GraphError::invalid_config(format!(
                    "{total} nodes in one merge step exceed the dense index range"
                ))
            })?;
            offsets.push(offset);
        }
        Ok(Self { children, offsets })
    }

    fn len(&self) -> usize {
        self.offsets[self.offsets.len() - 1] as usize
    }

    /// Dense index of `node` in child `slot`. The node must exist there.
    fn get(&self, slot: usize, node: NodeId) -> Option<u32> {
        let pos = self.children[slot].1.nodes().binary_search(&node).ok()?;
        Some(self.offsets[slot] + pos as u32)
    }
}

/// Reconcile `children` (ascending by block, all at `step.child_scale()`).
///
/// For `Step::Top` the result has no contacts; any contact still open is an
/// `UnresolvedTopLevelBoundary`.
pub fn reconcile(
    pyramid: &Pyramid,
    allocator: &dyn IdAllocator,
    step: Step,
    children: &[(BlockId, Subgraph)],
) -> Result<Subgraph> {
    if let Step::Parent { scale: 0, block } = step {
        return Err(GraphError::OutOfRange {
            scale: 0,
            block: block as u64,
            num_blocks: pyramid.leaves().num_blocks() as u64,
        });
    }
    let child_scale = step.child_scale();
    let leaves = pyramid.leaves();
    let child_blocking = pyramid.blocking(child_scale)?;

    if !children.windows(2).all(|w| w[0].0 < w[1].0) {
        return Err(GraphError::invalid_config(
            "merge inputs must be in ascending block order",
        ));
    }
    for &(block, _) in children {
        child_blocking.grid_position(block).map_err(|_| GraphError::OutOfRange {
            scale: child_scale,
            block: block as u64,
            num_blocks: child_blocking.num_blocks() as u64,
        })?;
        if let Step::Parent { scale, block: parent } = step {
            if pyramid.parent(scale - 1, block)? != parent {
                return Err(GraphError::invalid_config(format!(
                    "block {block} at scale {child_scale} is not a child of {parent}"
                )));
            }
        }
    }

    let dense = DenseIndex::new(children)?;
    let mut uf = UnionFind::new(dense.len());
    let mut edges: Vec<([u32; 2], EdgeStats)> = Vec::new();
    let mut carried: Vec<(usize, Contact)> = Vec::new();

    for (slot, (block, graph)) in children.iter().enumerate() {
        for (i, &[u, v]) in graph.edges().iter().enumerate() {
            // Canonical form guarantees both endpoints are nodes of this child.
            if let (Some(a), Some(b)) = (dense.get(slot, u), dense.get(slot, v)) {
                edges.push(([a, b], graph.stats_at(i)));
            }
        }

        for contact in graph.contacts() {
            let expected = leaves.neighbor(contact.inner.block(), contact.face)?;
            if expected != Some(contact.outer.block()) {
                return Err(boundary_error(
                    pyramid,
                    contact,
                    format!(
                        "outer leaf is not the neighbour across face {}",
                        contact.face.index()
                    ),
                ));
            }
            if pyramid.ancestor(0, contact.inner.block(), child_scale)? != *block {
                return Err(boundary_error(
                    pyramid,
                    contact,
                    format!("inner leaf lies outside block {block} at scale {child_scale}"),
                ));
            }

            if let Step::Parent { scale, block: parent } = step {
                if pyramid.ancestor(0, contact.outer.block(), scale)? != parent {
                    carried.push((slot, *contact));
                    continue;
                }
            }
            let outer_owner = pyramid.ancestor(0, contact.outer.block(), child_scale)?;
            let Ok(partner) = children.binary_search_by_key(&outer_owner, |(b, _)| *b) else {
                return Err(match step {
                    Step::Top { scale } => GraphError::UnresolvedTopLevelBoundary {
                        scale,
                        inner: leaves.coord(contact.inner.block())?,
                        outer: leaves.coord(contact.outer.block())?,
                    },
                    Step::Parent { .. } => {
                        GraphError::not_found(BlockKey::new(child_scale, outer_owner))
                    }
                });
            };

            let mirror_key = (contact.outer, contact.inner, contact.face.opposite().index());
            let partner_contacts = children[partner].1.contacts();
            let mirror = partner_contacts
                .binary_search_by_key(&mirror_key, |c| c.sort_key())
                .map(|i| &partner_contacts[i])
                .map_err(|_| {
                    boundary_error(
                        pyramid,
                        contact,
                        format!(
                            "labels {} and {} have no mirrored contact",
                            contact.inner.label(),
                            contact.outer.label()
                        ),
                    )
                })?;
            if mirror.kind != contact.kind {
                return Err(boundary_error(
                    pyramid,
                    contact,
                    format!(
                        "labels {} and {} are reported as {:?} on one side and {:?} on the other",
                        contact.inner.label(),
                        contact.outer.label(),
                        contact.kind,
                        mirror.kind
                    ),
                ));
            }

            let (Some(a), Some(b)) = (dense.get(slot, contact.node), dense.get(partner, mirror.node))
            else {
                return Err(boundary_error(
                    pyramid,
                    contact,
                    "contact refers to a node missing from its subgraph".to_string(),
                ));
            };
            match contact.kind {
                ContactKind::SameRegion => {
                    uf.union_keep_min(a, b);
                }
                ContactKind::Adjacent => {
                    let stats = if contact.face.is_upper() {
                        contact.stats
                    } else {
                        EdgeStats::default()
                    };
                    edges.push(([a, b], stats));
                }
            }
        }
    }

    let new_ids = assign_ids(allocator, step, children, &dense, &mut uf)?;

    let mut nodes = new_ids.clone();
    nodes.sort_unstable();
    nodes.dedup();

    let mut relabelled: Vec<([NodeId; 2], EdgeStats)> = edges
        .into_iter()
        .filter_map(|([a, b], stats)| {
            let (u, v) = (new_ids[a as usize], new_ids[b as usize]);
            match u.cmp(&v) {
                std::cmp::Ordering::Less => Some(([u, v], stats)),
                std::cmp::Ordering::Greater => Some(([v, u], stats)),
                std::cmp::Ordering::Equal => None,
            }
        })
        .collect();
    // Stable sort keeps the summation order of statistics deterministic.
    relabelled.sort_by_key(|(e, _)| *e);
    let mut out_edges: Vec<[NodeId; 2]> = Vec::with_capacity(relabelled.len());
    let mut out_stats: Vec<EdgeStats> = Vec::with_capacity(relabelled.len());
    for (e, s) in relabelled {
        if out_edges.last() == Some(&e) {
            if let Some(last) = out_stats.last_mut() {
                last.accumulate(s);
            }
        } else {
            out_edges.push(e);
            out_stats.push(s);
        }
    }
    let has_stats = children.iter().any(|(_, g)| g.has_stats());

    let mut contacts: Vec<Contact> = Vec::with_capacity(carried.len());
    for (slot, mut c) in carried {
        let Some(d) = dense.get(slot, c.node) else {
            return Err(boundary_error(
                pyramid,
                &c,
                "contact refers to a node missing from its subgraph".to_string(),
            ));
        };
        c.node = new_ids[d as usize];
        if !has_stats {
            c.stats = EdgeStats::default();
        }
        contacts.push(c);
    }
    contacts.sort_by_key(|c| c.sort_key());

    let relabel = relabel_table(child_scale, children, &dense, &new_ids)?;

    tracing::debug!(
        ?step,
        children = children.len(),
        nodes = nodes.len(),
        edges = out_edges.len(),
        open_contacts = contacts.len(),
        "reconciled"
    );

    Ok(Subgraph::from_sorted_parts(
        nodes,
        out_edges,
        has_stats.then_some(out_stats),
        contacts,
        relabel,
    ))
}

/// New id for every dense index.
fn assign_ids(
    allocator: &dyn IdAllocator,
    step: Step,
    children: &[(BlockId, Subgraph)],
    dense: &DenseIndex<'_>,
    uf: &mut UnionFind,
) -> Result<Vec<NodeId>> {
    let n = dense.len();
    let roots: Vec<u32> = (0..n as u32).map(|d| uf.find(d)).collect();

    if step.child_scale() == 0 {
        // Roots are component minima, so they appear in ascending key order.
        let mut rank = vec![u32::MAX; n];
        let mut components = 0u64;
        for (d, &r) in roots.iter().enumerate() {
            if r as usize == d {
                rank[d] = components as u32;
                components += 1;
            }
        }
        let scope = match step {
            Step::Parent { block, .. } => IdScope::Block(block),
            Step::Top { .. } => IdScope::Volume,
        };
        let range = allocator.allocate(scope, components)?;
        if range.end - range.start != components || (components > 0 && range.start == 0) {
            return Err(GraphError::IdRangeExhausted {
                requested: components,
                available: range.end - range.start,
            });
        }
        Ok(roots
            .iter()
            .map(|&r| range.start + rank[r as usize] as NodeId)
            .collect())
    } else {
        let mut min_id = vec![NodeId::MAX; n];
        for (slot, (_, g)) in children.iter().enumerate() {
            let base = dense.offsets[slot] as usize;
            for (i, &node) in g.nodes().iter().enumerate() {
                let r = roots[base + i] as usize;
                min_id[r] = min_id[r].min(node);
            }
        }
        Ok(roots.iter().map(|&r| min_id[r as usize]).collect())
    }
}

fn relabel_table(
    child_scale: u32,
    children: &[(BlockId, Subgraph)],
    dense: &DenseIndex<'_>,
    new_ids: &[NodeId],
) -> Result<Vec<(u64, NodeId)>> {
    let mut table = Vec::new();
    for (slot, (block, g)) in children.iter().enumerate() {
        let base = dense.offsets[slot] as usize;
        for (i, &node) in g.nodes().iter().enumerate() {
            let new = new_ids[base + i];
            if child_scale == 0 {
                let label = u32::try_from(node).map_err(|_| {
                    GraphError::decode(format!(
                        "leaf block {block} holds label {node} wider than 32 bits"
                    ))
                })?;
                table.push((LeafRef::new(*block, label).as_u64(), new));
            } else if node != new {
                table.push((node, new));
            }
        }
    }
    // Leaf tables are already in LeafRef order; global ids need sorting.
    table.sort_unstable_by_key(|&(old, _)| old);
    table.dedup_by_key(|&mut (old, _)| old);
    Ok(table)
}
