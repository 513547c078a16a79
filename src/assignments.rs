//! Final node of every leaf label.
//!
//! Each merge step stores the id changes it made. Following those tables from
//! scale 1 up to the top, and then through the assembly relabel, yields the
//! global id of every `(leaf block, local label)` pair.

use std::collections::hash_map::Entry;

use rustc_hash::FxHashMap;

use crate::blocking::Pyramid;
use crate::error::{GraphError, Result};
use crate::store::SubgraphStore;
use crate::subgraph::Subgraph;
use crate::types::{BlockId, LeafRef, NodeId, BACKGROUND};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeAssignments {
    entries: Vec<(LeafRef, NodeId)>,
}

impl NodeAssignments {
    /// Wrap entries sorted by strictly ascending `LeafRef`.
    pub fn from_sorted(entries: Vec<(LeafRef, NodeId)>) -> Result<Self> {
        if !entries.windows(2).all(|w| w[0].0 < w[1].0) {
            return Err(GraphError::decode("assignments not strictly ascending"));
        }
        if let Some((leaf, _)) = entries.iter().find(|(_, id)| *id == BACKGROUND) {
            return Err(GraphError::decode(format!(
                "label {} of leaf block {} assigned to background",
                leaf.label(),
                leaf.block()
            )));
        }
        Ok(Self { entries })
    }

    /// Compose the relabel tables persisted in `store` with the relabel of
    /// the assembled `top` subgraph.
    pub fn resolve<S: SubgraphStore + ?Sized>(
        store: &S,
        pyramid: &Pyramid,
        top: &Subgraph,
    ) -> Result<Self> {
        let top_scale = pyramid.top_scale();
        let mut entries: Vec<(LeafRef, NodeId)> = if top_scale == 0 {
            top.relabel()
                .iter()
                .map(|&(leaf, id)| (LeafRef::from(leaf), id))
                .collect()
        } else {
            // (leaf, current id, block holding it at the current scale)
            let mut current: Vec<(LeafRef, NodeId, BlockId)> = Vec::new();
            for block in 0..pyramid.num_blocks(1)? {
                for &(leaf, id) in store.get(1, block)?.relabel() {
                    current.push((LeafRef::from(leaf), id, block));
                }
            }
            for scale in 2..=top_scale {
                let mut tables: FxHashMap<BlockId, Vec<(u64, NodeId)>> = FxHashMap::default();
                for entry in &mut current {
                    let parent = pyramid.parent(scale - 1, entry.2)?;
                    let table = match tables.entry(parent) {
                        Entry::Occupied(o) => o.into_mut(),
                        Entry::Vacant(v) => v.insert(store.get(scale, parent)?.relabel().to_vec()),
                    };
                    entry.1 = lookup(table, entry.1);
                    entry.2 = parent;
                }
            }
            current
                .into_iter()
                .map(|(leaf, id, _)| (leaf, lookup(top.relabel(), id)))
                .collect()
        };
        entries.sort_unstable_by_key(|&(leaf, _)| leaf);
        Self::from_sorted(entries)
    }

    pub fn entries(&self) -> &[(LeafRef, NodeId)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, leaf: LeafRef) -> Option<NodeId> {
        self.entries
            .binary_search_by_key(&leaf, |&(l, _)| l)
            .ok()
            .map(|i| self.entries[i].1)
    }

    /// Assignments of one leaf block, ascending by label.
    pub fn for_block(&self, block: BlockId) -> &[(LeafRef, NodeId)] {
        let start = self.entries.partition_point(|(l, _)| l.block() < block);
        let end = self.entries.partition_point(|(l, _)| l.block() <= block);
        &self.entries[start..end]
    }

    pub(crate) fn remap(&mut self, f: impl Fn(NodeId) -> NodeId) {
        for entry in &mut self.entries {
            entry.1 = f(entry.1);
        }
    }
}

/// Apply a sparse `(old, new)` table; ids not in it are unchanged.
fn lookup(table: &[(u64, NodeId)], id: NodeId) -> NodeId {
    table
        .binary_search_by_key(&id, |&(old, _)| old)
        .map(|i| table[i].1)
        .unwrap_or(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_leaves_unlisted_ids() {
        let table = [(3, 1), (9, 2)];
        assert_eq!(lookup(&table, 9), 2);
        assert_eq!(lookup(&table, 4), 4);
    }

    #[test]
    fn test_for_block_slices() {
        let a = NodeAssignments::from_sorted(vec![
            (LeafRef::new(0, 1), 1),
            (LeafRef::new(2, 1), 1),
            (LeafRef::new(2, 5), 3),
            (LeafRef::new(3, 1), 4),
        ])
        .unwrap();
        let block2: Vec<u32> = a.for_block(2).iter().map(|(l, _)| l.label()).collect();
        assert_eq!(block2, vec![1, 5]);
        assert!(a.for_block(1).is_empty());
        assert_eq!(a.get(LeafRef::new(3, 1)), Some(4));
        assert_eq!(a.get(LeafRef::new(3, 2)), None);
    }

    #[test]
    fn test_rejects_background_and_disorder() {
        assert!(NodeAssignments::from_sorted(vec![(LeafRef::new(0, 1), 0)]).is_err());
        assert!(NodeAssignments::from_sorted(vec![
            (LeafRef::new(1, 1), 1),
            (LeafRef::new(0, 1), 1)
        ])
        .is_err());
    }
}
