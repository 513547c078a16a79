//! Global id allocation.
//!
//! Fresh ids are only needed where local leaf labels become global: the merge
//! of leaf blocks into a scale-1 parent, or a top-level assembly directly over
//! leaves. Above that, components keep the smallest global id they contain.

use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};

use rustc_hash::FxHashMap;

use crate::blocking::Pyramid;
use crate::error::{GraphError, Result};
use crate::store::SubgraphStore;
use crate::types::{BlockId, NodeId, BACKGROUND};

/// Who is asking for ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdScope {
    /// Merge step producing the given scale-1 parent block.
    Block(BlockId),
    /// Assembly directly over leaf blocks.
    Volume,
}

/// Hands out non-overlapping ranges of global ids. Id 0 is never returned.
pub trait IdAllocator: Send + Sync {
    fn allocate(&self, scope: IdScope, count: u64) -> Result<Range<NodeId>>;
}

/// Process-wide atomic counter. Ids depend on scheduling order.
#[derive(Debug)]
pub struct SharedCounter {
    next: AtomicU64,
}

impl Default for SharedCounter {
    fn default() -> Self {
        Self::starting_at(BACKGROUND + 1)
    }
}

impl SharedCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(first: NodeId) -> Self {
        Self {
            next: AtomicU64::new(first.max(BACKGROUND + 1)),
        }
    }

    /// Counter positioned above every id already persisted at scale 1, so a
    /// resumed run never reuses an id.
    pub fn resume_from<S: SubgraphStore + ?Sized>(store: &S, pyramid: &Pyramid) -> Result<Self> {
        let mut max_id = BACKGROUND;
        if pyramid.top_scale() >= 1 {
            let parents: Vec<BlockId> = (0..pyramid.num_blocks(1)?).collect();
            let missing = store.list_missing(1, &parents)?;
            for block in parents {
                if missing.binary_search(&block).is_ok() {
                    continue;
                }
                if let Some(m) = store.get(1, block)?.max_node_id() {
                    max_id = max_id.max(m);
                }
            }
        }
        Ok(Self::starting_at(max_id.saturating_add(1)))
    }

    /// Next id that would be handed out.
    pub fn peek(&self) -> NodeId {
        self.next.load(Ordering::Relaxed)
    }
}

impl IdAllocator for SharedCounter {
    fn allocate(&self, _scope: IdScope, count: u64) -> Result<Range<NodeId>> {
        let start = self
            .next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_add(count))
            .map_err(|n| GraphError::IdRangeExhausted {
                requested: count,
                available: u64::MAX - n,
            })?;
        Ok(start..start + count)
    }
}

/// Reproducible ranges: each scale-1 parent owns a contiguous range sized by
/// the node counts of its leaf children, laid out in block order.
///
/// The same leaves always yield the same ranges, so global ids are identical
/// across runs, worker counts and resumptions.
#[derive(Debug, Clone)]
pub struct PartitionedRanges {
    blocks: FxHashMap<BlockId, Range<NodeId>>,
    volume: Range<NodeId>,
}

impl PartitionedRanges {
    /// Plan ranges from the leaf records in `store`. Every leaf must be present.
    pub fn plan<S: SubgraphStore + ?Sized>(store: &S, pyramid: &Pyramid) -> Result<Self> {
        let leaves = pyramid.leaves();
        let mut counts = Vec::with_capacity(leaves.num_blocks() as usize);
        for leaf in 0..leaves.num_blocks() {
            counts.push(store.node_count(0, leaf)?);
        }
        Self::from_leaf_counts(pyramid, &counts)
    }

    /// Plan ranges from per-leaf node counts indexed by leaf block.
    pub fn from_leaf_counts(pyramid: &Pyramid, counts: &[u64]) -> Result<Self> {
        let num_leaves = pyramid.leaves().num_blocks();
        if counts.len() != num_leaves as usize {
            return Err(GraphError::invalid_config(format!(
                "{} leaf counts for {num_leaves} leaf blocks",
                counts.len()
            )));
        }
        let overflow = || GraphError::IdRangeExhausted {
            requested: counts.iter().fold(0u64, |a, &c| a.saturating_add(c)),
            available: u64::MAX,
        };

        let mut next = BACKGROUND + 1;
        let mut blocks = FxHashMap::default();
        if pyramid.top_scale() >= 1 {
            for parent in 0..pyramid.num_blocks(1)? {
                let mut size = 0u64;
                for child in pyramid.children(1, parent)? {
                    size = size.checked_add(counts[child as usize]).ok_or_else(overflow)?;
                }
                let end = next.checked_add(size).ok_or_else(overflow)?;
                blocks.insert(parent, next..end);
                next = end;
            }
        }
        let volume_size = if pyramid.top_scale() == 0 {
            counts.iter().try_fold(0u64, |a, &c| a.checked_add(c)).ok_or_else(overflow)?
        } else {
            0
        };
        let volume = next..next.checked_add(volume_size).ok_or_else(overflow)?;
        Ok(Self { blocks, volume })
    }

    pub fn range(&self, scope: IdScope) -> Option<Range<NodeId>> {
        match scope {
            IdScope::Block(b) => self.blocks.get(&b).cloned(),
            IdScope::Volume => Some(self.volume.clone()),
        }
    }
}

impl IdAllocator for PartitionedRanges {
    fn allocate(&self, scope: IdScope, count: u64) -> Result<Range<NodeId>> {
        let reserved = self.range(scope).unwrap_or(0..0);
        let available = reserved.end - reserved.start;
        if count > available {
            return Err(GraphError::IdRangeExhausted {
                requested: count,
                available,
            });
        }
        Ok(reserved.start..reserved.start + count)
    }
}
