//! Keyed persistence of encoded subgraphs.
//!
//! Records are immutable once written: a second `put` of identical bytes is
//! a no-op, a `put` of different bytes fails with `AlreadyExists`. Readers
//! either see a complete record or `NotFound`, never a partial one.

mod file;

pub use file::{FileStore, VolumeAttributes};

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use rustc_hash::FxHashMap;

use crate::error::{GraphError, Result};
use crate::subgraph::{self, Subgraph};
use crate::types::BlockId;

/// Address of one subgraph record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockKey {
    pub scale: u32,
    pub block: BlockId,
}

impl BlockKey {
    #[inline]
    pub const fn new(scale: u32, block: BlockId) -> Self {
        Self { scale, block }
    }
}

impl fmt::Display for BlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}/block_{}", self.scale, self.block)
    }
}

/// Storage backend for subgraph records.
///
/// Implementations provide raw byte access; encoding, decoding and the
/// presence helpers are provided on top.
pub trait SubgraphStore: Send + Sync {
    /// Write `bytes` under `key` atomically.
    ///
    /// Identical bytes already present: `Ok(())`. Different bytes present:
    /// `AlreadyExists`.
    fn put_record(&self, key: BlockKey, bytes: &[u8]) -> Result<()>;

    /// Read the record under `key`, or `NotFound`.
    fn get_record(&self, key: BlockKey) -> Result<Vec<u8>>;

    fn contains(&self, key: BlockKey) -> Result<bool>;

    fn put(&self, scale: u32, block: BlockId, graph: &Subgraph) -> Result<()> {
        self.put_record(BlockKey::new(scale, block), &subgraph::encode(graph))
    }

    fn get(&self, scale: u32, block: BlockId) -> Result<Subgraph> {
        let key = BlockKey::new(scale, block);
        let bytes = self.get_record(key)?;
        subgraph::decode(&bytes).map_err(|e| match e {
            GraphError::Decode(msg) => GraphError::Decode(format!("{key}: {msg}")),
            other => other,
        })
    }

    /// Node count of a stored subgraph, read from the record header.
    fn node_count(&self, scale: u32, block: BlockId) -> Result<u64> {
        let bytes = self.get_record(BlockKey::new(scale, block))?;
        Ok(subgraph::peek_counts(&bytes)?.0)
    }

    /// The subset of `candidates` with no record at `scale`, in input order.
    fn list_missing(&self, scale: u32, candidates: &[BlockId]) -> Result<Vec<BlockId>> {
        let mut missing = Vec::new();
        for &block in candidates {
            if !self.contains(BlockKey::new(scale, block))? {
                missing.push(block);
            }
        }
        Ok(missing)
    }
}

impl<S: SubgraphStore + ?Sized> SubgraphStore for Arc<S> {
    fn put_record(&self, key: BlockKey, bytes: &[u8]) -> Result<()> {
        (**self).put_record(key, bytes)
    }

    fn get_record(&self, key: BlockKey) -> Result<Vec<u8>> {
        (**self).get_record(key)
    }

    fn contains(&self, key: BlockKey) -> Result<bool> {
        (**self).contains(key)
    }
}

/// In-process store backed by a hash map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<FxHashMap<BlockKey, Arc<[u8]>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop a record. Returns whether one was present.
    pub fn remove(&self, key: BlockKey) -> bool {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key)
            .is_some()
    }

    /// All keys, sorted.
    pub fn keys(&self) -> Vec<BlockKey> {
        let mut keys: Vec<BlockKey> = self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        keys.sort_unstable();
        keys
    }
}

impl SubgraphStore for MemoryStore {
    fn put_record(&self, key: BlockKey, bytes: &[u8]) -> Result<()> {
        let mut records = self
            .records
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match records.get(&key) {
            Some(existing) if **existing == *bytes => Ok(()),
            Some(_) => Err(GraphError::already_exists(key)),
            None => {
                records.insert(key, Arc::from(bytes));
                Ok(())
            }
        }
    }

    fn get_record(&self, key: BlockKey) -> Result<Vec<u8>> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .map(|r| r.to_vec())
            .ok_or_else(|| GraphError::not_found(key))
    }

    fn contains(&self, key: BlockKey) -> Result<bool> {
        Ok(self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&key))
    }
}
