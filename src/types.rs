//! Core identifier and boundary types.

use crate::error::{GraphError, Result};

/// Row-major index of a block within the block grid of one scale.
pub type BlockId = u32;

/// Region id. Local (per leaf block) at scale 0, global above.
pub type NodeId = u64;

/// Reserved background id; never a node and never allocated.
pub const BACKGROUND: NodeId = 0;

/// One of the six faces of an axis-aligned block.
///
/// `upper` faces point towards increasing coordinates along `axis`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Face {
    axis: u8,
    upper: bool,
}

impl Face {
    /// All faces in `index()` order.
    pub const ALL: [Face; 6] = [
        Face::new(0, false),
        Face::new(0, true),
        Face::new(1, false),
        Face::new(1, true),
        Face::new(2, false),
        Face::new(2, true),
    ];

    #[inline]
    pub(crate) const fn new(axis: u8, upper: bool) -> Self {
        assert!(axis < 3, "face axis must be 0, 1 or 2");
        Self { axis, upper }
    }

    /// Face for a runtime `axis`, failing with `InvalidConfig` unless `axis < 3`.
    pub fn try_new(axis: u8, upper: bool) -> Result<Self> {
        if axis < 3 {
            Ok(Self { axis, upper })
        } else {
            Err(GraphError::invalid_config(format!(
                "face axis must be 0, 1 or 2, got {axis}"
            )))
        }
    }

    /// # Panics
    ///
    /// If `axis >= 3`. Use [`Face::try_new`] for unchecked input.
    #[inline]
    pub const fn lower(axis: u8) -> Self {
        Self::new(axis, false)
    }

    /// # Panics
    ///
    /// If `axis >= 3`. Use [`Face::try_new`] for unchecked input.
    #[inline]
    pub const fn upper(axis: u8) -> Self {
        Self::new(axis, true)
    }

    #[inline]
    pub fn axis(self) -> usize {
        self.axis as usize
    }

    #[inline]
    pub fn is_upper(self) -> bool {
        self.upper
    }

    #[inline]
    pub fn opposite(self) -> Self {
        Self {
            axis: self.axis,
            upper: !self.upper,
        }
    }

    /// Dense index in `0..6`: `axis * 2 + upper`.
    #[inline]
    pub fn index(self) -> u8 {
        self.axis * 2 + self.upper as u8
    }

    #[inline]
    pub fn from_index(index: u8) -> Option<Self> {
        if index < 6 {
            Some(Self::new(index / 2, index % 2 == 1))
        } else {
            None
        }
    }
}

/// A local label inside a specific leaf block, packed as `(block << 32) | label`.
///
/// This is the only identity of a region that is stable across scales before
/// reconciliation, so boundary contacts refer to both of their sides by it.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct LeafRef(u64);

impl LeafRef {
    #[inline]
    pub fn new(block: BlockId, label: u32) -> Self {
        Self(((block as u64) << 32) | (label as u64))
    }

    #[inline]
    pub fn block(self) -> BlockId {
        (self.0 >> 32) as u32
    }

    #[inline]
    pub fn label(self) -> u32 {
        (self.0 & 0xFFFF_FFFF) as u32
    }

    #[inline]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for LeafRef {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<LeafRef> for u64 {
    fn from(value: LeafRef) -> Self {
        value.0
    }
}

/// Accumulated per-edge weight statistics.
///
/// Merging sums both fields; the mean is left to consumers.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EdgeStats {
    pub sum: f64,
    pub count: u64,
}

impl EdgeStats {
    #[inline]
    pub const fn new(sum: f64, count: u64) -> Self {
        Self { sum, count }
    }

    #[inline]
    pub fn accumulate(&mut self, other: EdgeStats) {
        self.sum += other.sum;
        self.count += other.count;
    }

    /// Mean weight, or `None` for an edge that never received a sample.
    #[inline]
    pub fn mean(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.sum / self.count as f64)
        }
    }
}

/// What a boundary contact asserts about its two sides.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum ContactKind {
    /// Both sides belong to the same region.
    SameRegion,
    /// The sides are distinct, adjacent regions.
    Adjacent,
}

impl ContactKind {
    #[inline]
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            ContactKind::SameRegion => 0,
            ContactKind::Adjacent => 1,
        }
    }

    #[inline]
    pub(crate) fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ContactKind::SameRegion),
            1 => Some(ContactKind::Adjacent),
            _ => None,
        }
    }
}

/// A contact between a region inside a subgraph and a region across one of
/// its leaf faces.
///
/// `inner` lies in the subgraph that carries the contact and is currently
/// known there as `node`; `outer` lies in the face-neighbouring leaf block.
/// The neighbouring leaf must report the mirrored contact
/// (`face.opposite()`, `outer`, `inner`, same `kind`).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Contact {
    pub face: Face,
    pub inner: LeafRef,
    pub outer: LeafRef,
    pub kind: ContactKind,
    pub node: NodeId,
    pub stats: EdgeStats,
}

impl Contact {
    /// Ordering key used for canonical storage.
    #[inline]
    pub(crate) fn sort_key(&self) -> (LeafRef, LeafRef, u8) {
        (self.inner, self.outer, self.face.index())
    }
}
