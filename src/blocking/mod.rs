//! Regular block partition of a 3-D volume, and the scale pyramid built on it.
//!
//! Blocks are enumerated row-major over the block grid, with axis 0 the
//! slowest and axis 2 the fastest varying axis. The last block along an axis
//! is clipped to the volume, never padded.
//!
//! O(1) index <-> position <-> extent conversions; no per-block storage.

mod pyramid;

pub use pyramid::Pyramid;

use glam::UVec3;

use crate::error::{BlockCoord, GraphError, Result};
use crate::types::{BlockId, Face};

/// Half-open extent `[begin, end)` of one block in voxel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub begin: UVec3,
    pub end: UVec3,
}

impl Block {
    #[inline]
    pub fn shape(&self) -> UVec3 {
        self.end - self.begin
    }

    #[inline]
    pub fn num_voxels(&self) -> u64 {
        let s = self.shape();
        s.x as u64 * s.y as u64 * s.z as u64
    }

    #[inline]
    pub fn contains(&self, coord: UVec3) -> bool {
        coord.cmpge(self.begin).all() && coord.cmplt(self.end).all()
    }
}

/// Block grid over a volume at one block shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blocking {
    shape: UVec3,
    block_shape: UVec3,
    blocks_per_axis: UVec3,
    num_blocks: u32,
}

impl Blocking {
    /// Build the grid for `shape` split into blocks of `block_shape`.
    ///
    /// Fails if any extent is zero or the grid has more than `u32::MAX` blocks.
    pub fn new(shape: UVec3, block_shape: UVec3) -> Result<Self> {
        if shape.cmpeq(UVec3::ZERO).any() {
            return Err(GraphError::invalid_config(format!(
                "volume shape must be non-empty, got {shape}"
            )));
        }
        if block_shape.cmpeq(UVec3::ZERO).any() {
            return Err(GraphError::invalid_config(format!(
                "block shape must be non-empty, got {block_shape}"
            )));
        }
        let blocks_per_axis = UVec3::new(
            shape.x.div_ceil(block_shape.x),
            shape.y.div_ceil(block_shape.y),
            shape.z.div_ceil(block_shape.z),
        );
        let total =
            blocks_per_axis.x as u64 * blocks_per_axis.y as u64 * blocks_per_axis.z as u64;
        let num_blocks = u32::try_from(total).map_err(|_| {
            GraphError::invalid_config(format!(
                "{total} blocks exceed the addressable block count"
            ))
        })?;
        Ok(Self {
            shape,
            block_shape,
            blocks_per_axis,
            num_blocks,
        })
    }

    #[inline]
    pub fn shape(&self) -> UVec3 {
        self.shape
    }

    #[inline]
    pub fn block_shape(&self) -> UVec3 {
        self.block_shape
    }

    #[inline]
    pub fn blocks_per_axis(&self) -> UVec3 {
        self.blocks_per_axis
    }

    #[inline]
    pub fn num_blocks(&self) -> u32 {
        self.num_blocks
    }

    #[inline]
    fn check(&self, block: BlockId) -> Result<()> {
        if block < self.num_blocks {
            Ok(())
        } else {
            Err(GraphError::OutOfRange {
                scale: 0,
                block: block as u64,
                num_blocks: self.num_blocks as u64,
            })
        }
    }

    /// Position of `block` in the block grid.
    pub fn grid_position(&self, block: BlockId) -> Result<UVec3> {
        self.check(block)?;
        let n = self.blocks_per_axis;
        let z = block % n.z;
        let rest = block / n.z;
        let y = rest % n.y;
        let x = rest / n.y;
        Ok(UVec3::new(x, y, z))
    }

    /// Block at grid position `pos`, or `None` outside the grid.
    #[inline]
    pub fn block_at(&self, pos: UVec3) -> Option<BlockId> {
        if pos.cmplt(self.blocks_per_axis).all() {
            let n = self.blocks_per_axis;
            Some((pos.x * n.y + pos.y) * n.z + pos.z)
        } else {
            None
        }
    }

    /// Voxel extent of `block`, clipped to the volume.
    pub fn block(&self, block: BlockId) -> Result<Block> {
        let pos = self.grid_position(block)?;
        let begin = pos * self.block_shape;
        let end = begin.saturating_add(self.block_shape).min(self.shape);
        Ok(Block { begin, end })
    }

    /// Block containing voxel `coord`, or `None` outside the volume.
    #[inline]
    pub fn block_containing(&self, coord: UVec3) -> Option<BlockId> {
        if coord.cmplt(self.shape).all() {
            self.block_at(coord / self.block_shape)
        } else {
            None
        }
    }

    /// Face-neighbour of `block`, or `None` at the volume boundary.
    pub fn neighbor(&self, block: BlockId, face: Face) -> Result<Option<BlockId>> {
        let mut pos = self.grid_position(block)?;
        let axis = face.axis();
        if face.is_upper() {
            pos[axis] += 1;
        } else if pos[axis] == 0 {
            return Ok(None);
        } else {
            pos[axis] -= 1;
        }
        Ok(self.block_at(pos))
    }

    /// Block index together with its grid position, for error reports.
    pub fn coord(&self, block: BlockId) -> Result<BlockCoord> {
        Ok(BlockCoord {
            block,
            position: self.grid_position(block)?,
        })
    }

    /// All blocks overlapping the voxel box `[roi_begin, roi_end)`, ascending.
    ///
    /// The box is clipped to the volume; an empty box yields no blocks.
    pub fn blocks_overlapping(&self, roi_begin: UVec3, roi_end: UVec3) -> Vec<BlockId> {
        let end = roi_end.min(self.shape);
        if roi_begin.cmpge(end).any() {
            return Vec::new();
        }
        let first = roi_begin / self.block_shape;
        let last = (end - UVec3::ONE) / self.block_shape;
        let mut blocks = Vec::new();
        for x in first.x..=last.x {
            for y in first.y..=last.y {
                for z in first.z..=last.z {
                    if let Some(b) = self.block_at(UVec3::new(x, y, z)) {
                        blocks.push(b);
                    }
                }
            }
        }
        blocks
    }
}
