//! Scale pyramid: one `Blocking` per scale, block shape multiplied by the
//! merge factor at every level.

use glam::UVec3;

use super::Blocking;
use crate::error::{GraphError, Result};
use crate::types::BlockId;

/// Block layouts for scales `0..=top_scale()`.
///
/// Scale 0 holds the leaf blocks. The pyramid stops at the first scale with a
/// single block, or at `max_scale` if given.
#[derive(Debug, Clone)]
pub struct Pyramid {
    factor: u32,
    levels: Vec<Blocking>,
}

#[inline]
fn saturating_pow(base: u32, exp: u32) -> u32 {
    base.checked_pow(exp).unwrap_or(u32::MAX)
}

impl Pyramid {
    pub fn new(
        shape: UVec3,
        leaf_shape: UVec3,
        factor: u32,
        max_scale: Option<u32>,
    ) -> Result<Self> {
        if factor < 2 {
            return Err(GraphError::invalid_config(format!(
                "merge factor must be at least 2, got {factor}"
            )));
        }
        let mut levels = vec![Blocking::new(shape, leaf_shape)?];
        loop {
            let scale = levels.len() as u32 - 1;
            let current = &levels[levels.len() - 1];
            if current.num_blocks() == 1 || max_scale.is_some_and(|m| scale >= m) {
                break;
            }
            let block_shape = current.block_shape().saturating_mul(UVec3::splat(factor));
            levels.push(Blocking::new(shape, block_shape)?);
        }
        Ok(Self { factor, levels })
    }

    #[inline]
    pub fn factor(&self) -> u32 {
        self.factor
    }

    #[inline]
    pub fn top_scale(&self) -> u32 {
        self.levels.len() as u32 - 1
    }

    #[inline]
    pub fn levels(&self) -> &[Blocking] {
        &self.levels
    }

    #[inline]
    pub fn leaves(&self) -> &Blocking {
        &self.levels[0]
    }

    pub fn blocking(&self, scale: u32) -> Result<&Blocking> {
        self.levels
            .get(scale as usize)
            .ok_or(GraphError::ScaleOutOfRange {
                scale,
                num_scales: self.levels.len() as u32,
            })
    }

    /// Number of blocks at `scale`.
    pub fn num_blocks(&self, scale: u32) -> Result<u32> {
        Ok(self.blocking(scale)?.num_blocks())
    }

    fn position(&self, scale: u32, block: BlockId) -> Result<UVec3> {
        self.blocking(scale)?
            .grid_position(block)
            .map_err(|e| match e {
                GraphError::OutOfRange {
                    block, num_blocks, ..
                } => GraphError::OutOfRange {
                    scale,
                    block,
                    num_blocks,
                },
                other => other,
            })
    }

    /// Block at `to_scale` containing `block` of `from_scale`.
    pub fn ancestor(&self, from_scale: u32, block: BlockId, to_scale: u32) -> Result<BlockId> {
        if to_scale < from_scale {
            return Err(GraphError::invalid_config(format!(
                "ancestor scale {to_scale} is finer than {from_scale}"
            )));
        }
        let pos = self.position(from_scale, block)?;
        let divisor = saturating_pow(self.factor, to_scale - from_scale);
        let target = self.blocking(to_scale)?;
        target
            .block_at(pos / UVec3::splat(divisor))
            .ok_or(GraphError::OutOfRange {
                scale: to_scale,
                block: block as u64,
                num_blocks: target.num_blocks() as u64,
            })
    }

    /// Block at `scale + 1` containing `block`.
    pub fn parent(&self, scale: u32, block: BlockId) -> Result<BlockId> {
        self.ancestor(scale, block, scale + 1)
    }

    /// Blocks at `scale - 1` that tile `parent` at `scale`, ascending.
    ///
    /// Up to `factor^3` children; fewer at the upper volume edges.
    pub fn children(&self, scale: u32, parent: BlockId) -> Result<Vec<BlockId>> {
        if scale == 0 {
            return Err(GraphError::OutOfRange {
                scale,
                block: parent as u64,
                num_blocks: self.leaves().num_blocks() as u64,
            });
        }
        let pos = self.position(scale, parent)?;
        let child_level = self.blocking(scale - 1)?;
        let first = pos.saturating_mul(UVec3::splat(self.factor));
        let last = first
            .saturating_add(UVec3::splat(self.factor))
            .min(child_level.blocks_per_axis());
        let extent = last.saturating_sub(first);
        let mut children = Vec::with_capacity(
            (extent.x as usize)
                .saturating_mul(extent.y as usize)
                .saturating_mul(extent.z as usize),
        );
        for x in first.x..last.x {
            for y in first.y..last.y {
                for z in first.z..last.z {
                    if let Some(c) = child_level.block_at(UVec3::new(x, y, z)) {
                        children.push(c);
                    }
                }
            }
        }
        Ok(children)
    }

    /// Leaf blocks under `block` at `scale`, ascending.
    pub fn leaves_under(&self, scale: u32, block: BlockId) -> Result<Vec<BlockId>> {
        let pos = self.position(scale, block)?;
        let span = saturating_pow(self.factor, scale);
        let leaves = self.leaves();
        let first = pos.saturating_mul(UVec3::splat(span));
        let last = first
            .saturating_add(UVec3::splat(span))
            .min(leaves.blocks_per_axis());
        let mut out = Vec::new();
        for x in first.x..last.x {
            for y in first.y..last.y {
                for z in first.z..last.z {
                    if let Some(b) = leaves.block_at(UVec3::new(x, y, z)) {
                        out.push(b);
                    }
                }
            }
        }
        Ok(out)
    }
}
