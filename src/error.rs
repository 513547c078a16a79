//! Error types for graph construction.

use std::fmt;
use std::io;

use glam::UVec3;
use thiserror::Error;

use crate::types::BlockId;

/// A block named by its index and its position in the block grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockCoord {
    pub block: BlockId,
    pub position: UVec3,
}

impl fmt::Display for BlockCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at grid ({}, {}, {})",
            self.block, self.position.x, self.position.y, self.position.z
        )
    }
}

/// Errors that can occur while partitioning, merging, or assembling.
#[derive(Error, Debug)]
pub enum GraphError {
    /// A block index outside the layout of its scale.
    #[error("block {block} out of range at scale {scale} ({num_blocks} blocks)")]
    OutOfRange {
        scale: u32,
        block: u64,
        num_blocks: u64,
    },

    /// A scale above the top of the pyramid.
    #[error("scale {scale} out of range (pyramid has {num_scales} scales)")]
    ScaleOutOfRange { scale: u32, num_scales: u32 },

    /// A required record is absent from the store.
    ///
    /// Recoverable during merging: the step stays pending and is retried.
    #[error("record not found: {key}")]
    NotFound { key: String },

    /// A different payload is already stored under this key.
    #[error("conflicting record already exists: {key}")]
    AlreadyExists { key: String },

    /// Two leaf subgraphs disagree about a boundary contact.
    #[error("inconsistent boundary between leaf block {inner} and leaf block {outer}: {reason}")]
    InconsistentBoundary {
        inner: BlockCoord,
        outer: BlockCoord,
        reason: String,
    },

    /// Final assembly found a contact it could not pair with the other side.
    #[error("unresolved boundary between leaf block {inner} and leaf block {outer} at top scale {scale}")]
    UnresolvedTopLevelBoundary {
        scale: u32,
        inner: BlockCoord,
        outer: BlockCoord,
    },

    /// The id allocator cannot hand out the requested range.
    #[error("id range exhausted: requested {requested} ids, {available} available")]
    IdRangeExhausted { requested: u64, available: u64 },

    /// A persisted record could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// Invalid configuration or volume layout.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GraphError {
    pub fn not_found(key: impl fmt::Display) -> Self {
        GraphError::NotFound {
            key: key.to_string(),
        }
    }

    pub fn already_exists(key: impl fmt::Display) -> Self {
        GraphError::AlreadyExists {
            key: key.to_string(),
        }
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        GraphError::Decode(msg.into())
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        GraphError::InvalidConfig(msg.into())
    }

    /// True for failures that only defer a merge step rather than abort the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, GraphError::NotFound { .. })
    }

    /// True for data-integrity failures in the extractor output.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            GraphError::InconsistentBoundary { .. }
                | GraphError::UnresolvedTopLevelBoundary { .. }
                | GraphError::AlreadyExists { .. }
        )
    }
}

/// Result type for graph operations.
pub type Result<T> = std::result::Result<T, GraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_recoverable() {
        assert!(GraphError::not_found("s0/block_3").is_recoverable());
        assert!(!GraphError::already_exists("s0/block_3").is_recoverable());
    }

    #[test]
    fn test_boundary_error_names_coordinates() {
        let err = GraphError::InconsistentBoundary {
            inner: BlockCoord {
                block: 0,
                position: UVec3::new(0, 0, 0),
            },
            outer: BlockCoord {
                block: 1,
                position: UVec3::new(0, 0, 1),
            },
            reason: "missing mirror contact".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("0 at grid (0, 0, 0)"), "{msg}");
        assert!(msg.contains("1 at grid (0, 0, 1)"), "{msg}");
        assert!(err.is_integrity_failure());
    }
}
