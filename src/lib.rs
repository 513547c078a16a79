//! Blockwise region adjacency graphs for large labeled 3-D volumes.
//!
//! The volume is split into leaf blocks. An external extractor writes one
//! subgraph per leaf (local labels, interior edges, and the contacts its
//! regions make across the six faces). This crate merges those subgraphs up
//! a scale pyramid, reconciling local labels into global node ids, and
//! assembles a single global graph without ever holding the whole volume.
//!
//! # Example
//!
//! ```
//! use block_graph::{build_graph, ContactKind, Face, GraphConfig, LeafBuilder, MemoryStore, SubgraphStore};
//! use glam::UVec3;
//!
//! let config = GraphConfig::new(UVec3::new(4, 4, 8), UVec3::splat(4));
//! let pyramid = config.pyramid()?;
//! let store = MemoryStore::new();
//!
//! // Region 1 crosses the face between the two leaves; region 2 lies in the second.
//! let mut left = LeafBuilder::new(pyramid.leaves(), 0)?;
//! left.add_contact(Face::upper(2), 1, 1, ContactKind::SameRegion)?;
//! store.put(0, 0, &left.build()?)?;
//!
//! let mut right = LeafBuilder::new(pyramid.leaves(), 1)?;
//! right.add_edge(1, 2);
//! right.add_contact(Face::lower(2), 1, 1, ContactKind::SameRegion)?;
//! store.put(0, 1, &right.build()?)?;
//!
//! let report = build_graph(&store, &config)?;
//! let graph = report.graph.expect("all leaves present");
//! assert_eq!(graph.num_nodes(), 2);
//! assert_eq!(graph.edges(), &[[1, 2]]);
//! # Ok::<(), block_graph::GraphError>(())
//! ```

mod assemble;
mod assignments;
mod blocking;
mod error;
mod graph;
mod merge;
mod reconcile;
mod store;
mod subgraph;
mod timing;
mod types;
mod wire;
pub mod validation;

use std::path::PathBuf;
use std::time::Duration;

use glam::UVec3;

pub use assemble::{assemble, assemble_to, AssembleOptions};
pub use assignments::NodeAssignments;
pub use blocking::{Block, Blocking, Pyramid};
pub use error::{BlockCoord, GraphError, Result};
pub use graph::{peek_header, Adjacency, GlobalGraph, GraphHeader};
pub use merge::{BlockState, MergeEngine, MergeReport, RunStatus, ScaleReport};
pub use reconcile::{reconcile, IdAllocator, IdScope, PartitionedRanges, SharedCounter, Step};
pub use store::{BlockKey, FileStore, MemoryStore, SubgraphStore, VolumeAttributes};
pub use subgraph::{LeafBuilder, Subgraph};
pub use timing::ScaleTimings;
pub use types::{BlockId, Contact, ContactKind, EdgeStats, Face, LeafRef, NodeId, BACKGROUND};

/// How fresh global ids are handed out when leaf labels are reconciled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IdPolicy {
    /// Per-parent ranges planned from leaf node counts. Ids are identical
    /// across runs and worker counts; every leaf must exist before scale 1.
    #[default]
    Stable,
    /// Shared atomic counter. Ids depend on scheduling order.
    Counter,
}

/// Configuration for a full merge and assembly run.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    /// Volume extent in voxels.
    pub shape: UVec3,
    /// Leaf block extent in voxels.
    pub leaf_shape: UVec3,
    /// Blocks per axis merged into one parent.
    pub factor: u32,
    /// Stop merging at this scale and assemble from there.
    pub target_scale: Option<u32>,
    /// Worker threads; `None` uses rayon's default.
    pub threads: Option<usize>,
    pub id_policy: IdPolicy,
    /// How long to wait for missing subgraphs before reporting the run incomplete.
    pub wait: Option<Duration>,
    pub poll_interval: Duration,
    pub assemble: AssembleOptions,
    /// Where to write the global graph; not written if `None`.
    pub output: Option<PathBuf>,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            shape: UVec3::ZERO,
            leaf_shape: UVec3::splat(64),
            factor: 2,
            target_scale: None,
            threads: None,
            id_policy: IdPolicy::default(),
            wait: None,
            poll_interval: Duration::from_millis(500),
            assemble: AssembleOptions::default(),
            output: None,
        }
    }
}

impl GraphConfig {
    pub fn new(shape: UVec3, leaf_shape: UVec3) -> Self {
        Self {
            shape,
            leaf_shape,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.shape.cmpeq(UVec3::ZERO).any() {
            return Err(GraphError::invalid_config(format!(
                "volume shape must be non-empty, got {}",
                self.shape
            )));
        }
        if self.leaf_shape.cmpeq(UVec3::ZERO).any() {
            return Err(GraphError::invalid_config(format!(
                "leaf block shape must be non-empty, got {}",
                self.leaf_shape
            )));
        }
        if self.factor < 2 {
            return Err(GraphError::invalid_config(format!(
                "merge factor must be at least 2, got {}",
                self.factor
            )));
        }
        if self.threads == Some(0) {
            return Err(GraphError::invalid_config("thread count must be positive"));
        }
        if self.poll_interval.is_zero() && self.wait.is_some() {
            return Err(GraphError::invalid_config(
                "poll interval must be positive when waiting",
            ));
        }
        Ok(())
    }

    pub fn pyramid(&self) -> Result<Pyramid> {
        Pyramid::new(self.shape, self.leaf_shape, self.factor, self.target_scale)
    }

    pub fn attributes(&self) -> VolumeAttributes {
        VolumeAttributes {
            shape: self.shape,
            leaf_shape: self.leaf_shape,
            factor: self.factor,
        }
    }
}

/// Result of `build_graph`.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub merge: MergeReport,
    /// The assembled graph; `None` unless every scale completed.
    pub graph: Option<GlobalGraph>,
}

impl RunReport {
    pub fn status(&self) -> &RunStatus {
        &self.merge.status
    }

    pub fn is_complete(&self) -> bool {
        self.graph.is_some()
    }
}

/// Merge every scale and assemble the global graph.
///
/// Missing subgraphs do not fail the run: it stops at the first scale that
/// cannot complete within the wait deadline and reports what is pending.
pub fn build_graph<S: SubgraphStore + ?Sized>(store: &S, config: &GraphConfig) -> Result<RunReport> {
    config.validate()?;
    let pyramid = config.pyramid()?;
    tracing::info!(
        shape = %config.shape,
        leaf_shape = %config.leaf_shape,
        factor = config.factor,
        top_scale = pyramid.top_scale(),
        leaves = pyramid.leaves().num_blocks(),
        policy = ?config.id_policy,
        "starting graph build"
    );

    let allocator: Box<dyn IdAllocator> = match config.id_policy {
        IdPolicy::Stable => {
            let counter = SharedCounter::new();
            let precheck = MergeEngine::new(store, &pyramid, &counter)
                .wait_for_children(config.wait, config.poll_interval);
            let leaves: Vec<BlockId> = (0..pyramid.leaves().num_blocks()).collect();
            let missing = precheck.wait_for(0, &leaves)?;
            if !missing.is_empty() {
                tracing::warn!(missing = missing.len(), "leaf subgraphs missing; cannot plan ids");
                return Ok(RunReport {
                    merge: MergeReport {
                        scales: Vec::new(),
                        status: RunStatus::Incomplete {
                            scale: 0,
                            pending: missing.into_iter().map(|b| BlockKey::new(0, b)).collect(),
                        },
                    },
                    graph: None,
                });
            }
            Box::new(PartitionedRanges::plan(store, &pyramid)?)
        }
        IdPolicy::Counter => Box::new(SharedCounter::resume_from(store, &pyramid)?),
    };

    let merge = MergeEngine::new(store, &pyramid, allocator.as_ref())
        .threads(config.threads)
        .wait_for_children(config.wait, config.poll_interval)
        .run()?;
    if !merge.status.is_complete() {
        tracing::warn!(status = ?merge.status, "merge incomplete; global graph not assembled");
        return Ok(RunReport { merge, graph: None });
    }

    let graph = match &config.output {
        Some(path) => assemble_to(store, &pyramid, allocator.as_ref(), config.assemble, path)?,
        None => assemble(store, &pyramid, allocator.as_ref(), config.assemble)?,
    };
    tracing::info!(
        nodes = graph.num_nodes(),
        edges = graph.num_edges(),
        "graph build complete"
    );
    Ok(RunReport {
        merge,
        graph: Some(graph),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        assert!(GraphConfig::default().validate().is_err());
        let ok = GraphConfig::new(UVec3::splat(8), UVec3::splat(4));
        assert!(ok.validate().is_ok());
        assert!(GraphConfig { factor: 1, ..ok.clone() }.validate().is_err());
        assert!(GraphConfig { threads: Some(0), ..ok.clone() }.validate().is_err());
        assert!(GraphConfig {
            wait: Some(Duration::from_secs(1)),
            poll_interval: Duration::ZERO,
            ..ok
        }
        .validate()
        .is_err());
    }

    #[test]
    fn test_stable_policy_reports_missing_leaves() {
        let config = GraphConfig::new(UVec3::new(4, 4, 8), UVec3::splat(4));
        let store = MemoryStore::new();
        let report = build_graph(&store, &config).unwrap();
        assert!(!report.is_complete());
        assert_eq!(
            report.status(),
            &RunStatus::Incomplete {
                scale: 0,
                pending: vec![BlockKey::new(0, 0), BlockKey::new(0, 1)],
            }
        );
    }
}
