//! Final reduction of the top-scale subgraphs into the global graph.

use std::path::Path;

use crate::assignments::NodeAssignments;
use crate::blocking::Pyramid;
use crate::error::Result;
use crate::graph::GlobalGraph;
use crate::reconcile::{reconcile, IdAllocator, Step};
use crate::store::SubgraphStore;

/// Optional parts of the assembled graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssembleOptions {
    /// Attach the sorted neighbour lists.
    pub adjacency: bool,
    /// Relabel nodes to `1..=n`.
    pub compact_ids: bool,
    /// Attach the leaf label to node table.
    pub assignments: bool,
}

impl Default for AssembleOptions {
    fn default() -> Self {
        Self {
            adjacency: true,
            compact_ids: false,
            assignments: false,
        }
    }
}

/// Reconcile every block at the pyramid's top scale into one graph.
///
/// Fails with `NotFound` if a top-scale record is missing and with
/// `UnresolvedTopLevelBoundary` if a contact cannot be closed.
pub fn assemble<S: SubgraphStore + ?Sized>(
    store: &S,
    pyramid: &Pyramid,
    allocator: &dyn IdAllocator,
    options: AssembleOptions,
) -> Result<GlobalGraph> {
    let top = pyramid.top_scale();
    let num_blocks = pyramid.num_blocks(top)?;
    let mut blocks = Vec::with_capacity(num_blocks as usize);
    for block in 0..num_blocks {
        blocks.push((block, store.get(top, block)?));
    }

    let merged = reconcile(pyramid, allocator, Step::Top { scale: top }, &blocks)?;
    let mut graph = GlobalGraph::from_parts(
        merged.nodes().to_vec(),
        merged.edges().to_vec(),
        merged.edge_stats().map(<[_]>::to_vec),
    )?;
    if options.adjacency {
        graph = graph.with_adjacency();
    }
    if options.assignments {
        graph = graph.with_assignments(NodeAssignments::resolve(store, pyramid, &merged)?)?;
    }
    if options.compact_ids {
        graph.compact_ids();
    }

    tracing::info!(
        scale = top,
        blocks = num_blocks,
        nodes = graph.num_nodes(),
        edges = graph.num_edges(),
        "assembled global graph"
    );
    Ok(graph)
}

/// `assemble`, then write the graph atomically to `path`.
pub fn assemble_to<S: SubgraphStore + ?Sized>(
    store: &S,
    pyramid: &Pyramid,
    allocator: &dyn IdAllocator,
    options: AssembleOptions,
    path: &Path,
) -> Result<GlobalGraph> {
    let graph = assemble(store, pyramid, allocator, options)?;
    graph.write(path)?;
    tracing::info!(path = %path.display(), "global graph written");
    Ok(graph)
}
