//! Merge leaf subgraphs in a file store into a global region adjacency graph.
//!
//! Usage:
//!   block-graph merge --store DIR --shape 512x512x512 --block-shape 64x64x64 -o graph.bin
//!   block-graph merge --store DIR --wait-secs 600      Wait for extractors still writing
//!   block-graph status --store DIR                      Per-scale progress
//!   block-graph inspect graph.bin --validate            Header and structural checks
//!
//! Log verbosity follows `RUST_LOG` (default `block_graph=info`).

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use block_graph::validation::validate_graph;
use block_graph::{
    build_graph, peek_header, AssembleOptions, BlockKey, BlockState, FileStore, GlobalGraph,
    GraphConfig, GraphError, IdPolicy, MergeEngine, Pyramid, RunStatus, SharedCounter,
    SubgraphStore, VolumeAttributes,
};
use clap::{Parser, Subcommand, ValueEnum};
use glam::UVec3;
use tracing_subscriber::EnvFilter;

fn parse_shape(s: &str) -> Result<UVec3, String> {
    let parts: Vec<&str> = s.split(['x', ',']).collect();
    let dims = match parts.as_slice() {
        [n] => vec![*n; 3],
        [a, b, c] => vec![*a, *b, *c],
        _ => return Err(format!("Invalid shape '{}': expected N or AxBxC", s)),
    };
    let mut out = [0u32; 3];
    for (slot, d) in out.iter_mut().zip(dims) {
        *slot = d
            .trim()
            .parse()
            .map_err(|e| format!("Invalid shape '{}': {}", s, e))?;
    }
    Ok(UVec3::from_array(out))
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PolicyArg {
    /// Ids planned from leaf node counts; reproducible.
    Stable,
    /// Shared counter; ids depend on scheduling.
    Counter,
}

impl From<PolicyArg> for IdPolicy {
    fn from(p: PolicyArg) -> Self {
        match p {
            PolicyArg::Stable => IdPolicy::Stable,
            PolicyArg::Counter => IdPolicy::Counter,
        }
    }
}

#[derive(Parser)]
#[command(name = "block-graph")]
#[command(about = "Blockwise region adjacency graph construction")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args)]
struct VolumeArgs {
    /// Store directory holding s{scale}/block_{id}.sg records
    #[arg(long)]
    store: PathBuf,

    /// Volume shape in voxels (N or AxBxC); read from the store if omitted
    #[arg(long, value_parser = parse_shape)]
    shape: Option<UVec3>,

    /// Leaf block shape in voxels (N or AxBxC)
    #[arg(long, value_parser = parse_shape)]
    block_shape: Option<UVec3>,

    /// Blocks per axis merged into one parent
    #[arg(long)]
    factor: Option<u32>,

    /// Stop merging at this scale
    #[arg(long)]
    target_scale: Option<u32>,
}

#[derive(Subcommand)]
enum Command {
    /// Merge all scales and assemble the global graph
    Merge {
        #[command(flatten)]
        volume: VolumeArgs,

        /// Worker threads (default: all cores)
        #[arg(short = 'j', long)]
        threads: Option<usize>,

        #[arg(long, value_enum, default_value_t = PolicyArg::Stable)]
        id_policy: PolicyArg,

        /// Keep polling for missing subgraphs for this many seconds per scale
        #[arg(long)]
        wait_secs: Option<u64>,

        /// Poll interval while waiting, in milliseconds
        #[arg(long, default_value_t = 500)]
        poll_ms: u64,

        /// Omit neighbour lists from the output
        #[arg(long)]
        no_adjacency: bool,

        /// Relabel nodes to 1..=n
        #[arg(long)]
        compact_ids: bool,

        /// Store the leaf label to node table in the output
        #[arg(long)]
        assignments: bool,

        /// Validate the assembled graph before exiting
        #[arg(long)]
        validate: bool,

        /// Output file for the global graph
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show per-scale merge progress
    Status {
        #[command(flatten)]
        volume: VolumeArgs,
    },
    /// Print the header of a global graph file
    Inspect {
        path: PathBuf,

        /// Decode the whole file and run structural checks
        #[arg(long)]
        validate: bool,
    },
}

/// Volume attributes from the flags, the store, or both (which must agree).
fn resolve_volume(store: &FileStore, args: &VolumeArgs) -> Result<GraphConfig, GraphError> {
    let stored = store.attributes()?;
    let attrs = match (args.shape, args.block_shape, stored) {
        (Some(shape), Some(leaf_shape), _) => {
            let attrs = VolumeAttributes {
                shape,
                leaf_shape,
                factor: args.factor.unwrap_or(2),
            };
            store.write_attributes(&attrs)?;
            attrs
        }
        (None, None, Some(attrs)) => {
            if let Some(f) = args.factor.filter(|&f| f != attrs.factor) {
                return Err(GraphError::invalid_config(format!(
                    "factor {f} conflicts with stored factor {}",
                    attrs.factor
                )));
            }
            attrs
        }
        _ => {
            return Err(GraphError::invalid_config(
                "volume shape unknown: pass both --shape and --block-shape",
            ))
        }
    };
    Ok(GraphConfig {
        factor: attrs.factor,
        target_scale: args.target_scale,
        ..GraphConfig::new(attrs.shape, attrs.leaf_shape)
    })
}

fn print_status(store: &FileStore, pyramid: &Pyramid) -> Result<(), GraphError> {
    let counter = SharedCounter::new();
    let engine = MergeEngine::new(store, pyramid, &counter);
    println!("{:>6} {:>10} {:>10} {:>10} {:>10}", "scale", "blocks", "done", "ready", "pending");
    for scale in 0..=pyramid.top_scale() {
        let n = pyramid.num_blocks(scale)?;
        let (mut done, mut ready, mut pending) = (0u32, 0u32, 0u32);
        for block in 0..n {
            if scale == 0 {
                if store.contains(BlockKey::new(0, block))? {
                    done += 1;
                } else {
                    pending += 1;
                }
                continue;
            }
            match engine.state(scale, block)? {
                BlockState::Merged => done += 1,
                BlockState::Ready => ready += 1,
                BlockState::Pending { .. } => pending += 1,
            }
        }
        println!("{:>6} {:>10} {:>10} {:>10} {:>10}", scale, n, done, ready, pending);
    }
    Ok(())
}

fn print_header(path: &Path, validate: bool) -> Result<bool, GraphError> {
    let data = std::fs::read(path)?;
    let h = peek_header(&data)?;
    println!("nodes:       {}", h.num_nodes);
    println!("edges:       {}", h.num_edges);
    println!("max node id: {}", h.max_node_id);
    println!("max edge id: {}", h.max_edge_id);
    println!("stats:       {}", h.has_stats);
    println!("adjacency:   {}", h.has_adjacency);
    println!("assignments: {}", h.has_assignments);
    if !validate {
        return Ok(true);
    }
    let report = validate_graph(&GlobalGraph::decode(&data)?);
    println!("{report}");
    Ok(report.is_valid())
}

#[allow(clippy::too_many_arguments)]
fn run_merge(
    volume: &VolumeArgs,
    threads: Option<usize>,
    id_policy: PolicyArg,
    wait_secs: Option<u64>,
    poll_ms: u64,
    assemble: AssembleOptions,
    validate: bool,
    output: Option<PathBuf>,
) -> Result<bool, GraphError> {
    let store = FileStore::open(&volume.store)?;
    let config = GraphConfig {
        threads,
        id_policy: id_policy.into(),
        wait: wait_secs.map(Duration::from_secs),
        poll_interval: Duration::from_millis(poll_ms),
        assemble,
        output,
        ..resolve_volume(&store, volume)?
    };

    let t0 = Instant::now();
    let report = build_graph(&store, &config)?;
    let elapsed = t0.elapsed();

    for scale in &report.merge.scales {
        println!(
            "scale {:>2}: merged {:>6}, skipped {:>6}, pending {:>6}",
            scale.scale,
            scale.merged,
            scale.skipped,
            scale.pending.len()
        );
    }
    match (&report.graph, report.status()) {
        (Some(graph), _) => {
            println!(
                "graph: {} nodes, {} edges in {:.2}s",
                graph.num_nodes(),
                graph.num_edges(),
                elapsed.as_secs_f64()
            );
            if validate {
                let v = validate_graph(graph);
                println!("{v}");
                return Ok(v.is_valid());
            }
            Ok(true)
        }
        (None, RunStatus::Incomplete { scale, pending }) => {
            let shown: Vec<String> = pending.iter().take(8).map(|k| k.to_string()).collect();
            println!(
                "incomplete at scale {}: {} blocks pending ({}{})",
                scale,
                pending.len(),
                shown.join(", "),
                if pending.len() > shown.len() { ", ..." } else { "" }
            );
            Ok(false)
        }
        (None, RunStatus::Complete) => Ok(false),
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("block_graph=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Merge {
            volume,
            threads,
            id_policy,
            wait_secs,
            poll_ms,
            no_adjacency,
            compact_ids,
            assignments,
            validate,
            output,
        } => run_merge(
            &volume,
            threads,
            id_policy,
            wait_secs,
            poll_ms,
            AssembleOptions {
                adjacency: !no_adjacency,
                compact_ids,
                assignments,
            },
            validate,
            output,
        ),
        Command::Status { volume } => FileStore::open(&volume.store).and_then(|store| {
            let pyramid = resolve_volume(&store, &volume)?.pyramid()?;
            print_status(&store, &pyramid).map(|()| true)
        }),
        Command::Inspect { path, validate } => print_header(&path, validate),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
