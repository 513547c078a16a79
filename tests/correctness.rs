//! Correctness tests against a brute-force region adjacency graph.
//!
//! Every configuration is checked for node conservation (each region of the
//! volume is exactly one node, reached by all of its leaf labels) and for the
//! exact edge set and edge statistics.

mod support;

use block_graph::{
    build_graph, AssembleOptions, BlockKey, GlobalGraph, GraphConfig, IdPolicy, MemoryStore,
    PartitionedRanges, RunStatus, SharedCounter, SubgraphStore,
};
use glam::UVec3;
use support::volumes::{assert_matches_reference, Extraction, LabelVolume};

fn run(vol: &LabelVolume, cfg: &GraphConfig, with_stats: bool) -> (GlobalGraph, Extraction) {
    let ex = Extraction::run(vol, &cfg.pyramid().unwrap(), with_stats);
    let store = MemoryStore::new();
    ex.write_all(&store);
    let report = build_graph(&store, cfg).expect("build should succeed");
    assert_eq!(report.status(), &RunStatus::Complete);
    (report.graph.unwrap(), ex)
}

fn with_assignments(shape: UVec3, leaf: UVec3) -> GraphConfig {
    GraphConfig {
        assemble: AssembleOptions {
            assignments: true,
            ..Default::default()
        },
        ..GraphConfig::new(shape, leaf)
    }
}

#[test]
fn test_matches_reference_across_layouts() {
    let cases = [
        (UVec3::splat(16), UVec3::splat(4), 2, 40, 9),
        (UVec3::new(13, 10, 7), UVec3::splat(4), 2, 30, 6),
        (UVec3::new(18, 9, 12), UVec3::new(2, 3, 4), 3, 50, 12),
        (UVec3::new(7, 7, 7), UVec3::splat(1), 2, 12, 4),
        (UVec3::new(1, 1, 20), UVec3::new(1, 1, 3), 2, 5, 3),
    ];
    for (i, &(shape, leaf, factor, seeds, labels)) in cases.iter().enumerate() {
        let vol = LabelVolume::random_seeds(shape, seeds, labels, 1000 + i as u64);
        let cfg = GraphConfig {
            factor,
            ..with_assignments(shape, leaf)
        };
        let (graph, ex) = run(&vol, &cfg, true);
        assert_matches_reference(&graph, &vol, &ex);
    }
}

#[test]
fn test_matches_reference_at_target_scale() {
    let shape = UVec3::splat(16);
    let vol = LabelVolume::random_seeds(shape, 40, 10, 5);
    for target in 0..=2 {
        let cfg = GraphConfig {
            target_scale: Some(target),
            ..with_assignments(shape, UVec3::splat(4))
        };
        assert_eq!(cfg.pyramid().unwrap().top_scale(), target);
        let (graph, ex) = run(&vol, &cfg, true);
        assert_matches_reference(&graph, &vol, &ex);
    }
}

#[test]
fn test_stable_ids_are_reproducible() {
    let shape = UVec3::new(16, 12, 16);
    let vol = LabelVolume::random_seeds(shape, 60, 15, 77);
    let base = with_assignments(shape, UVec3::splat(4));

    let (reference, _) = run(&vol, &base, true);
    for threads in [1, 2, 4, 7] {
        let cfg = GraphConfig {
            threads: Some(threads),
            ..base.clone()
        };
        let (graph, _) = run(&vol, &cfg, true);
        assert_eq!(graph, reference, "threads = {threads}");
    }
}

#[test]
fn test_stable_ids_stay_within_planned_ranges() {
    let shape = UVec3::splat(16);
    let vol = LabelVolume::random_seeds(shape, 30, 8, 2);
    let cfg = with_assignments(shape, UVec3::splat(4));
    let (graph, ex) = run(&vol, &cfg, false);

    let total: u64 = ex.leaf_counts().iter().sum();
    let ranges = PartitionedRanges::from_leaf_counts(&cfg.pyramid().unwrap(), &ex.leaf_counts())
        .unwrap();
    assert!(graph.max_node_id() <= total);
    assert!(graph.nodes().iter().all(|&id| id >= 1));
    // A node keeps the smallest id its leaves received at scale 1.
    let pyramid = cfg.pyramid().unwrap();
    for &(leaf, id) in graph.assignments().unwrap().entries() {
        let parent = pyramid.parent(0, leaf.block()).unwrap();
        let range = ranges.range(block_graph::IdScope::Block(parent)).unwrap();
        assert!(id < range.end, "leaf {leaf:?} -> {id} above range {range:?}");
    }
}

#[test]
fn test_counter_and_stable_agree_up_to_ids() {
    let shape = UVec3::new(12, 12, 20);
    let vol = LabelVolume::random_seeds(shape, 45, 10, 31);
    let stable = with_assignments(shape, UVec3::splat(4));
    let counter = GraphConfig {
        id_policy: IdPolicy::Counter,
        ..stable.clone()
    };
    let (a, ex_a) = run(&vol, &stable, true);
    let (b, ex_b) = run(&vol, &counter, true);
    assert_matches_reference(&a, &vol, &ex_a);
    assert_matches_reference(&b, &vol, &ex_b);
    assert_eq!(a.num_nodes(), b.num_nodes());
    assert_eq!(a.num_edges(), b.num_edges());
}

#[test]
fn test_rerun_is_a_no_op() {
    let shape = UVec3::splat(16);
    let vol = LabelVolume::random_seeds(shape, 40, 9, 8);
    let cfg = with_assignments(shape, UVec3::splat(4));
    let ex = Extraction::run(&vol, &cfg.pyramid().unwrap(), true);
    let store = MemoryStore::new();
    ex.write_all(&store);

    let first = build_graph(&store, &cfg).unwrap();
    let records = store.len();
    let second = build_graph(&store, &cfg).unwrap();
    assert_eq!(store.len(), records);
    assert_eq!(first.graph, second.graph);
    for scale in &second.merge.scales {
        assert_eq!(scale.merged, 0, "scale {} re-merged", scale.scale);
    }
}

#[test]
fn test_resume_after_partial_loss_reproduces_graph() {
    let shape = UVec3::splat(16);
    let vol = LabelVolume::random_seeds(shape, 40, 9, 13);
    let cfg = with_assignments(shape, UVec3::splat(4));
    let ex = Extraction::run(&vol, &cfg.pyramid().unwrap(), true);
    let store = MemoryStore::new();
    ex.write_all(&store);
    let first = build_graph(&store, &cfg).unwrap().graph.unwrap();

    let before = store.get_record(BlockKey::new(1, 3)).unwrap();
    assert!(store.remove(BlockKey::new(1, 3)));
    assert!(store.remove(BlockKey::new(2, 0)));
    let second = build_graph(&store, &cfg).unwrap().graph.unwrap();
    assert_eq!(second, first);
    assert_eq!(store.get_record(BlockKey::new(1, 3)).unwrap(), before);
}

#[test]
fn test_resumed_counter_never_reuses_ids() {
    let shape = UVec3::splat(8);
    let vol = LabelVolume::random_seeds(shape, 20, 6, 4);
    let cfg = GraphConfig {
        id_policy: IdPolicy::Counter,
        ..with_assignments(shape, UVec3::splat(4))
    };
    let pyramid = cfg.pyramid().unwrap();
    let ex = Extraction::run(&vol, &pyramid, false);
    let store = MemoryStore::new();
    ex.write_all(&store);
    let graph = build_graph(&store, &cfg).unwrap().graph.unwrap();

    let resumed = SharedCounter::resume_from(&store, &pyramid).unwrap();
    assert!(resumed.peek() > graph.max_node_id());
}

#[test]
fn test_background_only_volume_is_empty() {
    let shape = UVec3::splat(8);
    let vol = LabelVolume::from_fn(shape, |_| 0);
    let cfg = with_assignments(shape, UVec3::splat(4));
    let (graph, ex) = run(&vol, &cfg, true);
    assert_eq!(graph.num_nodes(), 0);
    assert_eq!(graph.num_edges(), 0);
    assert!(ex.representatives.is_empty());
    assert!(graph.assignments().unwrap().is_empty());
}

#[test]
fn test_checkerboard_has_every_face_edge() {
    // Unit regions: every voxel is its own node, so edges equal grid faces.
    let shape = UVec3::new(4, 4, 4);
    let vol = LabelVolume::from_fn(shape, |p| p.x * 16 + p.y * 4 + p.z + 1);
    let cfg = with_assignments(shape, UVec3::splat(2));
    let (graph, ex) = run(&vol, &cfg, true);
    assert_eq!(graph.num_nodes(), 64);
    assert_eq!(graph.num_edges(), 3 * 4 * 4 * 3);
    assert!(graph.edge_stats().unwrap().iter().all(|s| s.count == 1));
    assert_matches_reference(&graph, &vol, &ex);
}
