#![allow(dead_code)]

//! Synthetic labeled volumes, a reference leaf extractor, and a brute-force
//! region adjacency graph to compare merged output against.
//!
//! Regions are 6-connected components of equal nonzero labels. Leaf subgraphs
//! number the components of each block restricted to that block, so a region
//! cut by a block face appears as several local labels joined by
//! `SameRegion` contacts.

use std::collections::{BTreeMap, VecDeque};

use block_graph::{
    ContactKind, EdgeStats, Face, GlobalGraph, LeafBuilder, LeafRef, Pyramid, Subgraph,
    SubgraphStore,
};
use glam::UVec3;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

const AXES: [UVec3; 3] = [UVec3::X, UVec3::Y, UVec3::Z];

/// Dense label volume, row-major with axis 0 slowest.
#[derive(Debug, Clone)]
pub struct LabelVolume {
    pub shape: UVec3,
    labels: Vec<u32>,
}

impl LabelVolume {
    pub fn from_fn(shape: UVec3, f: impl Fn(UVec3) -> u32) -> Self {
        let mut labels = Vec::with_capacity((shape.x * shape.y * shape.z) as usize);
        for x in 0..shape.x {
            for y in 0..shape.y {
                for z in 0..shape.z {
                    labels.push(f(UVec3::new(x, y, z)));
                }
            }
        }
        Self { shape, labels }
    }

    /// Nearest-seed partition. Seeds labelled 0 produce background pockets;
    /// repeated labels produce disconnected regions sharing one label.
    pub fn random_seeds(shape: UVec3, num_seeds: usize, num_labels: u32, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let seeds: Vec<(UVec3, u32)> = (0..num_seeds)
            .map(|_| {
                let p = UVec3::new(
                    rng.gen_range(0..shape.x),
                    rng.gen_range(0..shape.y),
                    rng.gen_range(0..shape.z),
                );
                (p, rng.gen_range(0..=num_labels))
            })
            .collect();
        Self::from_fn(shape, |p| {
            let mut best = (u32::MAX, 0u32);
            for &(s, label) in &seeds {
                let d = p.as_ivec3() - s.as_ivec3();
                let d2 = d.dot(d) as u32;
                if d2 < best.0 {
                    best = (d2, label);
                }
            }
            best.1
        })
    }

    /// Two halves split along axis 2: label 1 below `z = split`, label 2 above.
    pub fn two_halves(shape: UVec3, split: u32) -> Self {
        Self::from_fn(shape, |p| if p.z < split { 1 } else { 2 })
    }

    #[inline]
    pub fn index(&self, p: UVec3) -> usize {
        ((p.x * self.shape.y + p.y) * self.shape.z + p.z) as usize
    }

    #[inline]
    pub fn get(&self, p: UVec3) -> u32 {
        self.labels[self.index(p)]
    }

    fn neighbors_within(p: UVec3, begin: UVec3, end: UVec3) -> impl Iterator<Item = UVec3> {
        let mut out = Vec::with_capacity(6);
        for axis in AXES {
            let q = p + axis;
            if q.cmplt(end).all() {
                out.push(q);
            }
            if (p.cmpgt(begin) & axis.cmpeq(UVec3::ONE)).any() {
                out.push(p - axis);
            }
        }
        out.into_iter()
    }

    /// Component ids of equal nonzero labels inside `[begin, end)`, numbered
    /// from 1 in scan order. Voxels outside the box are left untouched.
    fn label_components(&self, begin: UVec3, end: UVec3, out: &mut [u32]) -> u32 {
        let mut next = 0u32;
        let mut queue = VecDeque::new();
        for x in begin.x..end.x {
            for y in begin.y..end.y {
                for z in begin.z..end.z {
                    let p = UVec3::new(x, y, z);
                    let label = self.get(p);
                    if label == 0 || out[self.index(p)] != 0 {
                        continue;
                    }
                    next += 1;
                    out[self.index(p)] = next;
                    queue.push_back(p);
                    while let Some(c) = queue.pop_front() {
                        for q in Self::neighbors_within(c, begin, end) {
                            let i = self.index(q);
                            if out[i] == 0 && self.labels[i] == label {
                                out[i] = next;
                                queue.push_back(q);
                            }
                        }
                    }
                }
            }
        }
        next
    }

    /// Global region id of every voxel (0 for background) and the region count.
    pub fn regions(&self) -> (Vec<u32>, u32) {
        let mut out = vec![0u32; self.labels.len()];
        let n = self.label_components(UVec3::ZERO, self.shape, &mut out);
        (out, n)
    }

    /// Brute-force region adjacency graph.
    pub fn reference_graph(&self) -> ReferenceGraph {
        let (regions, num_nodes) = self.regions();
        let mut edges: BTreeMap<(u32, u32), EdgeStats> = BTreeMap::new();
        for x in 0..self.shape.x {
            for y in 0..self.shape.y {
                for z in 0..self.shape.z {
                    let p = UVec3::new(x, y, z);
                    for (axis, step) in AXES.iter().enumerate() {
                        let q = p + *step;
                        if !q.cmplt(self.shape).all() {
                            continue;
                        }
                        let (a, b) = (regions[self.index(p)], regions[self.index(q)]);
                        if a == 0 || b == 0 || a == b {
                            continue;
                        }
                        edges
                            .entry((a.min(b), a.max(b)))
                            .or_default()
                            .accumulate(EdgeStats::new(face_weight(p, axis), 1));
                    }
                }
            }
        }
        ReferenceGraph {
            regions,
            num_nodes,
            edges,
        }
    }
}

/// Weight of the voxel face between `lower` and its upper neighbour along `axis`.
/// Integral so sums are exact in any order.
pub fn face_weight(lower: UVec3, axis: usize) -> f64 {
    ((lower.x + 2 * lower.y + 3 * lower.z + axis as u32) % 5 + 1) as f64
}

#[derive(Debug, Clone)]
pub struct ReferenceGraph {
    pub regions: Vec<u32>,
    pub num_nodes: u32,
    pub edges: BTreeMap<(u32, u32), EdgeStats>,
}

/// Leaf subgraphs of a volume plus a representative voxel per local label.
pub struct Extraction {
    pub leaves: Vec<Subgraph>,
    pub representatives: BTreeMap<LeafRef, UVec3>,
}

impl Extraction {
    pub fn run(vol: &LabelVolume, pyramid: &Pyramid, with_stats: bool) -> Self {
        let blocking = pyramid.leaves();
        let mut local = vec![0u32; vol.labels.len()];
        let mut representatives = BTreeMap::new();
        for block in 0..blocking.num_blocks() {
            let extent = blocking.block(block).unwrap();
            vol.label_components(extent.begin, extent.end, &mut local);
        }

        let mut leaves = Vec::with_capacity(blocking.num_blocks() as usize);
        for block in 0..blocking.num_blocks() {
            let extent = blocking.block(block).unwrap();
            let mut b = LeafBuilder::new(blocking, block).unwrap();
            if with_stats {
                b = b.with_stats();
            }
            for x in extent.begin.x..extent.end.x {
                for y in extent.begin.y..extent.end.y {
                    for z in extent.begin.z..extent.end.z {
                        let p = UVec3::new(x, y, z);
                        let lp = local[vol.index(p)];
                        if lp == 0 {
                            continue;
                        }
                        b.add_node(lp);
                        representatives.entry(LeafRef::new(block, lp)).or_insert(p);

                        for (axis, step) in AXES.iter().enumerate() {
                            // Interior pairs once, from the lower voxel.
                            let q = p + *step;
                            if q.cmplt(extent.end).all() {
                                let lq = local[vol.index(q)];
                                if lq != 0 && lq != lp {
                                    b.add_weighted_edge(
                                        lp,
                                        lq,
                                        EdgeStats::new(face_weight(p, axis), 1),
                                    );
                                }
                            }
                            // Pairs across the block faces, from both sides.
                            let across = [
                                (Face::upper(axis as u8), p[axis] + 1 == extent.end[axis]),
                                (Face::lower(axis as u8), p[axis] == extent.begin[axis]),
                            ];
                            for (face, on_face) in across {
                                if !on_face || blocking.neighbor(block, face).unwrap().is_none() {
                                    continue;
                                }
                                let q = if face.is_upper() { p + *step } else { p - *step };
                                let lq = local[vol.index(q)];
                                if lq == 0 {
                                    continue;
                                }
                                let kind = if vol.get(p) == vol.get(q) {
                                    ContactKind::SameRegion
                                } else {
                                    ContactKind::Adjacent
                                };
                                let w = face_weight(p.min(q), axis);
                                b.add_weighted_contact(face, lp, lq, kind, EdgeStats::new(w, 1))
                                    .unwrap();
                            }
                        }
                    }
                }
            }
            leaves.push(b.build().unwrap());
        }
        Self {
            leaves,
            representatives,
        }
    }

    pub fn write_all<S: SubgraphStore + ?Sized>(&self, store: &S) {
        for (block, g) in self.leaves.iter().enumerate() {
            store.put(0, block as u32, g).unwrap();
        }
    }

    pub fn write_except<S: SubgraphStore + ?Sized>(&self, store: &S, skip: &[u32]) {
        for (block, g) in self.leaves.iter().enumerate() {
            if !skip.contains(&(block as u32)) {
                store.put(0, block as u32, g).unwrap();
            }
        }
    }

    /// Leaf node counts in block order.
    pub fn leaf_counts(&self) -> Vec<u64> {
        self.leaves.iter().map(|g| g.num_nodes() as u64).collect()
    }
}

/// Assert that `graph` (with assignments) is isomorphic to the brute-force
/// graph through the leaf representatives, including edge statistics when
/// present.
pub fn assert_matches_reference(graph: &GlobalGraph, vol: &LabelVolume, ex: &Extraction) {
    let reference = vol.reference_graph();
    assert_eq!(
        graph.num_nodes(),
        reference.num_nodes as usize,
        "node count differs from brute force"
    );

    let assignments = graph.assignments().expect("graph built with assignments");
    assert_eq!(assignments.len(), ex.representatives.len());
    let mut to_region: BTreeMap<u64, u32> = BTreeMap::new();
    let mut to_node: BTreeMap<u32, u64> = BTreeMap::new();
    for &(leaf, id) in assignments.entries() {
        let p = ex.representatives[&leaf];
        let region = reference.regions[vol.index(p)];
        assert_eq!(*to_region.entry(id).or_insert(region), region, "node {id} spans regions");
        assert_eq!(*to_node.entry(region).or_insert(id), id, "region {region} split");
    }
    assert_eq!(to_region.len(), graph.num_nodes());

    let mut mapped: BTreeMap<(u32, u32), EdgeStats> = BTreeMap::new();
    for (i, &[u, v]) in graph.edges().iter().enumerate() {
        let (a, b) = (to_region[&u], to_region[&v]);
        let stats = graph.edge_stats().map(|s| s[i]).unwrap_or_default();
        mapped.insert((a.min(b), a.max(b)), stats);
    }
    let ref_keys: Vec<_> = reference.edges.keys().collect();
    let got_keys: Vec<_> = mapped.keys().collect();
    assert_eq!(got_keys, ref_keys, "edge sets differ");
    if graph.edge_stats().is_some() {
        for (k, s) in &reference.edges {
            assert_eq!(mapped[k], *s, "statistics of edge {k:?}");
        }
    }
}
