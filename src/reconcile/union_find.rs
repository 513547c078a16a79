//! Disjoint-set over dense `u32` indices with path compression.
//!
//! There is no rank array: the root of every set must be its smallest index,
//! and union by rank would pick roots by tree height instead. Path compression
//! alone keeps `find` near-constant on the merge workloads.

#[derive(Debug)]
pub(crate) struct UnionFind {
    parent: Vec<u32>,
}

impl UnionFind {
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n as u32).collect(),
        }
    }

    /// Representative of `x`, compressing the path behind it.
    pub fn find(&mut self, x: u32) -> u32 {
        let mut root = x;
        while self.parent[root as usize] != root {
            root = self.parent[root as usize];
        }
        let mut cur = x;
        while self.parent[cur as usize] != root {
            let next = self.parent[cur as usize];
            self.parent[cur as usize] = root;
            cur = next;
        }
        root
    }

    /// Order-dependent union: the smaller index always becomes the representative.
    /// Returns `true` if `a` and `b` were in different sets.
    pub fn union_keep_min(&mut self, a: u32, b: u32) -> bool {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return false;
        }
        let (min, max) = if ra <= rb { (ra, rb) } else { (rb, ra) };
        self.parent[max as usize] = min;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_representative_is_component_minimum() {
        let mut uf = UnionFind::new(8);
        assert!(uf.union_keep_min(5, 7));
        assert!(uf.union_keep_min(7, 3));
        assert!(!uf.union_keep_min(3, 5));
        assert!(uf.union_keep_min(6, 1));
        for x in [3, 5, 7] {
            assert_eq!(uf.find(x), 3);
        }
        assert_eq!(uf.find(6), 1);
        assert_eq!(uf.find(0), 0);
    }

    #[test]
    fn test_representative_ignores_union_order() {
        let pairs = [(4u32, 9u32), (9, 2), (7, 4), (1, 8), (8, 6)];
        let mut forward = UnionFind::new(10);
        let mut backward = UnionFind::new(10);
        for &(a, b) in &pairs {
            forward.union_keep_min(a, b);
        }
        for &(a, b) in pairs.iter().rev() {
            backward.union_keep_min(b, a);
        }
        for x in 0..10 {
            assert_eq!(forward.find(x), backward.find(x), "index {x}");
        }
        assert_eq!(forward.find(7), 2);
        assert_eq!(forward.find(6), 1);
    }

    #[test]
    fn test_long_chain_compresses() {
        let n = 100_000;
        let mut uf = UnionFind::new(n);
        for i in (1..n as u32).rev() {
            uf.union_keep_min(i, i - 1);
        }
        assert_eq!(uf.find(n as u32 - 1), 0);
        assert_eq!(uf.parent[n - 1], 0);
    }
}
