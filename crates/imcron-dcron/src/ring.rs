//! Consistent hash ring mapping job names to node identifiers.
//!
//! Rings are built once per membership snapshot and never mutated after they
//! are published; the node pool swaps in a fresh `Arc<HashRing>` instead.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

/// Consistent hash ring with `replicas` virtual points per node.
#[derive(Debug, Clone)]
pub struct HashRing {
    replicas: usize,
    points: BTreeMap<u32, String>,
}

impl HashRing {
    pub fn new(replicas: usize) -> Self {
        Self {
            replicas,
            points: BTreeMap::new(),
        }
    }

    /// Build a ring from a membership snapshot.
    ///
    /// Nodes are inserted in sorted order so point collisions resolve the same
    /// way on every node.
    pub fn from_nodes<S: AsRef<str>>(replicas: usize, nodes: &[S]) -> Self {
        let mut sorted: Vec<&str> = nodes.iter().map(|n| n.as_ref()).collect();
        sorted.sort_unstable();
        sorted.dedup();

        let mut ring = Self::new(replicas);
        for node in sorted {
            ring.add(node);
        }
        ring
    }

    /// Add a node's virtual points.
    pub fn add(&mut self, node: &str) {
        for i in 0..self.replicas {
            let point = hash_code(format!("{}{}", i, node).as_bytes());
            self.points.insert(point, node.to_string());
        }
    }

    /// Owner of `key`: the first point at or after `hash(key)`, wrapping.
    pub fn get(&self, key: &str) -> Option<&str> {
        let h = hash_code(key.as_bytes());
        self.points
            .range(h..)
            .chain(self.points.range(..h))
            .next()
            .map(|(_, node)| node.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn replicas(&self) -> usize {
        self.replicas
    }

    /// Number of virtual points on the ring.
    pub fn len(&self) -> usize {
        self.points.len()
    }
}

/// Stable 32-bit ring position.
///
/// Must not depend on the Rust toolchain or process, so `std`'s
/// randomized hashers are out.
fn hash_code(data: &[u8]) -> u32 {
    let digest = Sha256::digest(data);
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}
