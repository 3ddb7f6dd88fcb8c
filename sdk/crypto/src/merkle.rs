//! Merkle paths over the Poseidon node hash
//!
//! ```text
//!                    Root
//!                   /    \
//!                 H01    H23
//!                /  \   /   \
//!               L0  L1 L2   L3   (account leaf hashes)
//! ```
//!
//! A path lists sibling hashes from the leaf upward; bit `i` of the index
//! says whether the running node is the right child at level `i`.

use std::sync::LazyLock;

use serde::{Deserialize, Serialize};
use wincode::{SchemaRead, SchemaWrite};

use crate::field::{EMPTY_LEAF, hash_pair};

/// Deepest supported tree (2^32 leaves).
pub const MAX_DEPTH: usize = 32;

static EMPTY_ROOTS: LazyLock<Vec<[u8; 32]>> = LazyLock::new(|| {
    let mut roots = Vec::with_capacity(MAX_DEPTH + 1);
    roots.push(EMPTY_LEAF);
    for level in 0..MAX_DEPTH {
        let below = roots[level];
        roots.push(hash_pair(&below, &below));
    }
    roots
});

/// Root of an all-empty subtree of the given height.
pub fn empty_root(level: usize) -> [u8; 32] {
    EMPTY_ROOTS[level]
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, SchemaWrite, SchemaRead)]
pub struct MerkleProof {
    /// Sibling hashes from leaf to root
    pub path: Vec<[u8; 32]>,
    /// Leaf position
    pub index: u64,
}

impl MerkleProof {
    pub fn depth(&self) -> usize {
        self.path.len()
    }

    /// Folds the path over `leaf`. Levels past the width of `index` take
    /// the left branch.
    pub fn compute_root(&self, leaf: &[u8; 32]) -> [u8; 32] {
        let mut current = *leaf;
        for (level, sibling) in self.path.iter().enumerate() {
            let right = u32::try_from(level)
                .ok()
                .and_then(|shift| self.index.checked_shr(shift))
                .is_some_and(|bits| bits & 1 == 1);
            if right {
                current = hash_pair(sibling, &current);
            } else {
                current = hash_pair(&current, sibling);
            }
        }
        current
    }

    /// Paths deeper than [`MAX_DEPTH`] never verify.
    pub fn verify(&self, leaf: &[u8; 32], root: &[u8; 32]) -> bool {
        self.path.len() <= MAX_DEPTH
            && self.index < (1u64 << self.path.len())
            && &self.compute_root(leaf) == root
    }
}
