//! Account State Merkle Accumulator
//!
//! Fixed-depth sparse Merkle tree over account leaf hashes. Leaves are
//! appended left to right; untouched subtrees hash to precomputed empty roots.
//!
//! ```text
//!                    Root (level depth)
//!                   /              \
//!              H(0,1)              H(2,3)
//!             /      \            /      \
//!          H(0)     H(1)       H(2)     H(3)
//!           |        |          |        |
//!        Leaf0    Leaf1      Leaf2    Leaf3
//! ```
//!
//! Each leaf is `Account::leaf_hash()`; each node is Poseidon(left, right).

use std::collections::{BTreeSet, HashMap, HashSet};

use rayon::prelude::*;
use thiserror::Error;

use kestrel_crypto::{MAX_DEPTH, MerkleProof, empty_root, hash_pair};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AccumulatorError {
    /// Every slot of the tree is occupied.
    #[error("accumulator full: capacity {capacity}")]
    CapacityExceeded { capacity: u64 },

    #[error("leaf index {index} out of range (len {len})")]
    IndexOutOfRange { index: u64, len: u64 },

    #[error("malformed batch update: {0}")]
    MalformedBatch(String),

    #[error("invalid tree depth {0} (must be 1..={MAX_DEPTH})")]
    InvalidDepth(usize),
}

/// Dirty-node count above which a level is rehashed on the rayon pool.
const PARALLEL_LEVEL_THRESHOLD: usize = 64;

#[derive(Debug, Clone)]
pub struct MerkleAccumulator {
    depth: usize,
    /// Non-empty nodes: (level, index) -> hash
    nodes: HashMap<(usize, u64), [u8; 32]>,
    /// Occupied leaf slots
    len: u64,
}

impl MerkleAccumulator {
    pub fn new(depth: usize) -> Result<Self, AccumulatorError> {
        if depth == 0 || depth > MAX_DEPTH {
            return Err(AccumulatorError::InvalidDepth(depth));
        }
        Ok(Self {
            depth,
            nodes: HashMap::new(),
            len: 0,
        })
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> u64 {
        1u64 << self.depth
    }

    pub fn root(&self) -> [u8; 32] {
        self.node(self.depth, 0)
    }

    /// Leaf hash at an occupied slot.
    pub fn leaf(&self, index: u64) -> Result<[u8; 32], AccumulatorError> {
        self.check_index(index)?;
        Ok(self.node(0, index))
    }

    /// Append at the next free index.
    ///
    /// The returned path proves the empty leaf against the old root and
    /// `leaf_hash` against the new one.
    pub fn add(&mut self, leaf_hash: [u8; 32]) -> Result<([u8; 32], MerkleProof), AccumulatorError> {
        if self.len >= self.capacity() {
            return Err(AccumulatorError::CapacityExceeded {
                capacity: self.capacity(),
            });
        }
        let index = self.len;
        self.len += 1;
        Ok(self.set_leaf(index, leaf_hash))
    }

    /// Replace an occupied leaf.
    pub fn update(
        &mut self,
        index: u64,
        leaf_hash: [u8; 32],
    ) -> Result<([u8; 32], MerkleProof), AccumulatorError> {
        self.check_index(index)?;
        Ok(self.set_leaf(index, leaf_hash))
    }

    pub fn prove_inclusion(&self, index: u64) -> Result<MerkleProof, AccumulatorError> {
        self.check_index(index)?;
        Ok(self.path(index))
    }

    /// Replace many occupied leaves and close the root once.
    ///
    /// Leaves are written first, then every dirty parent is rehashed level
    /// by level exactly once, so the result does not depend on the order of
    /// `updates`.
    pub fn batch_update(&mut self, updates: &[(u64, [u8; 32])]) -> Result<[u8; 32], AccumulatorError> {
        let mut seen = HashSet::with_capacity(updates.len());
        for (index, _) in updates {
            self.check_index(*index)?;
            if !seen.insert(*index) {
                return Err(AccumulatorError::MalformedBatch(format!(
                    "index {index} appears twice"
                )));
            }
        }

        let mut dirty = BTreeSet::new();
        for (index, leaf) in updates {
            self.nodes.insert((0, *index), *leaf);
            dirty.insert(index / 2);
        }

        for level in 1..=self.depth {
            let parents: Vec<u64> = dirty.iter().copied().collect();
            let hashed: Vec<(u64, [u8; 32])> = if parents.len() >= PARALLEL_LEVEL_THRESHOLD {
                parents
                    .par_iter()
                    .map(|&i| (i, self.hash_children(level, i)))
                    .collect()
            } else {
                parents
                    .iter()
                    .map(|&i| (i, self.hash_children(level, i)))
                    .collect()
            };

            dirty.clear();
            for (index, hash) in hashed {
                self.nodes.insert((level, index), hash);
                dirty.insert(index / 2);
            }
        }

        Ok(self.root())
    }

    fn check_index(&self, index: u64) -> Result<(), AccumulatorError> {
        if index >= self.len {
            return Err(AccumulatorError::IndexOutOfRange {
                index,
                len: self.len,
            });
        }
        Ok(())
    }

    fn node(&self, level: usize, index: u64) -> [u8; 32] {
        self.nodes
            .get(&(level, index))
            .copied()
            .unwrap_or_else(|| empty_root(level))
    }

    fn hash_children(&self, level: usize, index: u64) -> [u8; 32] {
        hash_pair(
            &self.node(level - 1, index * 2),
            &self.node(level - 1, index * 2 + 1),
        )
    }

    fn path(&self, index: u64) -> MerkleProof {
        let path = (0..self.depth)
            .map(|level| self.node(level, (index >> level) ^ 1))
            .collect();
        MerkleProof { path, index }
    }

    /// Write a leaf and rehash its ancestors.
    fn set_leaf(&mut self, index: u64, leaf: [u8; 32]) -> ([u8; 32], MerkleProof) {
        let proof = self.path(index);
        self.nodes.insert((0, index), leaf);

        let mut current = leaf;
        for (level, sibling) in proof.path.iter().enumerate() {
            let position = index >> level;
            current = if position & 1 == 1 {
                hash_pair(sibling, &current)
            } else {
                hash_pair(&current, sibling)
            };
            self.nodes.insert((level + 1, position >> 1), current);
        }
        (current, proof)
    }
}
