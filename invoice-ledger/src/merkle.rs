//! Merkle tree over receipt hashes
//!
//! Each sealed block commits to its receipts through a binary SHA-256 tree.
//! Odd levels duplicate their last node. Internal nodes are domain separated
//! from leaves so a proof cannot pass an internal node off as a receipt.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const NODE_TAG: u8 = 0x01;

fn hash_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([NODE_TAG]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

fn next_level(level: &[[u8; 32]]) -> Vec<[u8; 32]> {
    level
        .chunks(2)
        .map(|pair| hash_pair(&pair[0], pair.get(1).unwrap_or(&pair[0])))
        .collect()
}

/// Direction of sibling in Merkle tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Sibling is on the left
    Left,
    /// Sibling is on the right
    Right,
}

/// Inclusion proof for one receipt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    /// Receipt hash being proven
    pub leaf_hash: [u8; 32],
    /// Position of the leaf in its block
    pub leaf_index: usize,
    /// Sibling hashes from leaf to root
    pub siblings: Vec<(Direction, [u8; 32])>,
    /// Root the proof folds up to
    pub root_hash: [u8; 32],
}

impl MerkleProof {
    /// Fold the siblings and compare with the embedded root
    pub fn verify(&self) -> bool {
        self.compute_root() == self.root_hash
    }

    /// Fold the siblings and compare with an externally trusted root
    pub fn verify_against(&self, root: &[u8; 32]) -> bool {
        &self.root_hash == root && self.verify()
    }

    fn compute_root(&self) -> [u8; 32] {
        self.siblings
            .iter()
            .fold(self.leaf_hash, |current, (direction, sibling)| match direction {
                Direction::Left => hash_pair(sibling, &current),
                Direction::Right => hash_pair(&current, sibling),
            })
    }
}

/// Append-only Merkle tree
#[derive(Debug, Clone)]
pub struct MerkleTree {
    leaves: Vec<[u8; 32]>,
}

impl MerkleTree {
    /// Create tree from existing leaves
    pub fn from_leaves(leaves: Vec<[u8; 32]>) -> Self {
        Self { leaves }
    }

    /// Number of leaves
    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    /// Check if tree is empty
    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Root hash (zero for an empty tree, the leaf itself for one leaf)
    pub fn root(&self) -> [u8; 32] {
        if self.is_empty() {
            return [0u8; 32];
        }

        let mut level = self.leaves.clone();
        while level.len() > 1 {
            level = next_level(&level);
        }
        level[0]
    }

    /// Inclusion proof for the leaf at `leaf_index`
    pub fn proof(&self, leaf_index: usize) -> Option<MerkleProof> {
        let leaf_hash = *self.leaves.get(leaf_index)?;

        let mut siblings = Vec::new();
        let mut level = self.leaves.clone();
        let mut index = leaf_index;

        while level.len() > 1 {
            let sibling = if index % 2 == 0 {
                let right = level.get(index + 1).unwrap_or(&level[index]);
                (Direction::Right, *right)
            } else {
                (Direction::Left, level[index - 1])
            };
            siblings.push(sibling);

            level = next_level(&level);
            index /= 2;
        }

        Some(MerkleProof {
            leaf_hash,
            leaf_index,
            siblings,
            root_hash: level[0],
        })
    }
}
