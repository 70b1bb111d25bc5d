// SPDX-License-Identifier: CC0-1.0

//! Merkle branch of a single leaf.

use super::node_hash;
use crate::hash_types::TxMerkleNode;

/// The sibling hashes connecting one leaf to the merkle root.
///
/// Siblings are ordered from the leaf level up. A node that is the last of an
/// odd-width level has no sibling and no entry: it is paired with itself.
#[derive(Clone, PartialEq, Eq, Debug, Hash)]
pub struct MerkleBranch {
    index: u32,
    item_count: u32,
    hashes: Vec<TxMerkleNode>,
}

impl MerkleBranch {
    /// Creates a branch for the leaf at `index` of a tree of `item_count` leaves.
    pub fn new(index: u32, item_count: u32, hashes: Vec<TxMerkleNode>) -> Self {
        MerkleBranch { index, item_count, hashes }
    }

    /// Index of the proven leaf.
    pub fn index(&self) -> u32 { self.index }

    /// Number of leaves in the tree the branch was taken from.
    pub fn item_count(&self) -> u32 { self.item_count }

    /// Sibling hashes, leaf level first.
    pub fn hashes(&self) -> &[TxMerkleNode] { &self.hashes }

    /// Calculates the merkle root implied by `leaf` sitting at [`MerkleBranch::index`].
    ///
    /// Returns `None` when the branch doesn't fit the tree shape: the index is
    /// out of range, or there are too few or too many sibling hashes.
    pub fn calculate_root(&self, leaf: TxMerkleNode) -> Option<TxMerkleNode> {
        if self.index >= self.item_count {
            return None;
        }

        let mut siblings = self.hashes.iter();
        let mut hash = leaf;
        let mut pos = self.index;
        let mut width = self.item_count;
        while width > 1 {
            hash = if pos % 2 == 1 {
                node_hash(*siblings.next()?, hash)
            } else if pos + 1 < width {
                node_hash(hash, *siblings.next()?)
            } else {
                node_hash(hash, hash)
            };
            pos /= 2;
            width = width / 2 + width % 2;
        }

        match siblings.next() {
            Some(_) => None,
            None => Some(hash),
        }
    }
}
