// SPDX-License-Identifier: CC0-1.0

//! Bitcoin merkle tree functions.
//!
//! # Examples
//!
//! ```
//! # use bitcoin_merkle::{merkle_tree, TxMerkleNode};
//! # use bitcoin_merkle::hashes::Hash;
//! # let tx1 = TxMerkleNode::all_zeros();  // Dummy hash values.
//! # let tx2 = TxMerkleNode::all_zeros();
//! let tx_hashes = vec![tx1, tx2]; // All the hashes we wish to merkelize.
//! let root = merkle_tree::calculate_root(tx_hashes.into_iter());
//! ```

mod branch;
mod incremental;
mod partial;

use core::iter;

use hashes::{Hash, HashEngine};

use crate::hash_types::{TxMerkleNode, Txid};

#[rustfmt::skip]
#[doc(inline)]
pub use self::{
    branch::MerkleBranch,
    incremental::{Iter, MerkleTree, MerkleTreeError},
    partial::{
        PartialMerkleTree, PartialMerkleTreeBuilder, PartialMerkleTreeError,
        MAX_PARTIAL_TREE_FLAG_BYTES, MAX_PARTIAL_TREE_HASHES,
    },
};

/// An item that can be committed to as a leaf of a merkle tree.
///
/// The producer of the hash is outside of this crate: for a block it is the
/// transaction id, but any 32-byte commitment works.
pub trait Hashable {
    /// Returns the leaf hash of this item, in internal byte order.
    fn merkle_hash(&self) -> TxMerkleNode;
}

impl Hashable for Txid {
    fn merkle_hash(&self) -> TxMerkleNode { TxMerkleNode::from(*self) }
}

impl Hashable for TxMerkleNode {
    fn merkle_hash(&self) -> TxMerkleNode { *self }
}

impl<T: Hashable + ?Sized> Hashable for &T {
    fn merkle_hash(&self) -> TxMerkleNode { (**self).merkle_hash() }
}

/// Hashes two sibling nodes into their parent, `SHA256D(left || right)`.
///
/// Both inputs and the output are in internal byte order. Expressed over the
/// displayed (reversed) form of the hashes this is
/// `reverse(SHA256D(reverse(left) || reverse(right)))`.
pub fn node_hash(left: TxMerkleNode, right: TxMerkleNode) -> TxMerkleNode {
    let mut engine = TxMerkleNode::engine();
    engine.input(left.as_byte_array());
    engine.input(right.as_byte_array());
    TxMerkleNode::from_engine(engine)
}

/// Calculates the merkle root of an iterator of *hashes*, one level at a time.
///
/// This is the textbook computation: hashes are paired up, the last one
/// duplicated when a level has odd length, until a single hash remains. It
/// rebuilds every level from scratch; use [`MerkleTree`] when leaves arrive
/// one at a time.
///
/// # Returns
///
/// - `None` if `hashes` is empty. The merkle root of an empty tree of hashes is undefined.
/// - `Some(hash)` if `hashes` contains one element. A single hash is by definition the merkle root.
/// - `Some(merkle_root)` if length of `hashes` is greater than one.
pub fn calculate_root<I>(mut hashes: I) -> Option<TxMerkleNode>
where
    I: Iterator<Item = TxMerkleNode>,
{
    let first = hashes.next()?;
    let second = match hashes.next() {
        Some(second) => second,
        None => return Some(first),
    };

    let mut hashes = iter::once(first).chain(iter::once(second)).chain(hashes);

    // Do the first round of pairing while making the local copy.
    let (min, max) = hashes.size_hint();
    let mut level = Vec::with_capacity(max.unwrap_or(min) / 2 + 1);
    while let Some(hash1) = hashes.next() {
        // If the size is odd, use the last element twice.
        let hash2 = hashes.next().unwrap_or(hash1);
        level.push(node_hash(hash1, hash2));
    }

    while level.len() > 1 {
        // A chunk of one is the odd hash out, paired with itself.
        level = level.chunks(2).map(|pair| node_hash(pair[0], pair[pair.len() - 1])).collect();
    }
    level.pop()
}
