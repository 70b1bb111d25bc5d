// SPDX-License-Identifier: CC0-1.0

//! Partial merkle trees.
//!
//! A partial merkle tree proves that a subset of the leaves of a merkle tree
//! are included under its root without shipping every leaf. It is the
//! payload of the `merkleblock` message used by SPV clients.
//!
//! # Examples
//!
//! ```rust
//! use bitcoin_merkle::consensus::encode::deserialize_hex;
//! use bitcoin_merkle::{PartialMerkleTree, TxMerkleNode, Txid};
//!
//! // Partial merkle tree of block 80000, matching its second transaction.
//! let pmt: PartialMerkleTree = deserialize_hex(
//!     "0200000002252bf9d75c4f481ebb6278d708257d1f12beb6dd30301d26c623f789b2ba6fc0\
//!      e2d32adb5f8ca820731dff234a84e78ec30bce4ec69dbd562d0b2b8266bf4e5a0105",
//! )
//! .unwrap();
//!
//! let mut matches: Vec<Txid> = vec![];
//! let mut index: Vec<u32> = vec![];
//! let root = pmt.extract_matches(&mut matches, &mut index).unwrap();
//! assert_eq!(
//!     root,
//!     "8fb300e3fdb6f30a4c67233b997f99fdd518b968b9a3fd65857bfe78b2600719"
//!         .parse::<TxMerkleNode>()
//!         .unwrap()
//! );
//! assert_eq!(
//!     matches,
//!     vec!["5a4ebf66822b0b2d56bd9dc64ece0bc38ee7844a23ff1d7320a88c5fdb2ad3e2"
//!         .parse::<Txid>()
//!         .unwrap()]
//! );
//! assert_eq!(index, vec![1]);
//! ```

use core::fmt;
use std::io;

use hashes::Hash;
use log::debug;

use self::PartialMerkleTreeError::*;
use super::node_hash;
use crate::consensus::encode::{self, consensus_encode_with_size, read_bytes_with_limit, VarInt};
use crate::consensus::{Decodable, Encodable};
use crate::hash_types::{TxMerkleNode, Txid};

/// Maximum number of hashes a decoded partial merkle tree may declare.
pub const MAX_PARTIAL_TREE_HASHES: usize = 1 << 17;

/// Maximum number of flag bytes a decoded partial merkle tree may declare.
pub const MAX_PARTIAL_TREE_FLAG_BYTES: usize = 1 << 17;

/// Data structure that represents a partial merkle tree.
///
/// It represents a subset of the leaves of a known tree, in a way that allows
/// recovery of the matched leaves and the merkle root, in an authenticated way.
///
/// The encoding works as follows: we traverse the tree in depth-first order,
/// storing a flag for each traversed node, signifying whether the node is the
/// parent of at least one matched leaf (or a matched leaf itself). In case we
/// are at the leaf level, or this flag is 0, its hash is stored and its
/// children are not explored further. Otherwise, no hash is stored, but we
/// recurse into both (or the only) child branch. During decoding, the same
/// depth-first traversal is performed, consuming flags and hashes as they were
/// written during encoding.
///
/// The serialization format:
///  - uint32     total number of leaves (4 bytes)
///  - varint     number of hashes (1-5 bytes)
///  - uint256[]  hashes in depth-first order, internal byte order
///  - varint     number of bytes of flags (1-5 bytes)
///  - byte[]     flags, packed per 8 in a byte, least significant bit first
///
/// Flags are kept padded with zeros to a whole number of bytes, so a decoded
/// tree compares equal to the tree that was encoded.
#[derive(PartialEq, Eq, Clone, Debug, Hash)]
pub struct PartialMerkleTree {
    /// The total number of leaves in the full tree.
    item_count: u32,
    /// Node-is-parent-of-a-match flags.
    flags: Vec<bool>,
    /// Leaf and pruned subtree hashes.
    hashes: Vec<TxMerkleNode>,
}

/// Appends the depth-first flags and hashes of a partial merkle tree.
///
/// Walkers of a full tree call one method per visited node, in depth-first
/// order, then [`build`](PartialMerkleTreeBuilder::build) the result.
#[derive(Clone, Debug)]
pub struct PartialMerkleTreeBuilder {
    item_count: u32,
    flags: Vec<bool>,
    hashes: Vec<TxMerkleNode>,
}

impl PartialMerkleTreeBuilder {
    /// Starts a partial merkle tree over a full tree of `item_count` leaves.
    pub fn new(item_count: u32) -> Self {
        PartialMerkleTreeBuilder { item_count, flags: vec![], hashes: vec![] }
    }

    /// A matched leaf: flag 1 and its hash.
    pub fn include_leaf(&mut self, hash: TxMerkleNode) {
        self.flags.push(true);
        self.hashes.push(hash);
    }

    /// A leaf that is not matched but whose sibling is: flag 0 and its hash.
    pub fn exclude_leaf(&mut self, hash: TxMerkleNode) {
        self.flags.push(false);
        self.hashes.push(hash);
    }

    /// An interior node with at least one match below it: flag 1, no hash.
    ///
    /// Its children have to follow.
    pub fn include_node(&mut self) { self.flags.push(true); }

    /// An interior node with no match below it: flag 0 and the subtree hash.
    pub fn exclude_node(&mut self, hash: TxMerkleNode) {
        self.flags.push(false);
        self.hashes.push(hash);
    }

    /// Finishes the tree, padding the flags to a whole byte.
    pub fn build(mut self) -> PartialMerkleTree {
        let padded = (self.flags.len() + 7) / 8 * 8;
        self.flags.resize(padded, false);
        PartialMerkleTree { item_count: self.item_count, flags: self.flags, hashes: self.hashes }
    }
}

impl PartialMerkleTree {
    /// Returns the total number of leaves in the full tree.
    pub fn item_count(&self) -> u32 { self.item_count }

    /// Returns the node-is-parent-of-a-match flags, zero padded to whole bytes.
    pub fn flags(&self) -> &[bool] { &self.flags }

    /// Returns the leaf and pruned subtree hashes, in depth-first order.
    pub fn hashes(&self) -> &[TxMerkleNode] { &self.hashes }

    /// Construct a partial merkle tree
    /// The `txids` are the transaction hashes of the block and the `matches` is the contains flags
    /// wherever a tx hash should be included in the proof.
    ///
    /// Panics when `txids` is empty or when `matches` has a different length
    ///
    /// # Examples
    ///
    /// ```rust
    /// use bitcoin_merkle::{PartialMerkleTree, Txid};
    ///
    /// // Block 80000
    /// let txids: Vec<Txid> = [
    ///     "c06fbab289f723c6261d3030ddb6be121f7d2508d77862bb1e484f5cd7f92b25",
    ///     "5a4ebf66822b0b2d56bd9dc64ece0bc38ee7844a23ff1d7320a88c5fdb2ad3e2",
    /// ]
    /// .iter()
    /// .map(|hex| hex.parse::<Txid>().unwrap())
    /// .collect();
    ///
    /// // Select the second transaction
    /// let matches = vec![false, true];
    /// let tree = PartialMerkleTree::from_txids(&txids, &matches);
    /// assert!(tree.extract_matches(&mut vec![], &mut vec![]).is_ok());
    /// ```
    pub fn from_txids(txids: &[Txid], matches: &[bool]) -> Self {
        // A block always has its coinbase transaction.
        assert_ne!(txids.len(), 0);
        assert_eq!(txids.len(), matches.len());

        let item_count = txids.len() as u32;
        let mut builder = PartialMerkleTreeBuilder::new(item_count);
        build_subtree(&mut builder, tree_height(item_count), 0, txids, matches);
        builder.build()
    }

    /// Calculates the merkle root committed to by this partial tree.
    ///
    /// # Errors
    ///
    /// Any [`PartialMerkleTreeError`]: a tree that fails to reconstruct
    /// commits to nothing.
    pub fn calculate_root(&self) -> Result<TxMerkleNode, PartialMerkleTreeError> {
        self.extract_matches(&mut vec![], &mut vec![])
    }

    /// Extract the matching txid's represented by this partial merkle tree
    /// and their respective indices within the partial tree.
    /// returns the merkle root, or error in case of failure
    pub fn extract_matches(
        &self,
        matches: &mut Vec<Txid>,
        indexes: &mut Vec<u32>,
    ) -> Result<TxMerkleNode, PartialMerkleTreeError> {
        matches.clear();
        indexes.clear();
        match self.reconstruct(matches, indexes) {
            Ok(root) => Ok(root),
            Err(e) => {
                debug!("rejecting partial merkle tree of {} items: {}", self.item_count, e);
                matches.clear();
                indexes.clear();
                Err(e)
            }
        }
    }

    fn reconstruct(
        &self,
        matches: &mut Vec<Txid>,
        indexes: &mut Vec<u32>,
    ) -> Result<TxMerkleNode, PartialMerkleTreeError> {
        // An empty set will not work
        if self.item_count == 0 {
            return Err(NoItems);
        }
        // there can never be more hashes provided than one for every leaf
        if self.hashes.len() as u64 > u64::from(self.item_count) {
            return Err(TooManyHashes);
        }
        // there must be at least one flag per node in the partial tree, and at least one node per hash
        if self.flags.len() < self.hashes.len() {
            return Err(NotEnoughFlags);
        }

        let mut walk = Reconstruction { tree: self, flags_used: 0, hashes_used: 0, arena: vec![] };
        let root = walk.traverse(matches, indexes)?;

        if walk.hashes_used != self.hashes.len() {
            return Err(UnconsumedHashes);
        }
        // Only the zero padding of the last flag byte may be left over.
        if self.flags[walk.flags_used..].iter().any(|&flag| flag)
            || (walk.flags_used + 7) / 8 != (self.flags.len() + 7) / 8
        {
            return Err(UnconsumedFlags);
        }
        Ok(root)
    }
}

/// Number of nodes at `height` above the leaves.
fn tree_width(item_count: u32, height: u32) -> u32 {
    ((u64::from(item_count) + (1u64 << height) - 1) >> height) as u32
}

fn tree_height(item_count: u32) -> u32 {
    let mut height = 0;
    while tree_width(item_count, height) > 1 {
        height += 1;
    }
    height
}

/// Calculate the hash of a node in the merkle tree (at leaf level: the txid's themselves)
fn subtree_hash(height: u32, pos: u32, txids: &[Txid]) -> TxMerkleNode {
    if height == 0 {
        return TxMerkleNode::from(txids[pos as usize]);
    }
    let left = subtree_hash(height - 1, pos * 2, txids);
    // Calculate right hash if not beyond the end of the array - copy left hash otherwise
    let right = if pos * 2 + 1 < tree_width(txids.len() as u32, height - 1) {
        subtree_hash(height - 1, pos * 2 + 1, txids)
    } else {
        left
    };
    node_hash(left, right)
}

fn build_subtree(
    builder: &mut PartialMerkleTreeBuilder,
    height: u32,
    pos: u32,
    txids: &[Txid],
    matches: &[bool],
) {
    let start = ((u64::from(pos) << height) as usize).min(matches.len());
    let end = ((u64::from(pos + 1) << height) as usize).min(matches.len());
    let parent_of_match = matches[start..end].iter().any(|&m| m);

    match (height, parent_of_match) {
        (0, true) => builder.include_leaf(TxMerkleNode::from(txids[pos as usize])),
        (0, false) => builder.exclude_leaf(TxMerkleNode::from(txids[pos as usize])),
        (_, false) => builder.exclude_node(subtree_hash(height, pos, txids)),
        (_, true) => {
            builder.include_node();
            build_subtree(builder, height - 1, pos * 2, txids, matches);
            if pos * 2 + 1 < tree_width(txids.len() as u32, height - 1) {
                build_subtree(builder, height - 1, pos * 2 + 1, txids, matches);
            }
        }
    }
}

/// A node of the tree being reconstructed, linked by arena index.
#[derive(Clone, Copy, Debug)]
struct PartialNode {
    height: u32,
    pos: u32,
    parent: Option<usize>,
    left: Option<usize>,
    right: Option<usize>,
    /// Set once the node hash is known.
    value: Option<TxMerkleNode>,
}

/// Depth-first walk consuming flags and hashes in lockstep.
struct Reconstruction<'a> {
    tree: &'a PartialMerkleTree,
    flags_used: usize,
    hashes_used: usize,
    arena: Vec<PartialNode>,
}

impl<'a> Reconstruction<'a> {
    /// Enters a new node, consuming its flag and, for leaves and pruned
    /// subtrees, its hash.
    fn open(
        &mut self,
        height: u32,
        pos: u32,
        parent: Option<usize>,
        matches: &mut Vec<Txid>,
        indexes: &mut Vec<u32>,
    ) -> Result<usize, PartialMerkleTreeError> {
        let flag = *self.tree.flags.get(self.flags_used).ok_or(FlagsExhausted)?;
        self.flags_used += 1;

        let mut node = PartialNode { height, pos, parent, left: None, right: None, value: None };
        if height == 0 || !flag {
            let hash = *self.tree.hashes.get(self.hashes_used).ok_or(HashesExhausted)?;
            self.hashes_used += 1;
            if height == 0 && flag {
                matches.push(Txid::from_byte_array(hash.to_byte_array()));
                indexes.push(pos);
            }
            node.value = Some(hash);
        }
        self.arena.push(node);
        Ok(self.arena.len() - 1)
    }

    fn traverse(
        &mut self,
        matches: &mut Vec<Txid>,
        indexes: &mut Vec<u32>,
    ) -> Result<TxMerkleNode, PartialMerkleTreeError> {
        let item_count = self.tree.item_count;
        let mut current = self.open(tree_height(item_count), 0, None, matches, indexes)?;

        loop {
            let PartialNode { height, pos, parent, left, right, value } = self.arena[current];
            if let Some(hash) = value {
                match parent {
                    Some(parent) => current = parent,
                    None => return Ok(hash),
                }
                continue;
            }

            // Unresolved interior node: children first, left before right.
            let left = match left {
                None => {
                    let child = self.open(height - 1, pos * 2, Some(current), matches, indexes)?;
                    self.arena[current].left = Some(child);
                    current = child;
                    continue;
                }
                Some(left) => match self.arena[left].value {
                    Some(hash) => hash,
                    None => {
                        current = left;
                        continue;
                    }
                },
            };
            let has_right = pos * 2 + 1 < tree_width(item_count, height - 1);
            let right = match right {
                None if has_right => {
                    let child = self.open(height - 1, pos * 2 + 1, Some(current), matches, indexes)?;
                    self.arena[current].right = Some(child);
                    current = child;
                    continue;
                }
                None => left,
                Some(right) => match self.arena[right].value {
                    // The leaves below each side are unique, so their hashes must differ.
                    Some(hash) if hash == left => return Err(IdenticalHashes),
                    Some(hash) => hash,
                    None => {
                        current = right;
                        continue;
                    }
                },
            };
            self.arena[current].value = Some(node_hash(left, right));
        }
    }
}

/// Reads a declared element count, refusing it above `max` before anything is read or allocated.
fn read_count<R: io::Read + ?Sized>(
    r: &mut R,
    max: usize,
    what: &str,
) -> Result<usize, encode::Error> {
    let count = VarInt::consensus_decode(r)?.0;
    if count > max as u64 {
        debug!("partial merkle tree declares {} {}, limit is {}", count, what, max);
        return Err(encode::Error::OversizedVectorAllocation { requested: count as usize, max });
    }
    Ok(count as usize)
}

impl Encodable for PartialMerkleTree {
    fn consensus_encode<W: io::Write + ?Sized>(&self, w: &mut W) -> Result<usize, io::Error> {
        let mut len = self.item_count.consensus_encode(w)?;
        len += VarInt::from(self.hashes.len()).consensus_encode(w)?;
        for hash in &self.hashes {
            len += hash.consensus_encode(w)?;
        }

        let mut bytes: Vec<u8> = vec![0; (self.flags.len() + 7) / 8];
        for (p, &flag) in self.flags.iter().enumerate() {
            bytes[p / 8] |= (flag as u8) << (p % 8);
        }
        Ok(len + consensus_encode_with_size(&bytes, w)?)
    }
}

impl Decodable for PartialMerkleTree {
    fn consensus_decode<R: io::Read + ?Sized>(r: &mut R) -> Result<Self, encode::Error> {
        let item_count = u32::consensus_decode(r)?;

        let hash_count = read_count(r, MAX_PARTIAL_TREE_HASHES, "hashes")?;
        let mut hashes = Vec::with_capacity(hash_count);
        for _ in 0..hash_count {
            hashes.push(TxMerkleNode::consensus_decode(r)?);
        }

        let flag_bytes = read_count(r, MAX_PARTIAL_TREE_FLAG_BYTES, "flag bytes")?;
        let bytes = read_bytes_with_limit(r, flag_bytes as u64, MAX_PARTIAL_TREE_FLAG_BYTES)?;
        let flags = (0..bytes.len() * 8).map(|p| bytes[p / 8] & (1 << (p % 8)) != 0).collect();

        Ok(PartialMerkleTree { item_count, flags, hashes })
    }
}

/// An error when reconstructing the merkle root of a partial merkle tree.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[non_exhaustive]
pub enum PartialMerkleTreeError {
    /// Partial merkle tree commits to no leaves.
    NoItems,
    /// There are more hashes than leaves.
    TooManyHashes,
    /// There must be at least one flag per node in the partial tree,
    /// and at least one node per hash.
    NotEnoughFlags,
    /// The traversal needed a flag past the last one.
    FlagsExhausted,
    /// The traversal needed a hash past the last one.
    HashesExhausted,
    /// Not all hashes were consumed.
    UnconsumedHashes,
    /// A set flag, or a whole flag byte, was left after the root was reached.
    UnconsumedFlags,
    /// An explicit right child equals its left sibling.
    IdenticalHashes,
}

impl fmt::Display for PartialMerkleTreeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use self::PartialMerkleTreeError::*;

        match *self {
            NoItems => write!(f, "partial merkle tree contains no items"),
            TooManyHashes => write!(f, "proof contains more hashes than items"),
            NotEnoughFlags => write!(f, "proof contains less flags than hashes"),
            FlagsExhausted => write!(f, "overflowed the flags array"),
            HashesExhausted => write!(f, "overflowed the hashes array"),
            UnconsumedHashes => write!(f, "not all hashes were consumed"),
            UnconsumedFlags => write!(f, "not all flags were consumed"),
            IdenticalHashes => write!(f, "found identical sibling hashes"),
        }
    }
}

impl std::error::Error for PartialMerkleTreeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        use self::PartialMerkleTreeError::*;

        match *self {
            NoItems | TooManyHashes | NotEnoughFlags | FlagsExhausted | HashesExhausted
            | UnconsumedHashes | UnconsumedFlags | IdenticalHashes => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::prelude::*;

    use super::*;
    use crate::consensus::encode::{deserialize, serialize};
    use crate::internal_macros::hex;
    use crate::merkle_tree::{self, MerkleTree};

    macro_rules! pmt_tests {
        ($($name:ident),* $(,)?) => {
            $(
                #[test]
                fn $name() {
                    pmt_test_from_name(stringify!($name));
                }
            )*
        }
    }

    pmt_tests!(
        pmt_test_1,
        pmt_test_4,
        pmt_test_7,
        pmt_test_17,
        pmt_test_56,
        pmt_test_100,
        pmt_test_127,
        pmt_test_256,
        pmt_test_312,
        pmt_test_513,
        pmt_test_1000,
        pmt_test_4095
    );

    /// Parses the leaf count out of `name` with form: `pmt_test_$num`.
    fn pmt_test_from_name(name: &str) { pmt_test(name[9..].parse().unwrap()) }

    fn fake_txids(count: usize) -> Vec<Txid> {
        (1..=count).map(|i| format!("{:064x}", i).parse::<Txid>().unwrap()).collect()
    }

    fn pmt_test(tx_count: usize) {
        use core::cmp::min;

        let mut rng = thread_rng();
        let tx_ids = fake_txids(tx_count);
        let tree: MerkleTree<Txid> = tx_ids.iter().copied().collect();

        // Calculate the merkle root and height
        let hashes = tx_ids.iter().map(|t| TxMerkleNode::from(*t));
        let merkle_root_1 = merkle_tree::calculate_root(hashes).expect("hashes is not empty");
        assert_eq!(tree.merkle_root(), Some(merkle_root_1));
        let mut height = 1;
        let mut ntx = tx_count;
        while ntx > 1 {
            ntx = (ntx + 1) / 2;
            height += 1;
        }

        // Check with random subsets with inclusion chances 1, 1/2, 1/4, ..., 1/128
        for att in 1..15 {
            let mut matches = vec![false; tx_count];
            let mut match_txid1 = vec![];
            for j in 0..tx_count {
                // Generate `att / 2` random bits
                let rand_bits = match att / 2 {
                    0 => 0,
                    bits => rng.gen::<u64>() >> (64 - bits),
                };
                let include = rand_bits == 0;
                matches[j] = include;

                if include {
                    match_txid1.push(tx_ids[j]);
                };
            }

            // Build the partial merkle tree, both from the flat list and the incremental tree
            let pmt1 = PartialMerkleTree::from_txids(&tx_ids, &matches);
            let mut position = 0;
            let from_tree = tree
                .partial_tree(|_| {
                    position += 1;
                    matches[position - 1]
                })
                .unwrap();
            assert_eq!(pmt1, from_tree);
            let serialized = serialize(&pmt1);

            // Verify PartialMerkleTree's size guarantees
            let n = min(tx_count, 1 + match_txid1.len() * height);
            assert!(serialized.len() <= 10 + (258 * n + 7) / 8);

            // Deserialize into a tester copy
            let pmt2: PartialMerkleTree =
                deserialize(&serialized).expect("Could not deserialize own data");
            assert_eq!(pmt1, pmt2);

            // Extract merkle root and matched txids from copy
            let mut match_txid2: Vec<Txid> = vec![];
            let mut indexes = vec![];
            let merkle_root_2 = pmt2
                .extract_matches(&mut match_txid2, &mut indexes)
                .expect("Could not extract matches");

            // Check that it has the same merkle root as the original, and a valid one
            assert_eq!(merkle_root_1, merkle_root_2);
            assert_ne!(merkle_root_2, TxMerkleNode::all_zeros());

            // check that it contains the matched transactions (in the same order!)
            assert_eq!(match_txid1, match_txid2);
            for (txid, index) in match_txid2.iter().zip(&indexes) {
                assert_eq!(tx_ids[*index as usize], *txid);
            }

            // check that random bit flips break the authentication
            for _ in 0..4 {
                let mut pmt3: PartialMerkleTree = deserialize(&serialized).unwrap();
                pmt3.damage(&mut rng);
                let mut match_txid3 = vec![];
                let merkle_root_3 = pmt3.extract_matches(&mut match_txid3, &mut indexes).unwrap();
                assert_ne!(merkle_root_3, merkle_root_1);
            }
        }
    }

    #[test]
    fn pmt_malleability() {
        // Create some fake tx ids with the last 2 hashes repeating
        let txids: Vec<Txid> = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 9, 10]
            .iter()
            .map(|i| format!("{:064x}", i).parse::<Txid>().unwrap())
            .collect();

        let matches =
            vec![false, false, false, false, false, false, false, false, false, true, true, false];

        let tree = PartialMerkleTree::from_txids(&txids, &matches);
        // Should fail due to duplicate txs found
        let mut found = vec![txids[0]];
        let result = tree.extract_matches(&mut found, &mut vec![]);
        assert_eq!(result, Err(IdenticalHashes));
        assert!(found.is_empty());
    }

    #[test]
    fn omitted_sibling_is_valid_explicit_duplicate_is_not() {
        let txids = fake_txids(3);
        let duplicated = [txids[0], txids[1], txids[2], txids[2]];
        let root = merkle_tree::calculate_root(txids.iter().map(|t| TxMerkleNode::from(*t)));
        assert_eq!(
            merkle_tree::calculate_root(duplicated.iter().map(|t| TxMerkleNode::from(*t))),
            root
        );

        let implicit = PartialMerkleTree::from_txids(&txids, &[false, false, true]);
        assert_eq!(implicit.calculate_root().ok(), root);

        let explicit = PartialMerkleTree::from_txids(&duplicated, &[false, false, true, false]);
        assert_eq!(explicit.calculate_root(), Err(IdenticalHashes));
    }

    #[test]
    fn single_item() {
        let txids = fake_txids(1);
        let pmt = PartialMerkleTree::from_txids(&txids, &[true]);
        assert_eq!(pmt.hashes(), &[TxMerkleNode::from(txids[0])][..]);
        assert_eq!(&pmt.flags()[..1], &[true][..]);

        let mut matches = vec![];
        let mut indexes = vec![];
        let root = pmt.extract_matches(&mut matches, &mut indexes);
        assert_eq!(root, Ok(TxMerkleNode::from(txids[0])));
        assert_eq!(matches, txids);
        assert_eq!(indexes, vec![0]);

        let unmatched = PartialMerkleTree::from_txids(&txids, &[false]);
        assert_eq!(unmatched.calculate_root(), Ok(TxMerkleNode::from(txids[0])));
    }

    #[test]
    fn builder_pads_flags() {
        let hash = TxMerkleNode::from_byte_array([1; 32]);
        let mut builder = PartialMerkleTreeBuilder::new(2);
        builder.include_node();
        builder.include_leaf(hash);
        builder.exclude_leaf(TxMerkleNode::from_byte_array([2; 32]));
        let pmt = builder.build();
        assert_eq!(pmt.flags(), &[true, true, false, false, false, false, false, false][..]);
        assert_eq!(pmt.hashes().len(), 2);
        assert_eq!(
            pmt.calculate_root(),
            Ok(node_hash(hash, TxMerkleNode::from_byte_array([2; 32])))
        );
    }

    #[test]
    fn reconstruction_errors() {
        let leaf = TxMerkleNode::from_byte_array([1; 32]);
        let tree = |item_count, flags: &[bool], hashes: &[TxMerkleNode]| PartialMerkleTree {
            item_count,
            flags: flags.to_vec(),
            hashes: hashes.to_vec(),
        };

        assert_eq!(tree(0, &[true], &[leaf]).calculate_root(), Err(NoItems));
        assert_eq!(tree(1, &[true, true], &[leaf, leaf]).calculate_root(), Err(TooManyHashes));
        assert_eq!(tree(2, &[true], &[leaf, leaf]).calculate_root(), Err(NotEnoughFlags));
        // Root wants children, flags run out.
        assert_eq!(tree(2, &[true], &[]).calculate_root(), Err(FlagsExhausted));
        // Leaf wants a hash, hashes run out.
        assert_eq!(tree(2, &[true, true, true], &[leaf]).calculate_root(), Err(HashesExhausted));
        assert_eq!(tree(2, &[false, false], &[leaf, leaf]).calculate_root(), Err(UnconsumedHashes));
        assert_eq!(tree(1, &[true, true], &[leaf]).calculate_root(), Err(UnconsumedFlags));
        assert_eq!(tree(1, &[true, false], &[leaf]).calculate_root(), Ok(leaf));
        // A whole byte of zero flags past the end is still rejected.
        let mut flags = vec![true];
        flags.extend([false; 8]);
        assert_eq!(tree(1, &flags, &[leaf]).calculate_root(), Err(UnconsumedFlags));
    }

    #[test]
    fn trailing_set_flag_rejected() {
        let txids = fake_txids(2);
        let mut bytes = serialize(&PartialMerkleTree::from_txids(&txids, &[false, true]));
        // Flags are 1, 0, 1: set the high bit of the only flag byte.
        let last = bytes.len() - 1;
        assert_eq!(bytes[last], 0x05);
        bytes[last] |= 0x80;

        let pmt: PartialMerkleTree = deserialize(&bytes).unwrap();
        assert_eq!(pmt.calculate_root(), Err(UnconsumedFlags));
    }

    #[test]
    fn decode_block_80000() {
        let bytes = hex!("0200000002252bf9d75c4f481ebb6278d708257d1f12beb6dd30301d26c623f789b2ba6fc0e2d32adb5f8ca820731dff234a84e78ec30bce4ec69dbd562d0b2b8266bf4e5a0105");
        let pmt: PartialMerkleTree = deserialize(&bytes).unwrap();
        assert_eq!(pmt.item_count(), 2);
        assert_eq!(pmt.hashes().len(), 2);
        assert_eq!(&pmt.flags()[..3], &[true, false, true][..]);
        assert!(pmt.flags()[3..].iter().all(|&f| !f));
        assert_eq!(serialize(&pmt), bytes);

        let txids: Vec<Txid> =
            pmt.hashes().iter().map(|h| Txid::from_byte_array(h.to_byte_array())).collect();
        assert_eq!(PartialMerkleTree::from_txids(&txids, &[false, true]), pmt);
    }

    #[test]
    fn decode_limits() {
        // 131073 hashes declared, nothing follows.
        let bytes = hex!("01000000fe01000200");
        match deserialize::<PartialMerkleTree>(&bytes) {
            Err(encode::Error::OversizedVectorAllocation { requested: 131073, max: 131072 }) => {}
            other => panic!("unexpected result: {:?}", other),
        }

        // No hashes, 131073 flag bytes declared.
        let bytes = hex!("0100000000fe01000200");
        match deserialize::<PartialMerkleTree>(&bytes) {
            Err(encode::Error::OversizedVectorAllocation { requested: 131073, max: 131072 }) => {}
            other => panic!("unexpected result: {:?}", other),
        }

        // Exactly at the limit is only rejected for lack of bytes.
        let bytes = hex!("01000000fe00000200");
        match deserialize::<PartialMerkleTree>(&bytes) {
            Err(encode::Error::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn decode_malformed() {
        let bytes = hex!("0200000002252bf9d75c4f481ebb6278d708257d1f12beb6dd30301d26c623f789b2ba6fc0e2d32adb5f8ca820731dff234a84e78ec30bce4ec69dbd562d0b2b8266bf4e5a0105");

        // Truncated.
        match deserialize::<PartialMerkleTree>(&bytes[..bytes.len() - 1]) {
            Err(encode::Error::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("unexpected result: {:?}", other),
        }

        // Trailing data.
        let mut extended = bytes.clone();
        extended.push(0);
        assert!(matches!(
            deserialize::<PartialMerkleTree>(&extended),
            Err(encode::Error::ParseFailed(_))
        ));

        // Hash count as a three byte varint.
        let mut non_minimal = bytes[..4].to_vec();
        non_minimal.extend_from_slice(&[0xfd, 0x02, 0x00]);
        non_minimal.extend_from_slice(&bytes[5..]);
        assert!(matches!(
            deserialize::<PartialMerkleTree>(&non_minimal),
            Err(encode::Error::NonMinimalVarInt)
        ));
    }

    impl PartialMerkleTree {
        /// Flip one bit in one of the hashes - this should break the authentication
        fn damage(&mut self, rng: &mut ThreadRng) {
            let n = rng.gen_range(0..self.hashes.len());
            let bit = rng.gen::<u8>();
            let mut hash = self.hashes[n].to_byte_array();
            hash[(bit >> 3) as usize] ^= 1 << (bit & 7);
            self.hashes[n] = TxMerkleNode::from_byte_array(hash);
        }
    }
}
