// SPDX-License-Identifier: CC0-1.0

//! # Bitcoin Merkle Library
//!
//! Merkle commitments and compact inclusion proofs as used by the Bitcoin
//! network protocol.
//!
//! This crate builds the merkle tree that commits to a block's (or block
//! template's) transactions, computes the merkle root found in block headers,
//! and produces and consumes partial merkle trees, the filtered proofs carried
//! by `merkleblock` messages for SPV clients.
//!
//! The tree is built incrementally: leaves are pushed one at a time while a
//! block template is assembled, and the root is recomputed lazily, touching
//! only the nodes that changed.
//!
//! ```rust
//! use bitcoin_merkle::{MerkleTree, PartialMerkleTree, Txid};
//! use bitcoin_merkle::consensus::{deserialize, serialize};
//! use bitcoin_merkle::hashes::Hash;
//!
//! let txids = (1..=5u8).map(|i| Txid::from_byte_array([i; 32]));
//! let tree: MerkleTree<Txid> = txids.collect();
//! let root = tree.merkle_root().expect("tree is not empty");
//!
//! // Prove that the fourth transaction is part of the block.
//! let wanted = Txid::from_byte_array([4; 32]);
//! let proof = tree.partial_tree(|txid| *txid == wanted).unwrap();
//!
//! let bytes = serialize(&proof);
//! let received: PartialMerkleTree = deserialize(&bytes).unwrap();
//!
//! let mut matches = vec![];
//! let mut indexes = vec![];
//! assert_eq!(received.extract_matches(&mut matches, &mut indexes), Ok(root));
//! assert_eq!(matches, vec![wanted]);
//! assert_eq!(indexes, vec![3]);
//! ```
//!
//! ## Logging
//!
//! Rejected proofs and encodings are reported through the [`log`] facade at
//! `debug` level. The library never installs a logger.

// Coding conventions
#![forbid(unsafe_code)]
#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_must_use)]
#![warn(missing_docs)]
// Exclude lints we don't think are valuable.
#![allow(clippy::manual_range_contains)] // More readable than clippy's format.

// Re-export dependencies we control.
pub use hashes;
pub use hex;

mod internal_macros;

pub mod consensus;
pub mod hash_types;
pub mod merkle_tree;

#[rustfmt::skip]                // Keep public re-exports separate.
#[doc(inline)]
pub use crate::{
    consensus::encode::VarInt,
    hash_types::{TxMerkleNode, Txid},
    merkle_tree::{
        Hashable, MerkleBranch, MerkleTree, MerkleTreeError, PartialMerkleTree,
        PartialMerkleTreeBuilder, PartialMerkleTreeError,
    },
};
