// SPDX-License-Identifier: CC0-1.0

//! Bitcoin hash types.
//!
//! Newtypes over the double-SHA256 hash so that a transaction id can't be
//! mixed up with an interior node of a merkle tree. Both hold their bytes in
//! internal order and display them reversed, as Bitcoin Core does.

use hashes::{sha256d, Hash};

use crate::internal_macros::impl_hashencode;

hashes::hash_newtype! {
    /// A bitcoin transaction hash/transaction ID.
    pub struct Txid(sha256d::Hash);

    /// A hash of the merkle tree branch or root for transactions.
    pub struct TxMerkleNode(sha256d::Hash);
}

impl_hashencode!(Txid);
impl_hashencode!(TxMerkleNode);

impl From<Txid> for TxMerkleNode {
    fn from(txid: Txid) -> Self { Self::from_byte_array(txid.to_byte_array()) }
}
