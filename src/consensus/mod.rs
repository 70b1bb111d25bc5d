// SPDX-License-Identifier: CC0-1.0

//! Bitcoin consensus.
//!
//! This module defines the structures, functions, and traits needed to encode
//! merkle proofs exactly as the Bitcoin network does.

pub mod encode;

pub use self::encode::{
    deserialize, deserialize_hex, deserialize_partial, serialize, serialize_hex, Decodable,
    Encodable, ReadExt, WriteExt,
};
