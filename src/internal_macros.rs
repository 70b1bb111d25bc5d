// SPDX-License-Identifier: CC0-1.0

//! Internal macros.
//!
//! Macros meant to be used inside this library.

/// Implements consensus encoding for a 32-byte hash newtype by writing its
/// bytes in internal (wire) order.
macro_rules! impl_hashencode {
    ($hashtype:ident) => {
        impl $crate::consensus::Encodable for $hashtype {
            fn consensus_encode<W: std::io::Write + ?Sized>(
                &self,
                w: &mut W,
            ) -> Result<usize, std::io::Error> {
                use $crate::hashes::Hash as _;
                $crate::consensus::Encodable::consensus_encode(self.as_byte_array(), w)
            }
        }

        impl $crate::consensus::Decodable for $hashtype {
            fn consensus_decode<R: std::io::Read + ?Sized>(
                r: &mut R,
            ) -> Result<Self, $crate::consensus::encode::Error> {
                use $crate::hashes::Hash as _;
                Ok(Self::from_byte_array(<[u8; 32] as $crate::consensus::Decodable>::consensus_decode(r)?))
            }
        }
    };
}
pub(crate) use impl_hashencode;

#[cfg(test)]
macro_rules! hex (($hex:expr) => (<Vec<u8> as $crate::hex::FromHex>::from_hex($hex).unwrap()));
#[cfg(test)]
pub(crate) use hex;
