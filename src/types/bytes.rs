//! Reference-counted byte buffer used for transaction data and contract code.

use alloy_rlp::{BufMut, Encodable};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// A reference-counted, immutable byte buffer.
///
/// Wraps `Arc<Vec<u8>>` so transactions, pool entries and state layers can
/// share the same payload without copying it.
#[derive(Debug, Default, Eq, PartialEq, Hash)]
pub struct Bytes(Arc<Vec<u8>>);

impl Bytes {
    /// Creates a new buffer from any type convertible to `Vec<u8>`.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self(Arc::new(data.into()))
    }

    /// Returns the number of bytes in the buffer.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the buffer contents as a byte slice.
    pub fn as_slice(&self) -> &[u8] {
        self.0.as_slice()
    }

    /// Copies the buffer contents into a new `Vec<u8>`.
    pub fn to_vec(&self) -> Vec<u8> {
        self.as_slice().to_vec()
    }

    /// Parses `0x`-prefixed (or bare) hex.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        hex::decode(s.strip_prefix("0x").unwrap_or(s)).map(Self::new)
    }

    /// `0x`-prefixed lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.as_slice()))
    }
}

impl Clone for Bytes {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl Deref for Bytes {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

impl AsRef<[u8]> for Bytes {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl fmt::Display for Bytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Encodable for Bytes {
    fn encode(&self, out: &mut dyn BufMut) {
        self.as_slice().encode(out)
    }

    fn length(&self) -> usize {
        self.as_slice().length()
    }
}

impl Serialize for Bytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Bytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Bytes::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

impl From<Vec<u8>> for Bytes {
    fn from(v: Vec<u8>) -> Self {
        Self::new(v)
    }
}

impl From<&[u8]> for Bytes {
    fn from(s: &[u8]) -> Self {
        Self::new(s)
    }
}

impl<const N: usize> From<[u8; N]> for Bytes {
    fn from(arr: [u8; N]) -> Self {
        Self::new(arr)
    }
}

impl<const N: usize> From<&[u8; N]> for Bytes {
    fn from(arr: &[u8; N]) -> Self {
        Self::new(arr.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_shares_allocation() {
        let a = Bytes::new(vec![1, 2, 3]);
        let b = a.clone();
        assert!(Arc::ptr_eq(&a.0, &b.0));
    }

    #[test]
    fn hex_roundtrip() {
        let data = Bytes::from(&[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(data.to_hex(), "0xdeadbeef");
        assert_eq!(Bytes::from_hex("0xdeadbeef").unwrap(), data);
        assert_eq!(Bytes::from_hex("deadbeef").unwrap(), data);
        assert!(Bytes::from_hex("0xabc").is_err());
    }

    #[test]
    fn empty_renders_as_bare_prefix() {
        assert_eq!(Bytes::default().to_hex(), "0x");
        assert!(Bytes::from_hex("0x").unwrap().is_empty());
    }

    #[test]
    fn rlp_encodes_as_byte_string() {
        let mut out = Vec::new();
        Bytes::from(&[0x01, 0x02]).encode(&mut out);
        assert_eq!(out, vec![0x82, 0x01, 0x02]);

        let mut single = Vec::new();
        Bytes::from(&[0x7f]).encode(&mut single);
        assert_eq!(single, vec![0x7f]);
    }
}
