//! 20-byte account addresses derived from public keys.

use crate::types::hash::Hash;
use alloy_rlp::{BufMut, Encodable};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Address length in bytes.
pub const ADDRESS_SIZE: usize = 20;

/// Fixed-size 20-byte address identifying accounts on the ledger.
///
/// Derived from public keys by taking the last 20 bytes of the Keccak-256
/// hash of the uncompressed key. `Copy` for cheap passing during validation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub [u8; ADDRESS_SIZE]);

impl Address {
    /// Takes the low 20 bytes of a hash.
    pub fn from_hash(hash: &Hash) -> Self {
        let mut addr = [0u8; ADDRESS_SIZE];
        addr.copy_from_slice(&hash.0[12..]);
        Address(addr)
    }

    /// Builds an address from a slice, returning `None` unless it is 20 bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; ADDRESS_SIZE]>::try_from(bytes).ok().map(Address)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for Address {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(raw).map_err(|e| format!("invalid address {s}: {e}"))?;
        Address::from_slice(&bytes).ok_or_else(|| format!("invalid address length: {s}"))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl Encodable for Address {
    fn encode(&self, out: &mut dyn BufMut) {
        self.0.encode(out)
    }

    fn length(&self) -> usize {
        self.0.length()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_lowercase_prefixed_hex() {
        let addr = Address([0xAB; ADDRESS_SIZE]);
        assert_eq!(addr.to_string(), format!("0x{}", "ab".repeat(20)));
    }

    #[test]
    fn parse_roundtrips_display() {
        let addr: Address = "0x00000000000000000000000000000000000000ff".parse().unwrap();
        assert_eq!(addr.0[19], 0xff);
        assert_eq!(addr.to_string().parse::<Address>().unwrap(), addr);
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!("0x1234".parse::<Address>().is_err());
        assert!("not hex".parse::<Address>().is_err());
    }

    #[test]
    fn from_hash_takes_low_bytes() {
        let hash = Hash::digest(b"address");
        let addr = Address::from_hash(&hash);
        assert_eq!(addr.as_slice(), &hash.0[12..]);
    }

    #[test]
    fn serde_uses_hex_string() {
        let addr = Address([1; ADDRESS_SIZE]);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, format!("\"0x{}\"", "01".repeat(20)));
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }
}
