//! Core type definitions for ledger primitives.
//!
//! - `Hash`: fixed-size 32-byte Keccak-256 hashes
//! - `Address`: 20-byte account identifiers
//! - `Bytes`: shared immutable byte buffers
//! - `MerkleTree`: transaction roots for block headers
//! - `rlp`: list building and splitting helpers over `alloy_rlp`
//!
//! 256-bit amounts use `alloy_primitives::U256` directly.

pub mod address;
pub mod bytes;
pub mod hash;
pub mod merkle_tree;
pub mod rlp;

pub use alloy_primitives::U256;

