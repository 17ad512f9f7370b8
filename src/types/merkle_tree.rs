//! Binary Merkle root over transaction ids, committed to by block headers.
//!
//! Behavior:
//! - An empty list of leaves yields `EMPTY_ROOT`, the Keccak-256 of the empty string.
//! - Odd layers are padded by duplicating the last leaf before hashing the pair.
//! - Tree construction is performed in-place to minimize allocations.

use crate::core::transaction::Transaction;
use crate::types::hash::Hash;

const NODE_PREFIX: &[u8] = b"TX_MERKLE_NODE";

/// Root of a block without transactions.
pub const EMPTY_ROOT: Hash = Hash([
    0xc5, 0xd2, 0x46, 0x01, 0x86, 0xf7, 0x23, 0x3c, 0x92, 0x7e, 0x7d, 0xb2, 0xdc, 0xc7, 0x03, 0xc0,
    0xe5, 0x00, 0xb6, 0x53, 0xca, 0x82, 0x27, 0x3b, 0x7b, 0xfa, 0xd8, 0x04, 0x5d, 0x85, 0xa4, 0x70,
]);

pub struct MerkleTree;

impl MerkleTree {
    fn hash_pair(left: Hash, right: Hash) -> Hash {
        Hash::keccak()
            .chain(NODE_PREFIX)
            .chain(left.as_slice())
            .chain(right.as_slice())
            .finalize()
    }

    /// Computes a Merkle root from the provided leaf hashes.
    pub fn from_raw(mut nodes: Vec<Hash>) -> Hash {
        if nodes.is_empty() {
            return EMPTY_ROOT;
        }

        let mut len = nodes.len();
        while len > 1 {
            let mut write = 0;
            let mut read = 0;
            while read < len {
                let left = nodes[read];
                let right = if read + 1 < len { nodes[read + 1] } else { left };
                nodes[write] = Self::hash_pair(left, right);
                write += 1;
                read += 2;
            }
            len = write;
        }

        nodes[0]
    }

    /// Merkle root using each transaction's id as a leaf.
    pub fn from_transactions<T: AsRef<Transaction>>(txs: &[T]) -> Hash {
        Self::from_raw(txs.iter().map(|tx| tx.as_ref().id()).collect())
    }
}
