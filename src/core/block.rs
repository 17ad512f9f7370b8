//! Block and header structures.

use crate::core::transaction::Transaction;
use crate::types::U256;
use crate::types::address::Address;
use crate::types::hash::Hash;
use crate::types::merkle_tree::MerkleTree;
use crate::types::rlp::RlpList;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Block header containing metadata and cryptographic commitments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    /// Block index in the chain (genesis = 0).
    pub number: u64,
    /// Hash of parent block, forming the chain.
    pub parent_hash: Hash,
    /// Unix timestamp in seconds.
    pub timestamp: u64,
    /// Recipient of priority fees, if any.
    pub coinbase: Option<Address>,
    /// Root of the Merkle tree over included transaction ids.
    pub transactions_root: Hash,
    /// Root of the account state after applying this block.
    pub state_root: Hash,
    /// Base fee per gas charged (and burned) in this block.
    pub base_fee: U256,
    /// Gas consumed by all included transactions.
    pub gas_used: u64,
    /// Maximum gas the block may consume.
    pub gas_limit: u64,
}

impl Header {
    /// Keccak-256 of the RLP-encoded header fields.
    fn compute_hash(&self) -> Hash {
        let coinbase: &[u8] = match &self.coinbase {
            Some(address) => address.as_slice(),
            None => &[],
        };
        let mut list = RlpList::new();
        list.push(&self.number)
            .push(&self.parent_hash)
            .push(&self.timestamp)
            .push(coinbase)
            .push(&self.transactions_root)
            .push(&self.state_root)
            .push(&self.base_fee)
            .push(&self.gas_used)
            .push(&self.gas_limit);
        Hash::digest(list.finish())
    }
}

/// Immutable block containing header and transactions.
///
/// The header hash is lazily computed and cached.
#[derive(Debug)]
pub struct Block {
    pub header: Header,
    pub transactions: Box<[Arc<Transaction>]>,

    /// Lazily computed header hash, cached after first computation, do not use directly.
    cached_hash: OnceLock<Hash>,
}

impl Block {
    /// Creates a block, filling in the transactions root.
    pub fn new(mut header: Header, transactions: Vec<Arc<Transaction>>) -> Arc<Self> {
        header.transactions_root = MerkleTree::from_transactions(&transactions);
        Arc::new(Self {
            header,
            transactions: transactions.into_boxed_slice(),
            cached_hash: OnceLock::new(),
        })
    }

    /// Returns the header hash, computing and caching it on first call.
    pub fn hash(&self) -> Hash {
        *self.cached_hash.get_or_init(|| self.header.compute_hash())
    }

    pub fn number(&self) -> u64 {
        self.header.number
    }

    /// Position of the transaction with id `id` in this block.
    pub fn position(&self, id: &Hash) -> Option<usize> {
        self.transactions.iter().position(|tx| tx.id() == *id)
    }
}

/// Reference to a block, as accepted by queries and dumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRef {
    /// Current chain head.
    Latest,
    /// Genesis block.
    Earliest,
    Number(u64),
    Hash(Hash),
}

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockRef::Latest => write!(f, "latest"),
            BlockRef::Earliest => write!(f, "earliest"),
            BlockRef::Number(n) => write!(f, "{n:#x}"),
            BlockRef::Hash(h) => write!(f, "{h}"),
        }
    }
}
