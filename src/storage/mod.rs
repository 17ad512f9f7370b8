//! Ledger storage subsystem.
//!
//! - [`state`]: immutable per-block account snapshots and the forging overlay
//! - [`main_storage`]: in-memory chain store with the sparse Merkle state root
//! - [`txpool`]: pending transactions awaiting block inclusion
//! - [`dump`]: JSON export of a block's account state

pub mod dump;
pub mod main_storage;
pub mod state;
pub mod txpool;

use crate::types::address::Address;
use crate::types::hash::Hash;
use evm_ledger_derive::Error;

/// Errors raised by the chain store and state layers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// Block's parent hash does not match the current chain head.
    #[error("block does not extend current head: expected parent {expected}, got {actual}")]
    NotOnTip { expected: Hash, actual: Hash },

    /// An address listed as created is not resolvable in its snapshot.
    #[error("account {0} missing from state snapshot")]
    MissingAccount(Address),

    /// The sparse Merkle tree rejected an update.
    #[error("state tree update failed: {0}")]
    StateTree(String),
}
