//! Account-model ledger core.
//!
//! Decodes, signs and validates Ethereum-style transactions (legacy, EIP-155
//! and EIP-1559), admits them into a pool, forges blocks over immutable
//! per-block state snapshots and exports any block's state as JSON.

pub mod config;
pub mod core;
pub mod crypto;
pub mod rpc;
pub mod storage;
pub mod types;
pub mod utils;
