//! Ledger core: transactions, accounts, blocks and the rules binding them.
//!
//! - [`transaction`] and [`codec`]: the three wire formats and their model
//! - [`signature`]: signing hashes, signing and sender recovery
//! - [`validator`] and [`admission`]: acceptance rules and pool entry
//! - [`blockchain`]: the ledger owner and block forger

pub mod account;
pub mod admission;
pub mod block;
pub mod blockchain;
pub mod codec;
pub mod gas;
pub mod receipt;
pub mod signature;
pub mod transaction;
pub mod validator;
