//! Node configuration.
//!
//! Built once at startup and passed explicitly to the chain; nothing reads
//! process state afterwards.

use crate::core::gas::{GasFeeParams, INITIAL_BASE_FEE};
use crate::crypto::key_pair::PrivateKey;
use crate::storage::txpool::TXPOOL_CAPACITY;
use crate::types::U256;
use crate::types::address::Address;
use std::str::FromStr;

/// Chain id of the development network.
pub const DEV_CHAIN_ID: u64 = 1337;

pub const ENV_CHAIN_ID: &str = "LEDGER_CHAIN_ID";
pub const ENV_DUMP_ENABLED: &str = "LEDGER_DUMP_ENABLED";
pub const ENV_LOG: &str = "LEDGER_LOG";

#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// Network id enforced on EIP-155 and EIP-1559 transactions.
    pub chain_id: u64,
    /// Whether state dumps may be requested on this node.
    pub dump_enabled: bool,
    pub pool_capacity: usize,
    pub gas: GasFeeParams,
    /// Base fee of the genesis block.
    pub initial_base_fee: U256,
    /// Recipient of priority fees; burned when unset.
    pub coinbase: Option<Address>,
    /// Genesis balances, in allocation order.
    pub alloc: Vec<(Address, U256)>,
    /// Keys available to `ledger_signTransaction`.
    pub dev_keys: Vec<PrivateKey>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            chain_id: DEV_CHAIN_ID,
            dump_enabled: false,
            pool_capacity: TXPOOL_CAPACITY,
            gas: GasFeeParams::default(),
            initial_base_fee: U256::from(INITIAL_BASE_FEE),
            coinbase: None,
            alloc: Vec::new(),
            dev_keys: Vec::new(),
        }
    }
}

impl NodeConfig {
    /// Adds a genesis balance for `address`.
    pub fn with_alloc(mut self, address: Address, balance: U256) -> Self {
        self.alloc.push((address, balance));
        self
    }

    /// Applies `LEDGER_CHAIN_ID` and `LEDGER_DUMP_ENABLED` from `lookup`.
    ///
    /// Command-line flags are applied afterwards and take precedence.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), String> {
        if let Some(raw) = lookup(ENV_CHAIN_ID) {
            self.chain_id = parse_chain_id(&raw).map_err(|e| format!("{ENV_CHAIN_ID}: {e}"))?;
        }
        if let Some(raw) = lookup(ENV_DUMP_ENABLED) {
            self.dump_enabled = parse_bool(&raw).map_err(|e| format!("{ENV_DUMP_ENABLED}: {e}"))?;
        }
        Ok(())
    }

    /// Checks settings that flags and environment cannot express on their own.
    pub fn validate(&self) -> Result<(), String> {
        if self.chain_id == 0 {
            return Err("chain id must be at least 1".to_string());
        }
        if self.gas.block_gas_limit == 0 {
            return Err("block gas limit must be positive".to_string());
        }
        Ok(())
    }
}

/// Parses a network chain id; zero is reserved.
pub fn parse_chain_id(raw: &str) -> Result<u64, String> {
    match parse_u64(raw)? {
        0 => Err("chain id must be at least 1".to_string()),
        id => Ok(id),
    }
}

/// Parses a decimal or `0x`-prefixed hex integer.
pub fn parse_u64(raw: &str) -> Result<u64, String> {
    let raw = raw.trim();
    let parsed = match raw.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => raw.parse(),
    };
    parsed.map_err(|e| format!("invalid integer {raw:?}: {e}"))
}

/// Parses a count that must fit the platform's `usize`.
pub fn parse_capacity(raw: &str) -> Result<usize, String> {
    let value = parse_u64(raw)?;
    usize::try_from(value).map_err(|_| format!("{value} exceeds the addressable size"))
}

/// Parses a decimal or `0x`-prefixed hex amount.
pub fn parse_u256(raw: &str) -> Result<U256, String> {
    let raw = raw.trim();
    let parsed = match raw.strip_prefix("0x") {
        Some(hex) => U256::from_str_radix(hex, 16),
        None => U256::from_str_radix(raw, 10),
    };
    parsed.map_err(|e| format!("invalid amount {raw:?}: {e}"))
}

pub fn parse_bool(raw: &str) -> Result<bool, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(format!("invalid boolean {other:?}")),
    }
}

/// Parses an `address=amount` genesis allocation.
pub fn parse_alloc(raw: &str) -> Result<(Address, U256), String> {
    let (address, amount) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected address=amount, got {raw:?}"))?;
    let address = Address::from_str(address.trim())?;
    Ok((address, parse_u256(amount)?))
}
