//! Request parameters and response objects exchanged over JSON-RPC.
//!
//! Integers travel as `0x`-prefixed hex quantities, byte strings as `0x` hex.

use crate::config::{parse_u64, parse_u256};
use crate::core::block::{Block, BlockRef};
use crate::core::receipt::Receipt;
use crate::core::transaction::{AccessListItem, Transaction, TxFormat, TxVariant};
use crate::rpc::RpcError;
use crate::types::U256;
use crate::types::address::Address;
use crate::types::bytes::Bytes;
use crate::types::hash::Hash;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

pub fn quantity(value: u64) -> String {
    format!("0x{value:x}")
}

pub fn u256_quantity(value: U256) -> String {
    format!("0x{value:x}")
}

fn invalid(field: &str, err: impl std::fmt::Display) -> RpcError {
    RpcError::InvalidParams(format!("{field}: {err}"))
}

pub fn parse_quantity(field: &str, raw: &str) -> Result<u64, RpcError> {
    parse_u64(raw).map_err(|e| invalid(field, e))
}

pub fn parse_amount(field: &str, raw: &str) -> Result<U256, RpcError> {
    parse_u256(raw).map_err(|e| invalid(field, e))
}

pub fn parse_address(field: &str, raw: &str) -> Result<Address, RpcError> {
    Address::from_str(raw).map_err(|e| invalid(field, e))
}

pub fn parse_hash(field: &str, raw: &str) -> Result<Hash, RpcError> {
    Hash::from_str(raw).map_err(|e| invalid(field, e))
}

pub fn parse_bytes(field: &str, raw: &str) -> Result<Bytes, RpcError> {
    Bytes::from_hex(raw).map_err(|e| invalid(field, e))
}

/// Parses a block reference: a tag, a hex number, a block hash, or an
/// EIP-1898 `{"blockHash": ..}` / `{"blockNumber": ..}` object.
pub fn parse_block_ref(value: &Value) -> Result<BlockRef, RpcError> {
    match value {
        Value::Null => Ok(BlockRef::Latest),
        Value::Number(n) => n
            .as_u64()
            .map(BlockRef::Number)
            .ok_or_else(|| invalid("block", n)),
        Value::String(s) => match s.as_str() {
            "latest" | "pending" | "safe" | "finalized" => Ok(BlockRef::Latest),
            "earliest" => Ok(BlockRef::Earliest),
            hex if hex.len() == 66 => parse_hash("block", hex).map(BlockRef::Hash),
            number => parse_quantity("block", number).map(BlockRef::Number),
        },
        Value::Object(map) => {
            if let Some(Value::String(hash)) = map.get("blockHash") {
                return parse_hash("blockHash", hash).map(BlockRef::Hash);
            }
            match map.get("blockNumber") {
                Some(number) => parse_block_ref(number),
                None => Err(invalid("block", "expected blockHash or blockNumber")),
            }
        }
        other => Err(invalid("block", other)),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessListEntry {
    pub address: Address,
    #[serde(default)]
    pub storage_keys: Vec<Hash>,
}

impl From<&AccessListItem> for AccessListEntry {
    fn from(item: &AccessListItem) -> Self {
        Self {
            address: item.address,
            storage_keys: item.storage_keys.clone(),
        }
    }
}

/// Parameters of `ledger_createRawTransaction`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    #[serde(rename = "type")]
    pub format: String,
    pub to: Option<String>,
    pub nonce: String,
    pub gas_limit: String,
    pub gas_price: Option<String>,
    pub max_fee_per_gas: Option<String>,
    pub max_priority_fee_per_gas: Option<String>,
    pub value: Option<String>,
    pub data: Option<String>,
    pub chain_id: Option<String>,
    #[serde(default)]
    pub access_list: Vec<AccessListEntry>,
}

impl TransactionRequest {
    /// Builds the unsigned transaction described by the request.
    ///
    /// `default_chain_id` applies when the request omits `chainId`.
    pub fn build(&self, default_chain_id: u64) -> Result<Transaction, RpcError> {
        let chain_id = match &self.chain_id {
            Some(raw) => parse_quantity("chainId", raw)?,
            None => default_chain_id,
        };
        let required = |field: &str, raw: &Option<String>| -> Result<U256, RpcError> {
            let raw = raw
                .as_deref()
                .ok_or_else(|| invalid(field, "required for this type"))?;
            parse_amount(field, raw)
        };

        let variant = match self.format.to_ascii_lowercase().as_str() {
            "legacy" => TxVariant::Legacy {
                gas_price: required("gasPrice", &self.gas_price)?,
            },
            "eip155" => TxVariant::Eip155 {
                gas_price: required("gasPrice", &self.gas_price)?,
                chain_id,
            },
            "eip1559" => TxVariant::Eip1559 {
                chain_id,
                max_priority_fee_per_gas: required(
                    "maxPriorityFeePerGas",
                    &self.max_priority_fee_per_gas,
                )?,
                max_fee_per_gas: required("maxFeePerGas", &self.max_fee_per_gas)?,
                access_list: self
                    .access_list
                    .iter()
                    .map(|entry| AccessListItem {
                        address: entry.address,
                        storage_keys: entry.storage_keys.clone(),
                    })
                    .collect(),
            },
            other => return Err(invalid("type", format!("unknown transaction type {other:?}"))),
        };

        let to = self
            .to
            .as_deref()
            .filter(|to| !to.is_empty())
            .map(|to| parse_address("to", to))
            .transpose()?;
        let value = match &self.value {
            Some(raw) => parse_amount("value", raw)?,
            None => U256::ZERO,
        };
        let data = match &self.data {
            Some(raw) => parse_bytes("data", raw)?,
            None => Bytes::default(),
        };

        Ok(Transaction::new(
            variant,
            parse_quantity("nonce", &self.nonce)?,
            parse_quantity("gasLimit", &self.gas_limit)?,
            to,
            value,
            data,
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignatureObject {
    pub v: String,
    pub r: String,
    pub s: String,
}

/// Transaction as returned by decode and lookup methods.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionObject {
    pub id: Hash,
    #[serde(rename = "type")]
    pub tx_type: String,
    pub format: String,
    pub legacy: bool,
    pub eip155: bool,
    pub eip1559: bool,
    pub signed: bool,
    pub chain_id: Option<String>,
    pub nonce: String,
    pub gas: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_fee_per_gas: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_priority_fee_per_gas: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_list: Option<Vec<AccessListEntry>>,
    pub to: Option<Address>,
    pub value: String,
    pub input: Bytes,
    pub signature: Option<SignatureObject>,
    pub from: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<Hash>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_index: Option<String>,
}

impl TransactionObject {
    pub fn new(tx: &Transaction) -> Self {
        let format = tx.format();
        let eip1559 = format == TxFormat::Eip1559;
        Self {
            id: tx.id(),
            tx_type: quantity(u64::from(format.version())),
            format: format.to_string(),
            legacy: format == TxFormat::Legacy,
            eip155: format == TxFormat::Eip155,
            eip1559,
            signed: tx.is_signed(),
            chain_id: tx.chain_id().map(quantity),
            nonce: quantity(tx.nonce),
            gas: quantity(tx.gas_limit),
            gas_price: tx.gas_price().map(u256_quantity),
            max_fee_per_gas: eip1559.then(|| u256_quantity(tx.max_fee_per_gas())),
            max_priority_fee_per_gas: eip1559
                .then(|| u256_quantity(tx.max_priority_fee_per_gas())),
            access_list: eip1559
                .then(|| tx.access_list().iter().map(AccessListEntry::from).collect()),
            to: tx.to,
            value: u256_quantity(tx.value),
            input: tx.data.clone(),
            signature: tx.signature.map(|sig| SignatureObject {
                v: quantity(sig.v),
                r: u256_quantity(sig.r),
                s: u256_quantity(sig.s),
            }),
            from: tx.sender().ok(),
            block_hash: None,
            block_number: None,
            transaction_index: None,
        }
    }

    /// Adds the inclusion location of a mined transaction.
    pub fn mined(mut self, block: &Block, index: usize) -> Self {
        self.block_hash = Some(block.hash());
        self.block_number = Some(quantity(block.number()));
        self.transaction_index = Some(quantity(index as u64));
        self
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockObject {
    pub hash: Hash,
    pub number: String,
    pub parent_hash: Hash,
    pub timestamp: String,
    pub miner: Option<Address>,
    pub transactions_root: Hash,
    pub state_root: Hash,
    pub base_fee_per_gas: String,
    pub gas_used: String,
    pub gas_limit: String,
    pub transactions: Value,
}

impl BlockObject {
    /// `full` embeds transaction objects instead of ids.
    pub fn new(block: &Block, full: bool) -> Self {
        let transactions = if full {
            Value::Array(
                block
                    .transactions
                    .iter()
                    .enumerate()
                    .map(|(index, tx)| {
                        serde_json::to_value(TransactionObject::new(tx).mined(block, index))
                            .unwrap_or(Value::Null)
                    })
                    .collect(),
            )
        } else {
            Value::Array(
                block
                    .transactions
                    .iter()
                    .map(|tx| Value::String(tx.id().to_string()))
                    .collect(),
            )
        };

        let header = &block.header;
        Self {
            hash: block.hash(),
            number: quantity(header.number),
            parent_hash: header.parent_hash,
            timestamp: quantity(header.timestamp),
            miner: header.coinbase,
            transactions_root: header.transactions_root,
            state_root: header.state_root,
            base_fee_per_gas: u256_quantity(header.base_fee),
            gas_used: quantity(header.gas_used),
            gas_limit: quantity(header.gas_limit),
            transactions,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptObject {
    pub transaction_hash: Hash,
    pub block_hash: Hash,
    pub block_number: String,
    pub transaction_index: String,
    pub from: Address,
    pub to: Option<Address>,
    pub contract_address: Option<Address>,
    pub gas_used: String,
    pub cumulative_gas_used: String,
    pub effective_gas_price: String,
    pub status: String,
}

impl From<&Receipt> for ReceiptObject {
    fn from(receipt: &Receipt) -> Self {
        Self {
            transaction_hash: receipt.transaction_hash,
            block_hash: receipt.block_hash,
            block_number: quantity(receipt.block_number),
            transaction_index: quantity(receipt.transaction_index as u64),
            from: receipt.from,
            to: receipt.to,
            contract_address: receipt.contract_address,
            gas_used: quantity(receipt.gas_used),
            cumulative_gas_used: quantity(receipt.cumulative_gas_used),
            effective_gas_price: u256_quantity(receipt.effective_gas_price),
            status: quantity(u64::from(receipt.success)),
        }
    }
}
