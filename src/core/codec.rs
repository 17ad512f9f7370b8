//! Wire codec for the three transaction formats.
//!
//! Layouts:
//! - Legacy / EIP-155: `rlp([nonce, gasPrice, gasLimit, to, value, data, v, r, s])`
//! - EIP-1559: `0x02 || rlp([chainId, nonce, maxPriorityFeePerGas, maxFeePerGas,
//!   gasLimit, to, value, data, accessList, yParity, r, s])`
//!
//! Unsigned payloads drop the signature triple, except EIP-155 which keeps
//! `[chainId, 0, 0]` in its place: exactly the preimage its signature covers.

use crate::core::transaction::{AccessListItem, Transaction, TxSignature, TxVariant};
use crate::types::U256;
use crate::types::address::Address;
use crate::types::bytes::Bytes;
use crate::types::hash::Hash;
use crate::types::rlp::{RlpList, decode_bytes, decode_exact, split_list};
use evm_ledger_derive::Error;

/// Type marker of EIP-1559 envelopes.
pub const EIP1559_TX_TYPE: u8 = 0x02;

/// Smallest `v` carrying an EIP-155 chain id.
pub const EIP155_V_OFFSET: u64 = 35;

/// Failure to parse a transaction payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedTransaction {
    #[error("empty transaction payload")]
    Empty,

    #[error("unsupported transaction type 0x{0:02x}")]
    UnsupportedType(u8),

    #[error("invalid rlp: {0}")]
    Rlp(#[from] alloy_rlp::Error),

    #[error("{format} transaction cannot have {count} fields")]
    FieldCount { format: &'static str, count: usize },

    #[error("invalid recipient length {0}")]
    InvalidRecipient(usize),

    #[error("{0} trailing bytes after transaction")]
    TrailingBytes(usize),
}

/// Canonical encoding of `tx`, signed or not.
pub fn encode(tx: &Transaction) -> Vec<u8> {
    encode_with(tx, tx.signature)
}

/// Encoding of the unsigned projection of `tx`; the signing preimage.
pub(crate) fn encode_unsigned(tx: &Transaction) -> Vec<u8> {
    encode_with(tx, None)
}

fn encode_with(tx: &Transaction, signature: Option<TxSignature>) -> Vec<u8> {
    let to: &[u8] = match &tx.to {
        Some(address) => address.as_slice(),
        None => &[],
    };

    match &tx.variant {
        TxVariant::Legacy { gas_price } | TxVariant::Eip155 { gas_price, .. } => {
            let mut list = RlpList::new();
            list.push(&tx.nonce)
                .push(gas_price)
                .push(&tx.gas_limit)
                .push(to)
                .push(&tx.value)
                .push(&tx.data);
            match (signature, tx.chain_id()) {
                (Some(sig), _) => {
                    list.push(&sig.v).push(&sig.r).push(&sig.s);
                }
                (None, Some(chain_id)) => {
                    list.push(&chain_id).push(&0u64).push(&0u64);
                }
                (None, None) => {}
            }
            list.finish()
        }
        TxVariant::Eip1559 {
            chain_id,
            max_priority_fee_per_gas,
            max_fee_per_gas,
            access_list,
        } => {
            let mut list = RlpList::new();
            list.push(chain_id)
                .push(&tx.nonce)
                .push(max_priority_fee_per_gas)
                .push(max_fee_per_gas)
                .push(&tx.gas_limit)
                .push(to)
                .push(&tx.value)
                .push(&tx.data)
                .push_raw(&encode_access_list(access_list));
            if let Some(sig) = signature {
                list.push(&sig.v).push(&sig.r).push(&sig.s);
            }

            let mut out = vec![EIP1559_TX_TYPE];
            list.finish_into(&mut out);
            out
        }
    }
}

fn encode_access_list(items: &[AccessListItem]) -> Vec<u8> {
    let mut outer = RlpList::new();
    for item in items {
        let mut keys = RlpList::new();
        for key in &item.storage_keys {
            keys.push(key);
        }
        let mut entry = RlpList::new();
        entry.push(&item.address).push_raw(&keys.finish());
        outer.push_raw(&entry.finish());
    }
    outer.finish()
}

/// Parses a payload, detecting its format.
///
/// A leading byte of `0xc0` or above starts an RLP list and selects the
/// legacy-shaped layout; `0x02` selects EIP-1559; anything else is rejected.
pub fn decode(bytes: &[u8]) -> Result<Transaction, MalformedTransaction> {
    match bytes.first() {
        None => Err(MalformedTransaction::Empty),
        Some(&b) if b >= 0xc0 => decode_legacy(bytes),
        Some(&EIP1559_TX_TYPE) => decode_eip1559(&bytes[1..]),
        Some(&b) => Err(MalformedTransaction::UnsupportedType(b)),
    }
}

fn decode_list(mut buf: &[u8]) -> Result<Vec<&[u8]>, MalformedTransaction> {
    let items = split_list(&mut buf)?;
    if !buf.is_empty() {
        return Err(MalformedTransaction::TrailingBytes(buf.len()));
    }
    Ok(items)
}

fn decode_to(item: &[u8]) -> Result<Option<Address>, MalformedTransaction> {
    let raw = decode_bytes(item)?;
    if raw.is_empty() {
        return Ok(None);
    }
    Address::from_slice(raw)
        .map(Some)
        .ok_or(MalformedTransaction::InvalidRecipient(raw.len()))
}

fn decode_data(item: &[u8]) -> Result<Bytes, MalformedTransaction> {
    Ok(Bytes::from(decode_bytes(item)?))
}

fn decode_signature(items: &[&[u8]]) -> Result<TxSignature, MalformedTransaction> {
    Ok(TxSignature {
        v: decode_exact(items[0])?,
        r: decode_exact(items[1])?,
        s: decode_exact(items[2])?,
    })
}

fn decode_legacy(bytes: &[u8]) -> Result<Transaction, MalformedTransaction> {
    let items = decode_list(bytes)?;
    if items.len() != 6 && items.len() != 9 {
        return Err(MalformedTransaction::FieldCount {
            format: "legacy",
            count: items.len(),
        });
    }

    let nonce: u64 = decode_exact(items[0])?;
    let gas_price: U256 = decode_exact(items[1])?;
    let gas_limit: u64 = decode_exact(items[2])?;
    let to = decode_to(items[3])?;
    let value: U256 = decode_exact(items[4])?;
    let data = decode_data(items[5])?;

    let (variant, signature) = if items.len() == 6 {
        (TxVariant::Legacy { gas_price }, None)
    } else {
        let sig = decode_signature(&items[6..9])?;
        if sig.r.is_zero() && sig.s.is_zero() {
            // Unsigned EIP-155: `v` carries the bare chain id.
            let variant = TxVariant::Eip155 {
                gas_price,
                chain_id: sig.v,
            };
            (variant, None)
        } else if sig.v >= EIP155_V_OFFSET {
            let variant = TxVariant::Eip155 {
                gas_price,
                chain_id: (sig.v - EIP155_V_OFFSET) / 2,
            };
            (variant, Some(sig))
        } else {
            (TxVariant::Legacy { gas_price }, Some(sig))
        }
    };

    Ok(Transaction::from_parts(
        variant, nonce, gas_limit, to, value, data, signature,
    ))
}

fn decode_access_list(item: &[u8]) -> Result<Vec<AccessListItem>, MalformedTransaction> {
    let mut buf = item;
    let entries = split_list(&mut buf)?;
    if !buf.is_empty() {
        return Err(alloy_rlp::Error::UnexpectedLength.into());
    }

    let mut access_list = Vec::with_capacity(entries.len());
    for entry in entries {
        let mut entry_buf = entry;
        let fields = split_list(&mut entry_buf)?;
        if fields.len() != 2 {
            return Err(alloy_rlp::Error::ListLengthMismatch {
                expected: 2,
                got: fields.len(),
            }
            .into());
        }
        let address = Address(decode_exact::<[u8; 20]>(fields[0])?);

        let mut keys_buf = fields[1];
        let storage_keys = split_list(&mut keys_buf)?
            .into_iter()
            .map(|key| decode_exact::<[u8; 32]>(key).map(Hash))
            .collect::<Result<Vec<_>, _>>()?;

        access_list.push(AccessListItem {
            address,
            storage_keys,
        });
    }
    Ok(access_list)
}

fn decode_eip1559(bytes: &[u8]) -> Result<Transaction, MalformedTransaction> {
    let items = decode_list(bytes)?;
    if items.len() != 9 && items.len() != 12 {
        return Err(MalformedTransaction::FieldCount {
            format: "eip1559",
            count: items.len(),
        });
    }

    let variant = TxVariant::Eip1559 {
        chain_id: decode_exact(items[0])?,
        max_priority_fee_per_gas: decode_exact(items[2])?,
        max_fee_per_gas: decode_exact(items[3])?,
        access_list: decode_access_list(items[8])?,
    };
    let nonce: u64 = decode_exact(items[1])?;
    let gas_limit: u64 = decode_exact(items[4])?;
    let to = decode_to(items[5])?;
    let value: U256 = decode_exact(items[6])?;
    let data = decode_data(items[7])?;

    let signature = if items.len() == 12 {
        Some(decode_signature(&items[9..12])?)
    } else {
        None
    };

    Ok(Transaction::from_parts(
        variant, nonce, gas_limit, to, value, data, signature,
    ))
}
