//! Ethereum-style transactions in their three supported wire formats.
//!
//! A [`Transaction`] shares one envelope (nonce, recipient, value, data, gas
//! limit) across formats and carries the format-specific pricing and chain
//! binding in [`TxVariant`]. Signing never mutates: it returns a new instance.

use crate::core::codec::{self, MalformedTransaction};
use crate::core::gas;
use crate::core::signature::{self, SignatureError};
use crate::crypto::key_pair::PrivateKey;
use crate::types::U256;
use crate::types::address::Address;
use crate::types::bytes::Bytes;
use crate::types::hash::Hash;
use std::fmt;
use std::sync::OnceLock;

/// Wire format discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxFormat {
    /// Pre-replay-protection transaction, `v ∈ {27, 28}`.
    Legacy,
    /// Legacy layout with the chain id folded into `v`.
    Eip155,
    /// Typed (`0x02`) fee-market transaction.
    Eip1559,
}

impl TxFormat {
    /// Envelope type byte; the two legacy-shaped formats are untyped (0).
    pub fn version(self) -> u8 {
        match self {
            TxFormat::Legacy | TxFormat::Eip155 => 0,
            TxFormat::Eip1559 => codec::EIP1559_TX_TYPE,
        }
    }
}

impl fmt::Display for TxFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxFormat::Legacy => write!(f, "legacy"),
            TxFormat::Eip155 => write!(f, "eip155"),
            TxFormat::Eip1559 => write!(f, "eip1559"),
        }
    }
}

/// Entry of an EIP-2930 style access list carried by EIP-1559 transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessListItem {
    pub address: Address,
    pub storage_keys: Vec<Hash>,
}

/// Format-specific pricing and chain binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxVariant {
    Legacy {
        gas_price: U256,
    },
    Eip155 {
        gas_price: U256,
        chain_id: u64,
    },
    Eip1559 {
        chain_id: u64,
        max_priority_fee_per_gas: U256,
        max_fee_per_gas: U256,
        access_list: Vec<AccessListItem>,
    },
}

/// Raw signature triple as it appears on the wire.
///
/// `v` keeps its encoded meaning: `27 + recid` for legacy, `35 + 2 * chainId + recid`
/// for EIP-155 and the bare y-parity for EIP-1559.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxSignature {
    pub v: u64,
    pub r: U256,
    pub s: U256,
}

/// A ledger transaction, signed or not.
pub struct Transaction {
    /// Sender's sequence number.
    pub nonce: u64,
    /// Recipient; `None` deploys a contract.
    pub to: Option<Address>,
    /// Amount transferred to the recipient.
    pub value: U256,
    /// Call data, or contract code for deployments.
    pub data: Bytes,
    /// Maximum gas the sender authorizes.
    pub gas_limit: u64,
    /// Pricing and chain binding for the active format.
    pub variant: TxVariant,
    /// Present once signed.
    pub signature: Option<TxSignature>,

    /// Cached transaction ID, computed lazily on first access, do not use directly.
    cached_id: OnceLock<Hash>,
    /// Cached sender recovery result, do not use directly.
    cached_sender: OnceLock<Result<Address, SignatureError>>,
}

impl Transaction {
    /// Creates an unsigned transaction.
    pub fn new(
        variant: TxVariant,
        nonce: u64,
        gas_limit: u64,
        to: Option<Address>,
        value: U256,
        data: impl Into<Bytes>,
    ) -> Self {
        Self::from_parts(variant, nonce, gas_limit, to, value, data.into(), None)
    }

    pub(crate) fn from_parts(
        variant: TxVariant,
        nonce: u64,
        gas_limit: u64,
        to: Option<Address>,
        value: U256,
        data: Bytes,
        signature: Option<TxSignature>,
    ) -> Self {
        Self {
            nonce,
            to,
            value,
            data,
            gas_limit,
            variant,
            signature,
            cached_id: OnceLock::new(),
            cached_sender: OnceLock::new(),
        }
    }

    /// Returns a copy of this transaction carrying `signature`.
    pub(crate) fn with_signature(&self, signature: TxSignature) -> Self {
        Self::from_parts(
            self.variant.clone(),
            self.nonce,
            self.gas_limit,
            self.to,
            self.value,
            self.data.clone(),
            Some(signature),
        )
    }

    /// Returns the unsigned projection of this transaction.
    pub fn unsigned(&self) -> Self {
        Self::from_parts(
            self.variant.clone(),
            self.nonce,
            self.gas_limit,
            self.to,
            self.value,
            self.data.clone(),
            None,
        )
    }

    pub fn format(&self) -> TxFormat {
        match self.variant {
            TxVariant::Legacy { .. } => TxFormat::Legacy,
            TxVariant::Eip155 { .. } => TxFormat::Eip155,
            TxVariant::Eip1559 { .. } => TxFormat::Eip1559,
        }
    }

    pub fn is_legacy(&self) -> bool {
        self.format() == TxFormat::Legacy
    }

    pub fn is_eip155(&self) -> bool {
        self.format() == TxFormat::Eip155
    }

    pub fn is_eip1559(&self) -> bool {
        self.format() == TxFormat::Eip1559
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    pub fn is_contract_creation(&self) -> bool {
        self.to.is_none()
    }

    /// Embedded chain id; `None` for legacy transactions.
    pub fn chain_id(&self) -> Option<u64> {
        match self.variant {
            TxVariant::Legacy { .. } => None,
            TxVariant::Eip155 { chain_id, .. } | TxVariant::Eip1559 { chain_id, .. } => {
                Some(chain_id)
            }
        }
    }

    /// Flat gas price of the legacy-shaped formats.
    pub fn gas_price(&self) -> Option<U256> {
        match self.variant {
            TxVariant::Legacy { gas_price } | TxVariant::Eip155 { gas_price, .. } => {
                Some(gas_price)
            }
            TxVariant::Eip1559 { .. } => None,
        }
    }

    /// Fee cap per gas; the gas price for legacy-shaped formats.
    pub fn max_fee_per_gas(&self) -> U256 {
        match self.variant {
            TxVariant::Legacy { gas_price } | TxVariant::Eip155 { gas_price, .. } => gas_price,
            TxVariant::Eip1559 {
                max_fee_per_gas, ..
            } => max_fee_per_gas,
        }
    }

    /// Tip cap per gas; the gas price for legacy-shaped formats.
    pub fn max_priority_fee_per_gas(&self) -> U256 {
        match self.variant {
            TxVariant::Legacy { gas_price } | TxVariant::Eip155 { gas_price, .. } => gas_price,
            TxVariant::Eip1559 {
                max_priority_fee_per_gas,
                ..
            } => max_priority_fee_per_gas,
        }
    }

    pub fn access_list(&self) -> &[AccessListItem] {
        match &self.variant {
            TxVariant::Eip1559 { access_list, .. } => access_list,
            _ => &[],
        }
    }

    /// Price per gas actually paid in a block with `base_fee`.
    ///
    /// Legacy-shaped formats pay their gas price; EIP-1559 pays
    /// `min(maxFeePerGas, baseFee + maxPriorityFeePerGas)`.
    pub fn effective_gas_price(&self, base_fee: U256) -> U256 {
        match self.variant {
            TxVariant::Legacy { gas_price } | TxVariant::Eip155 { gas_price, .. } => gas_price,
            TxVariant::Eip1559 {
                max_priority_fee_per_gas,
                max_fee_per_gas,
                ..
            } => max_fee_per_gas.min(base_fee.saturating_add(max_priority_fee_per_gas)),
        }
    }

    /// Share of the effective gas price above the base fee.
    pub fn priority_fee_per_gas(&self, base_fee: U256) -> U256 {
        self.effective_gas_price(base_fee).saturating_sub(base_fee)
    }

    /// `value + gasLimit * effectiveGasPrice`, or `None` on overflow.
    pub fn max_cost(&self, base_fee: U256) -> Option<U256> {
        self.effective_gas_price(base_fee)
            .checked_mul(U256::from(self.gas_limit))?
            .checked_add(self.value)
    }

    /// Gas charged before any execution.
    pub fn intrinsic_gas(&self) -> u64 {
        gas::intrinsic_gas(self.is_contract_creation(), &self.data)
    }

    /// Canonical wire encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        codec::encode(self)
    }

    /// Parses any supported wire format.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MalformedTransaction> {
        codec::decode(bytes)
    }

    /// Returns the unique transaction identifier: Keccak-256 of the canonical
    /// encoding. Result is cached.
    pub fn id(&self) -> Hash {
        *self.cached_id.get_or_init(|| Hash::digest(self.to_bytes()))
    }

    /// Digest the signature commits to.
    pub fn signing_hash(&self) -> Hash {
        signature::signing_hash(self)
    }

    /// Signs with `key`, returning a new signed instance.
    pub fn sign(&self, key: &PrivateKey) -> Result<Self, SignatureError> {
        signature::sign(self, key)
    }

    /// Recovers the signer's address. Result is cached.
    pub fn sender(&self) -> Result<Address, SignatureError> {
        *self
            .cached_sender
            .get_or_init(|| signature::recover_sender(self))
    }
}

impl Clone for Transaction {
    /// Clones the fields only; caches are recomputed on demand.
    fn clone(&self) -> Self {
        Self::from_parts(
            self.variant.clone(),
            self.nonce,
            self.gas_limit,
            self.to,
            self.value,
            self.data.clone(),
            self.signature,
        )
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.nonce == other.nonce
            && self.to == other.to
            && self.value == other.value
            && self.data == other.data
            && self.gas_limit == other.gas_limit
            && self.variant == other.variant
            && self.signature == other.signature
    }
}

impl Eq for Transaction {}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("format", &self.format())
            .field("nonce", &self.nonce)
            .field("to", &self.to)
            .field("value", &self.value)
            .field("data", &self.data.to_hex())
            .field("gas_limit", &self.gas_limit)
            .field("variant", &self.variant)
            .field("signature", &self.signature)
            .finish()
    }
}

impl AsRef<Transaction> for Transaction {
    fn as_ref(&self) -> &Transaction {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_utils::utils::{TEST_CHAIN_ID, eip1559_transfer, legacy_transfer};

    #[test]
    fn format_predicates_are_exclusive() {
        let to = Some(Address([7; 20]));
        let txs = [
            Transaction::new(
                TxVariant::Legacy {
                    gas_price: U256::from(1u64),
                },
                0,
                21_000,
                to,
                U256::ZERO,
                Bytes::default(),
            ),
            Transaction::new(
                TxVariant::Eip155 {
                    gas_price: U256::from(1u64),
                    chain_id: TEST_CHAIN_ID,
                },
                0,
                21_000,
                to,
                U256::ZERO,
                Bytes::default(),
            ),
            eip1559_transfer(0, to, U256::ZERO),
        ];

        for tx in &txs {
            let flags = [tx.is_legacy(), tx.is_eip155(), tx.is_eip1559()];
            assert_eq!(flags.iter().filter(|f| **f).count(), 1, "{tx:?}");
            assert!(!tx.is_signed());
        }
    }

    #[test]
    fn chain_id_absent_for_legacy() {
        let tx = legacy_transfer(0, Some(Address([1; 20])), U256::from(5u64));
        assert_eq!(tx.chain_id(), None);
        assert_eq!(tx.gas_price(), Some(U256::from(1_000_000_000u64)));
    }

    #[test]
    fn effective_gas_price_caps_at_fee_cap() {
        let tx = Transaction::new(
            TxVariant::Eip1559 {
                chain_id: TEST_CHAIN_ID,
                max_priority_fee_per_gas: U256::from(2u64),
                max_fee_per_gas: U256::from(10u64),
                access_list: vec![],
            },
            0,
            21_000,
            None,
            U256::ZERO,
            vec![1u8],
        );

        assert_eq!(tx.effective_gas_price(U256::from(5u64)), U256::from(7u64));
        assert_eq!(tx.effective_gas_price(U256::from(9u64)), U256::from(10u64));
        assert_eq!(tx.priority_fee_per_gas(U256::from(9u64)), U256::from(1u64));
    }

    #[test]
    fn max_cost_includes_value_and_gas() {
        let tx = legacy_transfer(0, Some(Address([1; 20])), U256::from(5u64));
        let expected = U256::from(21_000u64) * U256::from(1_000_000_000u64) + U256::from(5u64);
        assert_eq!(tx.max_cost(U256::ZERO), Some(expected));
    }

    #[test]
    fn max_cost_overflow_is_none() {
        let mut tx = legacy_transfer(0, Some(Address([1; 20])), U256::MAX);
        tx.gas_limit = 1;
        assert_eq!(tx.max_cost(U256::ZERO), None);
    }

    #[test]
    fn id_is_stable_and_excludes_caches() {
        let tx = eip1559_transfer(3, Some(Address([9; 20])), U256::from(1u64));
        let copy = tx.clone();
        assert_eq!(tx.id(), copy.id());
        assert_eq!(tx, copy);
        assert_eq!(tx.id(), Hash::digest(tx.to_bytes()));
    }

    #[test]
    fn clone_drops_cached_id() {
        let tx = legacy_transfer(0, Some(Address([1; 20])), U256::from(1u64));
        let original_id = tx.id();
        let mut changed = tx.clone();
        changed.nonce = 1;
        assert_ne!(changed.id(), original_id);
    }

    #[test]
    fn unsigned_transaction_has_no_sender() {
        let tx = legacy_transfer(0, Some(Address([1; 20])), U256::ZERO);
        assert_eq!(tx.sender(), Err(SignatureError::NotSigned));
    }
}
