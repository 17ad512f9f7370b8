//! Transaction validation rules.
//!
//! Provides the [`Validator`] trait for custom validation strategies and
//! [`TransactionValidator`] as the default implementation. Checks run in a
//! fixed order and the first failure wins:
//!
//! 1. signature present
//! 2. signature recovers a sender
//! 3. embedded chain id is positive and matches the network (legacy is exempt)
//! 4. gas limit within intrinsic gas and the block gas limit, tip and fee
//!    caps, creation code
//! 5. nonce equals the sender's current nonce
//! 6. balance covers `value + gasLimit * effectiveGasPrice`

use crate::core::signature::SignatureError;
use crate::core::transaction::{Transaction, TxVariant};
use crate::storage::state::AccountStateView;
use crate::types::U256;
use crate::types::address::Address;
use evm_ledger_derive::Error;

/// Network parameters a transaction is validated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationContext {
    pub chain_id: u64,
    /// Base fee of the block the transaction would land in.
    pub base_fee: U256,
    /// Gas limit of a whole block; no transaction may ask for more.
    pub block_gas_limit: u64,
}

/// Why a transaction was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectionReason {
    #[error("transaction is not signed")]
    NotSigned,

    #[error("invalid transaction signature")]
    InvalidSignature,

    #[error("chain id must be at least 1")]
    ZeroChainId,

    #[error("chain id mismatch: expected {expected}, got {actual}")]
    ChainIdMismatch { expected: u64, actual: u64 },

    #[error("intrinsic gas too low: limit {limit}, required {required}")]
    IntrinsicGasTooLow { limit: u64, required: u64 },

    #[error("gas limit {limit} exceeds block gas limit {max}")]
    GasLimitExceedsBlock { limit: u64, max: u64 },

    #[error("max priority fee per gas {tip} exceeds max fee per gas {fee_cap}")]
    TipAboveFeeCap { tip: U256, fee_cap: U256 },

    #[error("contract creation without code")]
    EmptyCreationCode,

    #[error("fee cap {fee_cap} below block base fee {base_fee}")]
    FeeCapBelowBaseFee { fee_cap: U256, base_fee: U256 },

    #[error("nonce too low: expected {expected}, got {actual}")]
    NonceTooLow { expected: u64, actual: u64 },

    #[error("nonce too high: expected {expected}, got {actual}")]
    NonceTooHigh { expected: u64, actual: u64 },

    #[error("insufficient funds: balance {balance}, cost {cost}")]
    InsufficientFunds { balance: U256, cost: U256 },
}

impl From<SignatureError> for RejectionReason {
    fn from(err: SignatureError) -> Self {
        match err {
            SignatureError::NotSigned => RejectionReason::NotSigned,
            SignatureError::InvalidSignature | SignatureError::SigningFailed => {
                RejectionReason::InvalidSignature
            }
        }
    }
}

/// Trait for validating transactions before they enter the pool or a block.
///
/// Implementations must be thread-safe since admission runs concurrently.
pub trait Validator: Send + Sync {
    /// Validates `tx` against `state` and returns the recovered sender.
    fn validate_tx(
        &self,
        tx: &Transaction,
        ctx: &ValidationContext,
        state: &dyn AccountStateView,
    ) -> Result<Address, RejectionReason>;
}

/// Default transaction validator.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransactionValidator;

impl TransactionValidator {
    /// Stateless checks on gas and fee fields.
    fn check_semantics(tx: &Transaction, ctx: &ValidationContext) -> Result<(), RejectionReason> {
        let required = tx.intrinsic_gas();
        if tx.gas_limit < required {
            return Err(RejectionReason::IntrinsicGasTooLow {
                limit: tx.gas_limit,
                required,
            });
        }
        if tx.gas_limit > ctx.block_gas_limit {
            return Err(RejectionReason::GasLimitExceedsBlock {
                limit: tx.gas_limit,
                max: ctx.block_gas_limit,
            });
        }

        if let TxVariant::Eip1559 {
            max_priority_fee_per_gas,
            max_fee_per_gas,
            ..
        } = tx.variant
            && max_priority_fee_per_gas > max_fee_per_gas
        {
            return Err(RejectionReason::TipAboveFeeCap {
                tip: max_priority_fee_per_gas,
                fee_cap: max_fee_per_gas,
            });
        }

        if tx.is_contract_creation() && tx.data.is_empty() {
            return Err(RejectionReason::EmptyCreationCode);
        }

        let fee_cap = tx.max_fee_per_gas();
        if fee_cap < ctx.base_fee {
            return Err(RejectionReason::FeeCapBelowBaseFee {
                fee_cap,
                base_fee: ctx.base_fee,
            });
        }

        Ok(())
    }
}

impl Validator for TransactionValidator {
    fn validate_tx(
        &self,
        tx: &Transaction,
        ctx: &ValidationContext,
        state: &dyn AccountStateView,
    ) -> Result<Address, RejectionReason> {
        let sender = tx.sender()?;

        if tx.chain_id() == Some(0) {
            return Err(RejectionReason::ZeroChainId);
        }
        if let Some(actual) = tx.chain_id()
            && actual != ctx.chain_id
        {
            return Err(RejectionReason::ChainIdMismatch {
                expected: ctx.chain_id,
                actual,
            });
        }

        Self::check_semantics(tx, ctx)?;

        let expected = state.nonce(&sender);
        if tx.nonce < expected {
            return Err(RejectionReason::NonceTooLow {
                expected,
                actual: tx.nonce,
            });
        }
        if tx.nonce > expected {
            return Err(RejectionReason::NonceTooHigh {
                expected,
                actual: tx.nonce,
            });
        }

        let balance = state.balance(&sender);
        match tx.max_cost(ctx.base_fee) {
            Some(cost) if cost <= balance => Ok(sender),
            cost => Err(RejectionReason::InsufficientFunds {
                balance,
                cost: cost.unwrap_or(U256::MAX),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::account::Account;
    use crate::core::transaction::TxSignature;
    use crate::storage::state::StateSnapshot;
    use crate::types::bytes::Bytes;
    use crate::utils::test_utils::utils::{
        TEST_CHAIN_ID, eip155_transfer, eip1559_transfer, ether, legacy_transfer, test_key,
    };
    use std::sync::Arc;

    fn ctx() -> ValidationContext {
        ValidationContext {
            chain_id: TEST_CHAIN_ID,
            base_fee: U256::from(1_000_000_000u64),
            block_gas_limit: 30_000_000,
        }
    }

    fn to() -> Option<Address> {
        Some(Address([0x77; 20]))
    }

    fn funded(key: u8, balance: U256) -> Arc<StateSnapshot> {
        StateSnapshot::genesis([(test_key(key).address(), Account::new(balance))])
    }

    fn validate(tx: &Transaction, state: &StateSnapshot) -> Result<Address, RejectionReason> {
        TransactionValidator.validate_tx(tx, &ctx(), state)
    }

    #[test]
    fn accepts_funded_transfers_of_every_format() {
        let state = funded(1, ether(1));
        for tx in [
            legacy_transfer(0, to(), U256::from(1u64)),
            eip155_transfer(0, to(), U256::from(1u64)),
            eip1559_transfer(0, to(), U256::from(1u64)),
        ] {
            let signed = tx.sign(&test_key(1)).unwrap();
            assert_eq!(validate(&signed, &state), Ok(test_key(1).address()));
        }
    }

    #[test]
    fn unsigned_is_rejected_first() {
        let state = funded(1, U256::ZERO);
        let mut tx = eip155_transfer(5, to(), U256::ZERO);
        if let TxVariant::Eip155 { chain_id, .. } = &mut tx.variant {
            *chain_id = 1;
        }
        assert_eq!(validate(&tx, &state), Err(RejectionReason::NotSigned));
    }

    #[test]
    fn bad_signature_is_rejected() {
        let state = funded(1, ether(1));
        let tx = legacy_transfer(0, to(), U256::ZERO).sign(&test_key(1)).unwrap();
        let broken = Transaction::from_parts(
            tx.variant.clone(),
            tx.nonce,
            tx.gas_limit,
            tx.to,
            tx.value,
            tx.data.clone(),
            Some(TxSignature {
                v: 27,
                r: U256::ZERO,
                s: U256::ZERO,
            }),
        );
        assert_eq!(validate(&broken, &state), Err(RejectionReason::InvalidSignature));
    }

    #[test]
    fn chain_id_must_match_except_for_legacy() {
        let state = funded(1, ether(1));
        let mut tx = eip1559_transfer(0, to(), U256::ZERO);
        if let TxVariant::Eip1559 { chain_id, .. } = &mut tx.variant {
            *chain_id = TEST_CHAIN_ID + 1;
        }
        let signed = tx.sign(&test_key(1)).unwrap();
        assert_eq!(
            validate(&signed, &state),
            Err(RejectionReason::ChainIdMismatch {
                expected: TEST_CHAIN_ID,
                actual: TEST_CHAIN_ID + 1
            })
        );

        let legacy = legacy_transfer(0, to(), U256::ZERO).sign(&test_key(1)).unwrap();
        assert!(validate(&legacy, &state).is_ok());
    }

    #[test]
    fn gas_limit_must_cover_intrinsic_gas() {
        let state = funded(1, ether(1));
        let mut tx = legacy_transfer(0, to(), U256::ZERO);
        tx.data = Bytes::from(vec![1u8, 0]);
        let signed = tx.sign(&test_key(1)).unwrap();
        assert_eq!(
            validate(&signed, &state),
            Err(RejectionReason::IntrinsicGasTooLow {
                limit: 21_000,
                required: 21_020
            })
        );
    }

    #[test]
    fn gas_limit_must_fit_in_a_block() {
        let state = funded(1, ether(1));
        let mut tx = eip1559_transfer(0, to(), U256::ZERO);
        tx.gas_limit = 30_000_001;
        let signed = tx.sign(&test_key(1)).unwrap();
        assert_eq!(
            validate(&signed, &state),
            Err(RejectionReason::GasLimitExceedsBlock {
                limit: 30_000_001,
                max: 30_000_000
            })
        );

        let mut tx = eip1559_transfer(0, to(), U256::ZERO);
        tx.gas_limit = 30_000_000;
        assert!(validate(&tx.sign(&test_key(1)).unwrap(), &state).is_ok());
    }

    #[test]
    fn zero_chain_id_is_rejected_even_on_a_zero_network() {
        let state = funded(1, ether(1));
        let mut tx = eip155_transfer(0, to(), U256::ZERO);
        if let TxVariant::Eip155 { chain_id, .. } = &mut tx.variant {
            *chain_id = 0;
        }
        let signed = tx.sign(&test_key(1)).unwrap();
        assert_eq!(validate(&signed, &state), Err(RejectionReason::ZeroChainId));

        let zero_network = ValidationContext { chain_id: 0, ..ctx() };
        assert_eq!(
            TransactionValidator.validate_tx(&signed, &zero_network, &*state),
            Err(RejectionReason::ZeroChainId)
        );
    }

    #[test]
    fn tip_may_not_exceed_fee_cap() {
        let state = funded(1, ether(1));
        let mut tx = eip1559_transfer(0, to(), U256::ZERO);
        if let TxVariant::Eip1559 {
            max_priority_fee_per_gas,
            max_fee_per_gas,
            ..
        } = &mut tx.variant
        {
            *max_priority_fee_per_gas = *max_fee_per_gas + U256::from(1u64);
        }
        let signed = tx.sign(&test_key(1)).unwrap();
        assert!(matches!(
            validate(&signed, &state),
            Err(RejectionReason::TipAboveFeeCap { .. })
        ));
    }

    #[test]
    fn creation_requires_code() {
        let state = funded(1, ether(1));
        let mut tx = eip1559_transfer(0, None, U256::ZERO);
        tx.gas_limit = 100_000;
        let signed = tx.sign(&test_key(1)).unwrap();
        assert_eq!(validate(&signed, &state), Err(RejectionReason::EmptyCreationCode));
    }

    #[test]
    fn fee_cap_must_reach_base_fee() {
        let state = funded(1, ether(1));
        let mut tx = legacy_transfer(0, to(), U256::ZERO);
        tx.variant = TxVariant::Legacy {
            gas_price: U256::from(1u64),
        };
        let signed = tx.sign(&test_key(1)).unwrap();
        assert!(matches!(
            validate(&signed, &state),
            Err(RejectionReason::FeeCapBelowBaseFee { .. })
        ));
    }

    #[test]
    fn nonce_must_match_exactly() {
        let mut account = Account::new(ether(1));
        account.increment_nonce();
        let state = StateSnapshot::genesis([(test_key(1).address(), account)]);

        let low = legacy_transfer(0, to(), U256::ZERO).sign(&test_key(1)).unwrap();
        assert_eq!(
            validate(&low, &state),
            Err(RejectionReason::NonceTooLow {
                expected: 1,
                actual: 0
            })
        );

        let high = legacy_transfer(2, to(), U256::ZERO).sign(&test_key(1)).unwrap();
        assert_eq!(
            validate(&high, &state),
            Err(RejectionReason::NonceTooHigh {
                expected: 1,
                actual: 2
            })
        );
    }

    #[test]
    fn zero_balance_is_insufficient() {
        let state = StateSnapshot::genesis([]);
        let tx = eip155_transfer(0, to(), U256::ZERO).sign(&test_key(3)).unwrap();
        assert!(matches!(
            validate(&tx, &state),
            Err(RejectionReason::InsufficientFunds { balance, .. }) if balance == U256::ZERO
        ));
    }

    #[test]
    fn cost_overflow_is_insufficient() {
        let state = funded(1, U256::MAX);
        let tx = legacy_transfer(0, to(), U256::MAX).sign(&test_key(1)).unwrap();
        assert_eq!(
            validate(&tx, &state),
            Err(RejectionReason::InsufficientFunds {
                balance: U256::MAX,
                cost: U256::MAX
            })
        );
    }
}
