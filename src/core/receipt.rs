//! Transaction inclusion receipts.
//!
//! Each transaction applied by the forger yields a [`Receipt`] recording where
//! it landed and what it paid. Receipts are stored with their block and looked
//! up by transaction id.

use crate::types::U256;
use crate::types::address::Address;
use crate::types::hash::Hash;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Receipt {
    /// Id of the transaction that produced this receipt.
    pub transaction_hash: Hash,
    pub block_hash: Hash,
    pub block_number: u64,
    /// Position within the block body.
    pub transaction_index: usize,
    pub from: Address,
    pub to: Option<Address>,
    /// Address of the account created by a deployment.
    pub contract_address: Option<Address>,
    /// Gas charged for this transaction.
    pub gas_used: u64,
    /// Running total of gas consumed by all transactions up to and including this one.
    pub cumulative_gas_used: u64,
    /// Price per gas actually paid.
    pub effective_gas_price: U256,
    /// Whether the transaction executed successfully.
    pub success: bool,
}

impl Receipt {
    /// Total fee paid by the sender.
    pub fn fee(&self) -> U256 {
        self.effective_gas_price
            .saturating_mul(U256::from(self.gas_used))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fee_is_gas_times_price() {
        let receipt = Receipt {
            transaction_hash: Hash::digest(b"tx1"),
            block_hash: Hash::digest(b"block"),
            block_number: 1,
            transaction_index: 0,
            from: Address([1; 20]),
            to: Some(Address([2; 20])),
            contract_address: None,
            gas_used: 21_000,
            cumulative_gas_used: 21_000,
            effective_gas_price: U256::from(2u64),
            success: true,
        };
        assert_eq!(receipt.fee(), U256::from(42_000u64));
    }
}
