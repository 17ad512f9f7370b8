//! Intrinsic gas and the EIP-1559 base fee schedule.

use crate::types::U256;

/// Base cost of any transaction.
pub const TX_GAS: u64 = 21_000;
/// Extra cost of a contract creation.
pub const TX_CREATE_GAS: u64 = 32_000;
/// Cost per zero byte of call data.
pub const TX_DATA_ZERO_GAS: u64 = 4;
/// Cost per non-zero byte of call data.
pub const TX_DATA_NON_ZERO_GAS: u64 = 16;

/// Default genesis base fee: 1 gwei.
pub const INITIAL_BASE_FEE: u64 = 1_000_000_000;

/// Fee market parameters of the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasFeeParams {
    pub block_gas_limit: u64,
    pub elasticity_multiplier: u64,
    pub base_fee_change_denominator: u64,
    pub minimum_base_fee: U256,
}

impl Default for GasFeeParams {
    fn default() -> Self {
        Self {
            block_gas_limit: 20_000_000,
            elasticity_multiplier: 2,
            base_fee_change_denominator: 8,
            minimum_base_fee: U256::ZERO,
        }
    }
}

impl GasFeeParams {
    /// Gas usage at which the base fee stays unchanged.
    pub fn gas_target(&self) -> u64 {
        self.block_gas_limit / self.elasticity_multiplier.max(1)
    }
}

/// Computes the base cost for a transaction before execution.
///
/// The intrinsic cost is a fixed 21,000 gas, plus 32,000 for contract creation,
/// plus 4 gas per zero and 16 gas per non-zero data byte.
pub fn intrinsic_gas(is_create: bool, data: &[u8]) -> u64 {
    let mut gas = TX_GAS + (is_create as u64 * TX_CREATE_GAS);
    for b in data {
        let cost = if *b == 0 {
            TX_DATA_ZERO_GAS
        } else {
            TX_DATA_NON_ZERO_GAS
        };
        gas = gas.saturating_add(cost);
    }
    gas
}

/// Base fee of the block following a parent with `parent_base_fee` that used
/// `parent_gas_used`.
///
/// Above the target the fee rises by at least 1 wei; below it falls
/// proportionally. The result never drops under `minimum_base_fee`.
pub fn next_base_fee(params: &GasFeeParams, parent_base_fee: U256, parent_gas_used: u64) -> U256 {
    let target = params.gas_target();
    let denominator = U256::from(params.base_fee_change_denominator.max(1));
    if target == 0 {
        return parent_base_fee.max(params.minimum_base_fee);
    }
    let target_u = U256::from(target);

    let next = if parent_gas_used == target {
        parent_base_fee
    } else if parent_gas_used > target {
        let delta = U256::from(parent_gas_used - target);
        let increase = (parent_base_fee.saturating_mul(delta) / target_u / denominator)
            .max(U256::from(1u64));
        parent_base_fee.saturating_add(increase)
    } else {
        let delta = U256::from(target - parent_gas_used);
        let decrease = parent_base_fee.saturating_mul(delta) / target_u / denominator;
        parent_base_fee.saturating_sub(decrease)
    };

    next.max(params.minimum_base_fee)
}
