//! Ledger owner: admission, block forging and state export.
//!
//! Forging is serialized behind a single lock. Admission and queries only read
//! immutable head snapshots and proceed while a block is being forged.

use crate::config::NodeConfig;
use crate::core::account::Account;
use crate::core::admission::{self, SubmitError};
use crate::core::block::{Block, BlockRef, Header};
use crate::core::codec::MalformedTransaction;
use crate::core::gas;
use crate::core::receipt::Receipt;
use crate::core::transaction::Transaction;
use crate::core::validator::{RejectionReason, TransactionValidator, ValidationContext, Validator};
use crate::storage::StorageError;
use crate::storage::dump::{self, DumpError, DumpSummary};
use crate::storage::main_storage::ChainStore;
use crate::storage::state::{AccountStateView, StateOverlay, StateSnapshot};
use crate::storage::txpool::TxPool;
use crate::types::U256;
use crate::types::address::Address;
use crate::types::hash::Hash;
use crate::types::rlp::RlpList;
use crate::{debug, error, info, warn};
use evm_ledger_derive::Error;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Error)]
pub enum ForgeError {
    #[error("forced transaction {index} is malformed: {source}")]
    Malformed {
        index: usize,
        #[source]
        source: MalformedTransaction,
    },

    #[error("forced transaction {id} rejected: {reason}")]
    ForcedRejected { id: Hash, reason: RejectionReason },

    #[error("forced transaction {id} could not be applied: {source}")]
    ForcedNotApplied {
        id: Hash,
        #[source]
        source: ApplyError,
    },

    #[error("{0}")]
    Storage(#[from] StorageError),
}

/// Why a validated transaction could not be applied to the block state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    #[error("gas limit {gas_limit} exceeds remaining block gas {remaining}")]
    BlockGasExceeded { gas_limit: u64, remaining: u64 },

    #[error("sender cannot cover {0}")]
    InsufficientFunds(U256),

    #[error("contract address {0} is already in use")]
    AddressCollision(Address),

    #[error("balance overflow at {0}")]
    BalanceOverflow(Address),
}

/// Address of the contract deployed by `sender` at `nonce`.
///
/// The low 20 bytes of `keccak256(rlp([sender, nonce]))`.
pub fn contract_address(sender: &Address, nonce: u64) -> Address {
    let mut list = RlpList::new();
    list.push(sender).push(&nonce);
    Address::from_hash(&Hash::digest(list.finish()))
}

/// Transaction applied to a block under construction.
struct Applied {
    tx: Arc<Transaction>,
    sender: Address,
    contract_address: Option<Address>,
    gas_used: u64,
    cumulative_gas_used: u64,
    effective_gas_price: U256,
}

/// Accumulates the state and body of the next block.
struct BlockBuilder<'a> {
    overlay: StateOverlay<'a>,
    base_fee: U256,
    gas_limit: u64,
    gas_used: u64,
    coinbase: Option<Address>,
    applied: Vec<Applied>,
}

impl<'a> BlockBuilder<'a> {
    fn new(
        parent: &'a dyn AccountStateView,
        base_fee: U256,
        gas_limit: u64,
        coinbase: Option<Address>,
    ) -> Self {
        Self {
            overlay: StateOverlay::new(parent),
            base_fee,
            gas_limit,
            gas_used: 0,
            coinbase,
            applied: Vec::new(),
        }
    }

    /// Charges, transfers and deploys for `tx`, all or nothing.
    fn apply(&mut self, tx: Arc<Transaction>, sender: Address) -> Result<(), ApplyError> {
        let remaining = self.gas_limit - self.gas_used;
        if tx.gas_limit > remaining {
            return Err(ApplyError::BlockGasExceeded {
                gas_limit: tx.gas_limit,
                remaining,
            });
        }

        let gas_used = tx.intrinsic_gas();
        let price = tx.effective_gas_price(self.base_fee);
        let fee = price.saturating_mul(U256::from(gas_used));
        let tip = tx
            .priority_fee_per_gas(self.base_fee)
            .saturating_mul(U256::from(gas_used));

        let mut staged: BTreeMap<Address, Account> = BTreeMap::new();
        let overlay = &self.overlay;
        let load = |staged: &BTreeMap<Address, Account>, address: &Address| {
            staged
                .get(address)
                .cloned()
                .or_else(|| overlay.account(address))
        };

        let mut from = load(&staged, &sender).unwrap_or_default();
        let total = tx.value.saturating_add(fee);
        if !from.debit(total) {
            return Err(ApplyError::InsufficientFunds(total));
        }
        from.increment_nonce();
        staged.insert(sender, from);

        let contract = match tx.to {
            Some(to) => {
                let mut recipient = load(&staged, &to).unwrap_or_default();
                if !recipient.credit(tx.value) {
                    return Err(ApplyError::BalanceOverflow(to));
                }
                staged.insert(to, recipient);
                None
            }
            None => {
                let address = contract_address(&sender, tx.nonce);
                let existing = load(&staged, &address);
                if existing.as_ref().is_some_and(Account::is_occupied) {
                    return Err(ApplyError::AddressCollision(address));
                }
                let balance = existing
                    .map_or(U256::ZERO, |a| a.balance())
                    .checked_add(tx.value)
                    .ok_or(ApplyError::BalanceOverflow(address))?;
                staged.insert(address, Account::contract(balance, tx.data.clone()));
                Some(address)
            }
        };

        if let Some(coinbase) = self.coinbase
            && !tip.is_zero()
        {
            let mut miner = load(&staged, &coinbase).unwrap_or_default();
            if !miner.credit(tip) {
                return Err(ApplyError::BalanceOverflow(coinbase));
            }
            staged.insert(coinbase, miner);
        }

        self.overlay.commit(staged);
        self.gas_used += gas_used;
        debug!(
            "applied transaction: id={} sender={sender} gas_used={gas_used} price={price}",
            tx.id()
        );
        self.applied.push(Applied {
            tx,
            sender,
            contract_address: contract,
            gas_used,
            cumulative_gas_used: self.gas_used,
            effective_gas_price: price,
        });
        Ok(())
    }
}

/// The ledger: chain store, transaction pool and validation rules.
///
/// Generic over the validator so tests and embedders can swap the rules.
pub struct Blockchain<V: Validator = TransactionValidator> {
    config: NodeConfig,
    store: ChainStore,
    pool: TxPool,
    validator: V,
    /// Serializes forging; the only writer of the head.
    forge_lock: Mutex<()>,
}

impl Blockchain<TransactionValidator> {
    /// Creates a chain whose genesis allocates `config.alloc`.
    pub fn new(config: NodeConfig) -> Result<Self, StorageError> {
        Self::with_validator(config, TransactionValidator)
    }
}

impl<V: Validator> Blockchain<V> {
    pub fn with_validator(config: NodeConfig, validator: V) -> Result<Self, StorageError> {
        let store = ChainStore::with_genesis(
            &config.alloc,
            config.initial_base_fee,
            config.gas.block_gas_limit,
        )?;
        let genesis = store.head_block();
        info!(
            "initialized chain: chain_id={} genesis={} state_root={} accounts={}",
            config.chain_id,
            genesis.hash(),
            genesis.header.state_root,
            config.alloc.len()
        );

        Ok(Self {
            pool: TxPool::new(Some(config.pool_capacity)),
            config,
            store,
            validator,
            forge_lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    pub fn store(&self) -> &ChainStore {
        &self.store
    }

    pub fn pool(&self) -> &TxPool {
        &self.pool
    }

    /// Base fee of the next block to be forged.
    pub fn next_base_fee(&self) -> U256 {
        let head = self.store.head_block();
        gas::next_base_fee(&self.config.gas, head.header.base_fee, head.header.gas_used)
    }

    fn validation_context(&self) -> ValidationContext {
        ValidationContext {
            chain_id: self.config.chain_id,
            base_fee: self.next_base_fee(),
            block_gas_limit: self.config.gas.block_gas_limit,
        }
    }

    /// Validates `tx` against the head state and adds it to the pool.
    pub fn submit(&self, tx: Transaction) -> Result<Hash, SubmitError> {
        let head = self.store.head_state();
        admission::admit(
            &self.validator,
            &self.pool,
            &*head,
            &self.validation_context(),
            tx,
        )
    }

    /// Forges the next block from the pool, applying `forced` payloads first.
    pub fn forge<P: AsRef<[u8]>>(&self, forced: &[P]) -> Result<Arc<Block>, ForgeError> {
        self.forge_block(self.pool.pending(), forced)
    }

    /// Forges the next block from raw candidate payloads instead of the pool.
    ///
    /// Candidates that do not decode are skipped like any other invalid candidate.
    pub fn forge_payloads<C: AsRef<[u8]>, P: AsRef<[u8]>>(
        &self,
        candidates: &[C],
        forced: &[P],
    ) -> Result<Arc<Block>, ForgeError> {
        let candidates = candidates
            .iter()
            .enumerate()
            .filter_map(|(index, payload)| match Transaction::from_bytes(payload.as_ref()) {
                Ok(tx) => Some(Arc::new(tx)),
                Err(e) => {
                    warn!("skipping malformed candidate {index}: {e}");
                    None
                }
            })
            .collect();
        self.forge_block(candidates, forced)
    }

    /// Forges the next block from `forced` payloads followed by `candidates`.
    ///
    /// A forced payload that does not decode, or that fails validation for any
    /// reason other than a missing signature, aborts the forge. Unsigned forced
    /// transactions are left out. Candidates failing validation are skipped and
    /// stay pooled until pruned.
    pub fn forge_block<P: AsRef<[u8]>>(
        &self,
        candidates: Vec<Arc<Transaction>>,
        forced: &[P],
    ) -> Result<Arc<Block>, ForgeError> {
        let forced = forced
            .iter()
            .enumerate()
            .map(|(index, payload)| {
                Transaction::from_bytes(payload.as_ref())
                    .map(Arc::new)
                    .map_err(|source| ForgeError::Malformed { index, source })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let _guard = self
            .forge_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let parent = self.store.head();
        let base_fee = gas::next_base_fee(
            &self.config.gas,
            parent.block.header.base_fee,
            parent.block.header.gas_used,
        );
        let ctx = ValidationContext {
            chain_id: self.config.chain_id,
            base_fee,
            block_gas_limit: self.config.gas.block_gas_limit,
        };
        let mut builder = BlockBuilder::new(
            &*parent.state,
            base_fee,
            self.config.gas.block_gas_limit,
            self.config.coinbase,
        );

        for tx in forced {
            let id = tx.id();
            match self.validator.validate_tx(&tx, &ctx, &builder.overlay) {
                Ok(sender) => builder
                    .apply(tx, sender)
                    .map_err(|source| ForgeError::ForcedNotApplied { id, source })?,
                Err(RejectionReason::NotSigned) => {
                    warn!("excluding unsigned forced transaction: id={id}");
                }
                Err(reason) => {
                    warn!("forced transaction rejected, aborting forge: id={id} reason={reason}");
                    return Err(ForgeError::ForcedRejected { id, reason });
                }
            }
        }

        for tx in candidates {
            let id = tx.id();
            let sender = match self.validator.validate_tx(&tx, &ctx, &builder.overlay) {
                Ok(sender) => sender,
                Err(reason) => {
                    warn!("skipping pool transaction: id={id} reason={reason}");
                    continue;
                }
            };
            if let Err(e) = builder.apply(tx, sender) {
                warn!("skipping pool transaction: id={id} reason={e}");
            }
        }

        let BlockBuilder {
            overlay,
            gas_used,
            applied,
            ..
        } = builder;
        let (changes, created) = overlay.into_changes();
        let state = StateSnapshot::child(&parent.state, changes.clone(), created)?;
        let state_root = self.store.apply_batch(&*parent.state, &changes)?;

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let header = Header {
            number: parent.block.number() + 1,
            parent_hash: parent.block.hash(),
            timestamp: now.max(parent.block.header.timestamp),
            coinbase: self.config.coinbase,
            transactions_root: Hash::zero(),
            state_root,
            base_fee,
            gas_used,
            gas_limit: self.config.gas.block_gas_limit,
        };
        let block = Block::new(header, applied.iter().map(|a| a.tx.clone()).collect());
        let block_hash = block.hash();

        let receipts: Vec<Receipt> = applied
            .iter()
            .enumerate()
            .map(|(index, a)| Receipt {
                transaction_hash: a.tx.id(),
                block_hash,
                block_number: block.number(),
                transaction_index: index,
                from: a.sender,
                to: a.tx.to,
                contract_address: a.contract_address,
                gas_used: a.gas_used,
                cumulative_gas_used: a.cumulative_gas_used,
                effective_gas_price: a.effective_gas_price,
                success: true,
            })
            .collect();
        let included: Vec<Hash> = receipts.iter().map(|r| r.transaction_hash).collect();

        if let Err(e) = self
            .store
            .append_block(block.clone(), state.clone(), receipts)
        {
            if let Err(revert) = self.store.revert_batch(&*parent.state, changes.keys()) {
                error!("failed to restore state tree: {revert}");
            }
            return Err(e.into());
        }
        self.pool.remove_batch(&included);
        self.pool.prune(&*state);

        info!(
            "forged block: number={} hash={} transactions={} gas_used={} base_fee={} state_root={}",
            block.number(),
            block_hash,
            block.transactions.len(),
            gas_used,
            base_fee,
            state_root
        );
        Ok(block)
    }

    /// Writes the account state as of `block` to `path` as JSON.
    ///
    /// Refused with [`DumpError::ActionNotAllowed`] unless dumps are enabled
    /// in the node config.
    pub fn dump(&self, block: &BlockRef, path: &Path) -> Result<DumpSummary, DumpError> {
        dump::dump_to_file(&self.store, block, self.config.dump_enabled, path)
    }
}
