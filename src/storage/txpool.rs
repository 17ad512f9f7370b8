//! Pool of admitted transactions awaiting block inclusion.
//!
//! Transactions are stored per sender, ordered by nonce, and stamped with an
//! arrival sequence so the forger can replay them in submission order. The
//! pool itself performs no validation; the admission pipeline decides what
//! gets in.

use crate::core::transaction::Transaction;
use crate::debug;
use crate::storage::state::AccountStateView;
use crate::types::address::Address;
use crate::types::hash::Hash;
use dashmap::DashMap;
use evm_ledger_derive::Error;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Default transaction pool capacity.
pub const TXPOOL_CAPACITY: usize = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    /// Sender already has a different pending transaction at this nonce.
    #[error("sender {sender} already has a pending transaction with nonce {nonce}")]
    NonceConflict { sender: Address, nonce: u64 },

    #[error("transaction pool is full")]
    PoolFull,
}

struct PooledTx {
    tx: Arc<Transaction>,
    /// Arrival sequence number.
    seq: u64,
}

/// Thread-safe pool of pending transactions.
pub struct TxPool {
    /// Maximum number of transactions the pool will accept.
    capacity: usize,
    /// Current number of transactions; the lock also serializes structural changes.
    length: Mutex<usize>,
    /// Per-sender queues ordered by nonce.
    accounts: DashMap<Address, BTreeMap<u64, PooledTx>>,
    /// Maps transaction id to (sender, nonce).
    hash_index: DashMap<Hash, (Address, u64)>,
    /// Next arrival sequence number.
    sequence: AtomicU64,
}

impl TxPool {
    /// Creates a pool holding at most `capacity` transactions.
    ///
    /// Uses `TXPOOL_CAPACITY` if `None` is provided.
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            capacity: capacity.unwrap_or(TXPOOL_CAPACITY).max(1),
            length: Mutex::new(0),
            accounts: DashMap::new(),
            hash_index: DashMap::new(),
            sequence: AtomicU64::new(0),
        }
    }

    fn lock_length(&self) -> MutexGuard<'_, usize> {
        self.length.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn contains(&self, id: &Hash) -> bool {
        self.hash_index.contains_key(id)
    }

    /// Returns the pooled transaction with the given id.
    pub fn get(&self, id: &Hash) -> Option<Arc<Transaction>> {
        let (sender, nonce) = *self.hash_index.get(id)?;
        let queue = self.accounts.get(&sender)?;
        queue.get(&nonce).map(|entry| Arc::clone(&entry.tx))
    }

    /// Returns `true` if `sender` has a pending transaction at `nonce`.
    pub fn has_nonce(&self, sender: &Address, nonce: u64) -> bool {
        self.accounts
            .get(sender)
            .is_some_and(|queue| queue.contains_key(&nonce))
    }

    /// First nonce at or after `state_nonce` with no pending transaction from `sender`.
    pub fn pending_nonce(&self, sender: &Address, state_nonce: u64) -> u64 {
        let Some(queue) = self.accounts.get(sender) else {
            return state_nonce;
        };
        let mut next = state_nonce;
        for nonce in queue.range(state_nonce..).map(|(n, _)| *n) {
            if nonce != next {
                break;
            }
            next += 1;
        }
        next
    }

    /// Adds a transaction signed by `sender` and returns its id.
    ///
    /// Inserting a transaction that is already pooled is a no-op.
    pub fn insert(&self, sender: Address, tx: Arc<Transaction>) -> Result<Hash, PoolError> {
        let id = tx.id();
        let nonce = tx.nonce;
        let mut length = self.lock_length();

        if self.hash_index.contains_key(&id) {
            return Ok(id);
        }
        if self.has_nonce(&sender, nonce) {
            return Err(PoolError::NonceConflict { sender, nonce });
        }
        if *length >= self.capacity {
            return Err(PoolError::PoolFull);
        }

        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        self.accounts
            .entry(sender)
            .or_default()
            .insert(nonce, PooledTx { tx, seq });
        self.hash_index.insert(id, (sender, nonce));
        *length += 1;

        debug!("pooled transaction: id={id} sender={sender} nonce={nonce}");
        Ok(id)
    }

    /// Total number of pooled transactions.
    pub fn length(&self) -> usize {
        *self.lock_length()
    }

    /// Pooled transactions in arrival order.
    pub fn pending(&self) -> Vec<Arc<Transaction>> {
        self.ordered()
            .into_iter()
            .map(|(_, tx)| tx)
            .collect()
    }

    /// Ids of pooled transactions in arrival order.
    pub fn ids(&self) -> Vec<Hash> {
        self.ordered()
            .into_iter()
            .map(|(_, tx)| tx.id())
            .collect()
    }

    fn ordered(&self) -> Vec<(u64, Arc<Transaction>)> {
        let mut entries: Vec<(u64, Arc<Transaction>)> = self
            .accounts
            .iter()
            .flat_map(|queue| {
                queue
                    .values()
                    .map(|entry| (entry.seq, Arc::clone(&entry.tx)))
                    .collect::<Vec<_>>()
            })
            .collect();
        entries.sort_unstable_by_key(|(seq, _)| *seq);
        entries
    }

    /// Removes the transactions with the given ids; unknown ids are ignored.
    pub fn remove_batch(&self, ids: &[Hash]) {
        let mut length = self.lock_length();

        for id in ids {
            let Some((_, (sender, nonce))) = self.hash_index.remove(id) else {
                continue;
            };
            let Some(mut queue) = self.accounts.get_mut(&sender) else {
                continue;
            };
            if queue.remove(&nonce).is_some() {
                *length -= 1;
            }
            if queue.is_empty() {
                drop(queue);
                self.accounts.remove(&sender);
            }
        }
    }

    /// Drops every transaction whose nonce is already used in `state`.
    ///
    /// Returns the number of transactions removed.
    pub fn prune(&self, state: &dyn AccountStateView) -> usize {
        let mut length = self.lock_length();
        let mut removed = 0;

        self.accounts.retain(|sender, queue| {
            let state_nonce = state.nonce(sender);
            let live = queue.split_off(&state_nonce);
            for entry in queue.values() {
                self.hash_index.remove(&entry.tx.id());
                removed += 1;
            }
            *queue = live;
            !queue.is_empty()
        });

        *length -= removed;
        if removed > 0 {
            debug!("pruned {removed} stale pool transactions");
        }
        removed
    }
}
