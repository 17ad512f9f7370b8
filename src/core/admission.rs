//! Admission of submitted transactions into the pool.
//!
//! Submissions only read the head state, so any number of threads may admit
//! concurrently while a block is being forged.

use crate::core::account::Account;
use crate::core::transaction::Transaction;
use crate::core::validator::{RejectionReason, ValidationContext, Validator};
use crate::storage::state::AccountStateView;
use crate::storage::txpool::{PoolError, TxPool};
use crate::types::address::Address;
use crate::types::hash::Hash;
use crate::{debug, warn};
use evm_ledger_derive::Error;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("transaction rejected: {0}")]
    Rejected(#[from] RejectionReason),

    #[error("sender {sender} already has a pending transaction with nonce {nonce}")]
    NonceConflict { sender: Address, nonce: u64 },

    #[error("transaction pool is full")]
    PoolFull,
}

impl From<PoolError> for SubmitError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::NonceConflict { sender, nonce } => SubmitError::NonceConflict { sender, nonce },
            PoolError::PoolFull => SubmitError::PoolFull,
        }
    }
}

/// Head state with each sender's nonce advanced past its pooled transactions.
///
/// Lets a sender queue consecutive nonces while validation stays strict.
pub struct PendingView<'a> {
    head: &'a dyn AccountStateView,
    pool: &'a TxPool,
}

impl<'a> PendingView<'a> {
    pub fn new(head: &'a dyn AccountStateView, pool: &'a TxPool) -> Self {
        Self { head, pool }
    }
}

impl AccountStateView for PendingView<'_> {
    fn account(&self, address: &Address) -> Option<Account> {
        self.head.account(address)
    }

    fn nonce(&self, address: &Address) -> u64 {
        self.pool.pending_nonce(address, self.head.nonce(address))
    }
}

/// Validates `tx` against the pending view of `head` and pools it.
///
/// Resubmitting a pooled transaction returns its id again without touching
/// the pool.
pub fn admit<V: Validator + ?Sized>(
    validator: &V,
    pool: &TxPool,
    head: &dyn AccountStateView,
    ctx: &ValidationContext,
    tx: Transaction,
) -> Result<Hash, SubmitError> {
    let id = tx.id();
    if pool.contains(&id) {
        debug!("transaction already pooled: id={id}");
        return Ok(id);
    }

    let view = PendingView::new(head, pool);
    let sender = match validator.validate_tx(&tx, ctx, &view) {
        Ok(sender) => sender,
        Err(reason) => {
            if let RejectionReason::NonceTooLow { actual, .. } = reason
                && let Ok(sender) = tx.sender()
                && pool.has_nonce(&sender, actual)
            {
                warn!("transaction rejected: id={id} sender={sender} nonce={actual} already pending");
                return Err(SubmitError::NonceConflict {
                    sender,
                    nonce: actual,
                });
            }
            warn!("transaction rejected: id={id} reason={reason}");
            return Err(reason.into());
        }
    };

    let id = pool.insert(sender, Arc::new(tx)).inspect_err(|e| {
        warn!("transaction not pooled: id={id} reason={e}");
    })?;
    debug!("transaction admitted: id={id} sender={sender}");
    Ok(id)
}
