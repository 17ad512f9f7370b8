//! Versioned account state.
//!
//! Every block owns an immutable [`StateSnapshot`]: the accounts it changed,
//! layered over its parent's snapshot through an `Arc`. Readers of an old block
//! keep that block's layers alive and never observe later writes, so exports
//! and queries run without locking the head.
//!
//! [`StateOverlay`] buffers the writes of a block being forged and becomes the
//! next layer once the block commits.

use crate::core::account::Account;
use crate::storage::StorageError;
use crate::types::U256;
use crate::types::address::Address;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Layers beyond this depth are squashed into a single flat layer.
pub const MAX_LAYER_DEPTH: usize = 128;

/// Read access to account state.
///
/// Admission reads the head state from many threads at once.
pub trait AccountStateView: Send + Sync {
    /// Returns the account at `address`, or `None` if it was never created.
    fn account(&self, address: &Address) -> Option<Account>;

    /// Nonce of `address`; zero for unknown accounts.
    fn nonce(&self, address: &Address) -> u64 {
        self.account(address).map_or(0, |a| a.nonce())
    }

    /// Balance of `address`; zero for unknown accounts.
    fn balance(&self, address: &Address) -> U256 {
        self.account(address).map_or(U256::ZERO, |a| a.balance())
    }
}

/// Immutable account state as of one block.
#[derive(Debug, Default)]
pub struct StateSnapshot {
    parent: Option<Arc<StateSnapshot>>,
    /// Accounts written in this layer.
    changes: BTreeMap<Address, Account>,
    /// Addresses first created in this layer, in creation order.
    created: Vec<Address>,
    /// Number of layers below this one.
    depth: usize,
    /// Accounts visible from this layer.
    len: usize,
}

impl StateSnapshot {
    /// Root layer holding `accounts` in the given order.
    ///
    /// Later duplicates overwrite earlier ones without changing their position.
    pub fn genesis(accounts: impl IntoIterator<Item = (Address, Account)>) -> Arc<Self> {
        let mut changes = BTreeMap::new();
        let mut created = Vec::new();
        for (address, account) in accounts {
            if changes.insert(address, account).is_none() {
                created.push(address);
            }
        }
        Arc::new(Self {
            parent: None,
            len: created.len(),
            changes,
            created,
            depth: 0,
        })
    }

    /// Stacks a new layer on `parent`.
    ///
    /// `created` must list exactly the addresses of `changes` unknown to `parent`.
    pub fn child(
        parent: &Arc<StateSnapshot>,
        changes: BTreeMap<Address, Account>,
        created: Vec<Address>,
    ) -> Result<Arc<Self>, StorageError> {
        let layer = Self {
            parent: Some(Arc::clone(parent)),
            len: parent.len + created.len(),
            depth: parent.depth + 1,
            changes,
            created,
        };
        if layer.depth > MAX_LAYER_DEPTH {
            return layer.flatten().map(Arc::new);
        }
        Ok(Arc::new(layer))
    }

    /// Materializes every visible account into a single root layer.
    fn flatten(&self) -> Result<Self, StorageError> {
        let mut changes = BTreeMap::new();
        let mut created = Vec::with_capacity(self.len);
        for entry in AccountCursor::over(self) {
            let (address, account) = entry?;
            changes.insert(address, account);
            created.push(address);
        }
        Ok(Self {
            parent: None,
            len: created.len(),
            changes,
            created,
            depth: 0,
        })
    }

    /// Looks `address` up through the layer chain.
    pub fn get(&self, address: &Address) -> Option<&Account> {
        let mut layer = self;
        loop {
            if let Some(account) = layer.changes.get(address) {
                return Some(account);
            }
            match &layer.parent {
                Some(parent) => layer = parent,
                None => return None,
            }
        }
    }

    /// Number of accounts visible from this snapshot.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Accounts written by this layer alone.
    pub fn changes(&self) -> &BTreeMap<Address, Account> {
        &self.changes
    }

    /// Lazy cursor over every visible account, oldest creation first.
    pub fn accounts(&self) -> AccountCursor<'_> {
        AccountCursor::over(self)
    }
}

impl AccountStateView for StateSnapshot {
    fn account(&self, address: &Address) -> Option<Account> {
        self.get(address).cloned()
    }
}

/// Resumable position of an [`AccountCursor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CursorPosition {
    layer: usize,
    index: usize,
}

/// Lazy walk over the accounts of a snapshot in creation order.
///
/// Each step resolves one address against the target snapshot, so the walk
/// holds no copy of the state. Its [`position`](AccountCursor::position) can be
/// saved and handed to [`seek`](AccountCursor::seek) to resume later.
pub struct AccountCursor<'a> {
    target: &'a StateSnapshot,
    /// Layer chain, root first.
    layers: Vec<&'a StateSnapshot>,
    position: CursorPosition,
}

impl<'a> AccountCursor<'a> {
    fn over(target: &'a StateSnapshot) -> Self {
        let mut layers = Vec::with_capacity(target.depth + 1);
        let mut layer = Some(target);
        while let Some(current) = layer {
            layers.push(current);
            layer = current.parent.as_deref();
        }
        layers.reverse();

        Self {
            target,
            layers,
            position: CursorPosition::default(),
        }
    }

    pub fn position(&self) -> CursorPosition {
        self.position
    }

    pub fn seek(&mut self, position: CursorPosition) {
        self.position = position;
    }

    pub fn rewind(&mut self) {
        self.position = CursorPosition::default();
    }
}

impl Iterator for AccountCursor<'_> {
    type Item = Result<(Address, Account), StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let layer = self.layers.get(self.position.layer)?;
            match layer.created.get(self.position.index) {
                Some(address) => {
                    self.position.index += 1;
                    let entry = self
                        .target
                        .get(address)
                        .cloned()
                        .map(|account| (*address, account))
                        .ok_or(StorageError::MissingAccount(*address));
                    return Some(entry);
                }
                None => {
                    self.position.layer += 1;
                    self.position.index = 0;
                }
            }
        }
    }
}

/// Write buffer on top of a base state.
///
/// Reads fall through to the base for untouched accounts. Writes are applied
/// in batches so a transaction's debit, credit and nonce bump land together.
pub struct StateOverlay<'a> {
    base: &'a dyn AccountStateView,
    writes: BTreeMap<Address, Account>,
    created: Vec<Address>,
}

impl<'a> StateOverlay<'a> {
    pub fn new(base: &'a dyn AccountStateView) -> Self {
        Self {
            base,
            writes: BTreeMap::new(),
            created: Vec::new(),
        }
    }

    /// Applies a batch of account writes at once.
    pub fn commit(&mut self, accounts: impl IntoIterator<Item = (Address, Account)>) {
        for (address, account) in accounts {
            if !self.writes.contains_key(&address) && self.base.account(&address).is_none() {
                self.created.push(address);
            }
            self.writes.insert(address, account);
        }
    }

    /// Number of accounts written so far.
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Consumes the overlay and returns the writes plus the newly created addresses.
    pub fn into_changes(self) -> (BTreeMap<Address, Account>, Vec<Address>) {
        (self.writes, self.created)
    }
}

impl AccountStateView for StateOverlay<'_> {
    fn account(&self, address: &Address) -> Option<Account> {
        if let Some(account) = self.writes.get(address) {
            return Some(account.clone());
        }
        self.base.account(address)
    }
}
