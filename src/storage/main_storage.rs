use crate::core::account::Account;
use crate::core::block::{Block, BlockRef, Header};
use crate::core::receipt::Receipt;
use crate::core::transaction::Transaction;
use crate::storage::StorageError;
use crate::storage::state::{AccountStateView, StateSnapshot};
use crate::types::U256;
use crate::types::address::Address;
use crate::types::hash::Hash;
use dashmap::DashMap;
use sparse_merkle_tree::blake2b::Blake2bHasher;
use sparse_merkle_tree::default_store::DefaultStore;
use sparse_merkle_tree::traits::Value;
use sparse_merkle_tree::{H256, SparseMerkleTree};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

type StateTree = SparseMerkleTree<Blake2bHasher, SmtValue, DefaultStore<SmtValue>>;

/// Account leaf stored in the sparse Merkle tree.
#[derive(Default, Clone)]
struct SmtValue(Vec<u8>);

impl Value for SmtValue {
    fn to_h256(&self) -> H256 {
        if self.0.is_empty() {
            return H256::zero();
        }
        H256::from(Hash::digest(&self.0).0)
    }

    fn zero() -> Self {
        Self(Vec::new())
    }
}

fn account_key(address: &Address) -> H256 {
    H256::from(Hash::digest(address.as_slice()).0)
}

fn h256_to_hash(h256: &H256) -> Hash {
    Hash::from_slice(h256.as_slice()).unwrap_or_else(Hash::zero)
}

/// Current chain head and the state it committed.
#[derive(Clone)]
pub struct Head {
    pub block: Arc<Block>,
    pub state: Arc<StateSnapshot>,
}

/// In-memory chain store.
///
/// Blocks, their state snapshots and receipts live in concurrent maps so
/// queries and dumps never wait on the forger. The sparse Merkle tree tracks
/// the head state only and is touched exclusively while forging.
pub struct ChainStore {
    /// Blocks indexed by hash.
    blocks: DashMap<Hash, Arc<Block>>,
    /// Canonical block hash by number.
    numbers: DashMap<u64, Hash>,
    /// Account state committed by each block, indexed by block hash.
    snapshots: DashMap<Hash, Arc<StateSnapshot>>,
    /// Receipts indexed by transaction id.
    receipts: DashMap<Hash, Receipt>,
    head: RwLock<Head>,
    /// Head state commitment.
    state: Mutex<StateTree>,
}

impl ChainStore {
    /// Creates a store whose genesis block allocates `alloc`.
    pub fn with_genesis(
        alloc: &[(Address, U256)],
        base_fee: U256,
        gas_limit: u64,
    ) -> Result<Self, StorageError> {
        let accounts: Vec<(Address, Account)> = alloc
            .iter()
            .map(|(address, balance)| (*address, Account::new(*balance)))
            .collect();
        let snapshot = StateSnapshot::genesis(accounts);

        let mut tree = StateTree::default();
        let mut state_root = Hash::zero();
        for entry in snapshot.accounts() {
            let (address, account) = entry?;
            state_root = update_tree(&mut tree, &address, &account)?;
        }

        let header = Header {
            number: 0,
            parent_hash: Hash::zero(),
            timestamp: 0,
            coinbase: None,
            transactions_root: Hash::zero(),
            state_root,
            base_fee,
            gas_used: 0,
            gas_limit,
        };
        let genesis = Block::new(header, vec![]);
        let hash = genesis.hash();

        let store = Self {
            blocks: DashMap::new(),
            numbers: DashMap::new(),
            snapshots: DashMap::new(),
            receipts: DashMap::new(),
            head: RwLock::new(Head {
                block: genesis.clone(),
                state: snapshot.clone(),
            }),
            state: Mutex::new(tree),
        };
        store.blocks.insert(hash, genesis);
        store.numbers.insert(0, hash);
        store.snapshots.insert(hash, snapshot);
        Ok(store)
    }

    /// Current head block and state, read together.
    pub fn head(&self) -> Head {
        self.head
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn head_block(&self) -> Arc<Block> {
        self.head().block
    }

    pub fn head_state(&self) -> Arc<StateSnapshot> {
        self.head().state
    }

    /// Number of the head block (genesis = 0).
    pub fn height(&self) -> u64 {
        self.head_block().number()
    }

    pub fn get_block(&self, hash: &Hash) -> Option<Arc<Block>> {
        self.blocks.get(hash).map(|b| Arc::clone(&b))
    }

    pub fn block_by_number(&self, number: u64) -> Option<Arc<Block>> {
        let hash = *self.numbers.get(&number)?;
        self.get_block(&hash)
    }

    /// Resolves a block reference against the canonical chain.
    pub fn resolve(&self, block: &BlockRef) -> Option<Arc<Block>> {
        match block {
            BlockRef::Latest => Some(self.head_block()),
            BlockRef::Earliest => self.block_by_number(0),
            BlockRef::Number(n) => self.block_by_number(*n),
            BlockRef::Hash(hash) => self.get_block(hash),
        }
    }

    /// State committed by the block with `hash`.
    pub fn snapshot(&self, hash: &Hash) -> Option<Arc<StateSnapshot>> {
        self.snapshots.get(hash).map(|s| Arc::clone(&s))
    }

    /// Resolves `block` together with its committed state.
    pub fn state_at(&self, block: &BlockRef) -> Option<(Arc<Block>, Arc<StateSnapshot>)> {
        if *block == BlockRef::Latest {
            let head = self.head();
            return Some((head.block, head.state));
        }
        let block = self.resolve(block)?;
        let state = self.snapshot(&block.hash())?;
        Some((block, state))
    }

    pub fn receipt(&self, id: &Hash) -> Option<Receipt> {
        self.receipts.get(id).map(|r| r.clone())
    }

    /// Mined transaction with the block holding it and its index.
    pub fn transaction(&self, id: &Hash) -> Option<(Arc<Transaction>, Arc<Block>, usize)> {
        let receipt = self.receipt(id)?;
        let block = self.get_block(&receipt.block_hash)?;
        let tx = block.transactions.get(receipt.transaction_index)?.clone();
        Some((tx, block, receipt.transaction_index))
    }

    /// Writes `changes` into the head state tree and returns the new state root.
    ///
    /// `parent` is the state the tree currently commits to. If an update fails
    /// the leaves already written are restored from it. Callers must hold the
    /// forging lock: the tree tracks a single head.
    pub fn apply_batch(
        &self,
        parent: &dyn AccountStateView,
        changes: &BTreeMap<Address, Account>,
    ) -> Result<Hash, StorageError> {
        let mut tree = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let mut root = h256_to_hash(tree.root());
        for (written, (address, account)) in changes.iter().enumerate() {
            match update_tree(&mut tree, address, account) {
                Ok(updated) => root = updated,
                Err(e) => {
                    restore_leaves(&mut tree, parent, changes.keys().take(written))?;
                    return Err(e);
                }
            }
        }
        Ok(root)
    }

    /// Puts the leaves of `addresses` back to their value in `parent`.
    ///
    /// Undoes an [`apply_batch`](Self::apply_batch) whose block never became the head.
    pub fn revert_batch<'a>(
        &self,
        parent: &dyn AccountStateView,
        addresses: impl IntoIterator<Item = &'a Address>,
    ) -> Result<Hash, StorageError> {
        let mut tree = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        restore_leaves(&mut tree, parent, addresses)?;
        Ok(h256_to_hash(tree.root()))
    }

    pub fn state_root(&self) -> Hash {
        let tree = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        h256_to_hash(tree.root())
    }

    /// Appends a block with its state and receipts and makes it the head.
    pub fn append_block(
        &self,
        block: Arc<Block>,
        state: Arc<StateSnapshot>,
        receipts: Vec<Receipt>,
    ) -> Result<(), StorageError> {
        let mut head = self.head.write().unwrap_or_else(PoisonError::into_inner);

        let expected = head.block.hash();
        if block.header.parent_hash != expected {
            return Err(StorageError::NotOnTip {
                expected,
                actual: block.header.parent_hash,
            });
        }

        let hash = block.hash();
        self.blocks.insert(hash, block.clone());
        self.numbers.insert(block.number(), hash);
        self.snapshots.insert(hash, state.clone());
        for receipt in receipts {
            self.receipts.insert(receipt.transaction_hash, receipt);
        }
        *head = Head { block, state };
        Ok(())
    }
}

fn update_tree(
    tree: &mut StateTree,
    address: &Address,
    account: &Account,
) -> Result<Hash, StorageError> {
    let root = tree
        .update(account_key(address), SmtValue(account.rlp_leaf()))
        .map_err(|e| StorageError::StateTree(format!("{e:?}")))?;
    Ok(h256_to_hash(root))
}

fn restore_leaves<'a>(
    tree: &mut StateTree,
    parent: &dyn AccountStateView,
    addresses: impl IntoIterator<Item = &'a Address>,
) -> Result<(), StorageError> {
    for address in addresses {
        let leaf = parent
            .account(address)
            .map_or_else(SmtValue::zero, |account| SmtValue(account.rlp_leaf()));
        tree.update(account_key(address), leaf)
            .map_err(|e| StorageError::StateTree(format!("{e:?}")))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::merkle_tree::EMPTY_ROOT;

    fn addr(n: u8) -> Address {
        Address([n; 20])
    }

    fn store() -> ChainStore {
        ChainStore::with_genesis(
            &[(addr(1), U256::from(10u64)), (addr(2), U256::from(20u64))],
            U256::from(7u64),
            20_000_000,
        )
        .unwrap()
    }

    fn child_of(parent: &Block, state_root: Hash) -> Arc<Block> {
        Block::new(
            Header {
                number: parent.number() + 1,
                parent_hash: parent.hash(),
                timestamp: 1,
                coinbase: None,
                transactions_root: Hash::zero(),
                state_root,
                base_fee: parent.header.base_fee,
                gas_used: 0,
                gas_limit: parent.header.gas_limit,
            },
            vec![],
        )
    }

    #[test]
    fn genesis_commits_allocations() {
        let store = store();
        let genesis = store.head_block();
        assert_eq!(genesis.number(), 0);
        assert_eq!(genesis.header.transactions_root, EMPTY_ROOT);
        assert_ne!(genesis.header.state_root, Hash::zero());
        assert_eq!(genesis.header.state_root, store.state_root());
        assert_eq!(store.head_state().len(), 2);
        assert_eq!(store.resolve(&BlockRef::Earliest).unwrap().hash(), genesis.hash());
    }

    #[test]
    fn state_root_tracks_account_changes() {
        let store = store();
        let before = store.state_root();
        let root = store
            .apply_batch(
                &*store.head_state(),
                &BTreeMap::from([(addr(1), Account::new(U256::from(9u64)))]),
            )
            .unwrap();
        assert_ne!(root, before);
        assert_eq!(root, store.state_root());
    }

    #[test]
    fn reverted_batch_restores_parent_root() {
        let store = store();
        let parent = store.head_state();
        let before = store.state_root();
        let changes = BTreeMap::from([
            (addr(1), Account::new(U256::from(9u64))),
            (addr(3), Account::new(U256::from(4u64))),
        ]);
        store.apply_batch(&*parent, &changes).unwrap();
        assert_ne!(store.state_root(), before);

        let root = store.revert_batch(&*parent, changes.keys()).unwrap();
        assert_eq!(root, before);
        assert_eq!(store.state_root(), before);
    }

    #[test]
    fn append_links_to_head_only() {
        let store = store();
        let genesis = store.head_block();
        let state = store.head_state();

        let block = child_of(&genesis, genesis.header.state_root);
        store.append_block(block.clone(), state.clone(), vec![]).unwrap();
        assert_eq!(store.height(), 1);
        assert_eq!(store.resolve(&BlockRef::Number(1)).unwrap().hash(), block.hash());
        assert_eq!(store.resolve(&BlockRef::Hash(block.hash())).unwrap().number(), 1);

        let stale = child_of(&genesis, genesis.header.state_root);
        assert!(matches!(
            store.append_block(stale, state, vec![]),
            Err(StorageError::NotOnTip { .. })
        ));
    }

    #[test]
    fn state_at_returns_block_snapshot() {
        let store = store();
        let genesis = store.head_block();
        let next_state = StateSnapshot::child(
            &store.head_state(),
            BTreeMap::from([(addr(3), Account::new(U256::from(1u64)))]),
            vec![addr(3)],
        )
        .unwrap();
        store
            .append_block(child_of(&genesis, Hash::zero()), next_state, vec![])
            .unwrap();

        let (_, old) = store.state_at(&BlockRef::Number(0)).unwrap();
        let (_, new) = store.state_at(&BlockRef::Latest).unwrap();
        assert_eq!(old.len(), 2);
        assert_eq!(new.len(), 3);
        assert!(store.state_at(&BlockRef::Number(9)).is_none());
    }
}
