use crate::types::U256;
use crate::types::bytes::Bytes;
use crate::types::hash::Hash;
use crate::types::rlp::RlpList;

/// Per-address ledger state.
///
/// Externally owned accounts carry no code and the empty storage root; contract
/// accounts keep their code alongside its hash. State trie leaves commit to
/// `rlp([nonce, balance, storageRoot, codeHash])`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Account {
    /// Number of confirmed transactions sent from this account; 1 at creation for contracts.
    nonce: u64,
    /// Spendable balance in wei.
    balance: U256,
    /// Deployed code, empty for externally owned accounts.
    code: Bytes,
    /// Keccak-256 of `code`.
    code_hash: Hash,
    /// Root of the contract storage trie.
    storage_root: Hash,
}

impl Account {
    /// `keccak256("")`.
    pub const EMPTY_CODE_HASH: Hash = Hash([
        0xc5, 0xd2, 0x46, 0x01, 0x86, 0xf7, 0x23, 0x3c, 0x92, 0x7e, 0x7d, 0xb2, 0xdc, 0xc7, 0x03,
        0xc0, 0xe5, 0x00, 0xb6, 0x53, 0xca, 0x82, 0x27, 0x3b, 0x7b, 0xfa, 0xd8, 0x04, 0x5d, 0x85,
        0xa4, 0x70,
    ]);

    /// `keccak256(rlp(""))`, the root of an empty trie.
    pub const EMPTY_STORAGE_ROOT: Hash = Hash([
        0x56, 0xe8, 0x1f, 0x17, 0x1b, 0xcc, 0x55, 0xa6, 0xff, 0x83, 0x45, 0xe6, 0x92, 0xc0, 0xf8,
        0x6e, 0x5b, 0x48, 0xe0, 0x1b, 0x99, 0x6c, 0xad, 0xc0, 0x01, 0x62, 0x2f, 0xb5, 0xe3, 0x63,
        0xb4, 0x21,
    ]);

    /// Creates a new externally owned account with the given balance.
    pub fn new(balance: U256) -> Self {
        Self {
            nonce: 0,
            balance,
            code: Bytes::default(),
            code_hash: Self::EMPTY_CODE_HASH,
            storage_root: Self::EMPTY_STORAGE_ROOT,
        }
    }

    /// Creates a freshly deployed contract account.
    pub fn contract(balance: U256, code: Bytes) -> Self {
        Self {
            nonce: 1,
            balance,
            code_hash: Hash::digest(&code),
            code,
            storage_root: Self::EMPTY_STORAGE_ROOT,
        }
    }

    pub fn balance(&self) -> U256 {
        self.balance
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn code(&self) -> &Bytes {
        &self.code
    }

    pub fn code_hash(&self) -> Hash {
        self.code_hash
    }

    pub fn storage_root(&self) -> Hash {
        self.storage_root
    }

    /// Returns true if this account holds contract code.
    pub fn is_contract(&self) -> bool {
        self.code_hash != Self::EMPTY_CODE_HASH
    }

    /// Account that `create` may not deploy over.
    pub fn is_occupied(&self) -> bool {
        self.nonce != 0 || self.is_contract()
    }

    pub fn increment_nonce(&mut self) {
        self.nonce += 1;
    }

    /// Removes `amount` from the balance, returning `false` if it is not covered.
    #[must_use]
    pub fn debit(&mut self, amount: U256) -> bool {
        match self.balance.checked_sub(amount) {
            Some(rest) => {
                self.balance = rest;
                true
            }
            None => false,
        }
    }

    /// Adds `amount` to the balance, returning `false` on overflow.
    #[must_use]
    pub fn credit(&mut self, amount: U256) -> bool {
        match self.balance.checked_add(amount) {
            Some(total) => {
                self.balance = total;
                true
            }
            None => false,
        }
    }

    /// State trie leaf encoding.
    pub fn rlp_leaf(&self) -> Vec<u8> {
        let mut list = RlpList::new();
        list.push(&self.nonce)
            .push(&self.balance)
            .push(&self.storage_root)
            .push(&self.code_hash);
        list.finish()
    }
}

impl Default for Account {
    fn default() -> Self {
        Self::new(U256::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_creates_eoa_with_balance() {
        let account = Account::new(U256::from(1_000_000u64));
        assert_eq!(account.balance(), U256::from(1_000_000u64));
        assert_eq!(account.nonce(), 0);
        assert!(!account.is_contract());
        assert!(!account.is_occupied());
    }

    #[test]
    fn empty_hashes_match_keccak() {
        assert_eq!(Account::EMPTY_CODE_HASH, Hash::digest([0u8; 0]));
        assert_eq!(Account::EMPTY_STORAGE_ROOT, Hash::digest([0x80]));
    }

    #[test]
    fn contract_starts_at_nonce_one() {
        let code = Bytes::from(&[0x60, 0x00]);
        let account = Account::contract(U256::ZERO, code.clone());
        assert_eq!(account.nonce(), 1);
        assert!(account.is_contract());
        assert_eq!(account.code(), &code);
        assert_eq!(account.code_hash(), Hash::digest(&code));
    }

    #[test]
    fn debit_refuses_overdraft() {
        let mut account = Account::new(U256::from(10u64));
        assert!(!account.debit(U256::from(11u64)));
        assert_eq!(account.balance(), U256::from(10u64));
        assert!(account.debit(U256::from(10u64)));
        assert_eq!(account.balance(), U256::ZERO);
    }

    #[test]
    fn credit_refuses_overflow() {
        let mut account = Account::new(U256::MAX);
        assert!(!account.credit(U256::from(1u64)));
        assert_eq!(account.balance(), U256::MAX);
    }

    #[test]
    fn leaf_changes_with_state() {
        let mut account = Account::new(U256::from(5u64));
        let before = account.rlp_leaf();
        account.increment_nonce();
        assert_ne!(account.rlp_leaf(), before);
    }
}
