//! In-memory development keyring backing `ledger_signTransaction`.
//!
//! Keys are supplied at startup (`--dev-key`) and never leave the process.

use crate::crypto::key_pair::PrivateKey;
use crate::types::address::Address;
use dashmap::DashMap;

#[derive(Default)]
pub struct Keyring {
    keys: DashMap<Address, PrivateKey>,
}

impl Keyring {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a keyring holding `keys`, indexed by their addresses.
    pub fn with_keys(keys: impl IntoIterator<Item = PrivateKey>) -> Self {
        let ring = Self::new();
        for key in keys {
            ring.insert(key);
        }
        ring
    }

    /// Adds a key and returns the address it signs for.
    pub fn insert(&self, key: PrivateKey) -> Address {
        let address = key.address();
        self.keys.insert(address, key);
        address
    }

    pub fn get(&self, address: &Address) -> Option<PrivateKey> {
        self.keys.get(address).map(|k| k.clone())
    }

    pub fn addresses(&self) -> Vec<Address> {
        let mut addresses: Vec<Address> = self.keys.iter().map(|e| *e.key()).collect();
        addresses.sort();
        addresses
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_derived_address() {
        let key = PrivateKey::new();
        let ring = Keyring::with_keys([key.clone()]);
        assert_eq!(ring.get(&key.address()).map(|k| k.address()), Some(key.address()));
        assert!(ring.get(&PrivateKey::new().address()).is_none());
    }

    #[test]
    fn addresses_are_sorted() {
        let ring = Keyring::with_keys([PrivateKey::new(), PrivateKey::new(), PrivateKey::new()]);
        let addresses = ring.addresses();
        assert_eq!(addresses.len(), 3);
        assert!(addresses.windows(2).all(|w| w[0] < w[1]));
    }
}
