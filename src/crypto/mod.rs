//! Key material: secp256k1 key pairs and the node's development keyring.

pub mod key_pair;
pub mod keyring;
