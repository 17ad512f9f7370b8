//! Recoverable ECDSA key pairs on secp256k1.

use crate::types::address::Address;
use crate::types::hash::Hash;
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use rand_core::OsRng;
use zeroize::Zeroizing;

/// Private key for signing transactions.
///
/// Generated using cryptographically secure randomness from the OS.
/// Never serialized or transmitted over the network.
#[derive(Clone)]
pub struct PrivateKey {
    key: SigningKey,
}

/// Public key for signature verification and address derivation.
///
/// The address is the last 20 bytes of Keccak-256 over the uncompressed
/// SEC1 point without its `0x04` tag byte.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PublicKey {
    pub key: VerifyingKey,
    pub address: Address,
}

/// Compact `(r, s)` signature plus the recovery id needed to rebuild the key.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RecoverableSignature {
    pub r: [u8; 32],
    pub s: [u8; 32],
    pub recovery_id: u8,
}

impl PrivateKey {
    /// Generates a new random private key using OS-provided entropy.
    pub fn new() -> Self {
        Self {
            key: SigningKey::random(&mut OsRng),
        }
    }

    /// Creates a private key from raw bytes.
    ///
    /// Returns `None` if the bytes do not represent a valid scalar for secp256k1.
    pub fn from_bytes(bytes: &[u8; 32]) -> Option<Self> {
        SigningKey::from_slice(bytes).ok().map(|key| Self { key })
    }

    /// Parses a hex-encoded (optionally `0x`-prefixed) 32-byte secret.
    pub fn from_hex(s: &str) -> Option<Self> {
        let raw = Zeroizing::new(hex::decode(s.strip_prefix("0x").unwrap_or(s)).ok()?);
        let bytes: &[u8; 32] = raw.as_slice().try_into().ok()?;
        Self::from_bytes(bytes)
    }

    /// Derives the corresponding public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_verifying_key(*self.key.verifying_key())
    }

    /// Shorthand for `public_key().address`.
    pub fn address(&self) -> Address {
        self.public_key().address
    }

    /// Signs a 32-byte digest with deterministic (RFC 6979) nonces.
    ///
    /// The returned `s` is always low-order, with the recovery id adjusted to match.
    pub fn sign_prehash(&self, digest: &Hash) -> Result<RecoverableSignature, k256::ecdsa::Error> {
        let (signature, recovery_id) = self.key.sign_prehash_recoverable(digest.as_slice())?;
        let bytes = signature.to_bytes();
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..]);
        Ok(RecoverableSignature {
            r,
            s,
            recovery_id: recovery_id.to_byte(),
        })
    }
}

impl Default for PrivateKey {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PrivateKey({})", self.address())
    }
}

impl PublicKey {
    pub(crate) fn from_verifying_key(key: VerifyingKey) -> Self {
        let point = key.to_encoded_point(false);
        let hash = Hash::digest(&point.as_bytes()[1..]);
        PublicKey {
            key,
            address: Address::from_hash(&hash),
        }
    }

    /// Recovers the signer of `digest` from a recoverable signature.
    ///
    /// Returns `None` for zero or out-of-range scalars, an unknown recovery id,
    /// or a signature that does not resolve to a curve point.
    pub fn recover(digest: &Hash, signature: &RecoverableSignature) -> Option<Self> {
        let recovery_id = RecoveryId::from_byte(signature.recovery_id)?;
        let signature = Signature::from_scalars(signature.r, signature.s).ok()?;
        VerifyingKey::recover_from_prehash(digest.as_slice(), &signature, recovery_id)
            .ok()
            .map(Self::from_verifying_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: [u8; 32] = [
        0x4c, 0x08, 0x83, 0xa6, 0x91, 0x02, 0x93, 0x7d, 0x62, 0x31, 0x47, 0x1b, 0x5d, 0xbb, 0x62,
        0x04, 0xfe, 0x51, 0x29, 0x61, 0x70, 0x82, 0x79, 0x2a, 0xe4, 0x68, 0xd0, 0x1a, 0x3f, 0x36,
        0x23, 0x18,
    ];

    #[test]
    fn known_key_derives_known_address() {
        let key = PrivateKey::from_bytes(&SECRET).unwrap();
        assert_eq!(
            key.address().to_string(),
            "0x2c7536e3605d9c16a7a3d7b1898e529396a65c23"
        );
    }

    #[test]
    fn sign_then_recover_yields_signer() {
        let key = PrivateKey::new();
        let digest = Hash::digest(b"Hello World");
        let signature = key.sign_prehash(&digest).unwrap();
        let recovered = PublicKey::recover(&digest, &signature).unwrap();
        assert_eq!(recovered.address, key.address());
    }

    #[test]
    fn recover_with_other_digest_yields_other_address() {
        let key = PrivateKey::new();
        let signature = key.sign_prehash(&Hash::digest(b"original")).unwrap();
        let recovered = PublicKey::recover(&Hash::digest(b"tampered"), &signature);
        assert_ne!(recovered.map(|p| p.address), Some(key.address()));
    }

    #[test]
    fn signing_is_deterministic() {
        let key = PrivateKey::from_bytes(&SECRET).unwrap();
        let digest = Hash::digest(b"payload");
        assert_eq!(
            key.sign_prehash(&digest).unwrap(),
            key.sign_prehash(&digest).unwrap()
        );
    }

    #[test]
    fn recover_rejects_zero_scalars() {
        let signature = RecoverableSignature {
            r: [0; 32],
            s: [0; 32],
            recovery_id: 0,
        };
        assert!(PublicKey::recover(&Hash::digest(b"x"), &signature).is_none());
    }

    #[test]
    fn recover_rejects_unknown_recovery_id() {
        let key = PrivateKey::new();
        let digest = Hash::digest(b"x");
        let mut signature = key.sign_prehash(&digest).unwrap();
        signature.recovery_id = 7;
        assert!(PublicKey::recover(&digest, &signature).is_none());
    }

    #[test]
    fn from_bytes_with_zero_key_fails() {
        assert!(PrivateKey::from_bytes(&[0u8; 32]).is_none());
    }

    #[test]
    fn from_hex_accepts_prefix() {
        let hex = format!("0x{}", hex::encode(SECRET));
        let key = PrivateKey::from_hex(&hex).unwrap();
        assert_eq!(key.address(), PrivateKey::from_bytes(&SECRET).unwrap().address());
        assert!(PrivateKey::from_hex("0x1234").is_none());
    }

    #[test]
    fn address_uniqueness() {
        assert_ne!(PrivateKey::new().address(), PrivateKey::new().address());
    }
}
