//! Format-aware signing hashes, signing and sender recovery.

use crate::core::codec::{self, EIP155_V_OFFSET};
use crate::core::transaction::{Transaction, TxSignature, TxVariant};
use crate::crypto::key_pair::{PrivateKey, PublicKey, RecoverableSignature};
use crate::types::U256;
use crate::types::address::Address;
use crate::types::hash::Hash;
use evm_ledger_derive::Error;

/// `v` offset of pre-EIP-155 signatures.
pub const LEGACY_V_OFFSET: u64 = 27;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("transaction is not signed")]
    NotSigned,

    #[error("invalid transaction signature")]
    InvalidSignature,

    #[error("signing failed")]
    SigningFailed,
}

/// Digest committed to by the signature of `tx`.
///
/// - Legacy: `keccak(rlp([nonce, gasPrice, gasLimit, to, value, data]))`
/// - EIP-155: the same list extended with `[chainId, 0, 0]`
/// - EIP-1559: `keccak(0x02 || rlp([chainId, ..., accessList]))`
///
/// The signature triple of a signed `tx` is ignored.
pub fn signing_hash(tx: &Transaction) -> Hash {
    Hash::digest(codec::encode_unsigned(tx))
}

/// Signs `tx` with `key`, returning a new signed transaction.
///
/// An existing signature is replaced. The recovery id is folded into `v`
/// according to the format.
pub fn sign(tx: &Transaction, key: &PrivateKey) -> Result<Transaction, SignatureError> {
    let digest = signing_hash(tx);
    let signature = key
        .sign_prehash(&digest)
        .map_err(|_| SignatureError::SigningFailed)?;

    let recovery_id = u64::from(signature.recovery_id);
    let v = match tx.variant {
        TxVariant::Legacy { .. } => LEGACY_V_OFFSET + recovery_id,
        TxVariant::Eip155 { chain_id, .. } => chain_id
            .checked_mul(2)
            .and_then(|v| v.checked_add(EIP155_V_OFFSET + recovery_id))
            .ok_or(SignatureError::SigningFailed)?,
        TxVariant::Eip1559 { .. } => recovery_id,
    };

    let signed = tx.with_signature(TxSignature {
        v,
        r: U256::from_be_bytes(signature.r),
        s: U256::from_be_bytes(signature.s),
    });
    Ok(signed)
}

/// Maps `v` back to a recovery id, enforcing each format's valid range.
fn recovery_id(tx: &Transaction, v: u64) -> Option<u8> {
    let id = match tx.variant {
        TxVariant::Legacy { .. } => v.checked_sub(LEGACY_V_OFFSET).filter(|id| *id <= 1)?,
        TxVariant::Eip155 { chain_id, .. } => {
            let offset = v.checked_sub(EIP155_V_OFFSET)?;
            if offset / 2 != chain_id {
                return None;
            }
            offset % 2
        }
        TxVariant::Eip1559 { .. } => v,
    };
    if id > 1 {
        return None;
    }
    Some(id as u8)
}

/// Recovers the address that signed `tx`.
///
/// Fails with [`SignatureError::NotSigned`] when no signature is attached and
/// with [`SignatureError::InvalidSignature`] when `v` is outside the format's
/// range or `(r, s)` do not recover a curve point.
pub fn recover_sender(tx: &Transaction) -> Result<Address, SignatureError> {
    let signature = tx.signature.ok_or(SignatureError::NotSigned)?;
    let recovery_id = recovery_id(tx, signature.v).ok_or(SignatureError::InvalidSignature)?;

    let recoverable = RecoverableSignature {
        r: signature.r.to_be_bytes::<32>(),
        s: signature.s.to_be_bytes::<32>(),
        recovery_id,
    };
    PublicKey::recover(&signing_hash(tx), &recoverable)
        .map(|key| key.address)
        .ok_or(SignatureError::InvalidSignature)
}
