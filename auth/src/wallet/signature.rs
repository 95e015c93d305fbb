//! # Ownership Proofs
//!
//! A posted address is only a claim. The wallet proves it controls the
//! address by `personal_sign`-ing a server challenge; we recover the signing
//! key from the signature and compare its address with the claim.
//!
//! ```text
//! digest  = keccak256("\x19Ethereum Signed Message:\n" || len(msg) || msg)
//! sig     = r(32) || s(32) || v(1),  v in {0, 1, 27, 28}
//! address = keccak256(uncompressed_pubkey[1..])[12..]
//! ```

use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use sha3::{Digest, Keccak256};
use thiserror::Error;

use crate::config::{ADDRESS_BYTES, SIGNATURE_LENGTH};
use crate::identity::WalletAddress;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("signature is not hex")]
    InvalidHex,

    #[error("signature must be 65 bytes, got {0}")]
    InvalidLength(usize),

    #[error("invalid recovery id {0}")]
    InvalidRecoveryId(u8),

    #[error("signature does not recover to a public key")]
    RecoveryFailed,

    #[error("signature was made by {recovered}, not {claimed}")]
    Mismatch {
        claimed: WalletAddress,
        recovered: WalletAddress,
    },
}

/// Digest a wallet signs for `personal_sign(message)` (EIP-191 version 0x45).
pub fn personal_message_hash(message: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(b"\x19Ethereum Signed Message:\n");
    hasher.update(message.len().to_string().as_bytes());
    hasher.update(message);
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&hasher.finalize());
    digest
}

/// Account address of a secp256k1 public key.
pub fn address_of(key: &VerifyingKey) -> WalletAddress {
    let point = key.to_encoded_point(false);
    let hash = Keccak256::digest(&point.as_bytes()[1..]);
    let mut bytes = [0u8; ADDRESS_BYTES];
    bytes.copy_from_slice(&hash[32 - ADDRESS_BYTES..]);
    WalletAddress::from_bytes(bytes)
}

/// Address whose key produced `signature` over `message`.
///
/// `signature` is the hex string a wallet returns from `personal_sign`,
/// with or without the `0x` prefix.
pub fn recover_signer(message: &[u8], signature: &str) -> Result<WalletAddress, SignatureError> {
    let digits = signature.trim();
    let digits = digits.strip_prefix("0x").unwrap_or(digits);
    let raw = hex::decode(digits).map_err(|_| SignatureError::InvalidHex)?;
    if raw.len() != SIGNATURE_LENGTH {
        return Err(SignatureError::InvalidLength(raw.len()));
    }

    let v = raw[SIGNATURE_LENGTH - 1];
    let recovery_id = match v {
        0 | 27 => RecoveryId::from_byte(0),
        1 | 28 => RecoveryId::from_byte(1),
        _ => None,
    }
    .ok_or(SignatureError::InvalidRecoveryId(v))?;

    let signature = Signature::from_slice(&raw[..SIGNATURE_LENGTH - 1])
        .map_err(|_| SignatureError::RecoveryFailed)?;
    let digest = personal_message_hash(message);
    let key = VerifyingKey::recover_from_prehash(&digest, &signature, recovery_id)
        .map_err(|_| SignatureError::RecoveryFailed)?;
    Ok(address_of(&key))
}

/// Check that `claimed` signed `message`.
pub fn verify_ownership(
    claimed: &WalletAddress,
    message: &[u8],
    signature: &str,
) -> Result<(), SignatureError> {
    let recovered = recover_signer(message, signature)?;
    if recovered != *claimed {
        return Err(SignatureError::Mismatch {
            claimed: *claimed,
            recovered,
        });
    }
    Ok(())
}
