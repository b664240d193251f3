//! secp256k1 primitives used by the RLPx handshake and transaction signing.

pub mod ecies;
pub mod mac;

use k256::ecdh::diffie_hellman;
use k256::ecdsa::signature::hazmat::PrehashSigner;
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{PublicKey, SecretKey};
use rand::rngs::OsRng;
use thiserror::Error;

pub use lumen_core::hash::keccak256;

/// A node's public key without the 0x04 SEC1 tag.
pub type NodeId = [u8; 64];

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid public key: {reason}")]
    InvalidPublicKey { reason: String },

    #[error("Invalid private key")]
    InvalidPrivateKey,

    #[error("Signing failed: {reason}")]
    Signing { reason: String },

    #[error("No recovery id reproduces the signer's public key")]
    RecoveryIdNotFound,

    #[error("Invalid recoverable signature")]
    InvalidSignature,

    #[error("ECIES message of {len} bytes is too short")]
    MessageTooShort { len: usize },

    #[error("ECIES payload of {len} bytes does not fit the size prefix")]
    PayloadTooLarge { len: usize },

    #[error("ECIES MAC mismatch")]
    MacMismatch,
}

pub fn generate_secret_key() -> SecretKey {
    SecretKey::random(&mut OsRng)
}

pub fn secret_key_from_bytes(bytes: &[u8]) -> Result<SecretKey, CryptoError> {
    SecretKey::from_slice(bytes).map_err(|_| CryptoError::InvalidPrivateKey)
}

/// 65-byte uncompressed SEC1 encoding.
pub fn public_key_bytes(key: &PublicKey) -> [u8; 65] {
    let point = key.to_encoded_point(false);
    let mut out = [0u8; 65];
    out.copy_from_slice(point.as_bytes());
    out
}

pub fn node_id(key: &PublicKey) -> NodeId {
    let mut id = [0u8; 64];
    id.copy_from_slice(&public_key_bytes(key)[1..]);
    id
}

pub fn public_key_from_slice(bytes: &[u8]) -> Result<PublicKey, CryptoError> {
    PublicKey::from_sec1_bytes(bytes).map_err(|e| CryptoError::InvalidPublicKey {
        reason: e.to_string(),
    })
}

pub fn public_key_from_node_id(id: &NodeId) -> Result<PublicKey, CryptoError> {
    let mut sec1 = [0u8; 65];
    sec1[0] = 0x04;
    sec1[1..].copy_from_slice(id);
    public_key_from_slice(&sec1)
}

/// ECDH on secp256k1, returning the x coordinate of the shared point.
pub fn ecdh_agree(secret: &SecretKey, remote: &PublicKey) -> [u8; 32] {
    let shared = diffie_hellman(secret.to_nonzero_scalar(), remote.as_affine());
    let mut out = [0u8; 32];
    out.copy_from_slice(shared.raw_secret_bytes());
    out
}

/// Sign a 32-byte hash, returning `r ++ s ++ recovery_id` with low `s`.
pub fn sign(hash: &[u8; 32], secret: &SecretKey) -> Result<[u8; 65], CryptoError> {
    let signing_key = SigningKey::from(secret);
    let signature: Signature = signing_key
        .sign_prehash(hash)
        .map_err(|e| CryptoError::Signing {
            reason: e.to_string(),
        })?;
    let signature = signature.normalize_s().unwrap_or(signature);

    let expected = signing_key.verifying_key();
    let recovery_id = (0u8..4)
        .find(|candidate| {
            RecoveryId::from_byte(*candidate)
                .and_then(|id| VerifyingKey::recover_from_prehash(hash, &signature, id).ok())
                .map_or(false, |recovered| &recovered == expected)
        })
        .ok_or(CryptoError::RecoveryIdNotFound)?;

    let mut out = [0u8; 65];
    out[..64].copy_from_slice(&signature.to_bytes());
    out[64] = recovery_id;
    Ok(out)
}

/// Recover the signer of `hash` from a 65-byte recoverable signature.
pub fn recover(hash: &[u8; 32], signature: &[u8; 65]) -> Result<PublicKey, CryptoError> {
    let parsed =
        Signature::from_slice(&signature[..64]).map_err(|_| CryptoError::InvalidSignature)?;
    let id = RecoveryId::from_byte(signature[64]).ok_or(CryptoError::InvalidSignature)?;
    let key = VerifyingKey::recover_from_prehash(hash, &parsed, id)
        .map_err(|_| CryptoError::InvalidSignature)?;
    Ok(PublicKey::from(&key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ecdh_is_symmetric() {
        let alice = generate_secret_key();
        let bob = generate_secret_key();
        assert_eq!(
            ecdh_agree(&alice, &bob.public_key()),
            ecdh_agree(&bob, &alice.public_key())
        );
    }

    #[test]
    fn test_sign_recovers_signer_with_low_s() {
        let key = generate_secret_key();
        let hash = keccak256(b"lumen");
        let signature = sign(&hash, &key).unwrap();

        assert!(signature[64] < 4);
        // s must sit in the lower half of the curve order.
        assert!(signature[32] < 0x80);
        assert_eq!(recover(&hash, &signature).unwrap(), key.public_key());
    }

    #[test]
    fn test_node_id_roundtrip() {
        let key = generate_secret_key().public_key();
        let id = node_id(&key);
        assert_eq!(public_key_from_node_id(&id).unwrap(), key);
        assert!(public_key_from_node_id(&[0x01; 64]).is_err());
    }

    #[test]
    fn test_secret_key_from_bytes() {
        let key = generate_secret_key();
        let restored = secret_key_from_bytes(&key.to_bytes()).unwrap();
        assert_eq!(restored.public_key(), key.public_key());
        assert!(secret_key_from_bytes(&[0u8; 32]).is_err());
    }
}
