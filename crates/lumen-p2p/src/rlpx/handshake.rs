//! The RLPx encryption handshake.
//!
//! One auth/ack exchange, each packet ECIES-encrypted to the other side's
//! static key, produces the [`Secrets`] that key the frame codec. Both roles
//! are implemented: [`EncryptionHandshake`] dials out, [`HandshakeResponder`]
//! answers.

use std::fmt;

use k256::{PublicKey, SecretKey};
use lumen_core::hash::keccak256_concat;
use lumen_core::rlp::{self, RlpError, RlpItem};
use rand::{Rng, RngCore};
use thiserror::Error;

use crate::crypto::ecies::{self, EncryptedMessage};
use crate::crypto::mac::KeccakMac;
use crate::crypto::{
    ecdh_agree, generate_secret_key, keccak256, node_id, public_key_from_node_id, recover, sign,
    CryptoError, NodeId,
};

/// Version advertised in auth and ack bodies.
pub const HANDSHAKE_VERSION: u64 = 4;

const MIN_PADDING: usize = 100;
const MAX_PADDING: usize = 300;

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("Invalid auth payload: {reason}")]
    InvalidAuthPayload { reason: String },

    #[error("Invalid auth-ack payload: {reason}")]
    InvalidAuthAckPayload { reason: String },

    #[error("Auth message has not been sent yet")]
    AuthNotSent,

    #[error("Auth message has not been received yet")]
    AuthNotReceived,

    #[error("Handshake I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timed out waiting for the handshake packet")]
    Timeout,
}

/// Session keys shared by both ends after a successful handshake.
pub struct Secrets {
    pub aes_secret: [u8; 32],
    pub mac_secret: [u8; 32],
    pub token: [u8; 32],
    pub egress_mac: KeccakMac,
    pub ingress_mac: KeccakMac,
}

impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secrets")
            .field("token", &hex::encode(self.token))
            .finish_non_exhaustive()
    }
}

/// Body of the initiator's packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthMessage {
    pub signature: [u8; 65],
    pub public_key: NodeId,
    pub nonce: [u8; 32],
    pub version: u64,
}

impl AuthMessage {
    pub fn encode(&self) -> Vec<u8> {
        rlp::encode_list(&[
            rlp::encode_bytes(&self.signature),
            rlp::encode_bytes(&self.public_key),
            rlp::encode_bytes(&self.nonce),
            rlp::encode_u64(self.version),
        ])
    }

    /// Decode the leading RLP list; padding after it is ignored.
    pub fn decode(plaintext: &[u8]) -> Result<Self, RlpError> {
        let (_, item) = rlp::decode_prefix(plaintext)?;
        Ok(Self {
            signature: item.element(0)?.as_fixed()?,
            public_key: item.element(1)?.as_fixed()?,
            nonce: item.element(2)?.as_fixed()?,
            version: item.element(3)?.as_u64()?,
        })
    }
}

/// Body of the responder's packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthAckMessage {
    pub ephemeral_public_key: NodeId,
    pub nonce: [u8; 32],
    pub version: u64,
}

impl AuthAckMessage {
    pub fn encode(&self) -> Vec<u8> {
        rlp::encode_list(&[
            rlp::encode_bytes(&self.ephemeral_public_key),
            rlp::encode_bytes(&self.nonce),
            rlp::encode_u64(self.version),
        ])
    }

    pub fn decode(plaintext: &[u8]) -> Result<Self, RlpError> {
        let (_, item): (usize, RlpItem) = rlp::decode_prefix(plaintext)?;
        Ok(Self {
            ephemeral_public_key: item.element(0)?.as_fixed()?,
            nonce: item.element(1)?.as_fixed()?,
            version: item.element(2)?.as_u64()?,
        })
    }
}

fn random_nonce() -> [u8; 32] {
    let mut nonce = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

fn xor32(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let mut out = [0u8; 32];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = a[i] ^ b[i];
    }
    out
}

/// Append random padding and encrypt to `remote`, returning the wire packet.
fn seal_packet(remote: &PublicKey, body: Vec<u8>) -> Result<Vec<u8>, HandshakeError> {
    let mut rng = rand::thread_rng();
    let mut padded = body;
    let padding_len = rng.gen_range(MIN_PADDING..=MAX_PADDING);
    let start = padded.len();
    padded.resize(start + padding_len, 0);
    rng.fill_bytes(&mut padded[start..]);
    Ok(ecies::encrypt(remote, &padded)?.encoded())
}

struct SecretsInput<'a> {
    ephemeral_key: &'a SecretKey,
    remote_ephemeral: &'a PublicKey,
    initiator_nonce: &'a [u8; 32],
    responder_nonce: &'a [u8; 32],
    my_nonce: &'a [u8; 32],
    remote_nonce: &'a [u8; 32],
    sent_packet: &'a [u8],
    received_packet: &'a [u8],
}

fn derive_secrets(input: SecretsInput<'_>) -> Secrets {
    let agreed = ecdh_agree(input.ephemeral_key, input.remote_ephemeral);
    let nonce_hash = keccak256_concat(&[&input.responder_nonce[..], &input.initiator_nonce[..]]);
    let shared_secret = keccak256_concat(&[&agreed[..], &nonce_hash[..]]);
    let aes_secret = keccak256_concat(&[&agreed[..], &shared_secret[..]]);
    let mac_secret = keccak256_concat(&[&agreed[..], &aes_secret[..]]);
    let token = keccak256(&shared_secret);

    let mut egress_mac = KeccakMac::new(mac_secret);
    egress_mac.update(&xor32(&mac_secret, input.remote_nonce));
    egress_mac.update(input.sent_packet);

    let mut ingress_mac = KeccakMac::new(mac_secret);
    ingress_mac.update(&xor32(&mac_secret, input.my_nonce));
    ingress_mac.update(input.received_packet);

    Secrets {
        aes_secret,
        mac_secret,
        token,
        egress_mac,
        ingress_mac,
    }
}

/// Initiator side of the handshake, bound to one connection attempt.
pub struct EncryptionHandshake {
    static_key: SecretKey,
    remote_public_key: PublicKey,
    ephemeral_key: SecretKey,
    nonce: [u8; 32],
    auth_packet: Option<Vec<u8>>,
}

impl EncryptionHandshake {
    pub fn new(static_key: SecretKey, remote_public_key: PublicKey) -> Self {
        Self {
            static_key,
            remote_public_key,
            ephemeral_key: generate_secret_key(),
            nonce: random_nonce(),
            auth_packet: None,
        }
    }

    /// Build the encrypted auth packet. Its bytes seed the egress MAC.
    pub fn create_auth_message(&mut self) -> Result<Vec<u8>, HandshakeError> {
        let static_shared = ecdh_agree(&self.static_key, &self.remote_public_key);
        let signature = sign(&xor32(&static_shared, &self.nonce), &self.ephemeral_key)?;

        let auth = AuthMessage {
            signature,
            public_key: node_id(&self.static_key.public_key()),
            nonce: self.nonce,
            version: HANDSHAKE_VERSION,
        };
        let packet = seal_packet(&self.remote_public_key, auth.encode())?;
        self.auth_packet = Some(packet.clone());
        Ok(packet)
    }

    /// Decrypt the responder's ack and derive the session secrets.
    pub fn handle_auth_ack_message(&self, packet: &[u8]) -> Result<Secrets, HandshakeError> {
        let auth_packet = self.auth_packet.as_ref().ok_or(HandshakeError::AuthNotSent)?;

        let plaintext = ecies::decrypt(&self.static_key, &EncryptedMessage::decode(packet)?)?;
        let ack = AuthAckMessage::decode(&plaintext).map_err(|e| {
            HandshakeError::InvalidAuthAckPayload {
                reason: e.to_string(),
            }
        })?;
        let remote_ephemeral = public_key_from_node_id(&ack.ephemeral_public_key).map_err(|e| {
            HandshakeError::InvalidAuthAckPayload {
                reason: e.to_string(),
            }
        })?;

        Ok(derive_secrets(SecretsInput {
            ephemeral_key: &self.ephemeral_key,
            remote_ephemeral: &remote_ephemeral,
            initiator_nonce: &self.nonce,
            responder_nonce: &ack.nonce,
            my_nonce: &self.nonce,
            remote_nonce: &ack.nonce,
            sent_packet: auth_packet,
            received_packet: packet,
        }))
    }
}

struct ReceivedAuth {
    remote_public_key: PublicKey,
    remote_ephemeral: PublicKey,
    nonce: [u8; 32],
    packet: Vec<u8>,
}

/// Responder side of the handshake.
pub struct HandshakeResponder {
    static_key: SecretKey,
    ephemeral_key: SecretKey,
    nonce: [u8; 32],
    auth: Option<ReceivedAuth>,
}

impl HandshakeResponder {
    pub fn new(static_key: SecretKey) -> Self {
        Self {
            static_key,
            ephemeral_key: generate_secret_key(),
            nonce: random_nonce(),
            auth: None,
        }
    }

    /// Decrypt the initiator's auth packet and recover its ephemeral key.
    /// Returns the initiator's static public key.
    pub fn handle_auth_message(&mut self, packet: &[u8]) -> Result<PublicKey, HandshakeError> {
        let plaintext = ecies::decrypt(&self.static_key, &EncryptedMessage::decode(packet)?)?;
        let invalid = |reason: String| HandshakeError::InvalidAuthPayload { reason };

        let auth = AuthMessage::decode(&plaintext).map_err(|e| invalid(e.to_string()))?;
        let remote_public_key =
            public_key_from_node_id(&auth.public_key).map_err(|e| invalid(e.to_string()))?;

        let static_shared = ecdh_agree(&self.static_key, &remote_public_key);
        let remote_ephemeral = recover(&xor32(&static_shared, &auth.nonce), &auth.signature)
            .map_err(|e| invalid(e.to_string()))?;

        self.auth = Some(ReceivedAuth {
            remote_public_key,
            remote_ephemeral,
            nonce: auth.nonce,
            packet: packet.to_vec(),
        });
        Ok(remote_public_key)
    }

    /// Build the encrypted ack packet and derive the session secrets.
    pub fn create_auth_ack_message(&self) -> Result<(Vec<u8>, Secrets), HandshakeError> {
        let auth = self.auth.as_ref().ok_or(HandshakeError::AuthNotReceived)?;

        let ack = AuthAckMessage {
            ephemeral_public_key: node_id(&self.ephemeral_key.public_key()),
            nonce: self.nonce,
            version: HANDSHAKE_VERSION,
        };
        let packet = seal_packet(&auth.remote_public_key, ack.encode())?;

        let secrets = derive_secrets(SecretsInput {
            ephemeral_key: &self.ephemeral_key,
            remote_ephemeral: &auth.remote_ephemeral,
            initiator_nonce: &auth.nonce,
            responder_nonce: &self.nonce,
            my_nonce: &self.nonce,
            remote_nonce: &auth.nonce,
            sent_packet: &packet,
            received_packet: &auth.packet,
        });
        Ok((packet, secrets))
    }
}
