//! ECIES as used by the RLPx handshake.
//!
//! Wire layout: `size(2) ++ ephemeral_pubkey(65) ++ iv(16) ++ ciphertext ++ mac(32)`.
//! `size` counts everything after itself and is authenticated together with
//! `iv ++ ciphertext`.

use aes::Aes128;
use cipher::generic_array::GenericArray;
use cipher::{KeyIvInit, StreamCipher};
use hmac::{Hmac, Mac};
use k256::{PublicKey, SecretKey};
use rand::RngCore;
use sha2::{Digest, Sha256};

use super::{ecdh_agree, generate_secret_key, public_key_bytes, public_key_from_slice, CryptoError};

type Aes128Ctr = ctr::Ctr128BE<Aes128>;
type HmacSha256 = Hmac<Sha256>;

const PREFIX_LEN: usize = 2;
const PUBLIC_KEY_LEN: usize = 65;
const IV_LEN: usize = 16;
const MAC_LEN: usize = 32;

/// Bytes added to a plaintext by encryption, excluding the size prefix.
pub const ECIES_OVERHEAD: usize = PUBLIC_KEY_LEN + IV_LEN + MAC_LEN;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptedMessage {
    pub prefix: [u8; 2],
    pub ephemeral_public_key: [u8; 65],
    pub iv: [u8; 16],
    pub ciphertext: Vec<u8>,
    pub mac: [u8; 32],
}

impl EncryptedMessage {
    pub fn encoded(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(PREFIX_LEN + ECIES_OVERHEAD + self.ciphertext.len());
        out.extend_from_slice(&self.prefix);
        out.extend_from_slice(&self.ephemeral_public_key);
        out.extend_from_slice(&self.iv);
        out.extend_from_slice(&self.ciphertext);
        out.extend_from_slice(&self.mac);
        out
    }

    /// Split a size-prefixed packet into its parts.
    pub fn decode(packet: &[u8]) -> Result<Self, CryptoError> {
        if packet.len() < PREFIX_LEN + ECIES_OVERHEAD {
            return Err(CryptoError::MessageTooShort { len: packet.len() });
        }
        let mut prefix = [0u8; 2];
        prefix.copy_from_slice(&packet[..PREFIX_LEN]);
        let size = usize::from(u16::from_be_bytes(prefix));
        if packet.len() != PREFIX_LEN + size {
            return Err(CryptoError::MessageTooShort { len: packet.len() });
        }

        let body = &packet[PREFIX_LEN..];
        let mut ephemeral_public_key = [0u8; 65];
        ephemeral_public_key.copy_from_slice(&body[..PUBLIC_KEY_LEN]);
        let mut iv = [0u8; 16];
        iv.copy_from_slice(&body[PUBLIC_KEY_LEN..PUBLIC_KEY_LEN + IV_LEN]);
        let mac_start = body.len() - MAC_LEN;
        let mut mac = [0u8; 32];
        mac.copy_from_slice(&body[mac_start..]);

        Ok(Self {
            prefix,
            ephemeral_public_key,
            iv,
            ciphertext: body[PUBLIC_KEY_LEN + IV_LEN..mac_start].to_vec(),
            mac,
        })
    }
}

/// NIST SP 800-56 concatenation KDF over SHA-256, 32 bytes of output.
fn concat_kdf(shared: &[u8; 32]) -> [u8; 32] {
    let counter: u32 = 1;
    let digest = Sha256::new()
        .chain_update(counter.to_be_bytes())
        .chain_update(shared)
        .finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Split the KDF output into the AES key and the (hashed) MAC key.
fn derive_keys(shared: &[u8; 32]) -> ([u8; 16], [u8; 32]) {
    let key_material = concat_kdf(shared);
    let mut encryption_key = [0u8; 16];
    encryption_key.copy_from_slice(&key_material[..16]);
    let mut mac_key = [0u8; 32];
    mac_key.copy_from_slice(&Sha256::digest(&key_material[16..]));
    (encryption_key, mac_key)
}

fn tag(mac_key: &[u8; 32], iv: &[u8], ciphertext: &[u8], prefix: &[u8]) -> Result<HmacSha256, CryptoError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(mac_key).map_err(|_| CryptoError::MacMismatch)?;
    mac.update(iv);
    mac.update(ciphertext);
    mac.update(prefix);
    Ok(mac)
}

fn apply_keystream(key: &[u8; 16], iv: &[u8; 16], data: &mut [u8]) {
    let mut cipher = Aes128Ctr::new(GenericArray::from_slice(key), GenericArray::from_slice(iv));
    cipher.apply_keystream(data);
}

/// Encrypt `plaintext` to `remote`.
pub fn encrypt(remote: &PublicKey, plaintext: &[u8]) -> Result<EncryptedMessage, CryptoError> {
    let size = u16::try_from(plaintext.len() + ECIES_OVERHEAD)
        .map_err(|_| CryptoError::PayloadTooLarge { len: plaintext.len() })?;
    let prefix = size.to_be_bytes();

    let ephemeral = generate_secret_key();
    let (encryption_key, mac_key) = derive_keys(&ecdh_agree(&ephemeral, remote));

    let mut iv = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut iv);

    let mut ciphertext = plaintext.to_vec();
    apply_keystream(&encryption_key, &iv, &mut ciphertext);

    let mut mac = [0u8; 32];
    mac.copy_from_slice(&tag(&mac_key, &iv, &ciphertext, &prefix)?.finalize().into_bytes());

    Ok(EncryptedMessage {
        prefix,
        ephemeral_public_key: public_key_bytes(&ephemeral.public_key()),
        iv,
        ciphertext,
        mac,
    })
}

/// Decrypt a message addressed to `secret`. Nothing is returned unless the MAC checks out.
pub fn decrypt(secret: &SecretKey, message: &EncryptedMessage) -> Result<Vec<u8>, CryptoError> {
    let ephemeral = public_key_from_slice(&message.ephemeral_public_key)?;
    let (encryption_key, mac_key) = derive_keys(&ecdh_agree(secret, &ephemeral));

    tag(&mac_key, &message.iv, &message.ciphertext, &message.prefix)?
        .verify_slice(&message.mac)
        .map_err(|_| CryptoError::MacMismatch)?;

    let mut plaintext = message.ciphertext.clone();
    apply_keystream(&encryption_key, &message.iv, &mut plaintext);
    Ok(plaintext)
}
