//! The RLPx running MAC.
//!
//! A keccak256 state that is never finalised in place: every digest is
//! taken from a clone, so the accumulator keeps absorbing for the lifetime
//! of the connection. Each update mixes in the AES-256 encryption of the
//! current digest, which ties the MAC to the MAC secret as well as the data.

use std::fmt;

use aes::Aes256;
use cipher::generic_array::GenericArray;
use cipher::{BlockEncrypt, KeyInit};
use tiny_keccak::{Hasher, Keccak};

#[derive(Clone)]
pub struct KeccakMac {
    secret: [u8; 32],
    hasher: Keccak,
}

impl fmt::Debug for KeccakMac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeccakMac")
            .field("digest", &hex::encode(self.digest()))
            .finish_non_exhaustive()
    }
}

impl KeccakMac {
    pub fn new(secret: [u8; 32]) -> Self {
        Self {
            secret,
            hasher: Keccak::v256(),
        }
    }

    /// Absorb raw bytes.
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// First 16 bytes of the digest of everything absorbed so far.
    pub fn digest(&self) -> [u8; 16] {
        let mut full = [0u8; 32];
        self.hasher.clone().finalize(&mut full);
        let mut out = [0u8; 16];
        out.copy_from_slice(&full[..16]);
        out
    }

    /// `update(aes(secret, digest) ^ seed)`, then return the new digest.
    fn mix(&mut self, seed: &[u8; 16]) -> [u8; 16] {
        let cipher = Aes256::new(GenericArray::from_slice(&self.secret));
        let mut block = self.digest();
        cipher.encrypt_block(GenericArray::from_mut_slice(&mut block));
        for (byte, seed_byte) in block.iter_mut().zip(seed) {
            *byte ^= seed_byte;
        }
        self.hasher.update(&block);
        self.digest()
    }

    /// Absorb an encrypted frame header and return the header MAC.
    pub fn update_header(&mut self, header_ciphertext: &[u8; 16]) -> [u8; 16] {
        self.mix(header_ciphertext)
    }

    /// Absorb an encrypted frame body and return the body MAC.
    pub fn update_body(&mut self, body_ciphertext: &[u8]) -> [u8; 16] {
        self.hasher.update(body_ciphertext);
        let seed = self.digest();
        self.mix(&seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_does_not_consume_state() {
        let mut mac = KeccakMac::new([7u8; 32]);
        mac.update(b"seed");
        assert_eq!(mac.digest(), mac.digest());

        let mut split = KeccakMac::new([7u8; 32]);
        split.update(b"se");
        split.update(b"ed");
        assert_eq!(split.digest(), mac.digest());
    }

    #[test]
    fn test_header_mac_depends_on_secret_and_history() {
        let header = [0xab; 16];
        let mut a = KeccakMac::new([1u8; 32]);
        let mut b = KeccakMac::new([2u8; 32]);
        assert_ne!(a.update_header(&header), b.update_header(&header));

        let mut c = KeccakMac::new([1u8; 32]);
        c.update(b"extra");
        let mut d = KeccakMac::new([1u8; 32]);
        assert_ne!(c.update_header(&header), d.update_header(&header));
    }

    #[test]
    fn test_peers_in_lockstep_agree() {
        let mut egress = KeccakMac::new([9u8; 32]);
        let mut ingress = egress.clone();
        for body in [&b"first"[..], &[0u8; 48][..], &b"third"[..]] {
            assert_eq!(egress.update_header(&[1u8; 16]), ingress.update_header(&[1u8; 16]));
            assert_eq!(egress.update_body(body), ingress.update_body(body));
        }
    }
}
