use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

use crate::hash::keccak256;
use crate::rlp::{self, RlpError, RlpItem};

/// A legacy value transfer or call, before a nonce and signature are attached.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTransaction {
    pub gas_price: u64,
    pub gas_limit: u64,
    pub to: [u8; 20],
    pub value: U256,
    pub data: Vec<u8>,
}

/// EIP-155 signature components.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub v: u64,
    pub r: [u8; 32],
    pub s: [u8; 32],
}

impl RawTransaction {
    fn fields(&self, nonce: u64) -> Vec<Vec<u8>> {
        vec![
            rlp::encode_u64(nonce),
            rlp::encode_u64(self.gas_price),
            rlp::encode_u64(self.gas_limit),
            rlp::encode_bytes(&self.to),
            rlp::encode_u256(&self.value),
            rlp::encode_bytes(&self.data),
        ]
    }

    /// The EIP-155 preimage hash: `keccak(rlp([nonce, gasPrice, gasLimit, to, value, data, chainId, 0, 0]))`.
    pub fn signing_hash(&self, nonce: u64, chain_id: u64) -> [u8; 32] {
        let mut fields = self.fields(nonce);
        fields.push(rlp::encode_u64(chain_id));
        fields.push(rlp::encode_u64(0));
        fields.push(rlp::encode_u64(0));
        keccak256(&rlp::encode_list(&fields))
    }

    /// The signed transaction as it goes on the wire.
    pub fn encode_signed(&self, nonce: u64, signature: &Signature) -> Vec<u8> {
        let mut fields = self.fields(nonce);
        fields.push(rlp::encode_u64(signature.v));
        fields.push(rlp::encode_uint_bytes(&signature.r));
        fields.push(rlp::encode_uint_bytes(&signature.s));
        rlp::encode_list(&fields)
    }
}

/// A signed transaction handed to a peer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub hash: [u8; 32],
    pub nonce: u64,
    pub gas_price: u64,
    pub gas_limit: u64,
    pub to: [u8; 20],
    pub value: U256,
    pub data: Vec<u8>,
    pub signature: Signature,
}

impl Transaction {
    pub fn new(raw: &RawTransaction, nonce: u64, signature: Signature) -> Self {
        Self {
            hash: keccak256(&raw.encode_signed(nonce, &signature)),
            nonce,
            gas_price: raw.gas_price,
            gas_limit: raw.gas_limit,
            to: raw.to,
            value: raw.value,
            data: raw.data.clone(),
            signature,
        }
    }

    pub fn raw(&self) -> RawTransaction {
        RawTransaction {
            gas_price: self.gas_price,
            gas_limit: self.gas_limit,
            to: self.to,
            value: self.value,
            data: self.data.clone(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        self.raw().encode_signed(self.nonce, &self.signature)
    }

    /// Decode a signed legacy transaction.
    pub fn decode(item: &RlpItem) -> Result<Self, RlpError> {
        let raw = RawTransaction {
            gas_price: item.element(1)?.as_u64()?,
            gas_limit: item.element(2)?.as_u64()?,
            to: item.element(3)?.as_fixed()?,
            value: item.element(4)?.as_u256()?,
            data: item.element(5)?.as_bytes()?.to_vec(),
        };
        let signature = Signature {
            v: item.element(6)?.as_u64()?,
            r: left_pad(item.element(7)?.as_bytes()?)?,
            s: left_pad(item.element(8)?.as_bytes()?)?,
        };
        Ok(Self::new(&raw, item.element(0)?.as_u64()?, signature))
    }
}

fn left_pad(bytes: &[u8]) -> Result<[u8; 32], RlpError> {
    if bytes.len() > 32 {
        return Err(RlpError::IntegerOverflow {
            len: bytes.len(),
            bits: 256,
        });
    }
    let mut out = [0u8; 32];
    out[32 - bytes.len()..].copy_from_slice(bytes);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    fn eip155_example() -> RawTransaction {
        RawTransaction {
            gas_price: 20_000_000_000,
            gas_limit: 21_000,
            to: hex!("3535353535353535353535353535353535353535"),
            value: U256::from(1_000_000_000_000_000_000u64),
            data: Vec::new(),
        }
    }

    #[test]
    fn test_eip155_signing_hash() {
        // Example from the EIP-155 text (nonce 9, chain id 1).
        assert_eq!(
            eip155_example().signing_hash(9, 1),
            hex!("daf5a779ae972f972197303d7b574746c7ef83eadac0f2791ad23db92e4c8e53")
        );
    }

    #[test]
    fn test_signed_transaction_roundtrip() {
        let signature = Signature {
            v: 37,
            r: hex!("28ef61340bd939bc2195fe537567866003e1a15d3c71ff63e1590620aa636276"),
            s: hex!("67cbe9d8997f761aecb703304b3800ccf555c9f3dc64214b297fb1966a3b6d83"),
        };
        let transaction = Transaction::new(&eip155_example(), 9, signature);
        assert_eq!(
            transaction.encode(),
            hex!("f86c098504a817c800825208943535353535353535353535353535353535353535880de0b6b3a76400008025a028ef61340bd939bc2195fe537567866003e1a15d3c71ff63e1590620aa636276a067cbe9d8997f761aecb703304b3800ccf555c9f3dc64214b297fb1966a3b6d83").to_vec()
        );

        let decoded = Transaction::decode(&rlp::decode(&transaction.encode()).unwrap()).unwrap();
        assert_eq!(decoded, transaction);
    }
}
