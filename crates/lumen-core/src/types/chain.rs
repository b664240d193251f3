use alloy_primitives::U256;

use crate::hash::{keccak256, EMPTY_TRIE_HASH};
use crate::rlp::{self, RlpError, RlpItem};

/// Number of RLP fields in a pre-London header.
const BASE_FIELD_COUNT: usize = 15;

/// An execution-layer block header.
///
/// `hash` is always the keccak256 of the header's RLP as it was received
/// (or as built by [`BlockHeader::sealed`]), never a value taken on trust.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    pub hash: [u8; 32],
    pub parent_hash: [u8; 32],
    pub uncles_hash: [u8; 32],
    pub coinbase: [u8; 20],
    pub state_root: [u8; 32],
    pub transactions_root: [u8; 32],
    pub receipts_root: [u8; 32],
    pub logs_bloom: [u8; 256],
    pub difficulty: U256,
    pub height: u64,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub timestamp: u64,
    pub extra_data: Vec<u8>,
    pub mix_hash: [u8; 32],
    pub nonce: [u8; 8],
    /// Present on post-London headers.
    pub base_fee_per_gas: Option<U256>,
    /// Chain weight up to and including this block. Not part of the hashed
    /// fields; known only for checkpoints and announced heads.
    pub total_difficulty: U256,
}

impl Default for BlockHeader {
    fn default() -> Self {
        Self {
            hash: [0u8; 32],
            parent_hash: [0u8; 32],
            uncles_hash: [0u8; 32],
            coinbase: [0u8; 20],
            state_root: EMPTY_TRIE_HASH,
            transactions_root: EMPTY_TRIE_HASH,
            receipts_root: EMPTY_TRIE_HASH,
            logs_bloom: [0u8; 256],
            difficulty: U256::ZERO,
            height: 0,
            gas_limit: 0,
            gas_used: 0,
            timestamp: 0,
            extra_data: Vec::new(),
            mix_hash: [0u8; 32],
            nonce: [0u8; 8],
            base_fee_per_gas: None,
            total_difficulty: U256::ZERO,
        }
    }
}

fn root_or_empty(item: &RlpItem) -> Result<[u8; 32], RlpError> {
    if item.as_bytes()?.is_empty() {
        Ok(EMPTY_TRIE_HASH)
    } else {
        item.as_fixed::<32>()
    }
}

impl BlockHeader {
    /// Decode a header from one element of a `BlockHeaders` list.
    pub fn decode(item: &RlpItem) -> Result<Self, RlpError> {
        let fields = item.as_list()?;
        if fields.len() < BASE_FIELD_COUNT {
            return Err(RlpError::MissingElement {
                index: BASE_FIELD_COUNT - 1,
                actual: fields.len(),
            });
        }

        let base_fee_per_gas = match fields.get(BASE_FIELD_COUNT) {
            Some(fee) => Some(fee.as_u256()?),
            None => None,
        };

        Ok(Self {
            hash: keccak256(&item.encode()),
            parent_hash: fields[0].as_fixed()?,
            uncles_hash: fields[1].as_fixed()?,
            coinbase: fields[2].as_fixed()?,
            state_root: fields[3].as_fixed()?,
            transactions_root: root_or_empty(&fields[4])?,
            receipts_root: root_or_empty(&fields[5])?,
            logs_bloom: fields[6].as_fixed()?,
            difficulty: fields[7].as_u256()?,
            height: fields[8].as_u64()?,
            gas_limit: fields[9].as_u64()?,
            gas_used: fields[10].as_u64()?,
            timestamp: fields[11].as_u64()?,
            extra_data: fields[12].as_bytes()?.to_vec(),
            mix_hash: fields[13].as_fixed()?,
            nonce: fields[14].as_fixed()?,
            base_fee_per_gas,
            total_difficulty: U256::ZERO,
        })
    }

    pub fn from_rlp(bytes: &[u8]) -> Result<Self, RlpError> {
        Self::decode(&rlp::decode(bytes)?)
    }

    /// RLP of the hashed header fields.
    pub fn encode(&self) -> Vec<u8> {
        let mut fields = vec![
            rlp::encode_bytes(&self.parent_hash),
            rlp::encode_bytes(&self.uncles_hash),
            rlp::encode_bytes(&self.coinbase),
            rlp::encode_bytes(&self.state_root),
            rlp::encode_bytes(&self.transactions_root),
            rlp::encode_bytes(&self.receipts_root),
            rlp::encode_bytes(&self.logs_bloom),
            rlp::encode_u256(&self.difficulty),
            rlp::encode_u64(self.height),
            rlp::encode_u64(self.gas_limit),
            rlp::encode_u64(self.gas_used),
            rlp::encode_u64(self.timestamp),
            rlp::encode_bytes(&self.extra_data),
            rlp::encode_bytes(&self.mix_hash),
            rlp::encode_bytes(&self.nonce),
        ];
        if let Some(fee) = &self.base_fee_per_gas {
            fields.push(rlp::encode_u256(fee));
        }
        rlp::encode_list(&fields)
    }

    /// Recompute `hash` from the current fields.
    pub fn sealed(mut self) -> Self {
        self.hash = keccak256(&self.encode());
        self
    }

    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash)
    }
}
