use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

use crate::rlp::{self, RlpError};

/// An Ethereum account as stored in the state trie.
/// Only ever built from a leaf that was verified against a header's state root.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    /// The account this state belongs to.
    pub address: [u8; 20],
    /// Number of transactions sent from this account.
    pub nonce: u64,
    /// Balance in wei.
    pub balance: U256,
    /// Root hash of the account's storage trie.
    /// For externally owned accounts (EOAs), this is the empty trie root.
    pub storage_root: [u8; 32],
    /// Keccak256 hash of the account's code.
    /// For EOAs, this is the hash of the empty string.
    pub code_hash: [u8; 32],
}

impl AccountState {
    /// keccak256 of empty bytes, the code hash of every EOA.
    pub const EMPTY_CODE_HASH: [u8; 32] = [
        0xc5, 0xd2, 0x46, 0x01, 0x86, 0xf7, 0x23, 0x3c, 0x92, 0x7e, 0x7d, 0xb2, 0xdc, 0xc7,
        0x03, 0xc0, 0xe5, 0x00, 0xb6, 0x53, 0xca, 0x82, 0x27, 0x3b, 0x7b, 0xfa, 0xd8, 0x04,
        0x5d, 0x85, 0xa4, 0x70,
    ];

    /// The root of an empty Merkle-Patricia trie.
    pub const EMPTY_STORAGE_ROOT: [u8; 32] = crate::hash::EMPTY_TRIE_HASH;

    /// Decode the trie leaf value `[nonce, balance, storageRoot, codeHash]`.
    pub fn decode(address: [u8; 20], value: &[u8]) -> Result<Self, RlpError> {
        let item = rlp::decode(value)?;
        Ok(Self {
            address,
            nonce: item.element(0)?.as_u64()?,
            balance: item.element(1)?.as_u256()?,
            storage_root: item.element(2)?.as_fixed()?,
            code_hash: item.element(3)?.as_fixed()?,
        })
    }

    /// The trie leaf value for this account.
    pub fn encode(&self) -> Vec<u8> {
        rlp::encode_list(&[
            rlp::encode_u64(self.nonce),
            rlp::encode_u256(&self.balance),
            rlp::encode_bytes(&self.storage_root),
            rlp::encode_bytes(&self.code_hash),
        ])
    }

    /// Check if this is a contract account (has code deployed).
    pub fn is_contract(&self) -> bool {
        self.code_hash != Self::EMPTY_CODE_HASH
    }

    /// Check if this account has a non-empty storage trie.
    pub fn has_storage(&self) -> bool {
        self.storage_root != Self::EMPTY_STORAGE_ROOT
    }

    /// Get balance as a hex string (no 0x prefix, leading zeros stripped).
    pub fn balance_hex(&self) -> String {
        format!("{:x}", self.balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> AccountState {
        AccountState {
            address: [0xaa; 20],
            nonce: 3,
            balance: U256::from(0x1bc16d674ec80000u64),
            storage_root: AccountState::EMPTY_STORAGE_ROOT,
            code_hash: AccountState::EMPTY_CODE_HASH,
        }
    }

    #[test]
    fn test_account_value_roundtrip() {
        let state = account();
        let decoded = AccountState::decode(state.address, &state.encode()).unwrap();
        assert_eq!(decoded, state);
        assert!(!decoded.is_contract());
        assert!(!decoded.has_storage());
    }

    #[test]
    fn test_balance_hex() {
        assert_eq!(account().balance_hex(), "1bc16d674ec80000");
        let empty = AccountState {
            balance: U256::ZERO,
            ..account()
        };
        assert_eq!(empty.balance_hex(), "0");
    }

    #[test]
    fn test_account_state_json() {
        let json = serde_json::to_string(&account()).unwrap();
        let back: AccountState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, account());
    }

    #[test]
    fn test_account_value_needs_four_fields() {
        let value = rlp::encode_list(&[rlp::encode_u64(1), rlp::encode_u64(2)]);
        assert!(matches!(
            AccountState::decode([0u8; 20], &value),
            Err(RlpError::MissingElement { index: 2, .. })
        ));
    }
}
