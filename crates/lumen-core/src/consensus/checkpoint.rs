use alloy_primitives::U256;
use hex_literal::hex;
use thiserror::Error;

use crate::rlp::RlpError;
use crate::types::chain::BlockHeader;

/// Errors that can occur while loading network parameters.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Checkpoint hex format invalid: {reason}")]
    InvalidFormat { reason: String },

    #[error("Checkpoint header does not decode: {0}")]
    InvalidHeader(#[from] RlpError),

    #[error("Unknown network preset {name}")]
    UnknownNetwork { name: String },
}

/// Parameters identifying the chain we follow, plus the trusted header
/// that header sync starts from when nothing has been stored yet.
///
/// The checkpoint is the one moment of "soft trust" in Lumen's lifecycle.
/// Every header after it must link back to it by hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Network {
    pub id: u64,
    pub genesis_hash: [u8; 32],
    pub checkpoint: BlockHeader,
}

impl Network {
    pub fn ropsten() -> Self {
        let checkpoint = BlockHeader {
            hash: hex!("8e979e196f08a06ecd3e7bbbf83b387a5e429b43a6694df7b01b9402a272eec6"),
            parent_hash: hex!("91690d0990e80aa73341926434746bb532194204d81b0736cc5f147a60c0824f"),
            uncles_hash: hex!("1dcc4de8dec75d7aab85b567b6ccd41ad312451b948a7413f0a142fd40d49347"),
            coinbase: hex!("b17fc44dd79d21cd7f4d8c9686c98ae9039b3909"),
            state_root: hex!("a44e837fc749e7fb4dea349c37f6c4d0c2306fe7452d3865e4e75179bdf54e8c"),
            transactions_root: hex!(
                "b3a7a2911892b1e26a8beadf9931861a66227698e352a976af8a00948bc9d547"
            ),
            receipts_root: hex!("1b6d1dcc3549c4dbc1c211b17d075457a9930cd9effd82e68a21742350590782"),
            logs_bloom: hex!(
                "00000000000042000000000000000000000030000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000"
                "00000800000020000000000800000000000000004000000000000000000000000000000000000000000000000000000000001000000000000000001000000000"
                "00000000000000000000001000000000000000010000000100000000000000000800000000000000000000000000040000100000000002000000000000000000"
                "00000002000000000100000000000010000000000000000000000000002000000000000000000000000000000000000000004000000000000100000004000000"
            ),
            difficulty: U256::from(0x21F5_1199u64),
            height: 5_049_204,
            gas_limit: 0x7A_121D,
            gas_used: 1_098_844,
            timestamp: 1_550_569_079,
            extra_data: hex!("de830203018f5061726974792d457468657265756d86312e33312e31826c69").to_vec(),
            mix_hash: hex!("d95fe97e78ae762fbccf683c433fcfa72b137757e602dffd5e8e26b3ba3a02f8"),
            nonce: hex!("2bb183a1640b7c81"),
            base_fee_per_gas: None,
            total_difficulty: U256::from(18_284_610_994_619_994u64),
        };

        Self {
            id: 3,
            genesis_hash: hex!("41941023680923e0fe4d74a34bdac8141f2540e3ae90623718e47d66d1ca4a2d"),
            checkpoint,
        }
    }

    /// Look up a built-in network by name.
    pub fn preset(name: &str) -> Result<Self, CheckpointError> {
        match name {
            "ropsten" => Ok(Self::ropsten()),
            _ => Err(CheckpointError::UnknownNetwork {
                name: name.to_string(),
            }),
        }
    }

    /// Build a custom network from a checkpoint header given as RLP hex.
    pub fn custom(
        id: u64,
        genesis_hash: &str,
        checkpoint_rlp: &str,
        total_difficulty: U256,
    ) -> Result<Self, CheckpointError> {
        let mut checkpoint = BlockHeader::from_rlp(&parse_hex_bytes(checkpoint_rlp)?)?;
        checkpoint.total_difficulty = total_difficulty;
        Ok(Self {
            id,
            genesis_hash: parse_checkpoint_hash(genesis_hash)?,
            checkpoint,
        })
    }
}

/// Parse a hex string of any length, with or without a 0x prefix.
pub fn parse_hex_bytes(hex_str: &str) -> Result<Vec<u8>, CheckpointError> {
    let hex_str = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    hex::decode(hex_str).map_err(|e| CheckpointError::InvalidFormat {
        reason: format!("Invalid hex: {}", e),
    })
}

/// Parse a hex string that must decode to exactly `N` bytes.
pub fn parse_fixed_hex<const N: usize>(hex_str: &str) -> Result<[u8; N], CheckpointError> {
    let bytes = parse_hex_bytes(hex_str)?;
    if bytes.len() != N {
        return Err(CheckpointError::InvalidFormat {
            reason: format!("Expected {} hex characters, got {}", N * 2, bytes.len() * 2),
        });
    }
    let mut result = [0u8; N];
    result.copy_from_slice(&bytes);
    Ok(result)
}

/// Parse a hex-encoded 32-byte hash.
pub fn parse_checkpoint_hash(hex_str: &str) -> Result<[u8; 32], CheckpointError> {
    parse_fixed_hex(hex_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_lookup() {
        let network = Network::preset("ropsten").unwrap();
        assert_eq!(network.id, 3);
        assert!(matches!(
            Network::preset("kovan"),
            Err(CheckpointError::UnknownNetwork { .. })
        ));
    }

    #[test]
    fn test_custom_network_from_rlp() {
        let header = BlockHeader {
            height: 100,
            ..Default::default()
        }
        .sealed();
        let network = Network::custom(
            1,
            &format!("0x{}", hex::encode([0xd4; 32])),
            &hex::encode(header.encode()),
            U256::from(1000u64),
        )
        .unwrap();
        assert_eq!(network.checkpoint.hash, header.hash);
        assert_eq!(network.checkpoint.total_difficulty, U256::from(1000u64));
        assert_eq!(network.genesis_hash, [0xd4; 32]);
    }

    #[test]
    fn test_parse_checkpoint_hash() {
        let hash = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
        let result = parse_checkpoint_hash(hash).unwrap();
        assert_eq!(result, [0xAA; 32]);
    }

    #[test]
    fn test_parse_checkpoint_hash_no_prefix() {
        let hash = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
        let result = parse_checkpoint_hash(hash).unwrap();
        assert_eq!(result, [0xBB; 32]);
    }

    #[test]
    fn test_parse_checkpoint_hash_invalid_length() {
        let result = parse_checkpoint_hash("0xaabb");
        assert!(matches!(
            result,
            Err(CheckpointError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn test_parse_fixed_hex_address() {
        let address: [u8; 20] = parse_fixed_hex("0x5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a").unwrap();
        assert_eq!(address, [0x5a; 20]);
        assert!(parse_fixed_hex::<20>("zz").is_err());
    }
}
