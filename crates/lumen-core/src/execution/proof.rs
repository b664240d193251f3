use crate::hash::keccak256;
use crate::rlp::{self, RlpItem};
use crate::types::execution::AccountState;
use thiserror::Error;

/// Errors during Merkle-Patricia trie proof verification.
/// Each variant is specific enough to diagnose exactly what went wrong;
/// all of them mean the proved state must not be trusted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProofError {
    #[error("Empty proof: no trie nodes provided")]
    NoNodes,

    #[error("Invalid RLP encoding in proof node {index}: {reason}")]
    InvalidRlp { index: usize, reason: String },

    #[error("Deepest proof node is not a leaf holding the account")]
    StateNodeNotFound,

    #[error("Proof node {index} does not reference its child {child}")]
    NodesNotInterconnected { index: usize, child: String },

    #[error("Proof path {path} does not match keccak256(address) {expected}")]
    PathDoesNotMatchAddressHash { path: String, expected: String },

    #[error("Proof verification failed: computed root {computed} does not match state root {expected}")]
    RootHashDoesNotMatchStateRoot { computed: String, expected: String },

    #[error("Invalid account RLP encoding: {reason}")]
    InvalidAccountEncoding { reason: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeType {
    Branch,
    Extension,
    Leaf,
}

/// One node of a state proof.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrieNode {
    pub node_type: NodeType,
    /// Raw element payloads. Embedded child lists are kept in encoded form.
    pub elements: Vec<Vec<u8>>,
    /// Partial path in nibbles (leaf and extension nodes only).
    pub encoded_path: Option<Vec<u8>>,
    /// keccak256 of the node's RLP.
    pub hash: [u8; 32],
}

impl TrieNode {
    pub fn from_rlp(raw: &[u8]) -> Result<Self, String> {
        let item = rlp::decode(raw).map_err(|e| e.to_string())?;
        Self::from_item(&item)
    }

    pub fn from_item(item: &RlpItem) -> Result<Self, String> {
        let children = item.as_list().map_err(|e| e.to_string())?;
        let elements: Vec<Vec<u8>> = children
            .iter()
            .map(|child| match child {
                RlpItem::Bytes(bytes) => bytes.clone(),
                RlpItem::List(_) => child.encode(),
            })
            .collect();
        let hash = keccak256(&item.encode());

        match elements.len() {
            17 => Ok(Self {
                node_type: NodeType::Branch,
                elements,
                encoded_path: None,
                hash,
            }),
            2 => {
                let (nibbles, is_leaf) = decode_compact_path(&elements[0])?;
                Ok(Self {
                    node_type: if is_leaf {
                        NodeType::Leaf
                    } else {
                        NodeType::Extension
                    },
                    elements,
                    encoded_path: Some(nibbles),
                    hash,
                })
            }
            n => Err(format!("{n}-element list is not a trie node")),
        }
    }

    /// The partial path this node contributes on the way to `child`.
    ///
    /// A leaf answers only for `None` (it has no children); a branch answers
    /// with the single nibble of the slot holding `child`; an extension
    /// answers with its shared prefix if it points at `child`.
    pub fn path_to(&self, child: Option<&[u8; 32]>) -> Option<Vec<u8>> {
        match (self.node_type, child) {
            (NodeType::Leaf, None) => self.encoded_path.clone(),
            (NodeType::Branch, Some(child)) => self.elements[..16]
                .iter()
                .position(|element| element.as_slice() == child.as_slice())
                .map(|index| vec![index as u8]),
            (NodeType::Extension, Some(child)) if self.elements[1].as_slice() == child.as_slice() => {
                self.encoded_path.clone()
            }
            _ => None,
        }
    }
}

/// Parse raw proof nodes, reporting which one is malformed.
pub fn parse_proof_nodes(raw_nodes: &[Vec<u8>]) -> Result<Vec<TrieNode>, ProofError> {
    raw_nodes
        .iter()
        .enumerate()
        .map(|(index, raw)| {
            TrieNode::from_rlp(raw).map_err(|reason| ProofError::InvalidRlp { index, reason })
        })
        .collect()
}

/// Verify an account proof against a known state root.
///
/// `nodes` are ordered root first. The walk starts at the leaf, climbs
/// towards the root collecting the path, and only then compares the path
/// with keccak256(address) and the top node's hash with `state_root`.
///
/// IMPORTANT: The state root must come from our verified chain state.
/// Never accept a state root from an untrusted source.
pub fn verify_account_proof(
    state_root: [u8; 32],
    address: [u8; 20],
    nodes: &[TrieNode],
) -> Result<AccountState, ProofError> {
    let leaf = nodes.last().ok_or(ProofError::NoNodes)?;
    if leaf.node_type != NodeType::Leaf {
        return Err(ProofError::StateNodeNotFound);
    }

    let account = AccountState::decode(address, &leaf.elements[1]).map_err(|e| {
        ProofError::InvalidAccountEncoding {
            reason: e.to_string(),
        }
    })?;

    let mut path = leaf.path_to(None).ok_or(ProofError::StateNodeNotFound)?;
    let mut last_key = leaf.hash;

    for (index, node) in nodes[..nodes.len() - 1].iter().enumerate().rev() {
        let partial = node
            .path_to(Some(&last_key))
            .ok_or_else(|| ProofError::NodesNotInterconnected {
                index,
                child: hex::encode(last_key),
            })?;
        path = [partial, path].concat();
        last_key = node.hash;
    }

    let expected = bytes_to_nibbles(&keccak256(&address));
    if path != expected {
        return Err(ProofError::PathDoesNotMatchAddressHash {
            path: nibbles_to_hex(&path),
            expected: nibbles_to_hex(&expected),
        });
    }

    if last_key != state_root {
        return Err(ProofError::RootHashDoesNotMatchStateRoot {
            computed: hex::encode(last_key),
            expected: hex::encode(state_root),
        });
    }

    Ok(account)
}

// --- Path helpers ---

/// Convert a 32-byte array to nibbles (4 bits each).
fn bytes_to_nibbles(bytes: &[u8; 32]) -> Vec<u8> {
    let mut nibbles = Vec::with_capacity(64);
    for byte in bytes {
        nibbles.push(byte >> 4);
        nibbles.push(byte & 0x0F);
    }
    nibbles
}

fn nibbles_to_hex(nibbles: &[u8]) -> String {
    nibbles
        .iter()
        .map(|n| char::from_digit(u32::from(*n), 16).unwrap_or('?'))
        .collect()
}

/// Decode compact (hex-prefix) encoding used in trie nodes.
/// Returns (nibbles, is_leaf).
fn decode_compact_path(encoded: &[u8]) -> Result<(Vec<u8>, bool), String> {
    let first = *encoded.first().ok_or("Empty compact path")?;

    let flag = first >> 4;
    if flag > 3 {
        return Err(format!("Unknown compact path flag {flag}"));
    }
    let is_leaf = flag >= 2;
    let is_odd = flag % 2 == 1;

    let mut nibbles = Vec::with_capacity(encoded.len() * 2);

    if is_odd {
        nibbles.push(first & 0x0F);
    }

    for &byte in &encoded[1..] {
        nibbles.push(byte >> 4);
        nibbles.push(byte & 0x0F);
    }

    Ok((nibbles, is_leaf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::U256;

    const ADDRESS: [u8; 20] = [0x5a; 20];

    fn compact(nibbles: &[u8], leaf: bool) -> Vec<u8> {
        let flag = if leaf { 2 } else { 0 } + (nibbles.len() % 2) as u8;
        let mut out = Vec::new();
        let rest = if nibbles.len() % 2 == 1 {
            out.push((flag << 4) | nibbles[0]);
            &nibbles[1..]
        } else {
            out.push(flag << 4);
            nibbles
        };
        for pair in rest.chunks(2) {
            out.push((pair[0] << 4) | pair[1]);
        }
        out
    }

    fn account() -> AccountState {
        AccountState {
            address: ADDRESS,
            nonce: 7,
            balance: U256::from(1_000_000_000_000_000_000u64),
            storage_root: AccountState::EMPTY_STORAGE_ROOT,
            code_hash: AccountState::EMPTY_CODE_HASH,
        }
    }

    fn leaf(path: &[u8]) -> Vec<u8> {
        rlp::encode_list(&[
            rlp::encode_bytes(&compact(path, true)),
            rlp::encode_bytes(&account().encode()),
        ])
    }

    fn branch(slot: u8, child: &[u8]) -> Vec<u8> {
        let mut elements = vec![rlp::encode_bytes(&[]); 17];
        elements[usize::from(slot)] = rlp::encode_bytes(&keccak256(child));
        rlp::encode_list(&elements)
    }

    fn extension(prefix: &[u8], child: &[u8]) -> Vec<u8> {
        rlp::encode_list(&[
            rlp::encode_bytes(&compact(prefix, false)),
            rlp::encode_bytes(&keccak256(child)),
        ])
    }

    fn key_nibbles() -> Vec<u8> {
        bytes_to_nibbles(&keccak256(&ADDRESS))
    }

    /// extension(2 nibbles) -> branch -> leaf(61 nibbles)
    fn three_level_proof() -> ([u8; 32], Vec<Vec<u8>>) {
        let key = key_nibbles();
        let leaf = leaf(&key[3..]);
        let branch = branch(key[2], &leaf);
        let extension = extension(&key[..2], &branch);
        (keccak256(&extension), vec![extension, branch, leaf])
    }

    #[test]
    fn test_single_leaf_proof() {
        let raw = leaf(&key_nibbles());
        let state_root = keccak256(&raw);
        let nodes = parse_proof_nodes(&[raw]).unwrap();

        let state = verify_account_proof(state_root, ADDRESS, &nodes).unwrap();
        assert_eq!(state, account());
    }

    #[test]
    fn test_branch_and_extension_proof() {
        let (state_root, raw) = three_level_proof();
        let nodes = parse_proof_nodes(&raw).unwrap();
        assert_eq!(nodes[0].node_type, NodeType::Extension);
        assert_eq!(nodes[1].node_type, NodeType::Branch);
        assert_eq!(nodes[2].node_type, NodeType::Leaf);

        let state = verify_account_proof(state_root, ADDRESS, &nodes).unwrap();
        assert_eq!(state.nonce, 7);
    }

    #[test]
    fn test_empty_proof() {
        assert!(matches!(
            verify_account_proof([0u8; 32], ADDRESS, &[]),
            Err(ProofError::NoNodes)
        ));
    }

    #[test]
    fn test_last_node_must_be_leaf() {
        let (state_root, raw) = three_level_proof();
        let nodes = parse_proof_nodes(&raw[..2]).unwrap();
        assert!(matches!(
            verify_account_proof(state_root, ADDRESS, &nodes),
            Err(ProofError::StateNodeNotFound)
        ));
    }

    #[test]
    fn test_disconnected_nodes() {
        let key = key_nibbles();
        let leaf_raw = leaf(&key[1..]);
        let unrelated = branch(key[0], b"some other node");
        let nodes = parse_proof_nodes(&[unrelated, leaf_raw]).unwrap();
        assert!(matches!(
            verify_account_proof([0u8; 32], ADDRESS, &nodes),
            Err(ProofError::NodesNotInterconnected { index: 0, .. })
        ));
    }

    #[test]
    fn test_wrong_address() {
        let raw = leaf(&key_nibbles());
        let state_root = keccak256(&raw);
        let nodes = parse_proof_nodes(&[raw]).unwrap();
        assert!(matches!(
            verify_account_proof(state_root, [0x11; 20], &nodes),
            Err(ProofError::PathDoesNotMatchAddressHash { .. })
        ));
    }

    #[test]
    fn test_wrong_state_root() {
        let (_, raw) = three_level_proof();
        let nodes = parse_proof_nodes(&raw).unwrap();
        assert!(matches!(
            verify_account_proof([0xee; 32], ADDRESS, &nodes),
            Err(ProofError::RootHashDoesNotMatchStateRoot { .. })
        ));
    }

    #[test]
    fn test_any_corrupted_byte_is_rejected_deterministically() {
        let (state_root, raw) = three_level_proof();
        for node in 0..raw.len() {
            for position in 0..raw[node].len() {
                let mut corrupted = raw.clone();
                corrupted[node][position] ^= 0x01;

                let attempt = || {
                    parse_proof_nodes(&corrupted)
                        .and_then(|nodes| verify_account_proof(state_root, ADDRESS, &nodes))
                };
                let first = attempt();
                assert!(first.is_err(), "node {node} byte {position} accepted");
                assert_eq!(first, attempt());
            }
        }
    }

    #[test]
    fn test_bytes_to_nibbles() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xAB;
        bytes[1] = 0xCD;
        let nibbles = bytes_to_nibbles(&bytes);
        assert_eq!(nibbles.len(), 64);
        assert_eq!(&nibbles[..5], &[0xA, 0xB, 0xC, 0xD, 0x0]);
    }

    #[test]
    fn test_decode_compact_path_variants() {
        assert_eq!(
            decode_compact_path(&[0x00, 0xAB, 0xCD]).unwrap(),
            (vec![0xA, 0xB, 0xC, 0xD], false)
        );
        assert_eq!(
            decode_compact_path(&[0x1A, 0xBC]).unwrap(),
            (vec![0xA, 0xB, 0xC], false)
        );
        assert_eq!(decode_compact_path(&[0x20, 0xAB]).unwrap(), (vec![0xA, 0xB], true));
        assert_eq!(
            decode_compact_path(&[0x3A, 0xBC]).unwrap(),
            (vec![0xA, 0xB, 0xC], true)
        );
        assert!(decode_compact_path(&[0x4A]).is_err());
        assert!(decode_compact_path(&[]).is_err());
    }
}
