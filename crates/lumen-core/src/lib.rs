//! # Lumen Core
//!
//! Pure Rust Ethereum SPV verification logic.
//!
//! This crate contains **no networking code**. Everything a peer sends us
//! passes through these functions before being trusted.
//!
//! ## Trust Model
//!
//! - **Header chain** (`consensus` module): starting from a checkpoint header,
//!   every header must link to its parent by keccak256 hash. Proof-of-work is
//!   not checked (see [`consensus::validator`]).
//!
//! - **Execution proof verification** (`execution` module): verifies
//!   Merkle-Patricia trie proofs for account state against the state root of
//!   a header already accepted into the chain. Zero trust assumptions beyond
//!   that root.
//!
//! - **RLP** (`rlp` module): a strict codec. Non-canonical encodings are
//!   rejected so that decoded data can be re-hashed reliably.
//!
//! ## Usage
//!
//! ```ignore
//! use lumen_core::consensus::validate_headers;
//! use lumen_core::execution::proof::verify_account_proof;
//! ```

pub mod consensus;
pub mod execution;
pub mod hash;
pub mod rlp;
pub mod types;

// Re-export commonly used types for convenience
pub use consensus::{
    checkpoint::{parse_checkpoint_hash, parse_fixed_hex, parse_hex_bytes, CheckpointError, Network},
    validator::{validate_headers, BlockValidationError},
};
pub use execution::proof::{parse_proof_nodes, verify_account_proof, NodeType, ProofError, TrieNode};
pub use hash::{keccak256, EMPTY_TRIE_HASH};
pub use rlp::{RlpError, RlpItem};
pub use types::{chain::*, execution::*, transaction::*};

pub use alloy_primitives::U256;
