//! LES, the light Ethereum subprotocol (les/2).

pub mod messages;
pub mod peer;

use lumen_core::rlp::RlpError;
use thiserror::Error;

use crate::devp2p::Capability;

pub use messages::{
    AnnounceMessage, BlockHeadersMessage, BlockId, GetBlockHeadersMessage, GetProofsMessage,
    LesMessage, ProofRequest, ProofsMessage, SendTransactionMessage, StatusMessage,
    TransactionStatus, TxStatusMessage,
};
pub use peer::{validate_status, LesEvent, LesPeer, PeerError};

pub const LES_NAME: &str = "les";
pub const LES_VERSION: u64 = 2;

/// Codes 0x00..=0x15 belong to les/2.
pub const LES_MESSAGE_COUNT: u64 = 0x16;

pub fn les_capability() -> Capability {
    Capability::new(LES_NAME, LES_VERSION, LES_MESSAGE_COUNT)
}

#[derive(Debug, Error)]
pub enum LesError {
    #[error("Malformed LES message {code:#x}: {source}")]
    InvalidMessage {
        code: u64,
        #[source]
        source: RlpError,
    },

    #[error("Status message has no {key} entry")]
    MissingStatusField { key: &'static str },

    #[error("LES message {code:#x} is not supported")]
    UnsupportedMessage { code: u64 },
}
