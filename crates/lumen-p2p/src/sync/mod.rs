//! Chain and account synchronisation on top of the task layer.

pub mod account_syncer;
pub mod block_syncer;
pub mod store;
pub mod transaction_sender;

use lumen_core::BlockValidationError;
use thiserror::Error;

use crate::crypto::CryptoError;

pub use account_syncer::AccountSyncer;
pub use block_syncer::{BlockSyncer, SyncStep};
pub use store::{ChainStore, MemoryStore};
pub use transaction_sender::TransactionSender;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Header batch rejected: {0}")]
    Validation(#[from] BlockValidationError),

    #[error("No common ancestor with the peer's fork below block {height}")]
    InvalidForkedPeer { height: u64 },

    #[error("The chain store holds no header to sync from")]
    EmptyStore,
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("No verified account state to take a nonce from")]
    NoAccountState,

    #[error("Signing failed: {0}")]
    Signing(#[from] CryptoError),

    #[error("Peer returned no transaction status")]
    NoStatus,

    #[error("Peer does not know the transaction")]
    UnknownStatus,

    #[error("Peer rejected the transaction: {message}")]
    Rejected { message: String },
}
