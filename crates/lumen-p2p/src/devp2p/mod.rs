//! devp2p: the base protocol spoken over an RLPx stream.
//!
//! [`peer::DevP2pPeer`] is a pure state machine. It consumes decrypted
//! frames and produces frames to send, so the connection loop owns all I/O.

pub mod capability;
pub mod disconnect;
pub mod messages;
pub mod peer;

use lumen_core::rlp::RlpError;
use thiserror::Error;

pub use capability::{shared_capabilities, Capability, SharedCapability, BASE_PROTOCOL_LENGTH};
pub use disconnect::DisconnectReason;
pub use messages::{HelloMessage, P2pMessage, P2P_VERSION};
pub use peer::{DevP2pPeer, PeerEvent, PeerState};

#[derive(Debug, Error)]
pub enum DevP2pError {
    #[error("Peer shares no capability with us")]
    NoCommonCapabilities,

    #[error("Message code {code:#x} is not assigned to any shared capability")]
    UnknownMessageCode { code: u64 },

    #[error("Message {code:#x} arrived before the Hello exchange completed")]
    NotEstablished { code: u64 },

    #[error("Peer sent a second Hello")]
    UnexpectedHello,

    #[error("Malformed devp2p message {code:#x}: {source}")]
    InvalidMessage {
        code: u64,
        #[source]
        source: RlpError,
    },

    #[error("Capability {name} was not negotiated")]
    CapabilityNotShared { name: String },

    #[error("Message code {code} is outside capability {name}")]
    CodeOutOfRange { name: String, code: u64 },
}
