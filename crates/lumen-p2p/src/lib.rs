//! # Lumen P2P
//!
//! Everything in the Lumen light client that touches a socket or a secret.
//! Connects to a single Ethereum node over RLPx, speaks devp2p and the Light
//! Ethereum Subprotocol (les/2), and keeps a verified header chain and
//! account state in step with the peer.
//!
//! ## Layers
//!
//! - [`rlpx`]: ECIES handshake, then AES-CTR frames with running keccak MACs
//! - [`devp2p`]: Hello/Disconnect/Ping, capability negotiation
//! - [`les`]: Status exchange and the LES message catalogue
//! - [`tasks`]: request ids and response matching
//! - [`sync`]: header sync with fork recovery, account proofs, transaction submission
//! - [`session`] / [`client`]: the connection loop and its handle
//!
//! The protocol layers are sans-IO state machines. Only the session loop
//! reads and writes.
//!
//! ## Trust Model
//!
//! The peer is trusted for NOTHING. Headers must link to the checkpoint by
//! hash and account state must come with a Merkle proof against a header we
//! already accepted; both checks live in `lumen-core`. A peer that fails
//! either is disconnected.

pub mod client;
pub mod config;
pub mod crypto;
pub mod devp2p;
pub mod les;
pub mod rlpx;
pub mod session;
pub mod sync;
pub mod tasks;

pub use client::{ClientError, LightClient};
pub use config::{ClientConfig, ClientSettings, ConfigError, NetworkConfig, NodeConfig};
pub use session::{ClientEvent, Command, Session, SessionError};
pub use sync::{ChainStore, MemoryStore, SendError, SyncError};
