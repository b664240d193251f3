//! Client configuration.
//!
//! [`ClientConfig`] is the serialisable form, with hex strings as they would
//! appear in a JSON file. [`ClientConfig::settings`] checks every field and
//! produces the typed [`ClientSettings`] a session runs with.
//!
//! ```json
//! {
//!   "node": { "id": "<128 hex chars>", "host": "127.0.0.1", "port": 30303 },
//!   "private_key": "<64 hex chars>",
//!   "network": "ropsten",
//!   "address": "<40 hex chars>",
//!   "chain_id": 3
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use k256::{PublicKey, SecretKey};
use lumen_core::{parse_fixed_hex, CheckpointError, Network, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::{self, NodeId};

pub const DEFAULT_HEADERS_LIMIT: u64 = 50;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 100;
pub const DEFAULT_LISTEN_PORT: u16 = 30303;
pub const DEFAULT_CLIENT_ID: &str = concat!("lumen/v", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Config is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error(transparent)]
    Network(#[from] CheckpointError),
}

/// The one peer the client talks to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node id, the 64-byte public key in hex.
    pub id: String,
    pub host: String,
    pub port: u16,
}

impl NodeConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A built-in network by name, or a custom one with its own checkpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NetworkConfig {
    Preset(String),
    Custom {
        id: u64,
        genesis_hash: String,
        /// RLP of the checkpoint header, hex.
        checkpoint: String,
        /// Decimal total difficulty at the checkpoint.
        #[serde(default)]
        total_difficulty: Option<String>,
    },
}

impl NetworkConfig {
    pub fn resolve(&self) -> Result<Network, ConfigError> {
        match self {
            NetworkConfig::Preset(name) => Ok(Network::preset(name)?),
            NetworkConfig::Custom {
                id,
                genesis_hash,
                checkpoint,
                total_difficulty,
            } => {
                let total_difficulty = match total_difficulty {
                    Some(td) => U256::from_str_radix(td, 10).map_err(|e| {
                        ConfigError::InvalidField {
                            field: "network.total_difficulty",
                            reason: e.to_string(),
                        }
                    })?,
                    None => U256::ZERO,
                };
                Ok(Network::custom(*id, genesis_hash, checkpoint, total_difficulty)?)
            }
        }
    }
}

fn default_headers_limit() -> u64 {
    DEFAULT_HEADERS_LIMIT
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_read_timeout_ms() -> u64 {
    DEFAULT_READ_TIMEOUT_MS
}

fn default_outbound_queue_capacity() -> usize {
    DEFAULT_OUTBOUND_QUEUE_CAPACITY
}

fn default_listen_port() -> u16 {
    DEFAULT_LISTEN_PORT
}

fn default_client_id() -> String {
    DEFAULT_CLIENT_ID.to_string()
}

/// Configuration as read from disk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub node: NodeConfig,

    /// Static node key and transaction signing key, hex.
    pub private_key: String,

    pub network: NetworkConfig,

    /// Watched account, hex.
    pub address: String,

    /// EIP-155 chain id used when signing.
    pub chain_id: u64,

    /// Headers asked for per request.
    #[serde(default = "default_headers_limit")]
    pub headers_limit: u64,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Bounds the handshake and any frame once it has started arriving.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Pending commands before callers wait.
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,

    /// Port advertised in Hello. Nothing listens on it.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    #[serde(default = "default_client_id")]
    pub client_id: String,
}

impl ClientConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Validate every field and build the session settings.
    pub fn settings(&self) -> Result<ClientSettings, ConfigError> {
        let key_bytes: [u8; 32] = parse_field("private_key", &self.private_key)?;
        let secret_key =
            crypto::secret_key_from_bytes(&key_bytes).map_err(|e| invalid("private_key", e))?;

        let node_id: NodeId = parse_field("node.id", &self.node.id)?;
        let remote =
            crypto::public_key_from_node_id(&node_id).map_err(|e| invalid("node.id", e))?;

        // Every page repeats its anchor header, so one header per page never advances.
        if self.headers_limit < 2 {
            return Err(ConfigError::InvalidField {
                field: "headers_limit",
                reason: "must be at least 2".to_string(),
            });
        }
        if self.outbound_queue_capacity == 0 {
            return Err(ConfigError::InvalidField {
                field: "outbound_queue_capacity",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(ClientSettings {
            secret_key,
            remote,
            network: self.network.resolve()?,
            address: parse_field("address", &self.address)?,
            chain_id: self.chain_id,
            headers_limit: self.headers_limit,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            outbound_queue_capacity: self.outbound_queue_capacity,
            listen_port: self.listen_port,
            client_id: self.client_id.clone(),
        })
    }
}

fn parse_field<const N: usize>(field: &'static str, value: &str) -> Result<[u8; N], ConfigError> {
    parse_fixed_hex(value).map_err(|e| invalid(field, e))
}

fn invalid(field: &'static str, error: impl std::fmt::Display) -> ConfigError {
    ConfigError::InvalidField {
        field,
        reason: error.to_string(),
    }
}

/// Validated settings for one light client session.
#[derive(Clone, Debug)]
pub struct ClientSettings {
    pub secret_key: SecretKey,
    /// Static key of the peer.
    pub remote: PublicKey,
    pub network: Network,
    pub address: [u8; 20],
    pub chain_id: u64,
    pub headers_limit: u64,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub outbound_queue_capacity: usize,
    pub listen_port: u16,
    pub client_id: String,
}

impl ClientSettings {
    /// Settings with every tunable at its default.
    pub fn new(
        secret_key: SecretKey,
        remote: PublicKey,
        network: Network,
        address: [u8; 20],
        chain_id: u64,
    ) -> Self {
        Self {
            secret_key,
            remote,
            network,
            address,
            chain_id,
            headers_limit: DEFAULT_HEADERS_LIMIT,
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
            outbound_queue_capacity: DEFAULT_OUTBOUND_QUEUE_CAPACITY,
            listen_port: DEFAULT_LISTEN_PORT,
            client_id: DEFAULT_CLIENT_ID.to_string(),
        }
    }

    pub fn node_id(&self) -> NodeId {
        crypto::node_id(&self.secret_key.public_key())
    }
}
