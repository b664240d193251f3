//! The four messages devp2p handles itself.

use lumen_core::rlp::{self, RlpError};

use super::capability::Capability;
use super::disconnect::DisconnectReason;
use crate::crypto::NodeId;

pub const HELLO: u64 = 0x00;
pub const DISCONNECT: u64 = 0x01;
pub const PING: u64 = 0x02;
pub const PONG: u64 = 0x03;

/// Base protocol version. Version 5 would switch payloads to snappy.
pub const P2P_VERSION: u64 = 4;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HelloMessage {
    pub p2p_version: u64,
    pub client_id: String,
    pub capabilities: Vec<Capability>,
    pub listen_port: u64,
    pub node_id: NodeId,
}

impl HelloMessage {
    pub fn encode(&self) -> Vec<u8> {
        let capabilities: Vec<Vec<u8>> = self
            .capabilities
            .iter()
            .map(|cap| rlp::encode_list(&[rlp::encode_str(&cap.name), rlp::encode_u64(cap.version)]))
            .collect();
        rlp::encode_list(&[
            rlp::encode_u64(self.p2p_version),
            rlp::encode_str(&self.client_id),
            rlp::encode_list(&capabilities),
            rlp::encode_u64(self.listen_port),
            rlp::encode_bytes(&self.node_id),
        ])
    }

    pub fn decode(payload: &[u8]) -> Result<Self, RlpError> {
        let item = rlp::decode(payload)?;
        let capabilities = item
            .element(2)?
            .as_list()?
            .iter()
            .map(|cap| {
                Ok(Capability::remote(
                    cap.element(0)?.as_str()?,
                    cap.element(1)?.as_u64()?,
                ))
            })
            .collect::<Result<Vec<_>, RlpError>>()?;

        Ok(Self {
            p2p_version: item.element(0)?.as_u64()?,
            client_id: item.element(1)?.as_str()?.to_string(),
            capabilities,
            listen_port: item.element(3)?.as_u64()?,
            node_id: item.element(4)?.as_fixed()?,
        })
    }
}

/// A decoded base-protocol message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum P2pMessage {
    Hello(HelloMessage),
    /// `None` when the peer sent a reason code we do not recognise.
    Disconnect(Option<DisconnectReason>),
    Ping,
    Pong,
}

impl P2pMessage {
    pub fn code(&self) -> u64 {
        match self {
            P2pMessage::Hello(_) => HELLO,
            P2pMessage::Disconnect(_) => DISCONNECT,
            P2pMessage::Ping => PING,
            P2pMessage::Pong => PONG,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            P2pMessage::Hello(hello) => hello.encode(),
            P2pMessage::Disconnect(reason) => reason
                .unwrap_or(DisconnectReason::DisconnectRequested)
                .encode(),
            P2pMessage::Ping | P2pMessage::Pong => rlp::encode_list(&[]),
        }
    }

    /// `Ok(None)` for codes outside the base protocol.
    pub fn decode(code: u64, payload: &[u8]) -> Result<Option<Self>, RlpError> {
        let message = match code {
            HELLO => P2pMessage::Hello(HelloMessage::decode(payload)?),
            DISCONNECT => P2pMessage::Disconnect(DisconnectReason::decode(payload)?),
            PING => P2pMessage::Ping,
            PONG => P2pMessage::Pong,
            _ => return Ok(None),
        };
        Ok(Some(message))
    }
}
