use thiserror::Error;
use tracing::{debug, trace};

use super::messages::{LesMessage, StatusMessage};
use super::{les_capability, LesError, LES_NAME, LES_VERSION};
use crate::crypto::NodeId;
use crate::devp2p::{DevP2pError, DevP2pPeer, DisconnectReason, PeerEvent, PeerState};
use crate::rlpx::Frame;

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("Peer speaks les/{received}, expected les/{expected}")]
    InvalidProtocolVersion { expected: u64, received: u64 },

    #[error("Peer is on network {received}, expected {expected}")]
    WrongNetwork { expected: u64, received: u64 },

    #[error("Peer genesis {received} does not match {expected}")]
    WrongGenesis { expected: String, received: String },

    #[error("Peer head {remote} is behind our last known block {local}")]
    ExpiredBestBlockHeight { local: u64, remote: u64 },

    #[error("Peer sent a second Status")]
    UnexpectedStatus,

    #[error("LES message {code:#x} arrived before Status")]
    StatusNotReceived { code: u64 },

    #[error("Message from unexpected capability {name}")]
    UnexpectedCapability { name: String },

    #[error(transparent)]
    DevP2p(#[from] DevP2pError),

    #[error(transparent)]
    Les(#[from] LesError),
}

/// Check a remote Status against our network and last known height.
pub fn validate_status(
    status: &StatusMessage,
    network_id: u64,
    genesis_hash: &[u8; 32],
    local_height: u64,
) -> Result<(), PeerError> {
    if status.protocol_version != LES_VERSION {
        return Err(PeerError::InvalidProtocolVersion {
            expected: LES_VERSION,
            received: status.protocol_version,
        });
    }
    if status.network_id != network_id {
        return Err(PeerError::WrongNetwork {
            expected: network_id,
            received: status.network_id,
        });
    }
    if &status.genesis_hash != genesis_hash {
        return Err(PeerError::WrongGenesis {
            expected: hex::encode(genesis_hash),
            received: hex::encode(status.genesis_hash),
        });
    }
    if status.head_height < local_height {
        return Err(PeerError::ExpiredBestBlockHeight {
            local: local_height,
            remote: status.head_height,
        });
    }
    Ok(())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LesEvent {
    /// devp2p is established with les/2 shared; time to send Status.
    Connected,
    Message(LesMessage),
    Disconnected(Option<DisconnectReason>),
}

/// LES on top of a devp2p peer. Sans-IO like the layer below it.
pub struct LesPeer {
    devp2p: DevP2pPeer,
    status_received: bool,
}

impl LesPeer {
    pub fn new(node_id: NodeId, listen_port: u64, client_id: impl Into<String>) -> Self {
        Self {
            devp2p: DevP2pPeer::new(node_id, listen_port, client_id, vec![les_capability()]),
            status_received: false,
        }
    }

    pub fn state(&self) -> PeerState {
        self.devp2p.state()
    }

    pub fn devp2p(&self) -> &DevP2pPeer {
        &self.devp2p
    }

    /// Mark the transport ready and queue our Hello.
    pub fn start(&mut self, outbox: &mut Vec<Frame>) -> Result<Option<LesEvent>, PeerError> {
        self.devp2p.transport_ready();
        let (hello, event) = self.devp2p.hello_frame()?;
        outbox.push(hello);
        Ok(event.map(|_| LesEvent::Connected))
    }

    pub fn handle_frame(
        &mut self,
        frame: Frame,
        outbox: &mut Vec<Frame>,
    ) -> Result<Option<LesEvent>, PeerError> {
        let event = match self.devp2p.handle_frame(frame, outbox)? {
            None => return Ok(None),
            Some(event) => event,
        };

        match event {
            PeerEvent::Established(shared) => {
                debug!(
                    shared = ?shared.iter().map(|s| s.capability.to_string()).collect::<Vec<_>>(),
                    "devp2p established"
                );
                Ok(Some(LesEvent::Connected))
            }
            PeerEvent::Disconnected(reason) => Ok(Some(LesEvent::Disconnected(reason))),
            PeerEvent::Message {
                capability,
                code,
                payload,
            } => {
                if capability != LES_NAME {
                    return Err(PeerError::UnexpectedCapability { name: capability });
                }
                let message = LesMessage::decode(code, &payload)?;
                trace!(code, request_id = ?message.request_id(), "<<< les");

                match (&message, self.status_received) {
                    (LesMessage::Status(_), true) => return Err(PeerError::UnexpectedStatus),
                    (LesMessage::Status(_), false) => self.status_received = true,
                    (_, false) => return Err(PeerError::StatusNotReceived { code }),
                    (_, true) => {}
                }
                Ok(Some(LesEvent::Message(message)))
            }
        }
    }

    /// Frame for an outbound LES message.
    pub fn frame_for(&self, message: &LesMessage) -> Result<Frame, PeerError> {
        trace!(code = message.code(), request_id = ?message.request_id(), ">>> les");
        Ok(self
            .devp2p
            .message_frame(LES_NAME, message.code(), message.encode())?)
    }

    pub fn disconnect(&mut self, reason: DisconnectReason) -> Frame {
        self.devp2p.disconnect_frame(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devp2p::{Capability, HelloMessage, P2P_VERSION};
    use crate::les::messages::{AnnounceMessage, STATUS};
    use alloy_primitives::U256;
    use lumen_core::BlockHeader;

    fn status(network_id: u64, genesis: [u8; 32], height: u64) -> StatusMessage {
        let head = BlockHeader {
            height,
            ..Default::default()
        }
        .sealed();
        StatusMessage::light(network_id, genesis, &head, LES_VERSION)
    }

    fn remote_hello() -> Frame {
        let hello = HelloMessage {
            p2p_version: P2P_VERSION,
            client_id: "server".to_string(),
            capabilities: vec![Capability::remote("les", 2)],
            listen_port: 30303,
            node_id: [2; 64],
        };
        Frame::new(0x00, hello.encode())
    }

    fn established_peer() -> LesPeer {
        let mut peer = LesPeer::new([1; 64], 30303, "lumen-test");
        let mut outbox = Vec::new();
        assert_eq!(peer.start(&mut outbox).unwrap(), None);
        assert_eq!(outbox.len(), 1);
        let event = peer.handle_frame(remote_hello(), &mut outbox).unwrap();
        assert_eq!(event, Some(LesEvent::Connected));
        peer
    }

    #[test]
    fn test_validate_status() {
        let genesis = [0x41; 32];
        assert!(validate_status(&status(3, genesis, 200), 3, &genesis, 100).is_ok());
        assert!(validate_status(&status(3, genesis, 100), 3, &genesis, 100).is_ok());
        assert!(matches!(
            validate_status(&status(1, genesis, 200), 3, &genesis, 100),
            Err(PeerError::WrongNetwork { expected: 3, received: 1 })
        ));
        assert!(matches!(
            validate_status(&status(3, [0; 32], 200), 3, &genesis, 100),
            Err(PeerError::WrongGenesis { .. })
        ));
        assert!(matches!(
            validate_status(&status(3, genesis, 99), 3, &genesis, 100),
            Err(PeerError::ExpiredBestBlockHeight { local: 100, remote: 99 })
        ));

        let mut old = status(3, genesis, 200);
        old.protocol_version = 1;
        assert!(matches!(
            validate_status(&old, 3, &genesis, 100),
            Err(PeerError::InvalidProtocolVersion { received: 1, .. })
        ));
    }

    #[test]
    fn test_status_frame_is_offset() {
        let peer = established_peer();
        let frame = peer
            .frame_for(&LesMessage::Status(status(1, [0; 32], 1)))
            .unwrap();
        assert_eq!(frame.frame_type, 0x10 + STATUS);
    }

    #[test]
    fn test_exactly_one_status() {
        let mut peer = established_peer();
        let status_frame = Frame::new(0x10, status(1, [0; 32], 1).encode());
        let event = peer.handle_frame(status_frame.clone(), &mut Vec::new()).unwrap();
        assert!(matches!(event, Some(LesEvent::Message(LesMessage::Status(_)))));
        assert!(matches!(
            peer.handle_frame(status_frame, &mut Vec::new()),
            Err(PeerError::UnexpectedStatus)
        ));
    }

    #[test]
    fn test_requests_before_status_rejected() {
        let mut peer = established_peer();
        let announce = AnnounceMessage {
            head_hash: [0; 32],
            head_height: 1,
            head_td: U256::ZERO,
            reorg_depth: 0,
        };
        assert!(matches!(
            peer.handle_frame(Frame::new(0x11, announce.encode()), &mut Vec::new()),
            Err(PeerError::StatusNotReceived { code: 0x01 })
        ));
    }
}
