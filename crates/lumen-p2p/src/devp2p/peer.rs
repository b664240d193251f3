use tracing::{debug, trace, warn};

use super::capability::{shared_capabilities, Capability, SharedCapability};
use super::disconnect::DisconnectReason;
use super::messages::{HelloMessage, P2pMessage, HELLO, P2P_VERSION};
use super::DevP2pError;
use crate::crypto::NodeId;
use crate::rlpx::Frame;

/// Lifecycle of the base protocol on one connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerState {
    /// Transport not yet encrypted.
    Connecting,
    /// Handshake done, no Hello in either direction yet.
    AwaitingHello,
    HelloSent,
    HelloReceived,
    Established,
    Disconnected,
}

/// What the layer above needs to hear about.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PeerEvent {
    /// Both Hellos are in and at least one capability is shared.
    Established(Vec<SharedCapability>),
    /// A subprotocol message, with `code` relative to its capability.
    Message {
        capability: String,
        code: u64,
        payload: Vec<u8>,
    },
    /// The remote side said goodbye.
    Disconnected(Option<DisconnectReason>),
}

pub struct DevP2pPeer {
    state: PeerState,
    local_hello: HelloMessage,
    remote_hello: Option<HelloMessage>,
    shared: Vec<SharedCapability>,
}

impl DevP2pPeer {
    pub fn new(
        node_id: NodeId,
        listen_port: u64,
        client_id: impl Into<String>,
        capabilities: Vec<Capability>,
    ) -> Self {
        Self {
            state: PeerState::Connecting,
            local_hello: HelloMessage {
                p2p_version: P2P_VERSION,
                client_id: client_id.into(),
                capabilities,
                listen_port,
                node_id,
            },
            remote_hello: None,
            shared: Vec::new(),
        }
    }

    pub fn state(&self) -> PeerState {
        self.state
    }

    pub fn remote_hello(&self) -> Option<&HelloMessage> {
        self.remote_hello.as_ref()
    }

    pub fn shared_capabilities(&self) -> &[SharedCapability] {
        &self.shared
    }

    /// Called once the encrypted transport is up.
    pub fn transport_ready(&mut self) {
        if self.state == PeerState::Connecting {
            self.state = PeerState::AwaitingHello;
        }
    }

    /// Our Hello. Moves to `HelloSent`, or completes the exchange if the
    /// remote Hello already arrived.
    pub fn hello_frame(&mut self) -> Result<(Frame, Option<PeerEvent>), DevP2pError> {
        let frame = Frame::new(HELLO, self.local_hello.encode());
        let event = match self.state {
            PeerState::HelloReceived => Some(self.establish()?),
            _ => {
                self.state = PeerState::HelloSent;
                None
            }
        };
        Ok((frame, event))
    }

    /// Frame for a subprotocol message; `code` is relative to the capability.
    pub fn message_frame(
        &self,
        capability: &str,
        code: u64,
        payload: Vec<u8>,
    ) -> Result<Frame, DevP2pError> {
        let shared = self
            .shared
            .iter()
            .find(|shared| shared.capability.name == capability)
            .ok_or_else(|| DevP2pError::CapabilityNotShared {
                name: capability.to_string(),
            })?;
        if code >= shared.capability.message_count {
            return Err(DevP2pError::CodeOutOfRange {
                name: capability.to_string(),
                code,
            });
        }
        Ok(Frame::new(shared.offset + code, payload))
    }

    /// Our Disconnect; the peer is unusable afterwards.
    pub fn disconnect_frame(&mut self, reason: DisconnectReason) -> Frame {
        self.state = PeerState::Disconnected;
        let message = P2pMessage::Disconnect(Some(reason));
        Frame::new(message.code(), message.encode())
    }

    /// Process one inbound frame. Pings are answered through `outbox`.
    pub fn handle_frame(
        &mut self,
        frame: Frame,
        outbox: &mut Vec<Frame>,
    ) -> Result<Option<PeerEvent>, DevP2pError> {
        let invalid = |source| DevP2pError::InvalidMessage {
            code: frame.frame_type,
            source,
        };

        if let Some(message) = P2pMessage::decode(frame.frame_type, &frame.payload).map_err(invalid)? {
            trace!(?message, "<<< devp2p");
            return match message {
                P2pMessage::Hello(hello) => self.on_hello(hello),
                P2pMessage::Disconnect(reason) => {
                    debug!(?reason, "Peer disconnected");
                    self.state = PeerState::Disconnected;
                    Ok(Some(PeerEvent::Disconnected(reason)))
                }
                P2pMessage::Ping => {
                    outbox.push(Frame::new(P2pMessage::Pong.code(), P2pMessage::Pong.encode()));
                    Ok(None)
                }
                P2pMessage::Pong => Ok(None),
            };
        }

        if self.state != PeerState::Established {
            return Err(DevP2pError::NotEstablished {
                code: frame.frame_type,
            });
        }

        let shared = self
            .shared
            .iter()
            .find(|shared| shared.contains(frame.frame_type))
            .ok_or(DevP2pError::UnknownMessageCode {
                code: frame.frame_type,
            })?;

        Ok(Some(PeerEvent::Message {
            capability: shared.capability.name.clone(),
            code: frame.frame_type - shared.offset,
            payload: frame.payload,
        }))
    }

    fn on_hello(&mut self, hello: HelloMessage) -> Result<Option<PeerEvent>, DevP2pError> {
        if self.remote_hello.is_some() {
            return Err(DevP2pError::UnexpectedHello);
        }
        debug!(
            client = %hello.client_id,
            capabilities = ?hello.capabilities.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "Received Hello"
        );
        self.remote_hello = Some(hello);

        match self.state {
            PeerState::HelloSent => self.establish().map(Some),
            _ => {
                self.state = PeerState::HelloReceived;
                Ok(None)
            }
        }
    }

    fn establish(&mut self) -> Result<PeerEvent, DevP2pError> {
        let remote = self
            .remote_hello
            .as_ref()
            .map(|hello| hello.capabilities.as_slice())
            .unwrap_or_default();
        let shared = shared_capabilities(&self.local_hello.capabilities, remote);
        if shared.is_empty() {
            warn!("No shared capabilities with peer");
            return Err(DevP2pError::NoCommonCapabilities);
        }

        self.state = PeerState::Established;
        self.shared = shared.clone();
        Ok(PeerEvent::Established(shared))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(capabilities: Vec<Capability>) -> DevP2pPeer {
        let mut peer = DevP2pPeer::new([7; 64], 30303, "lumen-test", capabilities);
        peer.transport_ready();
        peer
    }

    fn hello_from(capabilities: Vec<Capability>) -> Frame {
        let hello = HelloMessage {
            p2p_version: P2P_VERSION,
            client_id: "remote".to_string(),
            capabilities,
            listen_port: 30303,
            node_id: [9; 64],
        };
        Frame::new(0x00, hello.encode())
    }

    #[test]
    fn test_hello_exchange_either_order() {
        let caps = || vec![Capability::new("les", 2, 22)];

        let mut sent_first = peer(caps());
        assert_eq!(sent_first.state(), PeerState::AwaitingHello);
        let (_, event) = sent_first.hello_frame().unwrap();
        assert!(event.is_none());
        assert_eq!(sent_first.state(), PeerState::HelloSent);
        let event = sent_first
            .handle_frame(hello_from(caps()), &mut Vec::new())
            .unwrap();
        assert!(matches!(event, Some(PeerEvent::Established(ref shared)) if shared.len() == 1));

        let mut received_first = peer(caps());
        let event = received_first
            .handle_frame(hello_from(caps()), &mut Vec::new())
            .unwrap();
        assert!(event.is_none());
        assert_eq!(received_first.state(), PeerState::HelloReceived);
        let (frame, event) = received_first.hello_frame().unwrap();
        assert_eq!(frame.frame_type, 0x00);
        assert!(matches!(event, Some(PeerEvent::Established(_))));
        assert_eq!(received_first.state(), PeerState::Established);
    }

    #[test]
    fn test_no_common_capabilities() {
        let mut p = peer(vec![Capability::new("les", 2, 22)]);
        p.hello_frame().unwrap();
        let result = p.handle_frame(hello_from(vec![Capability::remote("eth", 66)]), &mut Vec::new());
        assert!(matches!(result, Err(DevP2pError::NoCommonCapabilities)));
    }

    #[test]
    fn test_ping_gets_pong() {
        let mut p = peer(vec![Capability::new("les", 2, 22)]);
        let mut outbox = Vec::new();
        let event = p.handle_frame(Frame::new(0x02, vec![0xc0]), &mut outbox).unwrap();
        assert!(event.is_none());
        assert_eq!(outbox, vec![Frame::new(0x03, vec![0xc0])]);
    }

    #[test]
    fn test_subprotocol_routing_and_unknown_codes() {
        let mut p = peer(vec![Capability::new("les", 2, 22)]);
        p.hello_frame().unwrap();
        p.handle_frame(hello_from(vec![Capability::remote("les", 2)]), &mut Vec::new())
            .unwrap();

        let event = p
            .handle_frame(Frame::new(0x13, vec![0xc0]), &mut Vec::new())
            .unwrap();
        assert_eq!(
            event,
            Some(PeerEvent::Message {
                capability: "les".to_string(),
                code: 0x03,
                payload: vec![0xc0],
            })
        );

        let result = p.handle_frame(Frame::new(0x10 + 22, vec![0xc0]), &mut Vec::new());
        assert!(matches!(result, Err(DevP2pError::UnknownMessageCode { code: 0x26 })));

        assert_eq!(p.message_frame("les", 0x02, vec![]).unwrap().frame_type, 0x12);
        assert!(p.message_frame("eth", 0x02, vec![]).is_err());
        assert!(p.message_frame("les", 22, vec![]).is_err());
    }

    #[test]
    fn test_subprotocol_before_hello_is_rejected() {
        let mut p = peer(vec![Capability::new("les", 2, 22)]);
        let result = p.handle_frame(Frame::new(0x10, vec![0xc0]), &mut Vec::new());
        assert!(matches!(result, Err(DevP2pError::NotEstablished { code: 0x10 })));
    }

    #[test]
    fn test_disconnect_message() {
        let mut p = peer(vec![Capability::new("les", 2, 22)]);
        let event = p
            .handle_frame(Frame::new(0x01, DisconnectReason::TooManyPeers.encode()), &mut Vec::new())
            .unwrap();
        assert_eq!(event, Some(PeerEvent::Disconnected(Some(DisconnectReason::TooManyPeers))));
        assert_eq!(p.state(), PeerState::Disconnected);
    }
}
