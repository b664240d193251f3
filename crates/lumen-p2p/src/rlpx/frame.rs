//! RLPx frame codec.
//!
//! After the handshake every message travels as
//! `header(16) ++ header-mac(16) ++ body(padded to 16) ++ body-mac(16)`.
//! Header and body are encrypted with one continuous AES-256-CTR stream per
//! direction; both MACs come from the running keccak states in [`Secrets`].

use aes::Aes256;
use bytes::{Buf, BufMut, BytesMut};
use cipher::generic_array::GenericArray;
use cipher::{KeyIvInit, StreamCipher};
use lumen_core::rlp;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use super::handshake::Secrets;
use crate::crypto::mac::KeccakMac;

type Aes256Ctr = ctr::Ctr128BE<Aes256>;

pub const HEADER_LEN: usize = 16;
pub const MAC_LEN: usize = 16;

/// Largest body a 3-byte size field can describe.
pub const MAX_FRAME_SIZE: usize = 0xFF_FFFF;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Frame header MAC mismatch")]
    HeaderMacMismatch,

    #[error("Frame body MAC mismatch")]
    BodyMacMismatch,

    #[error("Frame body of {size} bytes exceeds the 24-bit size field")]
    FrameTooLarge { size: usize },

    #[error("Invalid frame header: {reason}")]
    InvalidHeader { reason: String },

    #[error("Invalid frame message type: {reason}")]
    InvalidFrameType { reason: String },

    #[error("Frame I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// One decrypted message: the type code and its RLP payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: u64,
    pub payload: Vec<u8>,
    pub context_id: Option<u64>,
    pub total_frame_size: Option<u64>,
}

impl Frame {
    pub fn new(frame_type: u64, payload: Vec<u8>) -> Self {
        Self {
            frame_type,
            payload,
            context_id: None,
            total_frame_size: None,
        }
    }
}

#[derive(Debug)]
enum ReadState {
    Header,
    Body {
        body_size: usize,
        context_id: Option<u64>,
        total_frame_size: Option<u64>,
    },
}

fn padded_len(len: usize) -> usize {
    (len + 15) / 16 * 16
}

/// Stateful encoder/decoder for one RLPx connection.
pub struct FrameCodec {
    egress_aes: Aes256Ctr,
    ingress_aes: Aes256Ctr,
    egress_mac: KeccakMac,
    ingress_mac: KeccakMac,
    state: ReadState,
}

impl std::fmt::Debug for FrameCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameCodec")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl FrameCodec {
    pub fn new(secrets: Secrets) -> Self {
        let key = GenericArray::from_slice(&secrets.aes_secret);
        let iv = GenericArray::from_slice(&[0u8; 16]);
        Self {
            egress_aes: Aes256Ctr::new(key, iv),
            ingress_aes: Aes256Ctr::new(key, iv),
            egress_mac: secrets.egress_mac,
            ingress_mac: secrets.ingress_mac,
            state: ReadState::Header,
        }
    }

    /// Encrypt and authenticate `frame`, appending it to `out`.
    pub fn write_frame(&mut self, frame: &Frame, out: &mut BytesMut) -> Result<(), FrameError> {
        let type_rlp = rlp::encode_u64(frame.frame_type);
        let body_size = type_rlp.len() + frame.payload.len();
        if body_size > MAX_FRAME_SIZE {
            return Err(FrameError::FrameTooLarge { size: body_size });
        }

        let header_data = match (frame.context_id, frame.total_frame_size) {
            (None, None) => rlp::encode_list(&[rlp::encode_u64(0)]),
            (Some(context_id), None) => {
                rlp::encode_list(&[rlp::encode_u64(0), rlp::encode_u64(context_id)])
            }
            (context_id, Some(total)) => rlp::encode_list(&[
                rlp::encode_u64(0),
                rlp::encode_u64(context_id.unwrap_or(0)),
                rlp::encode_u64(total),
            ]),
        };
        if 3 + header_data.len() > HEADER_LEN {
            return Err(FrameError::InvalidHeader {
                reason: format!("header data of {} bytes does not fit", header_data.len()),
            });
        }

        let mut header = [0u8; HEADER_LEN];
        header[..3].copy_from_slice(&(body_size as u32).to_be_bytes()[1..]);
        header[3..3 + header_data.len()].copy_from_slice(&header_data);
        self.egress_aes.apply_keystream(&mut header);
        let header_mac = self.egress_mac.update_header(&header);

        let mut body = Vec::with_capacity(padded_len(body_size));
        body.extend_from_slice(&type_rlp);
        body.extend_from_slice(&frame.payload);
        body.resize(padded_len(body_size), 0);
        self.egress_aes.apply_keystream(&mut body);
        let body_mac = self.egress_mac.update_body(&body);

        out.reserve(HEADER_LEN + MAC_LEN + body.len() + MAC_LEN);
        out.put_slice(&header);
        out.put_slice(&header_mac);
        out.put_slice(&body);
        out.put_slice(&body_mac);
        Ok(())
    }

    /// Decode one frame from `src` if enough bytes have arrived.
    pub fn read_frame(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        if let ReadState::Header = self.state {
            if src.len() < HEADER_LEN + MAC_LEN {
                return Ok(None);
            }

            let mut header = [0u8; HEADER_LEN];
            header.copy_from_slice(&src[..HEADER_LEN]);
            let expected = self.ingress_mac.update_header(&header);
            if expected[..] != src[HEADER_LEN..HEADER_LEN + MAC_LEN] {
                return Err(FrameError::HeaderMacMismatch);
            }
            src.advance(HEADER_LEN + MAC_LEN);

            self.ingress_aes.apply_keystream(&mut header);
            let body_size =
                usize::from(header[0]) << 16 | usize::from(header[1]) << 8 | usize::from(header[2]);
            let (_, header_data) =
                rlp::decode_prefix(&header[3..]).map_err(|e| FrameError::InvalidHeader {
                    reason: e.to_string(),
                })?;
            let optional = |index: usize| -> Option<u64> {
                header_data.element(index).ok().and_then(|item| item.as_u64().ok())
            };

            self.state = ReadState::Body {
                body_size,
                context_id: optional(1),
                total_frame_size: optional(2),
            };
        }

        let ReadState::Body {
            body_size,
            context_id,
            total_frame_size,
        } = self.state
        else {
            return Ok(None);
        };

        let padded = padded_len(body_size);
        if src.len() < padded + MAC_LEN {
            src.reserve(padded + MAC_LEN - src.len());
            return Ok(None);
        }

        let mut body = src.split_to(padded).to_vec();
        let mac = src.split_to(MAC_LEN);
        let expected = self.ingress_mac.update_body(&body);
        if expected[..] != mac[..] {
            return Err(FrameError::BodyMacMismatch);
        }
        self.state = ReadState::Header;

        self.ingress_aes.apply_keystream(&mut body);
        body.truncate(body_size);
        let (consumed, type_item) =
            rlp::decode_prefix(&body).map_err(|e| FrameError::InvalidFrameType {
                reason: e.to_string(),
            })?;
        let frame_type = type_item.as_u64().map_err(|e| FrameError::InvalidFrameType {
            reason: e.to_string(),
        })?;

        Ok(Some(Frame {
            frame_type,
            payload: body[consumed..].to_vec(),
            context_id,
            total_frame_size,
        }))
    }

    /// True while a header has been read but its body is still pending.
    pub fn is_mid_frame(&self) -> bool {
        matches!(self.state, ReadState::Body { .. })
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.read_frame(src)
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.write_frame(&item, dst)
    }
}
