//! RLPx transport: the encryption handshake and the framed, authenticated
//! stream that follows it.

pub mod connection;
pub mod frame;
pub mod handshake;

pub use connection::{accept, initiate, RlpxStream};
pub use frame::{Frame, FrameCodec, FrameError};
pub use handshake::{HandshakeError, Secrets};
