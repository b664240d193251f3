//! Driving the handshake over a byte stream and wrapping it in the codec.

use std::time::Duration;

use k256::{PublicKey, SecretKey};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::Framed;
use tracing::debug;

use super::frame::FrameCodec;
use super::handshake::{EncryptionHandshake, HandshakeError, HandshakeResponder, Secrets};

/// An encrypted RLPx stream.
pub type RlpxStream<S> = Framed<S, FrameCodec>;

/// Read one size-prefixed handshake packet, prefix included.
pub async fn read_handshake_packet<S>(
    stream: &mut S,
    read_timeout: Duration,
) -> Result<Vec<u8>, HandshakeError>
where
    S: AsyncRead + Unpin,
{
    let read = async {
        let mut prefix = [0u8; 2];
        stream.read_exact(&mut prefix).await?;
        let size = usize::from(u16::from_be_bytes(prefix));
        let mut packet = vec![0u8; 2 + size];
        packet[..2].copy_from_slice(&prefix);
        stream.read_exact(&mut packet[2..]).await?;
        Ok::<_, std::io::Error>(packet)
    };
    tokio::time::timeout(read_timeout, read)
        .await
        .map_err(|_| HandshakeError::Timeout)?
        .map_err(HandshakeError::from)
}

/// Run the initiator side of the handshake on `stream`.
pub async fn initiate<S>(
    mut stream: S,
    static_key: SecretKey,
    remote_public_key: PublicKey,
    read_timeout: Duration,
) -> Result<RlpxStream<S>, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut handshake = EncryptionHandshake::new(static_key, remote_public_key);
    let auth = handshake.create_auth_message()?;
    stream.write_all(&auth).await?;
    stream.flush().await?;
    debug!(bytes = auth.len(), "Sent auth");

    let ack = read_handshake_packet(&mut stream, read_timeout).await?;
    debug!(bytes = ack.len(), "Received auth-ack");
    let secrets = handshake.handle_auth_ack_message(&ack)?;
    Ok(framed(stream, secrets))
}

/// Run the responder side of the handshake on `stream`.
/// Returns the initiator's static public key with the framed stream.
pub async fn accept<S>(
    mut stream: S,
    static_key: SecretKey,
    read_timeout: Duration,
) -> Result<(PublicKey, RlpxStream<S>), HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut responder = HandshakeResponder::new(static_key);
    let auth = read_handshake_packet(&mut stream, read_timeout).await?;
    let remote = responder.handle_auth_message(&auth)?;
    debug!(bytes = auth.len(), "Received auth");

    let (ack, secrets) = responder.create_auth_ack_message()?;
    stream.write_all(&ack).await?;
    stream.flush().await?;
    debug!(bytes = ack.len(), "Sent auth-ack");
    Ok((remote, framed(stream, secrets)))
}

fn framed<S>(stream: S, secrets: Secrets) -> RlpxStream<S>
where
    S: AsyncRead + AsyncWrite,
{
    Framed::new(stream, FrameCodec::new(secrets))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::generate_secret_key;
    use crate::rlpx::frame::Frame;
    use futures::{SinkExt, StreamExt};

    #[tokio::test]
    async fn test_handshake_over_duplex_then_frames_flow() {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let client_key = generate_secret_key();
        let server_key = generate_secret_key();
        let server_public = server_key.public_key();
        let timeout = Duration::from_secs(5);

        let server = tokio::spawn(async move {
            let (remote, mut framed) = accept(server_io, server_key, timeout).await.unwrap();
            let frame = framed.next().await.unwrap().unwrap();
            framed.send(Frame::new(frame.frame_type + 1, frame.payload)).await.unwrap();
            remote
        });

        let mut client = initiate(client_io, client_key.clone(), server_public, timeout)
            .await
            .unwrap();
        client.send(Frame::new(2, vec![0xc0])).await.unwrap();
        let reply = client.next().await.unwrap().unwrap();
        assert_eq!(reply, Frame::new(3, vec![0xc0]));
        assert_eq!(server.await.unwrap(), client_key.public_key());
    }

    #[tokio::test]
    async fn test_silent_peer_times_out() {
        let (client_io, _server_io) = tokio::io::duplex(64 * 1024);
        let result = initiate(
            client_io,
            generate_secret_key(),
            generate_secret_key().public_key(),
            Duration::from_millis(50),
        )
        .await;
        assert!(matches!(result, Err(HandshakeError::Timeout)));
    }
}
