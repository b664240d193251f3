//! Handle to a running light client session.

use lumen_core::RawTransaction;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::{ClientConfig, ClientSettings, ConfigError};
use crate::rlpx::{self, HandshakeError};
use crate::session::{ClientEvent, Command, Session};
use crate::sync::ChainStore;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Timed out connecting to {address}")]
    ConnectTimeout { address: String },

    #[error("RLPx handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("Session has ended")]
    SessionClosed,

    #[error("Session task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// One light client connected to one peer.
///
/// Commands go through a bounded queue, so callers wait when the session
/// falls behind. Events arrive on [`LightClient::next_event`]; the last one
/// is always [`ClientEvent::Disconnected`].
pub struct LightClient<St> {
    commands: mpsc::Sender<Command>,
    events: mpsc::UnboundedReceiver<ClientEvent>,
    handle: JoinHandle<St>,
    next_send_id: u64,
}

impl<St> LightClient<St>
where
    St: ChainStore + 'static,
{
    /// Dial the configured node over TCP and start a session.
    pub async fn connect(config: &ClientConfig, store: St) -> Result<Self, ClientError> {
        let settings = config.settings()?;
        let address = config.node.address();

        let stream = tokio::time::timeout(settings.connect_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| ClientError::ConnectTimeout {
                address: address.clone(),
            })?
            .map_err(|source| ClientError::Connect {
                address: address.clone(),
                source,
            })?;
        info!(%address, "TCP connected, starting RLPx handshake");

        Self::spawn(stream, settings, store).await
    }

    /// Run the initiator handshake on `stream`, then spawn the session.
    pub async fn spawn<S>(
        stream: S,
        settings: ClientSettings,
        store: St,
    ) -> Result<Self, ClientError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let framed = rlpx::initiate(
            stream,
            settings.secret_key.clone(),
            settings.remote,
            settings.read_timeout,
        )
        .await?;
        info!("RLPx session established");

        let (command_tx, command_rx) = mpsc::channel(settings.outbound_queue_capacity);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let session = Session::new(framed, settings, store, command_rx, event_tx);

        Ok(Self {
            commands: command_tx,
            events: event_rx,
            handle: tokio::spawn(session.run()),
            next_send_id: 0,
        })
    }

    /// Queue `raw` for signing and submission. The returned id tags the
    /// matching `SendSucceeded` or `SendFailed` event.
    pub async fn send_transaction(&mut self, raw: RawTransaction) -> Result<u64, ClientError> {
        let send_id = self.next_send_id;
        self.next_send_id += 1;
        self.command(Command::SendTransaction { send_id, raw }).await?;
        Ok(send_id)
    }

    /// Refresh the watched account against the current head.
    pub async fn sync_account(&self) -> Result<(), ClientError> {
        self.command(Command::SyncAccount).await
    }

    pub async fn disconnect(&self) -> Result<(), ClientError> {
        self.command(Command::Disconnect).await
    }

    pub async fn next_event(&mut self) -> Option<ClientEvent> {
        self.events.recv().await
    }

    /// Wait for the session to end and take the store back.
    pub async fn join(self) -> Result<St, ClientError> {
        Ok(self.handle.await?)
    }

    async fn command(&self, command: Command) -> Result<(), ClientError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ClientError::SessionClosed)
    }
}
