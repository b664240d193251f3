//! The connection loop for one peer.
//!
//! A [`Session`] owns the encrypted stream and every piece of per-peer
//! state: the LES peer, the pending task tables and the synchronizers.
//! Nothing here is shared, so nothing is locked. The loop waits on either a
//! command from the client handle or the next inbound frame, dispatches it
//! synchronously, then flushes whatever the state machines queued.

use std::future::Future;
use std::pin::Pin;
use std::task::Poll;
use std::time::Duration;

use futures::future::poll_fn;
use futures::{SinkExt, StreamExt};
use lumen_core::{AccountState, BlockHeader, Network, RawTransaction, Transaction};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::{Instant, Sleep};
use tracing::{debug, info, trace, warn};

use crate::config::ClientSettings;
use crate::devp2p::{DevP2pError, DisconnectReason};
use crate::les::{LesEvent, LesMessage, LesPeer, PeerError};
use crate::rlpx::{Frame, FrameError, RlpxStream};
use crate::sync::{
    AccountSyncer, BlockSyncer, ChainStore, SendError, SyncError, SyncStep, TransactionSender,
};
use crate::tasks::{HandshakeTask, Task, TaskError, TaskHandlers, TaskResponse};

/// Requests from the client handle, queued on the bounded command channel.
#[derive(Debug)]
pub enum Command {
    SendTransaction { send_id: u64, raw: RawTransaction },
    SyncAccount,
    Disconnect,
}

/// What the session reports back.
#[derive(Debug)]
pub enum ClientEvent {
    /// A new trusted chain head.
    HeadUpdated(BlockHeader),
    /// Verified state of the watched account.
    AccountUpdated(AccountState),
    SendSucceeded {
        send_id: u64,
        transaction: Transaction,
    },
    SendFailed {
        send_id: u64,
        error: SendError,
    },
    /// Always the last event of a session.
    Disconnected { reason: String },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Peer(#[from] PeerError),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("Timed out reading a frame")]
    Timeout,

    #[error("Connection closed by peer")]
    Closed,
}

impl SessionError {
    /// Reason to send the peer before hanging up, if the stream is still usable.
    fn disconnect_reason(&self) -> Option<DisconnectReason> {
        match self {
            SessionError::Frame(_) | SessionError::Closed => None,
            SessionError::Timeout => Some(DisconnectReason::TcpSubsystemError),
            SessionError::Peer(PeerError::DevP2p(DevP2pError::NoCommonCapabilities)) => {
                Some(DisconnectReason::UselessPeer)
            }
            SessionError::Peer(PeerError::DevP2p(_)) => Some(DisconnectReason::ProtocolBreach),
            SessionError::Peer(_) | SessionError::Task(_) | SessionError::Sync(_) => {
                Some(DisconnectReason::SubprotocolSpecific)
            }
        }
    }
}

pub struct Session<S, St> {
    framed: RlpxStream<S>,
    peer: LesPeer,
    tasks: TaskHandlers,
    block_syncer: BlockSyncer,
    account_syncer: AccountSyncer,
    sender: TransactionSender,
    store: St,
    network: Network,
    read_timeout: Duration,
    /// Set once a partial frame is buffered; cleared when it completes.
    read_deadline: Option<Instant>,
    commands: mpsc::Receiver<Command>,
    events: mpsc::UnboundedSender<ClientEvent>,
}

impl<S, St> Session<S, St>
where
    S: AsyncRead + AsyncWrite + Unpin,
    St: ChainStore,
{
    pub fn new(
        framed: RlpxStream<S>,
        settings: ClientSettings,
        store: St,
        commands: mpsc::Receiver<Command>,
        events: mpsc::UnboundedSender<ClientEvent>,
    ) -> Self {
        let node_id = settings.node_id();
        Self {
            framed,
            peer: LesPeer::new(node_id, u64::from(settings.listen_port), settings.client_id),
            tasks: TaskHandlers::new(),
            block_syncer: BlockSyncer::new(settings.headers_limit),
            account_syncer: AccountSyncer::new(settings.address),
            sender: TransactionSender::new(settings.secret_key, settings.chain_id),
            store,
            network: settings.network,
            read_timeout: settings.read_timeout,
            read_deadline: None,
            commands,
            events,
        }
    }

    /// Run until either side disconnects. Hands the store back.
    pub async fn run(mut self) -> St {
        let reason = match self.drive().await {
            Ok(reason) => reason,
            Err(e) => {
                warn!(error = %e, "Session failed");
                if let Some(reason) = e.disconnect_reason() {
                    self.send_disconnect(reason).await;
                }
                e.to_string()
            }
        };

        let dropped = self.tasks.clear();
        self.block_syncer.reset();
        info!(%reason, dropped_tasks = dropped, "Disconnected");
        self.emit(ClientEvent::Disconnected { reason });
        self.store
    }

    async fn drive(&mut self) -> Result<String, SessionError> {
        if self.store.last_block_header().is_none() {
            info!(
                height = self.network.checkpoint.height,
                hash = %self.network.checkpoint.hash_hex(),
                "Starting from checkpoint"
            );
            self.store
                .save_block_headers(std::slice::from_ref(&self.network.checkpoint));
        }

        let mut outbox = Vec::new();
        if let Some(event) = self.peer.start(&mut outbox)? {
            self.on_les_event(event, &mut outbox)?;
        }
        self.flush(&mut outbox).await?;

        loop {
            let finished = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Disconnect) | None => {
                        outbox.push(self.peer.disconnect(DisconnectReason::DisconnectRequested));
                        Some(DisconnectReason::DisconnectRequested.to_string())
                    }
                    Some(command) => {
                        self.on_command(command, &mut outbox)?;
                        None
                    }
                },
                frame = next_frame(
                    &mut self.framed,
                    self.read_timeout,
                    &mut self.read_deadline,
                ) => {
                    let frame = frame?.ok_or(SessionError::Closed)?;
                    match self.peer.handle_frame(frame, &mut outbox)? {
                        Some(event) => self.on_les_event(event, &mut outbox)?,
                        None => None,
                    }
                }
            };

            self.flush(&mut outbox).await?;
            if let Some(reason) = finished {
                return Ok(reason);
            }
        }
    }

    /// Returns the reason when the peer hung up.
    fn on_les_event(
        &mut self,
        event: LesEvent,
        outbox: &mut Vec<Frame>,
    ) -> Result<Option<String>, SessionError> {
        match event {
            LesEvent::Connected => {
                let head = self.store.last_block_header().ok_or(SyncError::EmptyStore)?;
                let task = HandshakeTask::new(self.network.id, self.network.genesis_hash, &head);
                self.perform(Task::Handshake(task), outbox)?;
            }
            LesEvent::Disconnected(reason) => {
                return Ok(Some(match reason {
                    Some(reason) => format!("Peer disconnected: {reason}"),
                    None => "Peer disconnected".to_string(),
                }));
            }
            LesEvent::Message(LesMessage::Announce(announce)) => {
                debug!(height = announce.head_height, "Peer announced a new head");
                if let Some(task) = self.block_syncer.on_best_block(
                    &self.store,
                    announce.head_hash,
                    announce.head_height,
                )? {
                    self.perform(task, outbox)?;
                }
            }
            LesEvent::Message(message) => match self.tasks.handle(&message)? {
                Some(response) => self.on_response(response, outbox)?,
                None => trace!(code = message.code(), "No pending task for message"),
            },
        }
        Ok(None)
    }

    fn on_response(
        &mut self,
        response: TaskResponse,
        outbox: &mut Vec<Frame>,
    ) -> Result<(), SessionError> {
        match response {
            TaskResponse::HandshakeCompleted {
                head_hash,
                head_height,
            } => {
                info!(peer_head = head_height, "LES handshake completed");
                if let Some(task) = self
                    .block_syncer
                    .on_best_block(&self.store, head_hash, head_height)?
                {
                    self.perform(task, outbox)?;
                }
            }
            TaskResponse::BlockHeaders { task, headers } => {
                match self
                    .block_syncer
                    .on_block_headers(&mut self.store, &task, headers)?
                {
                    SyncStep::Request(next) => self.perform(next, outbox)?,
                    SyncStep::Completed(head) => {
                        let task = self.account_syncer.sync(&head);
                        self.emit(ClientEvent::HeadUpdated(head));
                        self.perform(task, outbox)?;
                    }
                }
            }
            TaskResponse::AccountState { task, state } => {
                let state = self
                    .account_syncer
                    .on_account_state(&mut self.store, state, &task.header);
                self.emit(ClientEvent::AccountUpdated(state));
            }
            TaskResponse::TransactionStatus { task, status } => {
                let send_id = task.send_id;
                let event = match self.sender.on_status(&task, status.as_ref()) {
                    Ok(transaction) => ClientEvent::SendSucceeded {
                        send_id,
                        transaction,
                    },
                    Err(error) => ClientEvent::SendFailed { send_id, error },
                };
                self.emit(event);
            }
        }
        Ok(())
    }

    fn on_command(&mut self, command: Command, outbox: &mut Vec<Frame>) -> Result<(), SessionError> {
        match command {
            Command::SendTransaction { send_id, raw } => {
                match self.sender.send(&self.store, send_id, raw) {
                    Ok(task) => self.perform(task, outbox)?,
                    Err(error) => {
                        warn!(send_id, error = %error, "Transaction not sent");
                        self.emit(ClientEvent::SendFailed { send_id, error });
                    }
                }
            }
            Command::SyncAccount => match self.store.last_block_header() {
                Some(head) => {
                    let task = self.account_syncer.sync(&head);
                    self.perform(task, outbox)?;
                }
                None => debug!("No header to sync the account against"),
            },
            Command::Disconnect => {}
        }
        Ok(())
    }

    fn perform(&mut self, task: Task, outbox: &mut Vec<Frame>) -> Result<(), SessionError> {
        let message = self.tasks.perform(task);
        outbox.push(self.peer.frame_for(&message)?);
        Ok(())
    }

    async fn flush(&mut self, outbox: &mut Vec<Frame>) -> Result<(), SessionError> {
        if outbox.is_empty() {
            return Ok(());
        }
        for frame in outbox.drain(..) {
            self.framed.feed(frame).await?;
        }
        self.framed.flush().await?;
        Ok(())
    }

    async fn send_disconnect(&mut self, reason: DisconnectReason) {
        let frame = self.peer.disconnect(reason);
        match tokio::time::timeout(self.read_timeout, self.framed.send(frame)).await {
            Ok(Ok(())) => debug!(%reason, "Sent disconnect"),
            Ok(Err(e)) => debug!(error = %e, "Could not send disconnect"),
            Err(_) => debug!("Timed out sending disconnect"),
        }
    }

    fn emit(&self, event: ClientEvent) {
        if self.events.send(event).is_err() {
            trace!("Client handle dropped, event discarded");
        }
    }
}

/// Wait for the next frame. The read timeout only applies once part of a
/// frame has arrived; an idle peer is not a failure.
///
/// `deadline` outlives this future, so commands winning the select do not
/// push back the deadline of a frame that is already being read.
async fn next_frame<S>(
    framed: &mut RlpxStream<S>,
    read_timeout: Duration,
    deadline: &mut Option<Instant>,
) -> Result<Option<Frame>, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut timer: Option<Pin<Box<Sleep>>> = None;
    poll_fn(|cx| {
        if let Poll::Ready(next) = framed.poll_next_unpin(cx) {
            *deadline = None;
            return Poll::Ready(next.transpose().map_err(SessionError::from));
        }

        let in_progress = framed.codec().is_mid_frame() || !framed.read_buffer().is_empty();
        if !in_progress {
            *deadline = None;
            timer = None;
            return Poll::Pending;
        }

        let at = *deadline.get_or_insert_with(|| Instant::now() + read_timeout);
        let sleep = timer.get_or_insert_with(|| Box::pin(tokio::time::sleep_until(at)));
        match sleep.as_mut().poll(cx) {
            Poll::Ready(()) => Poll::Ready(Err(SessionError::Timeout)),
            Poll::Pending => Poll::Pending,
        }
    })
    .await
}
