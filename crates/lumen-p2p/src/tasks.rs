//! Request/response correlation.
//!
//! A [`Task`] is an intent ("headers from X", "prove account A at block B").
//! [`TaskHandlers::perform`] turns it into a request under a fresh request
//! id; [`TaskHandlers::handle`] matches the response back to the task and
//! removes it. Nothing here times out or retries.

use std::collections::HashMap;

use lumen_core::{
    parse_proof_nodes, verify_account_proof, AccountState, BlockHeader, ProofError,
    RawTransaction, Signature, Transaction, U256,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tracing::{debug, warn};

use crate::les::messages::{
    BlockId, GetBlockHeadersMessage, GetProofsMessage, LesMessage, ProofRequest,
    SendTransactionMessage, StatusMessage, TransactionStatus,
};
use crate::les::{validate_status, PeerError, LES_VERSION};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockHeadersTask {
    pub from: BlockHeader,
    pub limit: u64,
    pub reverse: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountStateTask {
    pub address: [u8; 20],
    pub header: BlockHeader,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandshakeTask {
    pub network_id: u64,
    pub genesis_hash: [u8; 32],
    pub head_hash: [u8; 32],
    pub head_height: u64,
    pub head_td: U256,
}

impl HandshakeTask {
    pub fn new(network_id: u64, genesis_hash: [u8; 32], head: &BlockHeader) -> Self {
        Self {
            network_id,
            genesis_hash,
            head_hash: head.hash,
            head_height: head.height,
            head_td: head.total_difficulty,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendTransactionTask {
    pub send_id: u64,
    pub raw: RawTransaction,
    pub nonce: u64,
    pub signature: Signature,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Task {
    BlockHeaders(BlockHeadersTask),
    AccountState(AccountStateTask),
    Handshake(HandshakeTask),
    SendTransaction(SendTransactionTask),
}

/// A response matched to the task that asked for it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskResponse {
    BlockHeaders {
        task: BlockHeadersTask,
        headers: Vec<BlockHeader>,
    },
    AccountState {
        task: AccountStateTask,
        state: AccountState,
    },
    HandshakeCompleted {
        head_hash: [u8; 32],
        head_height: u64,
    },
    TransactionStatus {
        task: SendTransactionTask,
        status: Option<TransactionStatus>,
    },
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Peer status rejected: {0}")]
    Status(#[from] PeerError),

    #[error("Account proof for {address} rejected: {source}")]
    InvalidProof {
        address: String,
        #[source]
        source: ProofError,
    },
}

/// Pending tasks for one connection, one table per response type.
pub struct TaskHandlers {
    rng: StdRng,
    block_headers: HashMap<u64, BlockHeadersTask>,
    account_states: HashMap<u64, AccountStateTask>,
    send_transactions: HashMap<u64, SendTransactionTask>,
    handshake: Option<HandshakeTask>,
}

impl Default for TaskHandlers {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskHandlers {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    pub fn with_rng(rng: StdRng) -> Self {
        Self {
            rng,
            block_headers: HashMap::new(),
            account_states: HashMap::new(),
            send_transactions: HashMap::new(),
            handshake: None,
        }
    }

    /// Number of requests still waiting for a response.
    pub fn pending(&self) -> usize {
        self.block_headers.len()
            + self.account_states.len()
            + self.send_transactions.len()
            + usize::from(self.handshake.is_some())
    }

    fn is_pending(&self, id: u64) -> bool {
        self.block_headers.contains_key(&id)
            || self.account_states.contains_key(&id)
            || self.send_transactions.contains_key(&id)
    }

    /// A random 63-bit id not used by any pending request.
    ///
    /// Ids are deduplicated: a draw that collides with a pending request is
    /// thrown away, so a response can never resolve a different task than
    /// the one that asked for it. A plain random draw without this check
    /// would let two pending tasks share an id.
    fn next_request_id(&mut self) -> u64 {
        loop {
            let id = self.rng.gen::<u64>() >> 1;
            if !self.is_pending(id) {
                return id;
            }
            warn!(request_id = id, "Request id collision, drawing again");
        }
    }

    /// Register `task` and build the request that carries it.
    pub fn perform(&mut self, task: Task) -> LesMessage {
        match task {
            Task::BlockHeaders(task) => {
                let request_id = self.next_request_id();
                let message = GetBlockHeadersMessage {
                    request_id,
                    origin: BlockId::Number(task.from.height),
                    max_headers: task.limit,
                    skip: 0,
                    reverse: task.reverse,
                };
                debug!(
                    request_id,
                    from = task.from.height,
                    limit = task.limit,
                    reverse = task.reverse,
                    "Requesting headers"
                );
                self.block_headers.insert(request_id, task);
                LesMessage::GetBlockHeaders(message)
            }
            Task::AccountState(task) => {
                let request_id = self.next_request_id();
                let message = GetProofsMessage {
                    request_id,
                    requests: vec![ProofRequest::account(task.header.hash, &task.address)],
                };
                debug!(request_id, block = task.header.height, "Requesting account proof");
                self.account_states.insert(request_id, task);
                LesMessage::GetProofs(message)
            }
            Task::Handshake(task) => {
                let status = StatusMessage {
                    protocol_version: LES_VERSION,
                    network_id: task.network_id,
                    head_td: task.head_td,
                    head_hash: task.head_hash,
                    head_height: task.head_height,
                    genesis_hash: task.genesis_hash,
                    announce_type: Some(1),
                    serve_headers: false,
                    serve_chain_since: None,
                    serve_state_since: None,
                    tx_relay: false,
                    flow_control: None,
                };
                self.handshake = Some(task);
                LesMessage::Status(status)
            }
            Task::SendTransaction(task) => {
                let request_id = self.next_request_id();
                let transaction = Transaction::new(&task.raw, task.nonce, task.signature.clone());
                debug!(
                    request_id,
                    send_id = task.send_id,
                    hash = %hex::encode(transaction.hash),
                    "Sending transaction"
                );
                self.send_transactions.insert(request_id, task);
                LesMessage::SendTransaction(SendTransactionMessage {
                    request_id,
                    transactions: vec![transaction],
                })
            }
        }
    }

    /// Match an inbound message to its pending task.
    ///
    /// `Ok(None)` means no task was waiting for this message.
    pub fn handle(&mut self, message: &LesMessage) -> Result<Option<TaskResponse>, TaskError> {
        match message {
            LesMessage::Status(status) => {
                let Some(task) = self.handshake.take() else {
                    return Ok(None);
                };
                validate_status(status, task.network_id, &task.genesis_hash, task.head_height)?;
                Ok(Some(TaskResponse::HandshakeCompleted {
                    head_hash: status.head_hash,
                    head_height: status.head_height,
                }))
            }
            LesMessage::BlockHeaders(response) => {
                Ok(self.block_headers.remove(&response.request_id).map(|task| {
                    TaskResponse::BlockHeaders {
                        task,
                        headers: response.headers.clone(),
                    }
                }))
            }
            LesMessage::Proofs(response) => {
                let Some(task) = self.account_states.remove(&response.request_id) else {
                    return Ok(None);
                };
                let invalid = |source| TaskError::InvalidProof {
                    address: hex::encode(task.address),
                    source,
                };
                let nodes = parse_proof_nodes(&response.nodes).map_err(invalid)?;
                let state = verify_account_proof(task.header.state_root, task.address, &nodes)
                    .map_err(invalid)?;
                Ok(Some(TaskResponse::AccountState { task, state }))
            }
            LesMessage::TxStatus(response) => {
                Ok(self.send_transactions.remove(&response.request_id).map(|task| {
                    TaskResponse::TransactionStatus {
                        task,
                        status: response.statuses.first().cloned(),
                    }
                }))
            }
            _ => Ok(None),
        }
    }

    /// Drop every pending task without answering it. Returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.pending();
        self.block_headers.clear();
        self.account_states.clear();
        self.send_transactions.clear();
        self.handshake = None;
        dropped
    }
}
