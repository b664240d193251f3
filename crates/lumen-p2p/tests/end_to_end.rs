//! Two in-process peers over a duplex pipe: the light client on one end and
//! a scripted LES server on the other.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use k256::SecretKey;
use lumen_core::rlp;
use lumen_core::{keccak256, AccountState, BlockHeader, Network, RawTransaction, U256};
use lumen_p2p::crypto::{self, generate_secret_key};
use lumen_p2p::devp2p::DisconnectReason;
use lumen_p2p::les::{
    BlockHeadersMessage, BlockId, GetBlockHeadersMessage, LesEvent, LesMessage, LesPeer,
    ProofsMessage, StatusMessage, TransactionStatus, TxStatusMessage, LES_VERSION,
};
use lumen_p2p::rlpx::{self, RlpxStream};
use lumen_p2p::{ChainStore, ClientEvent, ClientSettings, LightClient, MemoryStore, SendError};
use tokio::io::DuplexStream;

const NETWORK_ID: u64 = 1;
const GENESIS: [u8; 32] = [0xd4; 32];
const ADDRESS: [u8; 20] = [0x5a; 20];
const TIMEOUT: Duration = Duration::from_secs(5);

fn account() -> AccountState {
    AccountState {
        address: ADDRESS,
        nonce: 7,
        balance: U256::from(2_500_000_000_000_000_000u64),
        storage_root: AccountState::EMPTY_STORAGE_ROOT,
        code_hash: AccountState::EMPTY_CODE_HASH,
    }
}

/// A state trie holding only the watched account: one leaf at the full path.
fn account_proof() -> Vec<u8> {
    let mut path = vec![0x20];
    path.extend_from_slice(&keccak256(&ADDRESS));
    rlp::encode_list(&[
        rlp::encode_bytes(&path),
        rlp::encode_bytes(&account().encode()),
    ])
}

/// Headers `from..=to`, each linked to the one before.
fn chain(from: u64, to: u64) -> Vec<BlockHeader> {
    let state_root = keccak256(&account_proof());
    let mut headers: Vec<BlockHeader> = Vec::new();
    for height in from..=to {
        let parent_hash = headers.last().map(|h| h.hash).unwrap_or([0x99; 32]);
        headers.push(
            BlockHeader {
                parent_hash,
                state_root,
                difficulty: U256::from(131_072u64),
                height,
                gas_limit: 8_000_000,
                timestamp: 1_550_000_000 + height * 15,
                ..Default::default()
            }
            .sealed(),
        );
    }
    headers
}

struct Server {
    framed: RlpxStream<DuplexStream>,
    peer: LesPeer,
    chain: Vec<BlockHeader>,
}

impl Server {
    fn new(framed: RlpxStream<DuplexStream>, key: &SecretKey, chain: Vec<BlockHeader>) -> Self {
        Self {
            framed,
            peer: LesPeer::new(crypto::node_id(&key.public_key()), 30303, "les-server"),
            chain,
        }
    }

    async fn start(&mut self) {
        let mut outbox = Vec::new();
        self.peer.start(&mut outbox).unwrap();
        self.flush(outbox).await;
    }

    async fn flush(&mut self, outbox: Vec<lumen_p2p::rlpx::Frame>) {
        for frame in outbox {
            self.framed.send(frame).await.unwrap();
        }
    }

    async fn reply(&mut self, message: LesMessage) {
        let frame = self.peer.frame_for(&message).unwrap();
        self.framed.send(frame).await.unwrap();
    }

    /// Next LES message from the client. Answers the devp2p handshake and
    /// sends our Status along the way. `Err` carries the disconnect reason.
    async fn next_message(&mut self) -> Result<LesMessage, Option<DisconnectReason>> {
        loop {
            let frame = tokio::time::timeout(TIMEOUT, self.framed.next())
                .await
                .expect("client went quiet")
                .expect("stream closed")
                .unwrap();
            let mut outbox = Vec::new();
            let event = self.peer.handle_frame(frame, &mut outbox).unwrap();
            self.flush(outbox).await;
            match event {
                Some(LesEvent::Connected) => {
                    let head = self.chain.last().unwrap().clone();
                    let status = StatusMessage::light(NETWORK_ID, GENESIS, &head, LES_VERSION);
                    self.reply(LesMessage::Status(status)).await;
                }
                Some(LesEvent::Message(message)) => return Ok(message),
                Some(LesEvent::Disconnected(reason)) => return Err(reason),
                None => {}
            }
        }
    }

    fn headers_for(&self, request: &GetBlockHeadersMessage) -> Vec<BlockHeader> {
        let BlockId::Number(origin) = request.origin else {
            panic!("client asks by number");
        };
        let start = self.chain.iter().position(|h| h.height == origin).unwrap();
        let limit = request.max_headers as usize;
        if request.reverse {
            self.chain[..=start].iter().rev().take(limit).cloned().collect()
        } else {
            self.chain[start..].iter().take(limit).cloned().collect()
        }
    }

    async fn serve_headers(&mut self) -> GetBlockHeadersMessage {
        let Ok(LesMessage::GetBlockHeaders(request)) = self.next_message().await else {
            panic!("expected GetBlockHeaders");
        };
        let headers = self.headers_for(&request);
        self.reply(LesMessage::BlockHeaders(BlockHeadersMessage {
            request_id: request.request_id,
            buffer_value: 1_000_000,
            headers,
        }))
        .await;
        request
    }
}

async fn connect(chain: Vec<BlockHeader>) -> (LightClient<MemoryStore>, Server) {
    let (client_io, server_io) = tokio::io::duplex(1 << 20);
    let client_key = generate_secret_key();
    let server_key = generate_secret_key();

    let network = Network {
        id: NETWORK_ID,
        genesis_hash: GENESIS,
        checkpoint: chain[0].clone(),
    };
    let settings = ClientSettings::new(
        client_key.clone(),
        server_key.public_key(),
        network,
        ADDRESS,
        NETWORK_ID,
    );

    let accept = tokio::spawn(rlpx::accept(server_io, server_key.clone(), TIMEOUT));
    let client = LightClient::spawn(client_io, settings, MemoryStore::new())
        .await
        .unwrap();
    let (remote, framed) = accept.await.unwrap().unwrap();
    assert_eq!(remote, client_key.public_key());

    let mut server = Server::new(framed, &server_key, chain);
    server.start().await;
    (client, server)
}

async fn expect_client_status(server: &mut Server) -> StatusMessage {
    let Ok(LesMessage::Status(status)) = server.next_message().await else {
        panic!("expected the client's Status");
    };
    status
}

async fn next_event(client: &mut LightClient<MemoryStore>) -> ClientEvent {
    tokio::time::timeout(TIMEOUT, client.next_event())
        .await
        .expect("no event")
        .expect("event channel closed")
}

#[tokio::test]
async fn test_sync_headers_account_and_send_transaction() {
    let full_chain = chain(100, 160);
    let (mut client, mut server) = connect(full_chain.clone()).await;

    let status = expect_client_status(&mut server).await;
    assert_eq!(status.network_id, NETWORK_ID);
    assert_eq!(status.genesis_hash, GENESIS);
    assert_eq!(status.head_height, 100);
    assert_eq!(status.head_hash, full_chain[0].hash);

    // One page of 50 from the checkpoint, then the rest from the page's last header.
    let first = server.serve_headers().await;
    assert_eq!(first.origin, BlockId::Number(100));
    assert_eq!(first.max_headers, 50);
    assert!(!first.reverse);

    let second = server.serve_headers().await;
    assert_eq!(second.origin, BlockId::Number(149));

    let ClientEvent::HeadUpdated(head) = next_event(&mut client).await else {
        panic!("expected a head update");
    };
    assert_eq!(head.height, 160);
    assert_eq!(head.hash, full_chain[60].hash);

    let Ok(LesMessage::GetProofs(request)) = server.next_message().await else {
        panic!("expected GetProofs");
    };
    assert_eq!(request.requests.len(), 1);
    assert_eq!(request.requests[0].block_hash, head.hash);
    assert_eq!(request.requests[0].key, keccak256(&ADDRESS));
    server
        .reply(LesMessage::Proofs(ProofsMessage {
            request_id: request.request_id,
            buffer_value: 1_000_000,
            nodes: vec![account_proof()],
        }))
        .await;

    let ClientEvent::AccountUpdated(state) = next_event(&mut client).await else {
        panic!("expected an account update");
    };
    assert_eq!(state, account());

    let raw = RawTransaction {
        gas_price: 1_000_000_000,
        gas_limit: 21_000,
        to: [0x35; 20],
        value: U256::from(1_000u64),
        data: Vec::new(),
    };
    let send_id = client.send_transaction(raw).await.unwrap();

    let Ok(LesMessage::SendTransaction(submitted)) = server.next_message().await else {
        panic!("expected SendTx");
    };
    let transaction = submitted.transactions[0].clone();
    assert_eq!(transaction.nonce, 7);
    // EIP-155 for chain id 1
    assert!(matches!(transaction.signature.v, 37 | 38));
    server
        .reply(LesMessage::TxStatus(TxStatusMessage {
            request_id: submitted.request_id,
            buffer_value: 1_000_000,
            statuses: vec![TransactionStatus::Pending],
        }))
        .await;

    let ClientEvent::SendSucceeded {
        send_id: succeeded,
        transaction: sent,
    } = next_event(&mut client).await
    else {
        panic!("expected the send to succeed");
    };
    assert_eq!(succeeded, send_id);
    assert_eq!(sent.hash, transaction.hash);

    client.disconnect().await.unwrap();
    assert_eq!(
        server.next_message().await,
        Err(Some(DisconnectReason::DisconnectRequested))
    );
    assert!(matches!(
        next_event(&mut client).await,
        ClientEvent::Disconnected { .. }
    ));

    let store = client.join().await.unwrap();
    assert_eq!(store.header_count(), 61);
    assert_eq!(store.last_block_header().unwrap().hash, full_chain[60].hash);
    assert_eq!(store.account_state(), Some(account()));
}

#[tokio::test]
async fn test_rejected_transaction_is_reported() {
    let (mut client, mut server) = connect(chain(100, 110)).await;
    expect_client_status(&mut server).await;
    server.serve_headers().await;
    assert!(matches!(next_event(&mut client).await, ClientEvent::HeadUpdated(_)));

    let Ok(LesMessage::GetProofs(request)) = server.next_message().await else {
        panic!("expected GetProofs");
    };
    server
        .reply(LesMessage::Proofs(ProofsMessage {
            request_id: request.request_id,
            buffer_value: 0,
            nodes: vec![account_proof()],
        }))
        .await;
    assert!(matches!(next_event(&mut client).await, ClientEvent::AccountUpdated(_)));

    let raw = RawTransaction {
        gas_price: 1,
        gas_limit: 21_000,
        to: [0x35; 20],
        value: U256::from(1u64),
        data: Vec::new(),
    };
    let send_id = client.send_transaction(raw).await.unwrap();
    let Ok(LesMessage::SendTransaction(submitted)) = server.next_message().await else {
        panic!("expected SendTx");
    };
    server
        .reply(LesMessage::TxStatus(TxStatusMessage {
            request_id: submitted.request_id,
            buffer_value: 0,
            statuses: vec![TransactionStatus::Error("transaction underpriced".into())],
        }))
        .await;

    let ClientEvent::SendFailed { send_id: failed, error } = next_event(&mut client).await else {
        panic!("expected the send to fail");
    };
    assert_eq!(failed, send_id);
    assert!(matches!(
        error,
        SendError::Rejected { ref message } if message == "transaction underpriced"
    ));
}

#[tokio::test]
async fn test_forged_proof_disconnects_peer() {
    let (mut client, mut server) = connect(chain(100, 120)).await;
    expect_client_status(&mut server).await;
    server.serve_headers().await;
    assert!(matches!(next_event(&mut client).await, ClientEvent::HeadUpdated(_)));

    let Ok(LesMessage::GetProofs(request)) = server.next_message().await else {
        panic!("expected GetProofs");
    };
    let mut forged = account();
    forged.balance = U256::from(1_000_000_000_000_000_000_000u128);
    let mut path = vec![0x20];
    path.extend_from_slice(&keccak256(&ADDRESS));
    let forged_leaf = rlp::encode_list(&[
        rlp::encode_bytes(&path),
        rlp::encode_bytes(&forged.encode()),
    ]);
    server
        .reply(LesMessage::Proofs(ProofsMessage {
            request_id: request.request_id,
            buffer_value: 0,
            nodes: vec![forged_leaf],
        }))
        .await;

    assert_eq!(
        server.next_message().await,
        Err(Some(DisconnectReason::SubprotocolSpecific))
    );
    let ClientEvent::Disconnected { reason } = next_event(&mut client).await else {
        panic!("expected a disconnect");
    };
    assert!(reason.contains("proof"), "{reason}");

    let store = client.join().await.unwrap();
    assert_eq!(store.account_state(), None);
    assert_eq!(store.last_block_header().unwrap().height, 120);
}

#[tokio::test]
async fn test_unlinked_headers_disconnect_peer() {
    let (mut client, mut server) = connect(chain(100, 120)).await;
    expect_client_status(&mut server).await;

    let Ok(LesMessage::GetBlockHeaders(request)) = server.next_message().await else {
        panic!("expected GetBlockHeaders");
    };
    let mut headers = server.headers_for(&request);
    headers[5].parent_hash = [0xee; 32];
    headers[5] = headers[5].clone().sealed();
    server
        .reply(LesMessage::BlockHeaders(BlockHeadersMessage {
            request_id: request.request_id,
            buffer_value: 0,
            headers,
        }))
        .await;

    assert_eq!(
        server.next_message().await,
        Err(Some(DisconnectReason::SubprotocolSpecific))
    );
    let ClientEvent::Disconnected { reason } = next_event(&mut client).await else {
        panic!("expected a disconnect");
    };
    assert!(reason.contains("does not link"), "{reason}");

    let store = client.join().await.unwrap();
    assert_eq!(store.header_count(), 1);
    assert_eq!(store.last_block_header().unwrap().height, 100);
}

#[tokio::test]
async fn test_announce_extends_synced_chain() {
    let full_chain = chain(100, 130);
    let (mut client, mut server) = connect(full_chain[..=20].to_vec()).await;
    expect_client_status(&mut server).await;
    server.serve_headers().await;
    let ClientEvent::HeadUpdated(head) = next_event(&mut client).await else {
        panic!("expected a head update");
    };
    assert_eq!(head.height, 120);
    let Ok(LesMessage::GetProofs(_)) = server.next_message().await else {
        panic!("expected GetProofs");
    };

    // The server learns ten more blocks and announces the new head.
    server.chain = full_chain.clone();
    let tip = full_chain.last().unwrap();
    server
        .reply(LesMessage::Announce(lumen_p2p::les::AnnounceMessage {
            head_hash: tip.hash,
            head_height: tip.height,
            head_td: U256::ZERO,
            reorg_depth: 0,
        }))
        .await;

    let request = server.serve_headers().await;
    assert_eq!(request.origin, BlockId::Number(120));
    let ClientEvent::HeadUpdated(head) = next_event(&mut client).await else {
        panic!("expected a head update");
    };
    assert_eq!(head.hash, tip.hash);
}
