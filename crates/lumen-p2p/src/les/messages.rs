//! les/2 wire messages.
//!
//! Every message encodes and decodes, so tests can stand in for a serving
//! node with the same types the client uses.

use alloy_primitives::U256;
use lumen_core::rlp::{self, RlpError, RlpItem};
use lumen_core::{keccak256, BlockHeader, Transaction};

use super::LesError;

pub const STATUS: u64 = 0x00;
pub const ANNOUNCE: u64 = 0x01;
pub const GET_BLOCK_HEADERS: u64 = 0x02;
pub const BLOCK_HEADERS: u64 = 0x03;
pub const GET_PROOFS: u64 = 0x0f;
pub const PROOFS: u64 = 0x10;
pub const SEND_TX_V2: u64 = 0x13;
pub const GET_TX_STATUS: u64 = 0x14;
pub const TX_STATUS: u64 = 0x15;

/// Flow-control cost entry advertised in Status.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MaxCost {
    pub code: u64,
    pub base_cost: u64,
    pub request_cost: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlowControl {
    pub buffer_limit: u64,
    pub minimum_recharge: u64,
    pub max_costs: Vec<MaxCost>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusMessage {
    pub protocol_version: u64,
    pub network_id: u64,
    pub head_td: U256,
    pub head_hash: [u8; 32],
    pub head_height: u64,
    pub genesis_hash: [u8; 32],
    pub announce_type: Option<u64>,
    pub serve_headers: bool,
    pub serve_chain_since: Option<u64>,
    pub serve_state_since: Option<u64>,
    pub tx_relay: bool,
    pub flow_control: Option<FlowControl>,
}

fn pair(key: &str, value: Vec<u8>) -> Vec<u8> {
    rlp::encode_list(&[rlp::encode_str(key), value])
}

impl StatusMessage {
    /// The Status a light client sends: no serving flags.
    pub fn light(
        network_id: u64,
        genesis_hash: [u8; 32],
        head: &BlockHeader,
        protocol_version: u64,
    ) -> Self {
        Self {
            protocol_version,
            network_id,
            head_td: head.total_difficulty,
            head_hash: head.hash,
            head_height: head.height,
            genesis_hash,
            announce_type: Some(1),
            serve_headers: false,
            serve_chain_since: None,
            serve_state_since: None,
            tx_relay: false,
            flow_control: None,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut entries = vec![
            pair("protocolVersion", rlp::encode_u64(self.protocol_version)),
            pair("networkId", rlp::encode_u64(self.network_id)),
            pair("headTd", rlp::encode_u256(&self.head_td)),
            pair("headHash", rlp::encode_bytes(&self.head_hash)),
            pair("headNum", rlp::encode_u64(self.head_height)),
            pair("genesisHash", rlp::encode_bytes(&self.genesis_hash)),
        ];
        if let Some(announce_type) = self.announce_type {
            entries.push(pair("announceType", rlp::encode_u64(announce_type)));
        }
        if self.serve_headers {
            entries.push(pair("serveHeaders", rlp::encode_list(&[])));
        }
        if let Some(since) = self.serve_chain_since {
            entries.push(pair("serveChainSince", rlp::encode_u64(since)));
        }
        if let Some(since) = self.serve_state_since {
            entries.push(pair("serveStateSince", rlp::encode_u64(since)));
        }
        if self.tx_relay {
            entries.push(pair("txRelay", rlp::encode_list(&[])));
        }
        if let Some(flow) = &self.flow_control {
            let costs: Vec<Vec<u8>> = flow
                .max_costs
                .iter()
                .map(|cost| {
                    rlp::encode_list(&[
                        rlp::encode_u64(cost.code),
                        rlp::encode_u64(cost.base_cost),
                        rlp::encode_u64(cost.request_cost),
                    ])
                })
                .collect();
            entries.push(pair("flowControl/BL", rlp::encode_u64(flow.buffer_limit)));
            entries.push(pair("flowControl/MRR", rlp::encode_u64(flow.minimum_recharge)));
            entries.push(pair("flowControl/MRC", rlp::encode_list(&costs)));
        }
        rlp::encode_list(&entries)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, LesError> {
        let invalid = |source| LesError::InvalidMessage {
            code: STATUS,
            source,
        };
        let item = rlp::decode(payload).map_err(invalid)?;
        let entries = item.as_list().map_err(invalid)?;

        let mut pairs: Vec<(&str, Option<&RlpItem>)> = Vec::with_capacity(entries.len());
        for entry in entries {
            let key = entry.element(0).and_then(RlpItem::as_str).map_err(invalid)?;
            pairs.push((key, entry.as_list().map_err(invalid)?.get(1)));
        }
        let lookup = |key: &'static str| pairs.iter().find(|(k, _)| *k == key).map(|(_, v)| *v);
        let required =
            |key: &'static str| lookup(key).flatten().ok_or(LesError::MissingStatusField { key });
        let optional_u64 = |key: &'static str| -> Result<Option<u64>, LesError> {
            lookup(key)
                .flatten()
                .map(|value| value.as_u64().map_err(invalid))
                .transpose()
        };

        let flow_control = match (
            optional_u64("flowControl/BL")?,
            optional_u64("flowControl/MRR")?,
            lookup("flowControl/MRC").flatten(),
        ) {
            (Some(buffer_limit), Some(minimum_recharge), costs) => {
                let max_costs = match costs {
                    Some(costs) => costs
                        .as_list()
                        .map_err(invalid)?
                        .iter()
                        .map(|cost| {
                            Ok(MaxCost {
                                code: cost.element(0)?.as_u64()?,
                                base_cost: cost.element(1)?.as_u64()?,
                                request_cost: cost.element(2)?.as_u64()?,
                            })
                        })
                        .collect::<Result<Vec<_>, RlpError>>()
                        .map_err(invalid)?,
                    None => Vec::new(),
                };
                Some(FlowControl {
                    buffer_limit,
                    minimum_recharge,
                    max_costs,
                })
            }
            _ => None,
        };

        Ok(Self {
            protocol_version: required("protocolVersion")?.as_u64().map_err(invalid)?,
            network_id: required("networkId")?.as_u64().map_err(invalid)?,
            head_td: required("headTd")?.as_u256().map_err(invalid)?,
            head_hash: required("headHash")?.as_fixed().map_err(invalid)?,
            head_height: required("headNum")?.as_u64().map_err(invalid)?,
            genesis_hash: required("genesisHash")?.as_fixed().map_err(invalid)?,
            announce_type: optional_u64("announceType")?,
            serve_headers: lookup("serveHeaders").is_some(),
            serve_chain_since: optional_u64("serveChainSince")?,
            serve_state_since: optional_u64("serveStateSince")?,
            tx_relay: lookup("txRelay").is_some(),
            flow_control,
        })
    }
}

/// New head announcement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnnounceMessage {
    pub head_hash: [u8; 32],
    pub head_height: u64,
    pub head_td: U256,
    pub reorg_depth: u64,
}

impl AnnounceMessage {
    pub fn encode(&self) -> Vec<u8> {
        rlp::encode_list(&[
            rlp::encode_bytes(&self.head_hash),
            rlp::encode_u64(self.head_height),
            rlp::encode_u256(&self.head_td),
            rlp::encode_u64(self.reorg_depth),
            rlp::encode_list(&[]),
        ])
    }

    pub fn decode(item: &RlpItem) -> Result<Self, RlpError> {
        Ok(Self {
            head_hash: item.element(0)?.as_fixed()?,
            head_height: item.element(1)?.as_u64()?,
            head_td: item.element(2)?.as_u256()?,
            reorg_depth: item.element(3)?.as_u64()?,
        })
    }
}

/// Where a header request starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockId {
    Number(u64),
    Hash([u8; 32]),
}

impl BlockId {
    fn encode(&self) -> Vec<u8> {
        match self {
            BlockId::Number(number) => rlp::encode_u64(*number),
            BlockId::Hash(hash) => rlp::encode_bytes(hash),
        }
    }

    fn decode(item: &RlpItem) -> Result<Self, RlpError> {
        let bytes = item.as_bytes()?;
        if bytes.len() == 32 {
            Ok(BlockId::Hash(item.as_fixed()?))
        } else {
            Ok(BlockId::Number(item.as_u64()?))
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GetBlockHeadersMessage {
    pub request_id: u64,
    pub origin: BlockId,
    pub max_headers: u64,
    pub skip: u64,
    pub reverse: bool,
}

impl GetBlockHeadersMessage {
    pub fn encode(&self) -> Vec<u8> {
        rlp::encode_list(&[
            rlp::encode_u64(self.request_id),
            rlp::encode_list(&[
                self.origin.encode(),
                rlp::encode_u64(self.max_headers),
                rlp::encode_u64(self.skip),
                rlp::encode_u64(u64::from(self.reverse)),
            ]),
        ])
    }

    pub fn decode(item: &RlpItem) -> Result<Self, RlpError> {
        let query = item.element(1)?;
        Ok(Self {
            request_id: item.element(0)?.as_u64()?,
            origin: BlockId::decode(query.element(0)?)?,
            max_headers: query.element(1)?.as_u64()?,
            skip: query.element(2)?.as_u64()?,
            reverse: query.element(3)?.as_bool()?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockHeadersMessage {
    pub request_id: u64,
    pub buffer_value: u64,
    pub headers: Vec<BlockHeader>,
}

impl BlockHeadersMessage {
    pub fn encode(&self) -> Vec<u8> {
        let headers: Vec<Vec<u8>> = self.headers.iter().map(BlockHeader::encode).collect();
        rlp::encode_list(&[
            rlp::encode_u64(self.request_id),
            rlp::encode_u64(self.buffer_value),
            rlp::encode_list(&headers),
        ])
    }

    pub fn decode(item: &RlpItem) -> Result<Self, RlpError> {
        let headers = item
            .element(2)?
            .as_list()?
            .iter()
            .map(BlockHeader::decode)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            request_id: item.element(0)?.as_u64()?,
            buffer_value: item.element(1)?.as_u64()?,
            headers,
        })
    }
}

/// One entry of a GetProofs request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProofRequest {
    pub block_hash: [u8; 32],
    /// Storage-trie key; empty when proving the account itself.
    pub storage_key: Vec<u8>,
    pub key: [u8; 32],
    pub from_level: u64,
}

impl ProofRequest {
    /// Request the state-trie path for `address` at `block_hash`.
    pub fn account(block_hash: [u8; 32], address: &[u8; 20]) -> Self {
        Self {
            block_hash,
            storage_key: Vec::new(),
            key: keccak256(address),
            from_level: 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GetProofsMessage {
    pub request_id: u64,
    pub requests: Vec<ProofRequest>,
}

impl GetProofsMessage {
    pub fn encode(&self) -> Vec<u8> {
        let requests: Vec<Vec<u8>> = self
            .requests
            .iter()
            .map(|request| {
                rlp::encode_list(&[
                    rlp::encode_bytes(&request.block_hash),
                    rlp::encode_bytes(&request.storage_key),
                    rlp::encode_bytes(&request.key),
                    rlp::encode_u64(request.from_level),
                ])
            })
            .collect();
        rlp::encode_list(&[rlp::encode_u64(self.request_id), rlp::encode_list(&requests)])
    }

    pub fn decode(item: &RlpItem) -> Result<Self, RlpError> {
        let requests = item
            .element(1)?
            .as_list()?
            .iter()
            .map(|request| {
                Ok(ProofRequest {
                    block_hash: request.element(0)?.as_fixed()?,
                    storage_key: request.element(1)?.as_bytes()?.to_vec(),
                    key: request.element(2)?.as_fixed()?,
                    from_level: request.element(3)?.as_u64()?,
                })
            })
            .collect::<Result<Vec<_>, RlpError>>()?;
        Ok(Self {
            request_id: item.element(0)?.as_u64()?,
            requests,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProofsMessage {
    pub request_id: u64,
    pub buffer_value: u64,
    /// RLP of each trie node, root first.
    pub nodes: Vec<Vec<u8>>,
}

impl ProofsMessage {
    pub fn encode(&self) -> Vec<u8> {
        rlp::encode_list(&[
            rlp::encode_u64(self.request_id),
            rlp::encode_u64(self.buffer_value),
            rlp::encode_list(&self.nodes),
        ])
    }

    pub fn decode(item: &RlpItem) -> Result<Self, RlpError> {
        let nodes = item
            .element(2)?
            .as_list()?
            .iter()
            .map(RlpItem::encode)
            .collect();
        Ok(Self {
            request_id: item.element(0)?.as_u64()?,
            buffer_value: item.element(1)?.as_u64()?,
            nodes,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendTransactionMessage {
    pub request_id: u64,
    pub transactions: Vec<Transaction>,
}

impl SendTransactionMessage {
    pub fn encode(&self) -> Vec<u8> {
        let transactions: Vec<Vec<u8>> = self.transactions.iter().map(Transaction::encode).collect();
        rlp::encode_list(&[rlp::encode_u64(self.request_id), rlp::encode_list(&transactions)])
    }

    pub fn decode(item: &RlpItem) -> Result<Self, RlpError> {
        let transactions = item
            .element(1)?
            .as_list()?
            .iter()
            .map(Transaction::decode)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            request_id: item.element(0)?.as_u64()?,
            transactions,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GetTxStatusMessage {
    pub request_id: u64,
    pub hashes: Vec<[u8; 32]>,
}

impl GetTxStatusMessage {
    pub fn encode(&self) -> Vec<u8> {
        let hashes: Vec<Vec<u8>> = self.hashes.iter().map(|hash| rlp::encode_bytes(hash)).collect();
        rlp::encode_list(&[rlp::encode_u64(self.request_id), rlp::encode_list(&hashes)])
    }

    pub fn decode(item: &RlpItem) -> Result<Self, RlpError> {
        let hashes = item
            .element(1)?
            .as_list()?
            .iter()
            .map(RlpItem::as_fixed::<32>)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            request_id: item.element(0)?.as_u64()?,
            hashes,
        })
    }
}

/// Where a serving node says a transaction is.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransactionStatus {
    Unknown,
    Queued,
    Pending,
    Included {
        block_hash: [u8; 32],
        block_number: u64,
        index: u64,
    },
    Error(String),
}

impl TransactionStatus {
    fn encode(&self) -> Vec<u8> {
        let (code, data) = match self {
            TransactionStatus::Unknown => (0, rlp::encode_list(&[])),
            TransactionStatus::Queued => (1, rlp::encode_list(&[])),
            TransactionStatus::Pending => (2, rlp::encode_list(&[])),
            TransactionStatus::Included {
                block_hash,
                block_number,
                index,
            } => (
                3,
                rlp::encode_list(&[
                    rlp::encode_bytes(block_hash),
                    rlp::encode_u64(*block_number),
                    rlp::encode_u64(*index),
                ]),
            ),
            TransactionStatus::Error(message) => (4, rlp::encode_str(message)),
        };
        rlp::encode_list(&[rlp::encode_u64(code), data])
    }

    fn decode(item: &RlpItem) -> Result<Self, RlpError> {
        Ok(match item.element(0)?.as_u64()? {
            1 => TransactionStatus::Queued,
            2 => TransactionStatus::Pending,
            3 => {
                let data = item.element(1)?;
                TransactionStatus::Included {
                    block_hash: data.element(0)?.as_fixed()?,
                    block_number: data.element(1)?.as_u64()?,
                    index: data.element(2)?.as_u64()?,
                }
            }
            4 => TransactionStatus::Error(item.element(1)?.as_str()?.to_string()),
            _ => TransactionStatus::Unknown,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxStatusMessage {
    pub request_id: u64,
    pub buffer_value: u64,
    pub statuses: Vec<TransactionStatus>,
}

impl TxStatusMessage {
    pub fn encode(&self) -> Vec<u8> {
        let statuses: Vec<Vec<u8>> = self.statuses.iter().map(TransactionStatus::encode).collect();
        rlp::encode_list(&[
            rlp::encode_u64(self.request_id),
            rlp::encode_u64(self.buffer_value),
            rlp::encode_list(&statuses),
        ])
    }

    pub fn decode(item: &RlpItem) -> Result<Self, RlpError> {
        let statuses = item
            .element(2)?
            .as_list()?
            .iter()
            .map(TransactionStatus::decode)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            request_id: item.element(0)?.as_u64()?,
            buffer_value: item.element(1)?.as_u64()?,
            statuses,
        })
    }
}

/// A decoded LES message. Codes the client never handles are rejected at
/// decode time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LesMessage {
    Status(StatusMessage),
    Announce(AnnounceMessage),
    GetBlockHeaders(GetBlockHeadersMessage),
    BlockHeaders(BlockHeadersMessage),
    GetProofs(GetProofsMessage),
    Proofs(ProofsMessage),
    SendTransaction(SendTransactionMessage),
    GetTxStatus(GetTxStatusMessage),
    TxStatus(TxStatusMessage),
}

impl LesMessage {
    pub fn code(&self) -> u64 {
        match self {
            LesMessage::Status(_) => STATUS,
            LesMessage::Announce(_) => ANNOUNCE,
            LesMessage::GetBlockHeaders(_) => GET_BLOCK_HEADERS,
            LesMessage::BlockHeaders(_) => BLOCK_HEADERS,
            LesMessage::GetProofs(_) => GET_PROOFS,
            LesMessage::Proofs(_) => PROOFS,
            LesMessage::SendTransaction(_) => SEND_TX_V2,
            LesMessage::GetTxStatus(_) => GET_TX_STATUS,
            LesMessage::TxStatus(_) => TX_STATUS,
        }
    }

    pub fn request_id(&self) -> Option<u64> {
        match self {
            LesMessage::Status(_) | LesMessage::Announce(_) => None,
            LesMessage::GetBlockHeaders(m) => Some(m.request_id),
            LesMessage::BlockHeaders(m) => Some(m.request_id),
            LesMessage::GetProofs(m) => Some(m.request_id),
            LesMessage::Proofs(m) => Some(m.request_id),
            LesMessage::SendTransaction(m) => Some(m.request_id),
            LesMessage::GetTxStatus(m) => Some(m.request_id),
            LesMessage::TxStatus(m) => Some(m.request_id),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            LesMessage::Status(m) => m.encode(),
            LesMessage::Announce(m) => m.encode(),
            LesMessage::GetBlockHeaders(m) => m.encode(),
            LesMessage::BlockHeaders(m) => m.encode(),
            LesMessage::GetProofs(m) => m.encode(),
            LesMessage::Proofs(m) => m.encode(),
            LesMessage::SendTransaction(m) => m.encode(),
            LesMessage::GetTxStatus(m) => m.encode(),
            LesMessage::TxStatus(m) => m.encode(),
        }
    }

    /// Decode a payload received under capability-relative `code`.
    pub fn decode(code: u64, payload: &[u8]) -> Result<Self, LesError> {
        if code == STATUS {
            return StatusMessage::decode(payload).map(LesMessage::Status);
        }

        let invalid = |source| LesError::InvalidMessage { code, source };
        let item = rlp::decode(payload).map_err(invalid)?;
        let message = match code {
            ANNOUNCE => AnnounceMessage::decode(&item).map(LesMessage::Announce),
            GET_BLOCK_HEADERS => {
                GetBlockHeadersMessage::decode(&item).map(LesMessage::GetBlockHeaders)
            }
            BLOCK_HEADERS => BlockHeadersMessage::decode(&item).map(LesMessage::BlockHeaders),
            GET_PROOFS => GetProofsMessage::decode(&item).map(LesMessage::GetProofs),
            PROOFS => ProofsMessage::decode(&item).map(LesMessage::Proofs),
            SEND_TX_V2 => SendTransactionMessage::decode(&item).map(LesMessage::SendTransaction),
            GET_TX_STATUS => GetTxStatusMessage::decode(&item).map(LesMessage::GetTxStatus),
            TX_STATUS => TxStatusMessage::decode(&item).map(LesMessage::TxStatus),
            _ => return Err(LesError::UnsupportedMessage { code }),
        };
        message.map_err(invalid)
    }
}
