//! Storage seam for verified chain data.

use std::collections::BTreeMap;

use lumen_core::{AccountState, BlockHeader};

/// Where the client keeps headers and the watched account once verified.
///
/// Only data that already passed validation is handed to a store.
pub trait ChainStore: Send {
    /// The highest stored header.
    fn last_block_header(&self) -> Option<BlockHeader>;

    /// Persist a validated, contiguous batch. Headers above the batch's last
    /// height belong to an abandoned fork and are dropped.
    fn save_block_headers(&mut self, headers: &[BlockHeader]);

    /// Up to `limit` headers at or below `from_height`, newest first.
    fn block_headers_reversed(&self, from_height: u64, limit: usize) -> Vec<BlockHeader>;

    fn save_account_state(&mut self, state: AccountState);

    fn account_state(&self) -> Option<AccountState>;
}

/// In-memory store keyed by height.
#[derive(Debug, Default)]
pub struct MemoryStore {
    headers: BTreeMap<u64, BlockHeader>,
    account: Option<AccountState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose only header is `checkpoint`.
    pub fn with_checkpoint(checkpoint: BlockHeader) -> Self {
        let mut store = Self::new();
        store.headers.insert(checkpoint.height, checkpoint);
        store
    }

    pub fn header_count(&self) -> usize {
        self.headers.len()
    }

    pub fn header_at(&self, height: u64) -> Option<&BlockHeader> {
        self.headers.get(&height)
    }
}

impl ChainStore for MemoryStore {
    fn last_block_header(&self) -> Option<BlockHeader> {
        self.headers.values().next_back().cloned()
    }

    fn save_block_headers(&mut self, headers: &[BlockHeader]) {
        let Some(last) = headers.last() else {
            return;
        };
        let last_height = last.height;
        self.headers.retain(|height, _| *height <= last_height);
        for header in headers {
            self.headers.insert(header.height, header.clone());
        }
    }

    fn block_headers_reversed(&self, from_height: u64, limit: usize) -> Vec<BlockHeader> {
        self.headers
            .range(..=from_height)
            .rev()
            .take(limit)
            .map(|(_, header)| header.clone())
            .collect()
    }

    fn save_account_state(&mut self, state: AccountState) {
        self.account = Some(state);
    }

    fn account_state(&self) -> Option<AccountState> {
        self.account.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(height: u64, tag: u8) -> BlockHeader {
        BlockHeader {
            height,
            extra_data: vec![tag],
            ..Default::default()
        }
        .sealed()
    }

    #[test]
    fn test_last_and_reversed() {
        let mut store = MemoryStore::with_checkpoint(header(10, 0));
        store.save_block_headers(&[header(11, 0), header(12, 0), header(13, 0)]);

        assert_eq!(store.last_block_header().unwrap().height, 13);
        let heights: Vec<u64> = store
            .block_headers_reversed(12, 2)
            .iter()
            .map(|h| h.height)
            .collect();
        assert_eq!(heights, vec![12, 11]);
        assert_eq!(store.block_headers_reversed(100, 10).len(), 4);
    }

    #[test]
    fn test_fork_replacement_drops_stale_tail() {
        let mut store = MemoryStore::new();
        store.save_block_headers(&[header(1, 0), header(2, 0), header(3, 0), header(4, 0)]);
        store.save_block_headers(&[header(2, 0), header(3, 1)]);

        assert_eq!(store.header_count(), 3);
        assert_eq!(store.last_block_header().unwrap(), header(3, 1));
        assert!(store.header_at(4).is_none());
    }

    #[test]
    fn test_account_state() {
        let mut store = MemoryStore::new();
        assert!(store.account_state().is_none());
        let state = AccountState {
            address: [1; 20],
            nonce: 4,
            balance: lumen_core::U256::from(10u64),
            storage_root: AccountState::EMPTY_STORAGE_ROOT,
            code_hash: AccountState::EMPTY_CODE_HASH,
        };
        store.save_account_state(state.clone());
        assert_eq!(store.account_state(), Some(state));
    }
}
