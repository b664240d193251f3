use lumen_core::{AccountState, BlockHeader};
use tracing::info;

use super::store::ChainStore;
use crate::tasks::{AccountStateTask, Task};

/// Keeps the watched account's state in step with the trusted head.
#[derive(Debug)]
pub struct AccountSyncer {
    address: [u8; 20],
}

impl AccountSyncer {
    pub fn new(address: [u8; 20]) -> Self {
        Self { address }
    }

    pub fn address(&self) -> &[u8; 20] {
        &self.address
    }

    /// Proof request for the account at `header`.
    pub fn sync(&self, header: &BlockHeader) -> Task {
        Task::AccountState(AccountStateTask {
            address: self.address,
            header: header.clone(),
        })
    }

    /// Persist a state that already passed proof verification.
    pub fn on_account_state<S: ChainStore + ?Sized>(
        &self,
        store: &mut S,
        state: AccountState,
        header: &BlockHeader,
    ) -> AccountState {
        info!(
            address = %hex::encode(state.address),
            block = header.height,
            nonce = state.nonce,
            balance = %state.balance,
            "Account state updated"
        );
        store.save_account_state(state.clone());
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::store::MemoryStore;
    use lumen_core::U256;

    #[test]
    fn test_sync_targets_watched_address() {
        let syncer = AccountSyncer::new([0x42; 20]);
        let header = BlockHeader {
            height: 7,
            ..Default::default()
        }
        .sealed();
        assert_eq!(
            syncer.sync(&header),
            Task::AccountState(AccountStateTask {
                address: [0x42; 20],
                header,
            })
        );
    }

    #[test]
    fn test_verified_state_is_stored() {
        let syncer = AccountSyncer::new([0x42; 20]);
        let mut store = MemoryStore::new();
        let state = AccountState {
            address: [0x42; 20],
            nonce: 1,
            balance: U256::from(99u64),
            storage_root: AccountState::EMPTY_STORAGE_ROOT,
            code_hash: AccountState::EMPTY_CODE_HASH,
        };
        let saved = syncer.on_account_state(&mut store, state.clone(), &BlockHeader::default());
        assert_eq!(saved, state);
        assert_eq!(store.account_state(), Some(state));
    }
}
