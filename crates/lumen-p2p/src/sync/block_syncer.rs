//! Header chain synchronisation with fork recovery.

use lumen_core::{validate_headers, BlockHeader, BlockValidationError};
use tracing::{debug, info, warn};

use super::store::ChainStore;
use super::SyncError;
use crate::tasks::{BlockHeadersTask, Task};

/// What the session should do after the syncer saw a response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncStep {
    /// Issue another header request.
    Request(Task),
    /// Sync reached the peer's head; this is the new trusted head.
    Completed(BlockHeader),
}

/// Drives header requests from the last stored header up to the peer's head.
///
/// At most one sync runs at a time; triggers arriving while syncing are
/// dropped.
#[derive(Debug)]
pub struct BlockSyncer {
    headers_limit: u64,
    syncing: bool,
}

impl BlockSyncer {
    /// Pages include their anchor header, so a limit below 2 is raised to 2.
    pub fn new(headers_limit: u64) -> Self {
        debug_assert!(headers_limit >= 2, "headers limit {headers_limit} cannot advance");
        Self {
            headers_limit: headers_limit.max(2),
            syncing: false,
        }
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing
    }

    /// Forget any sync in progress, e.g. after the peer went away.
    pub fn reset(&mut self) {
        self.syncing = false;
    }

    fn forward(&self, from: BlockHeader) -> Task {
        Task::BlockHeaders(BlockHeadersTask {
            from,
            limit: self.headers_limit,
            reverse: false,
        })
    }

    /// The peer told us about its best block, via Status or Announce.
    pub fn on_best_block<S: ChainStore + ?Sized>(
        &mut self,
        store: &S,
        best_hash: [u8; 32],
        best_height: u64,
    ) -> Result<Option<Task>, SyncError> {
        if self.syncing {
            debug!(best_height, "Already syncing");
            return Ok(None);
        }

        let last = store.last_block_header().ok_or(SyncError::EmptyStore)?;
        if last.height > best_height || (last.height == best_height && last.hash == best_hash) {
            debug!(local = last.height, best_height, "No sync required");
            return Ok(None);
        }

        info!(from = last.height, to = best_height, "Starting header sync");
        self.syncing = true;
        Ok(Some(self.forward(last)))
    }

    /// Headers arrived for `task`.
    pub fn on_block_headers<S: ChainStore + ?Sized>(
        &mut self,
        store: &mut S,
        task: &BlockHeadersTask,
        headers: Vec<BlockHeader>,
    ) -> Result<SyncStep, SyncError> {
        let result = if task.reverse {
            self.handle_fork(store, task, &headers)
        } else {
            self.handle_headers(store, task, headers)
        };
        if result.is_err() {
            self.syncing = false;
        }
        result
    }

    fn handle_headers<S: ChainStore + ?Sized>(
        &mut self,
        store: &mut S,
        task: &BlockHeadersTask,
        headers: Vec<BlockHeader>,
    ) -> Result<SyncStep, SyncError> {
        match validate_headers(&headers, &task.from) {
            Ok(()) => {}
            Err(BlockValidationError::ForkDetected { height, .. }) => {
                warn!(height, "Fork detected, requesting reversed headers");
                return Ok(SyncStep::Request(Task::BlockHeaders(BlockHeadersTask {
                    from: task.from.clone(),
                    limit: self.headers_limit,
                    reverse: true,
                })));
            }
            Err(e) => return Err(e.into()),
        }

        store.save_block_headers(&headers);
        let last = headers
            .last()
            .cloned()
            .ok_or_else(|| {
                SyncError::Validation(BlockValidationError::InvalidChain {
                    reason: "empty header batch".to_string(),
                })
            })?;

        if (headers.len() as u64) < self.headers_limit || last.height <= task.from.height {
            self.syncing = false;
            info!(height = last.height, hash = %last.hash_hex(), "Header sync complete");
            Ok(SyncStep::Completed(last))
        } else {
            debug!(height = last.height, "Requesting next header batch");
            Ok(SyncStep::Request(self.forward(last)))
        }
    }

    fn handle_fork<S: ChainStore + ?Sized>(
        &mut self,
        store: &S,
        task: &BlockHeadersTask,
        headers: &[BlockHeader],
    ) -> Result<SyncStep, SyncError> {
        let local = store.block_headers_reversed(task.from.height, headers.len());
        let ancestor = local
            .into_iter()
            .find(|local| {
                headers
                    .iter()
                    .any(|remote| remote.hash == local.hash && remote.height == local.height)
            })
            .ok_or(SyncError::InvalidForkedPeer {
                height: task.from.height,
            })?;

        info!(height = ancestor.height, "Found common ancestor, resuming sync");
        Ok(SyncStep::Request(self.forward(ancestor)))
    }
}
