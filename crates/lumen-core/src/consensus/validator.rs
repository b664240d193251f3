//! Header chain linkage checks.
//!
//! Known limitation: headers are accepted on hash linkage alone. Neither
//! proof-of-work seals nor difficulty adjustments are checked, so a peer
//! able to mine a competing chain from our last trusted header is not
//! detected here.

use crate::types::chain::BlockHeader;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlockValidationError {
    #[error("Invalid chain: {reason}")]
    InvalidChain { reason: String },

    /// The first header is not the one we asked to start from. Not fatal:
    /// the synchronizer switches to a reverse search for a common ancestor.
    #[error("Fork detected at height {height}: expected {expected}, got {received}")]
    ForkDetected {
        height: u64,
        expected: String,
        received: String,
    },
}

/// Check that `headers` starts at `expected_first` and that every header
/// points at its predecessor.
pub fn validate_headers(
    headers: &[BlockHeader],
    expected_first: &BlockHeader,
) -> Result<(), BlockValidationError> {
    let first = headers.first().ok_or_else(|| BlockValidationError::InvalidChain {
        reason: "empty header list".to_string(),
    })?;

    if first.hash != expected_first.hash {
        return Err(BlockValidationError::ForkDetected {
            height: expected_first.height,
            expected: expected_first.hash_hex(),
            received: first.hash_hex(),
        });
    }

    for pair in headers.windows(2) {
        let (parent, child) = (&pair[0], &pair[1]);
        if child.parent_hash != parent.hash {
            return Err(BlockValidationError::InvalidChain {
                reason: format!(
                    "header {} does not link to parent {}",
                    child.height,
                    parent.hash_hex()
                ),
            });
        }
    }

    Ok(())
}
