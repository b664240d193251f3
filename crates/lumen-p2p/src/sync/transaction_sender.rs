use k256::SecretKey;
use lumen_core::{RawTransaction, Signature, Transaction};
use tracing::{info, warn};

use super::store::ChainStore;
use super::SendError;
use crate::crypto;
use crate::les::TransactionStatus;
use crate::tasks::{SendTransactionTask, Task};

/// Signs transactions for the local account and interprets their status.
pub struct TransactionSender {
    secret_key: SecretKey,
    chain_id: u64,
}

impl TransactionSender {
    pub fn new(secret_key: SecretKey, chain_id: u64) -> Self {
        Self {
            secret_key,
            chain_id,
        }
    }

    /// EIP-155 signature over `raw` at `nonce`.
    pub fn sign(&self, raw: &RawTransaction, nonce: u64) -> Result<Signature, SendError> {
        let hash = raw.signing_hash(nonce, self.chain_id);
        let signature = crypto::sign(&hash, &self.secret_key)?;

        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&signature[..32]);
        s.copy_from_slice(&signature[32..64]);
        Ok(Signature {
            v: u64::from(signature[64]) + 35 + 2 * self.chain_id,
            r,
            s,
        })
    }

    /// Build the task for `raw`, taking the nonce from the stored account.
    pub fn send<S: ChainStore + ?Sized>(
        &self,
        store: &S,
        send_id: u64,
        raw: RawTransaction,
    ) -> Result<Task, SendError> {
        let nonce = store
            .account_state()
            .ok_or(SendError::NoAccountState)?
            .nonce;
        let signature = self.sign(&raw, nonce)?;
        Ok(Task::SendTransaction(SendTransactionTask {
            send_id,
            raw,
            nonce,
            signature,
        }))
    }

    /// The first status of the reply decides the outcome.
    pub fn on_status(
        &self,
        task: &SendTransactionTask,
        status: Option<&TransactionStatus>,
    ) -> Result<Transaction, SendError> {
        let outcome = match status {
            None => Err(SendError::NoStatus),
            Some(TransactionStatus::Unknown) => Err(SendError::UnknownStatus),
            Some(TransactionStatus::Error(message)) => Err(SendError::Rejected {
                message: message.clone(),
            }),
            Some(_) => Ok(Transaction::new(&task.raw, task.nonce, task.signature.clone())),
        };
        match &outcome {
            Ok(transaction) => info!(
                send_id = task.send_id,
                hash = %hex::encode(transaction.hash),
                "Transaction accepted"
            ),
            Err(e) => warn!(send_id = task.send_id, error = %e, "Transaction failed"),
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::store::MemoryStore;
    use hex_literal::hex;
    use lumen_core::{AccountState, U256};

    fn sender() -> TransactionSender {
        let key = crypto::secret_key_from_bytes(&[0x46; 32]).unwrap();
        TransactionSender::new(key, 1)
    }

    fn raw() -> RawTransaction {
        RawTransaction {
            gas_price: 20_000_000_000,
            gas_limit: 21_000,
            to: [0x35; 20],
            value: U256::from(1_000_000_000_000_000_000u64),
            data: Vec::new(),
        }
    }

    fn store_with_nonce(nonce: u64) -> MemoryStore {
        let mut store = MemoryStore::new();
        store.save_account_state(AccountState {
            address: [0; 20],
            nonce,
            balance: U256::ZERO,
            storage_root: AccountState::EMPTY_STORAGE_ROOT,
            code_hash: AccountState::EMPTY_CODE_HASH,
        });
        store
    }

    #[test]
    fn test_eip155_signature_vector() {
        let signature = sender().sign(&raw(), 9).unwrap();
        assert_eq!(signature.v, 37);
        assert_eq!(
            signature.r,
            hex!("28ef61340bd939bc2195fe537567866003e1a15d3c71ff63e1590620aa636276")
        );
        assert_eq!(
            signature.s,
            hex!("67cbe9d8997f761aecb703304b3800ccf555c9f3dc64214b297fb1966a3b6d83")
        );
    }

    #[test]
    fn test_send_uses_stored_nonce() {
        let task = sender().send(&store_with_nonce(9), 5, raw()).unwrap();
        let Task::SendTransaction(task) = task else {
            panic!("expected a send task");
        };
        assert_eq!(task.send_id, 5);
        assert_eq!(task.nonce, 9);

        let transaction = Transaction::new(&task.raw, task.nonce, task.signature);
        assert_eq!(
            transaction.encode(),
            hex!("f86c098504a817c800825208943535353535353535353535353535353535353535880de0b6b3a76400008025a028ef61340bd939bc2195fe537567866003e1a15d3c71ff63e1590620aa636276a067cbe9d8997f761aecb703304b3800ccf555c9f3dc64214b297fb1966a3b6d83")
        );
    }

    #[test]
    fn test_send_without_account_state() {
        assert!(matches!(
            sender().send(&MemoryStore::new(), 1, raw()),
            Err(SendError::NoAccountState)
        ));
    }

    #[test]
    fn test_status_outcomes() {
        let sender = sender();
        let Task::SendTransaction(task) = sender.send(&store_with_nonce(0), 1, raw()).unwrap() else {
            panic!("expected a send task");
        };

        assert!(matches!(sender.on_status(&task, None), Err(SendError::NoStatus)));
        assert!(matches!(
            sender.on_status(&task, Some(&TransactionStatus::Unknown)),
            Err(SendError::UnknownStatus)
        ));
        assert!(matches!(
            sender.on_status(&task, Some(&TransactionStatus::Error("underpriced".into()))),
            Err(SendError::Rejected { ref message }) if message == "underpriced"
        ));
        let transaction = sender
            .on_status(&task, Some(&TransactionStatus::Queued))
            .unwrap();
        assert_eq!(transaction.nonce, 0);
        assert_eq!(transaction.to, [0x35; 20]);
    }
}
