//! Actor-based concurrency for the ledger
//!
//! Single-writer pattern: one tokio task owns the write path and drains a
//! bounded mailbox. The order in which messages leave the mailbox is the
//! commit order, so every transaction is validated against the state left by
//! all earlier commits.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │           Callers (any number of tasks)               │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │               LedgerHandle (Clone)                    │
//! │         Sends messages to actor mailbox              │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       │ mpsc::channel (bounded)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │              LedgerActor (Single Task)                │
//! │   execute(state, tx) ─▶ receipt ─▶ Storage::commit    │
//! │         (one WriteBatch per transaction)              │
//! └───────────────────────────────────────────────────────┘
//! ```

use crate::{
    audit::{self, AuditReport},
    metrics::Metrics,
    program::{self, ProgramParams},
    state::StateView,
    storage::{ChainHead, Storage},
    transaction::Transaction,
    types::{Address, Block, CommitReceipt, InvoiceRecord, LogEntry},
    Error, Result,
};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Message sent to the ledger actor
pub enum LedgerMessage {
    /// Validate and commit a transaction
    Submit {
        tx: Transaction,
        response: oneshot::Sender<Result<CommitReceipt>>,
    },

    /// Read a record
    FetchRecord {
        address: Address,
        response: oneshot::Sender<Result<Option<InvoiceRecord>>>,
    },

    /// Read a balance
    Balance {
        address: Address,
        response: oneshot::Sender<Result<u64>>,
    },

    /// Current chain head
    ChainHead {
        response: oneshot::Sender<ChainHead>,
    },

    /// Store a sealed block
    FinalizeBlock {
        block: Block,
        response: oneshot::Sender<Result<()>>,
    },

    /// Get latest block
    GetLatestBlock {
        response: oneshot::Sender<Result<Option<Block>>>,
    },

    /// Run an audit at the current commit point
    Audit {
        check: AuditCheck,
        response: oneshot::Sender<Result<AuditReport>>,
    },

    /// Stop the actor once earlier messages are handled
    Shutdown { response: oneshot::Sender<()> },
}

/// Which audit to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditCheck {
    /// Receipt hash chain
    Chain,
    /// Ownership consistency and conservation
    Invariants,
    /// Full re-execution from genesis
    Replay,
}

/// Actor that processes ledger messages
pub struct LedgerActor {
    /// Storage backend
    storage: Arc<Storage>,

    /// Mailbox for incoming messages
    mailbox: mpsc::Receiver<LedgerMessage>,

    /// Program parameters
    params: ProgramParams,

    /// Metrics
    metrics: Metrics,

    /// Last committed receipt
    head: ChainHead,
}

impl LedgerActor {
    /// Create new actor positioned at the stored chain head
    pub fn new(
        storage: Arc<Storage>,
        mailbox: mpsc::Receiver<LedgerMessage>,
        params: ProgramParams,
        metrics: Metrics,
    ) -> Result<Self> {
        let head = storage.chain_head()?;
        Ok(Self {
            storage,
            mailbox,
            params,
            metrics,
            head,
        })
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            if let LedgerMessage::Shutdown { response } = msg {
                tracing::info!(sequence = self.head.last_sequence, "Ledger actor stopping");
                let _ = response.send(());
                break;
            }
            self.handle_message(msg);
        }
    }

    /// Handle a single message
    fn handle_message(&mut self, msg: LedgerMessage) {
        match msg {
            LedgerMessage::Submit { tx, response } => {
                let result = self.submit(tx);
                if let Err(e) = &result {
                    if e.rejection().is_none() {
                        tracing::error!("Commit failed: {}", e);
                    }
                }
                let _ = response.send(result);
            }

            LedgerMessage::FetchRecord { address, response } => {
                tracing::debug!(record = %address, "Fetch record");
                let _ = response.send(self.storage.record(&address));
            }

            LedgerMessage::Balance { address, response } => {
                let _ = response.send(self.storage.balance(&address));
            }

            LedgerMessage::ChainHead { response } => {
                let _ = response.send(self.head);
            }

            LedgerMessage::FinalizeBlock { block, response } => {
                let result = self
                    .check_block(&block)
                    .and_then(|_| self.storage.put_block(&block));
                let _ = response.send(result);
            }

            LedgerMessage::GetLatestBlock { response } => {
                let _ = response.send(self.storage.get_latest_block());
            }

            LedgerMessage::Audit { check, response } => {
                let result = match check {
                    AuditCheck::Chain => audit::verify_chain(&self.storage).map(|receipts| {
                        AuditReport {
                            receipts_checked: receipts,
                            ..AuditReport::default()
                        }
                    }),
                    AuditCheck::Invariants => audit::check_invariants(&self.storage),
                    AuditCheck::Replay => audit::replay(&self.storage, &self.params),
                };
                if let Err(e) = &result {
                    tracing::error!(check = ?check, "Audit failed: {}", e);
                }
                let _ = response.send(result);
            }

            LedgerMessage::Shutdown { .. } => {
                // Handled in main loop
            }
        }
    }

    /// Validate against committed state, then commit atomically
    fn submit(&mut self, tx: Transaction) -> Result<CommitReceipt> {
        let transition = match program::execute(self.storage.as_ref(), &tx, &self.params) {
            Ok(transition) => transition,
            Err(Error::Rejected(rejection)) => {
                self.metrics.record_rejection(rejection);
                tracing::warn!(
                    record = %tx.instruction.record_address(),
                    kind = %tx.instruction.kind(),
                    reason = rejection.code(),
                    "Transaction rejected"
                );
                return Err(rejection.into());
            }
            Err(e) => return Err(e),
        };

        let mut receipt = CommitReceipt {
            sequence: self.head.last_sequence + 1,
            tx_hash: tx.hash(),
            kind: transition.kind,
            record_address: transition.record.record_address,
            balance_changes: transition.balance_changes.clone(),
            committed_at: Utc::now(),
            previous_hash: self.head.last_hash,
            receipt_hash: [0u8; 32],
        };
        receipt.receipt_hash = receipt.compute_hash();

        let entry = LogEntry {
            receipt,
            transaction: tx,
        };
        self.storage.commit(&transition, &entry)?;

        self.head = ChainHead {
            last_sequence: entry.receipt.sequence,
            last_hash: entry.receipt.receipt_hash,
        };
        self.metrics.record_commit(transition.kind);

        tracing::info!(
            sequence = entry.receipt.sequence,
            record = %entry.receipt.record_address,
            kind = %entry.receipt.kind,
            "Transaction committed"
        );

        Ok(entry.receipt)
    }

    /// A block must extend the latest one and seal only committed receipts
    fn check_block(&self, block: &Block) -> Result<()> {
        let (height, first_sequence, previous_hash) = match self.storage.get_latest_block()? {
            Some(prev) => (prev.block_height + 1, prev.last_sequence + 1, prev.block_hash),
            None => (0, 1, [0u8; 32]),
        };

        if block.block_height != height
            || block.first_sequence != first_sequence
            || block.previous_block_hash != previous_hash
        {
            return Err(Error::InvalidBlock(format!(
                "block {} does not extend the chain (expected height {} from sequence {})",
                block.block_height, height, first_sequence
            )));
        }
        if block.last_sequence < block.first_sequence
            || block.last_sequence > self.head.last_sequence
        {
            return Err(Error::InvalidBlock(format!(
                "block {} seals sequences {}..={} but head is {}",
                block.block_height, block.first_sequence, block.last_sequence,
                self.head.last_sequence
            )));
        }
        if block.compute_hash() != block.block_hash {
            return Err(Error::InvalidBlock(format!(
                "block {} hash mismatch",
                block.block_height
            )));
        }

        Ok(())
    }
}

/// Handle for sending messages to the actor
#[derive(Clone)]
pub struct LedgerHandle {
    sender: mpsc::Sender<LedgerMessage>,
}

impl LedgerHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<LedgerMessage>) -> Self {
        Self { sender }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> LedgerMessage,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))
    }

    /// Submit a transaction
    pub async fn submit(&self, tx: Transaction) -> Result<CommitReceipt> {
        self.request(|response| LedgerMessage::Submit { tx, response })
            .await?
    }

    /// Fetch a record
    pub async fn fetch_record(&self, address: Address) -> Result<Option<InvoiceRecord>> {
        self.request(|response| LedgerMessage::FetchRecord { address, response })
            .await?
    }

    /// Read a balance
    pub async fn balance(&self, address: Address) -> Result<u64> {
        self.request(|response| LedgerMessage::Balance { address, response })
            .await?
    }

    /// Current chain head
    pub async fn chain_head(&self) -> Result<ChainHead> {
        self.request(|response| LedgerMessage::ChainHead { response })
            .await
    }

    /// Store a sealed block
    pub async fn finalize_block(&self, block: Block) -> Result<()> {
        self.request(|response| LedgerMessage::FinalizeBlock { block, response })
            .await?
    }

    /// Get latest block
    pub async fn get_latest_block(&self) -> Result<Option<Block>> {
        self.request(|response| LedgerMessage::GetLatestBlock { response })
            .await?
    }

    /// Run an audit
    pub async fn audit(&self, check: AuditCheck) -> Result<AuditReport> {
        self.request(|response| LedgerMessage::Audit { check, response })
            .await?
    }

    /// Ask the actor to stop once the messages queued ahead of this one are handled
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|response| LedgerMessage::Shutdown { response })
            .await
    }
}

/// Spawn the ledger actor
///
/// The join handle resolves once the actor has stopped and released its
/// storage reference.
pub fn spawn_ledger_actor(
    storage: Arc<Storage>,
    params: ProgramParams,
    metrics: Metrics,
    mailbox_capacity: usize,
) -> Result<(LedgerHandle, JoinHandle<()>)> {
    let (tx, rx) = mpsc::channel(mailbox_capacity); // Bounded channel for backpressure
    let actor = LedgerActor::new(storage, rx, params, metrics)?;

    let task = tokio::spawn(async move {
        actor.run().await;
    });

    Ok((LedgerHandle::new(tx), task))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::error::Rejection;
    use crate::Config;

    struct Spawned {
        handle: LedgerHandle,
        task: JoinHandle<()>,
        storage: Arc<Storage>,
        metrics: Metrics,
        _temp: tempfile::TempDir,
    }

    fn spawn_with(supplier: &KeyPair) -> Spawned {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        config.rocksdb.sync_writes = false;

        let storage = Arc::new(Storage::open(&config).unwrap());
        storage.apply_genesis(&[(supplier.address(), 1_000)]).unwrap();

        let metrics = Metrics::new().unwrap();
        let params = ProgramParams {
            deposit_per_byte: 0,
            account_overhead_bytes: 0,
        };
        let (handle, task) =
            spawn_ledger_actor(storage.clone(), params, metrics.clone(), 16).unwrap();
        Spawned {
            handle,
            task,
            storage,
            metrics,
            _temp: temp_dir,
        }
    }

    #[tokio::test]
    async fn test_actor_spawn_and_shutdown() {
        let supplier = KeyPair::generate();
        let Spawned {
            handle,
            task,
            storage,
            _temp,
            ..
        } = spawn_with(&supplier);

        handle.shutdown().await.unwrap();
        task.await.unwrap();

        // Once the task has finished, the test holds the only storage reference.
        assert_eq!(Arc::strong_count(&storage), 1);
        assert!(matches!(
            handle.chain_head().await,
            Err(Error::Concurrency(_))
        ));
    }

    #[tokio::test]
    async fn test_actor_sequences_commits() {
        let supplier = KeyPair::generate();
        let Spawned {
            handle,
            storage,
            metrics,
            _temp,
            ..
        } = spawn_with(&supplier);

        let first = handle
            .submit(Transaction::list(&supplier, &KeyPair::generate(), 1, "a"))
            .await
            .unwrap();
        let second = handle
            .submit(Transaction::list(&supplier, &KeyPair::generate(), 2, "b"))
            .await
            .unwrap();

        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert_eq!(second.previous_hash, first.receipt_hash);

        let head = handle.chain_head().await.unwrap();
        assert_eq!(head, storage.chain_head().unwrap());
        assert_eq!(metrics.committed.with_label_values(&["list"]).get(), 2);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_actor_rejection_leaves_head() {
        let supplier = KeyPair::generate();
        let Spawned {
            handle,
            metrics,
            _temp,
            ..
        } = spawn_with(&supplier);

        let record_key = KeyPair::generate();
        handle
            .submit(Transaction::list(&supplier, &record_key, 1, "a"))
            .await
            .unwrap();
        let head = handle.chain_head().await.unwrap();

        let err = handle
            .submit(Transaction::list(&supplier, &record_key, 1, "a"))
            .await
            .unwrap_err();
        assert_eq!(err.rejection(), Some(Rejection::AddressCollision));
        assert_eq!(handle.chain_head().await.unwrap(), head);
        assert_eq!(
            metrics.rejected.with_label_values(&["address_collision"]).get(),
            1
        );

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_actor_refuses_discontinuous_block() {
        let supplier = KeyPair::generate();
        let Spawned { handle, _temp, .. } = spawn_with(&supplier);

        handle
            .submit(Transaction::list(&supplier, &KeyPair::generate(), 1, "a"))
            .await
            .unwrap();

        let mut block = Block {
            block_id: uuid::Uuid::now_v7(),
            block_height: 0,
            first_sequence: 1,
            last_sequence: 5,
            merkle_root: [0u8; 32],
            previous_block_hash: [0u8; 32],
            block_hash: [0u8; 32],
            created_at: Utc::now(),
            proposer_signature: vec![],
        };
        block.block_hash = block.compute_hash();

        assert!(matches!(
            handle.finalize_block(block).await,
            Err(Error::InvalidBlock(_))
        ));
        assert!(handle.get_latest_block().await.unwrap().is_none());

        handle.shutdown().await.unwrap();
    }
}
