//! Main ledger orchestration layer
//!
//! This module ties together storage, the program, and the actor into the
//! public API for listing and purchasing invoices.
//!
//! # Example
//!
//! ```no_run
//! use invoice_ledger::{Config, KeyPair, Ledger};
//!
//! #[tokio::main]
//! async fn main() -> invoice_ledger::Result<()> {
//!     let ledger = Ledger::open(Config::default()).await?;
//!
//!     let supplier = KeyPair::generate();
//!     let record_key = KeyPair::generate();
//!     let receipt = ledger.list_invoice(&supplier, &record_key, 2, "Acme::300").await?;
//!     println!("listed at sequence {}", receipt.sequence);
//!
//!     ledger.shutdown().await
//! }
//! ```

use crate::{
    actor::{spawn_ledger_actor, AuditCheck, LedgerHandle},
    audit::AuditReport,
    crypto::KeyPair,
    merkle::{MerkleProof, MerkleTree},
    metrics::Metrics,
    storage::{ChainHead, Storage, StorageStats},
    transaction::Transaction,
    types::{Address, Block, CommitReceipt, InvoiceRecord},
    Config, Error, Result,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Main ledger interface
pub struct Ledger {
    /// Actor handle for the write path and consistent reads
    handle: LedgerHandle,

    /// Actor task, joined on shutdown
    actor: JoinHandle<()>,

    /// Direct storage access (immutable log and blocks)
    storage: Arc<Storage>,

    /// Block proposer key (blocks are unsigned without one)
    keypair: Option<KeyPair>,

    /// Metrics
    metrics: Metrics,

    /// Configuration
    config: Config,
}

impl Ledger {
    /// Open ledger with configuration
    ///
    /// Applies the configured genesis allocations on first open.
    pub async fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let storage = Arc::new(Storage::open(&config)?);
        storage.apply_genesis(&config.genesis_balances()?)?;

        let metrics = Metrics::new()?;
        let (handle, actor) = spawn_ledger_actor(
            storage.clone(),
            config.program_params(),
            metrics.clone(),
            config.mailbox_capacity,
        )?;

        tracing::info!(
            service = %config.service_name,
            version = %config.service_version,
            deposit = config.program_params().storage_deposit(),
            "Ledger opened"
        );

        Ok(Self {
            handle,
            actor,
            storage,
            keypair: None,
            metrics,
            config,
        })
    }

    /// Set block proposer key pair
    pub fn with_keypair(mut self, keypair: KeyPair) -> Self {
        self.keypair = Some(keypair);
        self
    }

    /// Submit a signed transaction.
    ///
    /// Returns the commit receipt, or `Error::Rejected` with zero state change.
    pub async fn submit(&self, tx: Transaction) -> Result<CommitReceipt> {
        let started = Instant::now();
        let result = self.handle.submit(tx).await;
        self.metrics
            .record_submit_duration(started.elapsed().as_secs_f64());
        result
    }

    /// List an invoice at the address of `record_key`
    pub async fn list_invoice(
        &self,
        supplier: &KeyPair,
        record_key: &KeyPair,
        asking_price: u64,
        descriptor: impl Into<String>,
    ) -> Result<CommitReceipt> {
        self.submit(Transaction::list(supplier, record_key, asking_price, descriptor))
            .await
    }

    /// Purchase the invoice at `record_address`, paying its supplier
    pub async fn purchase_invoice(
        &self,
        buyer: &KeyPair,
        record_address: Address,
        supplier: Address,
    ) -> Result<CommitReceipt> {
        self.submit(Transaction::purchase(buyer, record_address, supplier))
            .await
    }

    /// Fetch a record (`None` if nothing was listed there)
    pub async fn fetch_record(&self, address: Address) -> Result<Option<InvoiceRecord>> {
        self.handle.fetch_record(address).await
    }

    /// Balance of an account in base units
    pub async fn balance(&self, address: Address) -> Result<u64> {
        self.handle.balance(address).await
    }

    /// Get receipt by sequence
    pub fn get_receipt(&self, sequence: u64) -> Result<CommitReceipt> {
        self.storage.get_receipt(sequence)
    }

    /// Position of the last commit
    pub async fn chain_head(&self) -> Result<ChainHead> {
        self.handle.chain_head().await
    }

    /// Seal every receipt committed since the previous block
    pub async fn finalize_block(&self) -> Result<Block> {
        let previous_block = self.handle.get_latest_block().await?;
        let (block_height, first_sequence, previous_block_hash) = match previous_block {
            Some(prev) => (prev.block_height + 1, prev.last_sequence + 1, prev.block_hash),
            None => (0, 1, [0u8; 32]),
        };

        let head = self.handle.chain_head().await?;
        if head.last_sequence < first_sequence {
            return Err(Error::InvalidBlock(
                "Cannot finalize empty block".to_string(),
            ));
        }

        let tree = self.receipt_tree(first_sequence, head.last_sequence)?;

        let mut block = Block {
            block_id: Uuid::now_v7(),
            block_height,
            first_sequence,
            last_sequence: head.last_sequence,
            merkle_root: tree.root(),
            previous_block_hash,
            block_hash: [0u8; 32], // Computed below
            created_at: Utc::now(),
            proposer_signature: vec![],
        };
        block.block_hash = block.compute_hash();

        if let Some(ref keypair) = self.keypair {
            let signature = keypair.sign(&block.block_hash);
            block.proposer_signature = signature.as_bytes().to_vec();
        }

        self.handle.finalize_block(block.clone()).await?;
        self.metrics.record_block_finalized();

        Ok(block)
    }

    /// Get latest block
    pub async fn get_latest_block(&self) -> Result<Option<Block>> {
        self.handle.get_latest_block().await
    }

    /// Get block by height
    pub fn get_block_by_height(&self, height: u64) -> Result<Block> {
        self.storage.get_block(height)
    }

    /// Merkle proof that receipt `sequence` is sealed in its block
    pub fn prove_receipt(&self, sequence: u64) -> Result<MerkleProof> {
        let block = self.storage.find_block_for_sequence(sequence)?;
        let tree = self.receipt_tree(block.first_sequence, block.last_sequence)?;

        let proof = tree
            .proof((sequence - block.first_sequence) as usize)
            .ok_or(Error::ReceiptNotFound(sequence))?;
        if !proof.verify_against(&block.merkle_root) {
            return Err(Error::InvariantViolation(format!(
                "block {} root does not cover its receipts",
                block.block_height
            )));
        }

        Ok(proof)
    }

    /// Recompute every receipt hash and chain link; returns receipts checked
    pub async fn verify_chain(&self) -> Result<u64> {
        Ok(self.handle.audit(AuditCheck::Chain).await?.receipts_checked)
    }

    /// Check ownership consistency and value conservation
    pub async fn check_invariants(&self) -> Result<AuditReport> {
        self.handle.audit(AuditCheck::Invariants).await
    }

    /// Re-execute the log from genesis and compare with storage
    pub async fn replay(&self) -> Result<AuditReport> {
        self.handle.audit(AuditCheck::Replay).await
    }

    /// Storage statistics
    pub fn stats(&self) -> Result<StorageStats> {
        self.storage.get_stats()
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Configuration the ledger was opened with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shutdown ledger
    ///
    /// Returns after the actor has stopped and the database is closed, so the
    /// same `data_dir` can be reopened right away.
    pub async fn shutdown(self) -> Result<()> {
        let Self {
            handle,
            actor,
            storage,
            ..
        } = self;

        handle.shutdown().await?;
        drop(storage);
        actor
            .await
            .map_err(|e| Error::Concurrency(format!("Ledger actor task failed: {}", e)))?;

        tracing::info!("Ledger closed");
        Ok(())
    }

    fn receipt_tree(&self, first: u64, last: u64) -> Result<MerkleTree> {
        let entries = self.storage.log_range(first, last)?;
        let tree = MerkleTree::from_leaves(entries.iter().map(|e| e.receipt.receipt_hash).collect());
        if tree.len() as u64 != last - first + 1 {
            return Err(Error::InvariantViolation(format!(
                "log is missing receipts in {}..={}",
                first, last
            )));
        }
        Ok(tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GenesisAllocation;
    use crate::crypto::verify_signature;
    use crate::error::Rejection;
    use crate::types::Signature;

    async fn create_test_ledger(funded: &[(&KeyPair, u64)]) -> (Ledger, tempfile::TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        config.rocksdb.sync_writes = false;
        config.deposit.per_byte = 1;
        config.genesis = funded
            .iter()
            .map(|(key, balance)| GenesisAllocation {
                address: key.address().to_hex(),
                balance: *balance,
            })
            .collect();

        (Ledger::open(config).await.unwrap(), temp_dir)
    }

    #[tokio::test]
    async fn test_ledger_open() {
        let (ledger, _temp) = create_test_ledger(&[]).await;
        assert_eq!(ledger.chain_head().await.unwrap(), ChainHead::default());
        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_list_then_purchase() {
        let supplier = KeyPair::generate();
        let buyer = KeyPair::generate();
        let record_key = KeyPair::generate();
        let (ledger, _temp) = create_test_ledger(&[(&supplier, 100_000), (&buyer, 5)]).await;
        let deposit = ledger.config().program_params().storage_deposit();

        ledger
            .list_invoice(&supplier, &record_key, 2, "Acme::300")
            .await
            .unwrap();
        let receipt = ledger
            .purchase_invoice(&buyer, record_key.address(), supplier.address())
            .await
            .unwrap();
        assert_eq!(receipt.delta_for(&buyer.address()), -2);
        assert_eq!(receipt.delta_for(&supplier.address()), 2);

        let record = ledger.fetch_record(record_key.address()).await.unwrap().unwrap();
        assert!(record.is_sold);
        assert_eq!(record.current_owner, buyer.address());
        assert_eq!(ledger.balance(buyer.address()).await.unwrap(), 3);
        assert_eq!(
            ledger.balance(supplier.address()).await.unwrap(),
            100_000 - deposit + 2
        );
        assert_eq!(ledger.balance(record_key.address()).await.unwrap(), deposit);
        assert_eq!(ledger.get_receipt(2).unwrap(), receipt);

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_fetch_missing_record() {
        let (ledger, _temp) = create_test_ledger(&[]).await;
        let nowhere = KeyPair::generate().address();
        assert!(ledger.fetch_record(nowhere).await.unwrap().is_none());
        assert_eq!(ledger.balance(nowhere).await.unwrap(), 0);
        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_block_finalization_and_proofs() {
        let supplier = KeyPair::generate();
        let proposer = KeyPair::generate();
        let (ledger, _temp) = create_test_ledger(&[(&supplier, 100_000)]).await;
        let ledger = ledger.with_keypair(KeyPair::from_seed(&[7u8; 32]));

        assert!(matches!(
            ledger.finalize_block().await,
            Err(Error::InvalidBlock(_))
        ));

        for price in 0..3 {
            ledger
                .list_invoice(&supplier, &KeyPair::generate(), price, "lot")
                .await
                .unwrap();
        }

        let block = ledger.finalize_block().await.unwrap();
        assert_eq!(block.block_height, 0);
        assert_eq!((block.first_sequence, block.last_sequence), (1, 3));

        let signature: [u8; 64] = block.proposer_signature.clone().try_into().unwrap();
        assert!(verify_signature(
            &block.block_hash,
            &Signature::from_bytes(signature),
            KeyPair::from_seed(&[7u8; 32]).address().as_bytes(),
        ));
        assert!(!verify_signature(
            &block.block_hash,
            &Signature::from_bytes(signature),
            proposer.address().as_bytes(),
        ));

        for sequence in 1..=3 {
            let proof = ledger.prove_receipt(sequence).unwrap();
            assert_eq!(proof.leaf_hash, ledger.get_receipt(sequence).unwrap().receipt_hash);
            assert!(proof.verify_against(&block.merkle_root));
        }

        ledger
            .list_invoice(&supplier, &KeyPair::generate(), 9, "lot")
            .await
            .unwrap();
        assert!(matches!(
            ledger.prove_receipt(4),
            Err(Error::BlockNotFound(_))
        ));

        let next = ledger.finalize_block().await.unwrap();
        assert_eq!(next.block_height, 1);
        assert_eq!(next.first_sequence, 4);
        assert_eq!(next.previous_block_hash, block.block_hash);
        assert_eq!(
            ledger.get_block_by_height(1).unwrap().block_hash,
            next.block_hash
        );
        assert_eq!(ledger.metrics().blocks_total.get(), 2);

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_audits_after_activity() {
        let supplier = KeyPair::generate();
        let buyer = KeyPair::generate();
        let record_key = KeyPair::generate();
        let (ledger, _temp) = create_test_ledger(&[(&supplier, 100_000), (&buyer, 10)]).await;

        ledger
            .list_invoice(&supplier, &record_key, 4, "Acme::300")
            .await
            .unwrap();
        let rejected = ledger
            .purchase_invoice(&supplier, record_key.address(), supplier.address())
            .await
            .unwrap_err();
        assert_eq!(rejected.rejection(), Some(Rejection::SelfPurchase));
        ledger
            .purchase_invoice(&buyer, record_key.address(), supplier.address())
            .await
            .unwrap();

        assert_eq!(ledger.verify_chain().await.unwrap(), 2);
        let report = ledger.check_invariants().await.unwrap();
        assert_eq!(report.total_balance, 100_010);
        assert_eq!(report.sold_records, 1);
        assert_eq!(ledger.replay().await.unwrap(), report);

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_reopen_immediately_after_shutdown() {
        let supplier = KeyPair::generate();
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        config.deposit.per_byte = 0;
        config.genesis = vec![GenesisAllocation {
            address: supplier.address().to_hex(),
            balance: 10,
        }];

        let mut record_keys = Vec::new();
        for round in 0..3u64 {
            let ledger = Ledger::open(config.clone()).await.unwrap();
            assert_eq!(ledger.chain_head().await.unwrap().last_sequence, round);

            let record_key = KeyPair::generate();
            ledger
                .list_invoice(&supplier, &record_key, round, "kept")
                .await
                .unwrap();
            record_keys.push(record_key);

            ledger.shutdown().await.unwrap();
        }

        let ledger = Ledger::open(config).await.unwrap();
        for record_key in &record_keys {
            assert!(ledger.fetch_record(record_key.address()).await.unwrap().is_some());
        }
        assert_eq!(ledger.balance(supplier.address()).await.unwrap(), 10);
        assert_eq!(ledger.replay().await.unwrap().receipts_checked, 3);
        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_stats_track_receipts_and_blocks() {
        let supplier = KeyPair::generate();
        let buyer = KeyPair::generate();
        let record_key = KeyPair::generate();
        let (ledger, _temp) = create_test_ledger(&[(&supplier, 100_000), (&buyer, 10)]).await;

        let stats = ledger.stats().unwrap();
        assert_eq!((stats.total_receipts, stats.total_blocks), (0, 0));

        ledger
            .list_invoice(&supplier, &record_key, 3, "Acme::300")
            .await
            .unwrap();
        ledger
            .purchase_invoice(&buyer, record_key.address(), supplier.address())
            .await
            .unwrap();
        ledger.finalize_block().await.unwrap();

        let stats = ledger.stats().unwrap();
        assert_eq!(stats.total_receipts, 2);
        assert_eq!(stats.total_blocks, 1);

        ledger.shutdown().await.unwrap();
    }
}
