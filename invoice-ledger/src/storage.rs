//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `records` - Invoice records (key: record address)
//! - `balances` - Account balances (key: address, value: big-endian u64)
//! - `log` - Append-only commit log (key: big-endian sequence)
//! - `blocks` - Sealed blocks (key: big-endian height)
//! - `meta` - Chain head and genesis marker
//!
//! Every state change goes through one `WriteBatch`, so a commit is either
//! fully visible or not visible at all.

use crate::{
    error::{Error, Result},
    program::Transition,
    state::StateView,
    types::{Address, Block, CommitReceipt, InvoiceRecord, LogEntry},
    Config,
};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch,
    WriteOptions, DB,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Column family names
const CF_RECORDS: &str = "records";
const CF_BALANCES: &str = "balances";
const CF_LOG: &str = "log";
const CF_BLOCKS: &str = "blocks";
const CF_META: &str = "meta";

const META_HEAD: &[u8] = b"head";
const META_GENESIS: &[u8] = b"genesis";

/// Position of the last committed receipt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChainHead {
    /// Sequence of the last receipt (zero before the first commit)
    pub last_sequence: u64,
    /// Hash of the last receipt (zero before the first commit)
    pub last_hash: [u8; 32],
}

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,
    sync_writes: bool,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("path", &self.db.path())
            .field("sync_writes", &self.sync_writes)
            .finish()
    }
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_RECORDS, Self::cf_options_lookup()),
            ColumnFamilyDescriptor::new(CF_BALANCES, Self::cf_options_lookup()),
            ColumnFamilyDescriptor::new(CF_LOG, Self::cf_options_log()),
            ColumnFamilyDescriptor::new(CF_BLOCKS, Self::cf_options_log()),
            ColumnFamilyDescriptor::new(CF_META, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, "Opened RocksDB");

        Ok(Self {
            db: Arc::new(db),
            sync_writes: config.rocksdb.sync_writes,
        })
    }

    // Column family options

    fn cf_options_lookup() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        // Point lookups by address benefit from bloom filters
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_options_log() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.sync_writes);
        self.db.write_opt(batch, &opts)?;
        Ok(())
    }

    // Genesis

    /// Genesis allocations, if genesis was applied
    pub fn genesis_allocations(&self) -> Result<Option<Vec<(Address, u64)>>> {
        let cf = self.cf_handle(CF_META)?;
        match self.db.get_cf(cf, META_GENESIS)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Total value minted at genesis, if genesis was applied
    pub fn genesis_total(&self) -> Result<Option<u64>> {
        Ok(self
            .genesis_allocations()?
            .map(|allocations| allocations.iter().map(|(_, amount)| amount).sum()))
    }

    /// Credit genesis balances and remember the allocations (atomic, once).
    ///
    /// Returns the allocations in effect, which are the stored ones if
    /// genesis already ran.
    pub fn apply_genesis(&self, balances: &[(Address, u64)]) -> Result<Vec<(Address, u64)>> {
        if let Some(existing) = self.genesis_allocations()? {
            return Ok(existing);
        }

        let mut merged = std::collections::BTreeMap::new();
        let mut total = 0u64;
        for (address, amount) in balances {
            total = total
                .checked_add(*amount)
                .ok_or_else(|| Error::Config("genesis total exceeds u64".to_string()))?;
            *merged.entry(*address).or_insert(0u64) += amount;
        }
        let allocations: Vec<(Address, u64)> = merged.into_iter().collect();

        let mut batch = WriteBatch::default();
        let cf_balances = self.cf_handle(CF_BALANCES)?;
        for (address, amount) in &allocations {
            batch.put_cf(cf_balances, address.as_bytes(), amount.to_be_bytes());
        }
        batch.put_cf(
            self.cf_handle(CF_META)?,
            META_GENESIS,
            bincode::serialize(&allocations)?,
        );
        self.write(batch)?;

        tracing::info!(accounts = allocations.len(), total, "Genesis applied");

        Ok(allocations)
    }

    // Commit log

    /// Current chain head
    pub fn chain_head(&self) -> Result<ChainHead> {
        let cf = self.cf_handle(CF_META)?;
        match self.db.get_cf(cf, META_HEAD)? {
            Some(bytes) => Ok(bincode::deserialize(&bytes)?),
            None => Ok(ChainHead::default()),
        }
    }

    /// Commit a transition with its log entry (atomic)
    pub fn commit(&self, transition: &Transition, entry: &LogEntry) -> Result<()> {
        let receipt = &entry.receipt;
        let mut batch = WriteBatch::default();

        // 1. Record
        let cf_records = self.cf_handle(CF_RECORDS)?;
        let record = &transition.record;
        batch.put_cf(
            cf_records,
            record.record_address.as_bytes(),
            bincode::serialize(record)?,
        );

        // 2. Balances
        let cf_balances = self.cf_handle(CF_BALANCES)?;
        for change in &transition.balance_changes {
            batch.put_cf(cf_balances, change.address.as_bytes(), change.after.to_be_bytes());
        }

        // 3. Log entry
        let cf_log = self.cf_handle(CF_LOG)?;
        batch.put_cf(cf_log, receipt.sequence.to_be_bytes(), bincode::serialize(entry)?);

        // 4. Chain head
        let head = ChainHead {
            last_sequence: receipt.sequence,
            last_hash: receipt.receipt_hash,
        };
        batch.put_cf(self.cf_handle(CF_META)?, META_HEAD, bincode::serialize(&head)?);

        self.write(batch)?;

        tracing::debug!(
            sequence = receipt.sequence,
            record = %record.record_address,
            kind = %receipt.kind,
            "Transition committed"
        );

        Ok(())
    }

    /// Get log entry by sequence
    pub fn get_log_entry(&self, sequence: u64) -> Result<LogEntry> {
        let cf = self.cf_handle(CF_LOG)?;
        let value = self
            .db
            .get_cf(cf, sequence.to_be_bytes())?
            .ok_or(Error::ReceiptNotFound(sequence))?;

        Ok(bincode::deserialize(&value)?)
    }

    /// Get receipt by sequence
    pub fn get_receipt(&self, sequence: u64) -> Result<CommitReceipt> {
        Ok(self.get_log_entry(sequence)?.receipt)
    }

    /// Log entries with sequence in `first..=last`, in commit order
    pub fn log_range(&self, first: u64, last: u64) -> Result<Vec<LogEntry>> {
        let cf = self.cf_handle(CF_LOG)?;
        let start = first.to_be_bytes();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&start, Direction::Forward));

        let mut entries = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if decode_u64(&key)? > last {
                break;
            }
            entries.push(bincode::deserialize(&value)?);
        }

        Ok(entries)
    }

    // Block operations

    /// Put block
    pub fn put_block(&self, block: &Block) -> Result<()> {
        let cf = self.cf_handle(CF_BLOCKS)?;
        let key = block.block_height.to_be_bytes();
        let value = bincode::serialize(block)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(cf, key, value);
        self.write(batch)?;

        tracing::info!(
            block_id = %block.block_id,
            block_height = block.block_height,
            receipts = block.receipt_count(),
            "Block finalized"
        );

        Ok(())
    }

    /// Get block by height
    pub fn get_block(&self, height: u64) -> Result<Block> {
        let cf = self.cf_handle(CF_BLOCKS)?;

        let value = self
            .db
            .get_cf(cf, height.to_be_bytes())?
            .ok_or_else(|| Error::BlockNotFound(height.to_string()))?;

        Ok(bincode::deserialize(&value)?)
    }

    /// Get latest block
    pub fn get_latest_block(&self) -> Result<Option<Block>> {
        let cf = self.cf_handle(CF_BLOCKS)?;

        match self.db.iterator_cf(cf, IteratorMode::End).next() {
            Some(item) => {
                let (_, value) = item?;
                Ok(Some(bincode::deserialize(&value)?))
            }
            None => Ok(None),
        }
    }

    /// Find the block sealing a receipt sequence
    pub fn find_block_for_sequence(&self, sequence: u64) -> Result<Block> {
        let cf = self.cf_handle(CF_BLOCKS)?;

        for item in self.db.iterator_cf(cf, IteratorMode::End) {
            let (_, value) = item?;
            let block: Block = bincode::deserialize(&value)?;
            if block.contains(sequence) {
                return Ok(block);
            }
            if block.last_sequence < sequence {
                break;
            }
        }

        Err(Error::BlockNotFound(format!("no block seals sequence {}", sequence)))
    }

    // Full scans

    /// All records, ordered by address
    pub fn all_records(&self) -> Result<Vec<InvoiceRecord>> {
        let cf = self.cf_handle(CF_RECORDS)?;
        let mut records = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            records.push(bincode::deserialize(&value)?);
        }
        Ok(records)
    }

    /// All non-zero balances, ordered by address
    pub fn all_balances(&self) -> Result<Vec<(Address, u64)>> {
        let cf = self.cf_handle(CF_BALANCES)?;
        let mut balances = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item?;
            let amount = decode_u64(&value)?;
            if amount == 0 {
                continue;
            }
            let bytes: [u8; 32] = key[..]
                .try_into()
                .map_err(|_| Error::Storage(format!("malformed balance key ({} bytes)", key.len())))?;
            balances.push((Address::new(bytes), amount));
        }
        Ok(balances)
    }

    // Statistics

    /// Get storage statistics
    pub fn get_stats(&self) -> Result<StorageStats> {
        let head = self.chain_head()?;
        let total_blocks = match self.get_latest_block()? {
            Some(block) => block.block_height + 1,
            None => 0,
        };
        let total_records = self
            .db
            .property_int_value_cf(self.cf_handle(CF_RECORDS)?, "rocksdb.estimate-num-keys")?
            .unwrap_or(0);

        Ok(StorageStats {
            total_receipts: head.last_sequence,
            total_blocks,
            total_records,
        })
    }
}

impl StateView for Storage {
    fn record(&self, address: &Address) -> Result<Option<InvoiceRecord>> {
        let cf = self.cf_handle(CF_RECORDS)?;
        self.db
            .get_cf(cf, address.as_bytes())?
            .map(|bytes| bincode::deserialize(&bytes).map_err(Error::from))
            .transpose()
    }

    fn balance(&self, address: &Address) -> Result<u64> {
        let cf = self.cf_handle(CF_BALANCES)?;
        match self.db.get_cf(cf, address.as_bytes())? {
            Some(bytes) => decode_u64(&bytes),
            None => Ok(0),
        }
    }
}

fn decode_u64(bytes: &[u8]) -> Result<u64> {
    let bytes: [u8; 8] = bytes
        .try_into()
        .map_err(|_| Error::Storage(format!("expected 8-byte integer, got {} bytes", bytes.len())))?;
    Ok(u64::from_be_bytes(bytes))
}

/// Storage statistics
#[derive(Debug, Clone)]
pub struct StorageStats {
    /// Committed receipts
    pub total_receipts: u64,
    /// Sealed blocks
    pub total_blocks: u64,
    /// Approximate record count
    pub total_records: u64,
}
