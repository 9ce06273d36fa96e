//! Offline checks over committed state
//!
//! These scan storage end to end and are meant to run at a commit point
//! (the actor serves them between transactions).

use crate::{
    program::{execute, ProgramParams},
    state::MemoryState,
    storage::Storage,
    types::{InvoiceRecord, LogEntry},
    Error, Result,
};

/// Summary of a successful audit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AuditReport {
    /// Receipts examined
    pub receipts_checked: u64,
    /// Records present
    pub records: usize,
    /// Records already sold
    pub sold_records: usize,
    /// Sum of all balances
    pub total_balance: u64,
}

/// Recompute every receipt hash and chain link up to the head.
///
/// Returns the number of receipts checked.
pub fn verify_chain(storage: &Storage) -> Result<u64> {
    let head = storage.chain_head()?;
    let entries = storage.log_range(1, head.last_sequence)?;

    let mut previous_hash = [0u8; 32];
    let mut expected_sequence = 1u64;

    for entry in &entries {
        let receipt = &entry.receipt;
        if receipt.sequence != expected_sequence {
            return Err(Error::InvariantViolation(format!(
                "log gap: expected sequence {}, found {}",
                expected_sequence, receipt.sequence
            )));
        }
        if receipt.previous_hash != previous_hash {
            return Err(Error::InvariantViolation(format!(
                "receipt {} does not link to its predecessor",
                receipt.sequence
            )));
        }
        if receipt.compute_hash() != receipt.receipt_hash {
            return Err(Error::InvariantViolation(format!(
                "receipt {} hash mismatch",
                receipt.sequence
            )));
        }
        if entry.transaction.hash() != receipt.tx_hash {
            return Err(Error::InvariantViolation(format!(
                "receipt {} does not match its logged transaction",
                receipt.sequence
            )));
        }

        previous_hash = receipt.receipt_hash;
        expected_sequence += 1;
    }

    if expected_sequence - 1 != head.last_sequence || previous_hash != head.last_hash {
        return Err(Error::InvariantViolation(format!(
            "chain head {} does not match the log",
            head.last_sequence
        )));
    }

    tracing::debug!(receipts = head.last_sequence, "Receipt chain verified");

    Ok(head.last_sequence)
}

/// Check ownership consistency of every record and value conservation
/// against the genesis total.
pub fn check_invariants(storage: &Storage) -> Result<AuditReport> {
    let records = storage.all_records()?;
    if let Some(record) = records.iter().find(|r| !r.ownership_consistent()) {
        return Err(Error::InvariantViolation(format!(
            "record {} has owner {} but is_sold={}",
            record.record_address, record.current_owner, record.is_sold
        )));
    }

    let total: u128 = storage
        .all_balances()?
        .iter()
        .map(|(_, amount)| *amount as u128)
        .sum();
    let minted = storage.genesis_total()?.unwrap_or(0);
    if total != minted as u128 {
        return Err(Error::InvariantViolation(format!(
            "balances sum to {} but genesis minted {}",
            total, minted
        )));
    }

    Ok(AuditReport {
        receipts_checked: storage.chain_head()?.last_sequence,
        records: records.len(),
        sold_records: records.iter().filter(|r| r.is_sold).count(),
        total_balance: minted,
    })
}

/// Re-execute the whole log from genesis and compare with storage
pub fn replay(storage: &Storage, params: &ProgramParams) -> Result<AuditReport> {
    let genesis = storage.genesis_allocations()?.unwrap_or_default();
    let mut state = MemoryState::with_balances(genesis)?;

    let head = storage.chain_head()?;
    for entry in storage.log_range(1, head.last_sequence)? {
        replay_entry(&mut state, &entry, params)?;
    }

    let replayed: Vec<InvoiceRecord> = state.records().cloned().collect();
    if replayed != storage.all_records()? {
        return Err(Error::InvariantViolation(
            "replayed records differ from storage".to_string(),
        ));
    }

    let balances: Vec<_> = state.balances().map(|(a, b)| (*a, *b)).collect();
    if balances != storage.all_balances()? {
        return Err(Error::InvariantViolation(
            "replayed balances differ from storage".to_string(),
        ));
    }

    let total_balance = u64::try_from(state.total_balance())
        .map_err(|_| Error::InvariantViolation("replayed total exceeds u64".to_string()))?;

    tracing::info!(receipts = head.last_sequence, "Replay matches storage");

    Ok(AuditReport {
        receipts_checked: head.last_sequence,
        records: replayed.len(),
        sold_records: replayed.iter().filter(|r| r.is_sold).count(),
        total_balance,
    })
}

fn replay_entry(state: &mut MemoryState, entry: &LogEntry, params: &ProgramParams) -> Result<()> {
    let receipt = &entry.receipt;
    let transition = execute(state, &entry.transaction, params).map_err(|e| {
        Error::InvariantViolation(format!(
            "logged transaction {} no longer applies: {}",
            receipt.sequence, e
        ))
    })?;

    if transition.kind != receipt.kind
        || transition.record.record_address != receipt.record_address
        || transition.balance_changes != receipt.balance_changes
    {
        return Err(Error::InvariantViolation(format!(
            "replay of transaction {} diverges from its receipt",
            receipt.sequence
        )));
    }

    state.apply(&transition);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::storage::ChainHead;
    use crate::transaction::Transaction;
    use crate::types::CommitReceipt;
    use crate::Config;
    use chrono::Utc;
    use tempfile::TempDir;

    fn params() -> ProgramParams {
        ProgramParams {
            deposit_per_byte: 1,
            account_overhead_bytes: 0,
        }
    }

    fn open() -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        config.rocksdb.sync_writes = false;
        (Storage::open(&config).unwrap(), temp_dir)
    }

    fn commit(storage: &Storage, tx: Transaction) -> CommitReceipt {
        let transition = execute(storage, &tx, &params()).unwrap();
        let head: ChainHead = storage.chain_head().unwrap();
        let mut receipt = CommitReceipt {
            sequence: head.last_sequence + 1,
            tx_hash: tx.hash(),
            kind: transition.kind,
            record_address: transition.record.record_address,
            balance_changes: transition.balance_changes.clone(),
            committed_at: Utc::now(),
            previous_hash: head.last_hash,
            receipt_hash: [0u8; 32],
        };
        receipt.receipt_hash = receipt.compute_hash();
        let entry = LogEntry {
            receipt: receipt.clone(),
            transaction: tx,
        };
        storage.commit(&transition, &entry).unwrap();
        receipt
    }

    #[test]
    fn test_empty_ledger_audits_clean() {
        let (storage, _temp) = open();
        assert_eq!(verify_chain(&storage).unwrap(), 0);
        assert_eq!(check_invariants(&storage).unwrap(), AuditReport::default());
        assert_eq!(replay(&storage, &params()).unwrap(), AuditReport::default());
    }

    #[test]
    fn test_list_and_purchase_audit() {
        let (storage, _temp) = open();
        let supplier = KeyPair::generate();
        let buyer = KeyPair::generate();
        let record_key = KeyPair::generate();
        storage
            .apply_genesis(&[(supplier.address(), 1_000), (buyer.address(), 50)])
            .unwrap();

        commit(&storage, Transaction::list(&supplier, &record_key, 2, "Acme::300"));
        commit(
            &storage,
            Transaction::purchase(&buyer, record_key.address(), supplier.address()),
        );

        assert_eq!(verify_chain(&storage).unwrap(), 2);

        let report = check_invariants(&storage).unwrap();
        assert_eq!(report.records, 1);
        assert_eq!(report.sold_records, 1);
        assert_eq!(report.total_balance, 1_050);

        assert_eq!(replay(&storage, &params()).unwrap(), report);
    }

    #[test]
    fn test_replay_with_different_deposit_diverges() {
        let (storage, _temp) = open();
        let supplier = KeyPair::generate();
        storage.apply_genesis(&[(supplier.address(), 1_000)]).unwrap();
        commit(&storage, Transaction::list(&supplier, &KeyPair::generate(), 5, "x"));

        let changed = ProgramParams {
            deposit_per_byte: 2,
            account_overhead_bytes: 0,
        };
        assert!(matches!(
            replay(&storage, &changed),
            Err(Error::InvariantViolation(_))
        ));
    }
}
