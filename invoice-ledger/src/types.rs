//! Core types for the invoice ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Memory safety (no unsafe code)
//! - Exact arithmetic (`u64` base units, checked)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Maximum descriptor length in UTF-8 bytes
pub const MAX_DESCRIPTOR_LEN: usize = 46;

/// Ledger account address (Ed25519 public key)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address([u8; 32]);

impl Address {
    /// Create from raw public key bytes
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse from a 64-character hex string
    pub fn from_hex(s: &str) -> crate::Result<Self> {
        let bytes = hex::decode(s).map_err(|e| crate::Error::InvalidAddress(e.to_string()))?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|v: Vec<u8>| {
            crate::Error::InvalidAddress(format!("expected 32 bytes, got {}", v.len()))
        })?;
        Ok(Self(bytes))
    }

    /// Hex encoding
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for Address {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::from_hex(s)
    }
}

/// Digital signature (Ed25519)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Signature bytes (64 bytes)
    #[serde(with = "serde_bytes")]
    bytes: [u8; 64],
}

impl Signature {
    /// Create from bytes
    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Self { bytes }
    }

    /// Get bytes
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.bytes
    }

    /// Verify signature against the address that allegedly produced it
    pub fn verify(&self, message: &[u8], signer: &Address) -> bool {
        crate::crypto::verify_signature(message, self, signer.as_bytes())
    }
}

/// Ledger-resident invoice record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceRecord {
    /// Address of the record, fixed for its lifetime
    pub record_address: Address,

    /// Original creator and sole beneficiary of the sale
    pub supplier: Address,

    /// Holder of the claim
    pub current_owner: Address,

    /// Price in base units, immutable after listing
    pub asking_price: u64,

    /// Free-form identifying text (display only)
    pub descriptor: String,

    /// Terminal sale flag
    pub is_sold: bool,
}

impl InvoiceRecord {
    /// Bytes reserved for one record: discriminator, three addresses, price,
    /// length-prefixed descriptor, sold flag.
    pub const SPACE: usize = 8 + 32 * 3 + 8 + (4 + MAX_DESCRIPTOR_LEN) + 1;

    /// Freshly listed record, owned by its supplier
    pub fn listed(
        record_address: Address,
        supplier: Address,
        asking_price: u64,
        descriptor: String,
    ) -> Self {
        Self {
            record_address,
            supplier,
            current_owner: supplier,
            asking_price,
            descriptor,
            is_sold: false,
        }
    }

    /// `current_owner == supplier` iff the record is unsold
    pub fn ownership_consistent(&self) -> bool {
        (self.current_owner == self.supplier) == !self.is_sold
    }
}

/// Kind of instruction a transaction carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum InstructionKind {
    /// Invoice listed
    List = 1,
    /// Invoice purchased
    Purchase = 2,
}

impl InstructionKind {
    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            InstructionKind::List => "list",
            InstructionKind::Purchase => "purchase",
        }
    }
}

impl fmt::Display for InstructionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Balance movement applied by a committed transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceChange {
    /// Account whose balance changed
    pub address: Address,
    /// Balance before the transaction
    pub before: u64,
    /// Balance after the transaction
    pub after: u64,
}

/// Proof that a transaction was committed at a position in the log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReceipt {
    /// Position in the commit order (starts at 1)
    pub sequence: u64,

    /// SHA-256 of the signed transaction
    pub tx_hash: [u8; 32],

    /// Instruction kind
    pub kind: InstructionKind,

    /// Record touched by the transaction
    pub record_address: Address,

    /// Balance movements, in application order
    pub balance_changes: Vec<BalanceChange>,

    /// Commit timestamp
    pub committed_at: DateTime<Utc>,

    /// Hash of the previous receipt (zero for the first)
    pub previous_hash: [u8; 32],

    /// Hash of this receipt's contents
    pub receipt_hash: [u8; 32],
}

impl CommitReceipt {
    /// Compute receipt hash over everything except `receipt_hash`
    pub fn compute_hash(&self) -> [u8; 32] {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update(self.sequence.to_be_bytes());
        hasher.update(self.tx_hash);
        hasher.update([self.kind as u8]);
        hasher.update(self.record_address.as_bytes());
        for change in &self.balance_changes {
            hasher.update(change.address.as_bytes());
            hasher.update(change.before.to_be_bytes());
            hasher.update(change.after.to_be_bytes());
        }
        hasher.update(self.committed_at.timestamp_nanos_opt().unwrap_or(0).to_be_bytes());
        hasher.update(self.previous_hash);

        hasher.finalize().into()
    }

    /// Net balance delta for an address (zero if untouched)
    pub fn delta_for(&self, address: &Address) -> i128 {
        self.balance_changes
            .iter()
            .filter(|c| &c.address == address)
            .map(|c| c.after as i128 - c.before as i128)
            .sum()
    }
}

/// Commit log entry: the receipt and the transaction it commits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// Receipt issued at commit
    pub receipt: CommitReceipt,
    /// Transaction exactly as submitted
    pub transaction: crate::transaction::Transaction,
}

/// Sealed range of receipts with a Merkle root
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    /// Unique block ID
    pub block_id: Uuid,

    /// Block height (sequential)
    pub block_height: u64,

    /// First receipt sequence in the block
    pub first_sequence: u64,

    /// Last receipt sequence in the block
    pub last_sequence: u64,

    /// Merkle root of the receipt hashes
    pub merkle_root: [u8; 32],

    /// Hash of previous block
    pub previous_block_hash: [u8; 32],

    /// Hash of this block's contents
    pub block_hash: [u8; 32],

    /// Block creation timestamp
    pub created_at: DateTime<Utc>,

    /// Proposer signature over `block_hash` (empty if unsigned)
    pub proposer_signature: Vec<u8>,
}

impl Block {
    /// Compute block hash
    pub fn compute_hash(&self) -> [u8; 32] {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update(self.block_height.to_be_bytes());
        hasher.update(self.first_sequence.to_be_bytes());
        hasher.update(self.last_sequence.to_be_bytes());
        hasher.update(self.merkle_root);
        hasher.update(self.previous_block_hash);
        hasher.update(self.created_at.timestamp_nanos_opt().unwrap_or(0).to_be_bytes());

        hasher.finalize().into()
    }

    /// Whether a receipt sequence falls inside this block
    pub fn contains(&self, sequence: u64) -> bool {
        (self.first_sequence..=self.last_sequence).contains(&sequence)
    }

    /// Number of receipts sealed
    pub fn receipt_count(&self) -> u64 {
        self.last_sequence - self.first_sequence + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_hex_round_trip() {
        let address = Address::new([7u8; 32]);
        let parsed: Address = address.to_hex().parse().unwrap();
        assert_eq!(parsed, address);
    }

    #[test]
    fn test_address_rejects_wrong_length() {
        assert!(Address::from_hex("abcd").is_err());
        assert!(Address::from_hex("zz").is_err());
    }

    #[test]
    fn test_listed_record_is_owned_by_supplier() {
        let supplier = Address::new([1u8; 32]);
        let record = InvoiceRecord::listed(Address::new([2u8; 32]), supplier, 2, "Acme::300".into());

        assert_eq!(record.current_owner, supplier);
        assert!(!record.is_sold);
        assert!(record.ownership_consistent());
    }

    #[test]
    fn test_ownership_consistency_detects_drift() {
        let supplier = Address::new([1u8; 32]);
        let mut record = InvoiceRecord::listed(Address::new([2u8; 32]), supplier, 2, String::new());

        record.is_sold = true;
        assert!(!record.ownership_consistent());

        record.current_owner = Address::new([3u8; 32]);
        assert!(record.ownership_consistent());
    }

    #[test]
    fn test_receipt_hash_covers_previous_hash() {
        let mut receipt = CommitReceipt {
            sequence: 1,
            tx_hash: [9u8; 32],
            kind: InstructionKind::List,
            record_address: Address::new([2u8; 32]),
            balance_changes: vec![],
            committed_at: Utc::now(),
            previous_hash: [0u8; 32],
            receipt_hash: [0u8; 32],
        };
        let first = receipt.compute_hash();

        receipt.previous_hash = [1u8; 32];
        assert_ne!(receipt.compute_hash(), first);
    }

    #[test]
    fn test_receipt_delta() {
        let buyer = Address::new([3u8; 32]);
        let supplier = Address::new([1u8; 32]);
        let receipt = CommitReceipt {
            sequence: 2,
            tx_hash: [0u8; 32],
            kind: InstructionKind::Purchase,
            record_address: Address::new([2u8; 32]),
            balance_changes: vec![
                BalanceChange { address: buyer, before: 10, after: 8 },
                BalanceChange { address: supplier, before: 0, after: 2 },
            ],
            committed_at: Utc::now(),
            previous_hash: [0u8; 32],
            receipt_hash: [0u8; 32],
        };

        assert_eq!(receipt.delta_for(&buyer), -2);
        assert_eq!(receipt.delta_for(&supplier), 2);
        assert_eq!(receipt.delta_for(&Address::new([4u8; 32])), 0);
    }
}
