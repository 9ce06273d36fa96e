//! Invoice Ledger
//!
//! Totally ordered ledger for listing and selling invoices exactly once.
//!
//! # Architecture
//!
//! - **Pure Program**: `program::execute` validates a signed transaction
//!   against committed state and returns a transition, never writing
//! - **Single Writer**: One actor task sequences every submission, so mailbox
//!   order is commit order
//! - **Atomic Commit**: Record, balances, log entry and chain head land in one
//!   RocksDB write batch
//! - **Merkle Blocks**: Receipts are sealed into signed blocks with inclusion
//!   proofs
//!
//! # Invariants
//!
//! - Ownership: `current_owner == supplier` iff the invoice is unsold
//! - Exactly-once sale: `is_sold` flips false→true once, later buyers get
//!   `AlreadySold`
//! - Value conservation: the sum of all balances equals the genesis total
//! - Rejections have no effect on records, balances or the log

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod actor;
pub mod audit;
pub mod config;
pub mod crypto;
pub mod error;
pub mod ledger;
pub mod merkle;
pub mod metrics;
pub mod price;
pub mod program;
pub mod state;
pub mod storage;
pub mod transaction;
pub mod types;

// Re-exports
pub use audit::AuditReport;
pub use config::Config;
pub use crypto::KeyPair;
pub use error::{Error, Rejection, Result};
pub use ledger::Ledger;
pub use program::ProgramParams;
pub use state::{MemoryState, StateView};
pub use storage::Storage;
pub use transaction::{Instruction, Transaction};
pub use types::{Address, Block, CommitReceipt, InvoiceRecord};
