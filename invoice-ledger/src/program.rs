//! Ledger program: the invoice state machine
//!
//! ```text
//! [Unlisted] --List(supplier)--> [Listed, owner=supplier, sold=false]
//! [Listed]   --Purchase(buyer)--> [Sold, owner=buyer, sold=true]   (terminal)
//! ```
//!
//! [`execute`] is a pure function of committed state and a signed
//! transaction. It never writes; the caller commits the returned
//! [`Transition`] atomically or drops it. A rejection therefore cannot leave
//! partial effects behind.
//!
//! # Invariants
//!
//! - `current_owner == supplier` iff `!is_sold`
//! - `is_sold` flips false→true exactly once
//! - Value conservation: every transition moves value between accounts, the
//!   sum of all balances never changes

use crate::error::{Error, Rejection, Result};
use crate::state::StateView;
use crate::transaction::{Instruction, Transaction};
use crate::types::{Address, BalanceChange, InstructionKind, InvoiceRecord, MAX_DESCRIPTOR_LEN};

/// Parameters the program runs with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramParams {
    /// Deposit charged per allocated byte
    pub deposit_per_byte: u64,
    /// Fixed per-account storage overhead in bytes
    pub account_overhead_bytes: u64,
}

impl ProgramParams {
    /// Deposit charged to the creator of one invoice record
    pub fn storage_deposit(&self) -> u64 {
        self.account_overhead_bytes
            .saturating_add(InvoiceRecord::SPACE as u64)
            .saturating_mul(self.deposit_per_byte)
    }
}

impl Default for ProgramParams {
    fn default() -> Self {
        Self {
            deposit_per_byte: 0,
            account_overhead_bytes: 128,
        }
    }
}

/// State change produced by an accepted transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// Instruction kind
    pub kind: InstructionKind,
    /// Record as it must be stored after commit
    pub record: InvoiceRecord,
    /// Balances to overwrite, in application order
    pub balance_changes: Vec<BalanceChange>,
}

/// Validate `tx` against committed state and compute its transition
pub fn execute<S: StateView + ?Sized>(
    state: &S,
    tx: &Transaction,
    params: &ProgramParams,
) -> Result<Transition> {
    tx.verify_signatures()?;

    match &tx.instruction {
        Instruction::List {
            record_address,
            supplier,
            asking_price,
            descriptor,
        } => list(state, *record_address, *supplier, *asking_price, descriptor, params),
        Instruction::Purchase {
            record_address,
            buyer,
            supplier,
        } => purchase(state, *record_address, *buyer, *supplier),
    }
}

fn list<S: StateView + ?Sized>(
    state: &S,
    record_address: Address,
    supplier: Address,
    asking_price: u64,
    descriptor: &str,
    params: &ProgramParams,
) -> Result<Transition> {
    if descriptor.len() > MAX_DESCRIPTOR_LEN {
        return Err(Rejection::DescriptorTooLong.into());
    }

    // The record address holds the deposit, so it must not alias the payer.
    if record_address == supplier || state.record(&record_address)?.is_some() {
        return Err(Rejection::AddressCollision.into());
    }

    let deposit = params.storage_deposit();
    let supplier_before = state.balance(&supplier)?;
    let supplier_after = supplier_before
        .checked_sub(deposit)
        .ok_or(Rejection::InsufficientFunds)?;

    let holder_before = state.balance(&record_address)?;
    let holder_after = credit(holder_before, deposit, &record_address)?;

    Ok(Transition {
        kind: InstructionKind::List,
        record: InvoiceRecord::listed(record_address, supplier, asking_price, descriptor.to_string()),
        balance_changes: vec![
            BalanceChange {
                address: supplier,
                before: supplier_before,
                after: supplier_after,
            },
            BalanceChange {
                address: record_address,
                before: holder_before,
                after: holder_after,
            },
        ],
    })
}

fn purchase<S: StateView + ?Sized>(
    state: &S,
    record_address: Address,
    buyer: Address,
    supplier: Address,
) -> Result<Transition> {
    let mut record = state
        .record(&record_address)?
        .ok_or(Rejection::RecordNotFound)?;

    // Intent errors first: none of these depend on balances.
    if buyer == record.supplier {
        return Err(Rejection::SelfPurchase.into());
    }
    if record.is_sold {
        return Err(Rejection::AlreadySold.into());
    }
    if supplier != record.supplier {
        return Err(Rejection::SupplierMismatch.into());
    }

    let price = record.asking_price;
    let buyer_before = state.balance(&buyer)?;
    let buyer_after = buyer_before
        .checked_sub(price)
        .ok_or(Rejection::InsufficientFunds)?;

    let supplier_before = state.balance(&record.supplier)?;
    let supplier_after = credit(supplier_before, price, &record.supplier)?;

    record.current_owner = buyer;
    record.is_sold = true;

    Ok(Transition {
        kind: InstructionKind::Purchase,
        balance_changes: vec![
            BalanceChange {
                address: buyer,
                before: buyer_before,
                after: buyer_after,
            },
            BalanceChange {
                address: record.supplier,
                before: supplier_before,
                after: supplier_after,
            },
        ],
        record,
    })
}

fn credit(balance: u64, amount: u64, address: &Address) -> Result<u64> {
    balance.checked_add(amount).ok_or_else(|| {
        Error::InvariantViolation(format!("balance overflow crediting {}", address))
    })
}
