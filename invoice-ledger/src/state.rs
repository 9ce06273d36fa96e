//! Views over committed ledger state
//!
//! The program reads state only through [`StateView`]; RocksDB storage and
//! the in-memory [`MemoryState`] used for replay both implement it.

use crate::program::Transition;
use crate::types::{Address, InvoiceRecord};
use crate::{Error, Result};
use std::collections::BTreeMap;

/// Read access to committed records and balances
pub trait StateView {
    /// Record at `address`, if one was ever listed there
    fn record(&self, address: &Address) -> Result<Option<InvoiceRecord>>;

    /// Balance of `address` in base units (absent accounts hold zero)
    fn balance(&self, address: &Address) -> Result<u64>;
}

/// In-memory ledger state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryState {
    records: BTreeMap<Address, InvoiceRecord>,
    balances: BTreeMap<Address, u64>,
}

impl MemoryState {
    /// Empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// State seeded with genesis balances
    pub fn with_balances(balances: impl IntoIterator<Item = (Address, u64)>) -> Result<Self> {
        let mut state = Self::new();
        for (address, amount) in balances {
            let entry = state.balances.entry(address).or_insert(0);
            *entry = entry.checked_add(amount).ok_or_else(|| {
                Error::InvariantViolation(format!("genesis balance overflow for {}", address))
            })?;
        }
        Ok(state)
    }

    /// Apply a transition computed against this state
    pub fn apply(&mut self, transition: &Transition) {
        for change in &transition.balance_changes {
            self.balances.insert(change.address, change.after);
        }
        self.records
            .insert(transition.record.record_address, transition.record.clone());
    }

    /// All records, ordered by address
    pub fn records(&self) -> impl Iterator<Item = &InvoiceRecord> {
        self.records.values()
    }

    /// All non-default balances, ordered by address
    pub fn balances(&self) -> impl Iterator<Item = (&Address, &u64)> {
        self.balances.iter().filter(|(_, amount)| **amount > 0)
    }

    /// Sum of all balances
    pub fn total_balance(&self) -> u128 {
        self.balances.values().map(|b| *b as u128).sum()
    }
}

impl StateView for MemoryState {
    fn record(&self, address: &Address) -> Result<Option<InvoiceRecord>> {
        Ok(self.records.get(address).cloned())
    }

    fn balance(&self, address: &Address) -> Result<u64> {
        Ok(self.balances.get(address).copied().unwrap_or(0))
    }
}
