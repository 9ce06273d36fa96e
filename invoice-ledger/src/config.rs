//! Configuration for the invoice ledger

use crate::program::ProgramParams;
use crate::types::Address;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Bounded mailbox size of the writer actor
    pub mailbox_capacity: usize,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,

    /// Storage deposit charged at listing
    pub deposit: DepositConfig,

    /// Balances credited once when the ledger is first created
    pub genesis: Vec<GenesisAllocation>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/invoice-ledger"),
            service_name: "invoice-ledger".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            mailbox_capacity: 1000,
            rocksdb: RocksDBConfig::default(),
            deposit: DepositConfig::default(),
            genesis: Vec::new(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Fsync every commit
    pub sync_writes: bool,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 4,
            max_background_jobs: 4,
            sync_writes: true,
            enable_statistics: false,
        }
    }
}

/// Storage deposit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DepositConfig {
    /// Base units charged per allocated byte
    pub per_byte: u64,

    /// Fixed per-account overhead in bytes
    pub account_overhead_bytes: u64,
}

impl Default for DepositConfig {
    fn default() -> Self {
        // Two years of rent at 3480 base units per byte-year
        Self {
            per_byte: 6_960,
            account_overhead_bytes: 128,
        }
    }
}

/// Initial balance for one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisAllocation {
    /// Hex-encoded account address
    pub address: String,

    /// Balance in base units
    pub balance: u64,
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("LEDGER_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(capacity) = std::env::var("LEDGER_MAILBOX_CAPACITY") {
            config.mailbox_capacity = capacity
                .parse()
                .map_err(|e| crate::Error::Config(format!("LEDGER_MAILBOX_CAPACITY: {}", e)))?;
        }

        if let Ok(per_byte) = std::env::var("LEDGER_DEPOSIT_PER_BYTE") {
            config.deposit.per_byte = per_byte
                .parse()
                .map_err(|e| crate::Error::Config(format!("LEDGER_DEPOSIT_PER_BYTE: {}", e)))?;
        }

        Ok(config)
    }

    /// Program parameters derived from this configuration
    pub fn program_params(&self) -> ProgramParams {
        ProgramParams {
            deposit_per_byte: self.deposit.per_byte,
            account_overhead_bytes: self.deposit.account_overhead_bytes,
        }
    }

    /// Parsed genesis allocations
    pub fn genesis_balances(&self) -> crate::Result<Vec<(Address, u64)>> {
        self.genesis
            .iter()
            .map(|allocation| {
                let address = Address::from_hex(&allocation.address).map_err(|e| {
                    crate::Error::Config(format!("genesis address {}: {}", allocation.address, e))
                })?;
                Ok((address, allocation.balance))
            })
            .collect()
    }

    /// Reject configurations the ledger cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.mailbox_capacity == 0 {
            return Err(crate::Error::Config("mailbox_capacity must be positive".to_string()));
        }

        let total = self
            .genesis
            .iter()
            .try_fold(0u64, |acc, allocation| acc.checked_add(allocation.balance));
        if total.is_none() {
            return Err(crate::Error::Config(
                "genesis total exceeds u64 base units".to_string(),
            ));
        }

        self.genesis_balances().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service_name, "invoice-ledger");
        assert_eq!(config.mailbox_capacity, 1000);
        assert!(config.genesis.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_deposit_matches_rent_exemption() {
        let params = Config::default().program_params();
        assert_eq!(
            params.storage_deposit(),
            (128 + crate::types::InvoiceRecord::SPACE as u64) * 6_960
        );
    }

    #[test]
    fn test_parse_toml() {
        let address = Address::new([3u8; 32]).to_hex();
        let toml = format!(
            r#"
            data_dir = "/tmp/invoices"
            mailbox_capacity = 16

            [deposit]
            per_byte = 1

            [[genesis]]
            address = "{address}"
            balance = 500
            "#
        );

        let config: Config = toml::from_str(&toml).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/invoices"));
        assert_eq!(config.mailbox_capacity, 16);
        assert_eq!(config.deposit.per_byte, 1);
        assert_eq!(config.deposit.account_overhead_bytes, 128);
        assert_eq!(
            config.genesis_balances().unwrap(),
            vec![(Address::new([3u8; 32]), 500)]
        );
    }

    #[test]
    fn test_genesis_overflow_rejected() {
        let mut config = Config::default();
        for seed in [1u8, 2] {
            config.genesis.push(GenesisAllocation {
                address: Address::new([seed; 32]).to_hex(),
                balance: u64::MAX,
            });
        }
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_genesis_address_rejected() {
        let mut config = Config::default();
        config.genesis.push(GenesisAllocation {
            address: "not-hex".to_string(),
            balance: 1,
        });
        assert!(config.validate().is_err());
    }
}
