//! Error types for the invoice ledger

use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Why a submitted transaction was refused.
///
/// A rejection always means zero state change: the record, every balance and
/// the commit log are exactly as they were before submission.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// List targeted an address that already holds a record
    #[error("a record already exists at the target address")]
    AddressCollision,

    /// Purchase targeted an address with no record
    #[error("no record exists at the target address")]
    RecordNotFound,

    /// Purchase targeted a record that was already sold
    #[error("the invoice has already been sold")]
    AlreadySold,

    /// Caller-supplied supplier does not match the record's supplier
    #[error("supplier address does not match the record")]
    SupplierMismatch,

    /// Buyer is the record's own supplier
    #[error("a supplier cannot purchase their own invoice")]
    SelfPurchase,

    /// Paying account cannot cover the amount at commit
    #[error("insufficient funds")]
    InsufficientFunds,

    /// Descriptor exceeds the stored length bound
    #[error("descriptor exceeds the maximum stored length")]
    DescriptorTooLong,

    /// Asking price is negative, fractional or out of range
    #[error("asking price must be a non-negative integer number of base units")]
    InvalidPrice,

    /// A required signer did not sign the transaction
    #[error("required signature missing")]
    SignatureMissing,

    /// A signature is present but does not verify
    #[error("signature verification failed")]
    InvalidSignature,
}

impl Rejection {
    /// Stable machine-readable reason code
    pub fn code(&self) -> &'static str {
        match self {
            Rejection::AddressCollision => "address_collision",
            Rejection::RecordNotFound => "record_not_found",
            Rejection::AlreadySold => "already_sold",
            Rejection::SupplierMismatch => "supplier_mismatch",
            Rejection::SelfPurchase => "self_purchase",
            Rejection::InsufficientFunds => "insufficient_funds",
            Rejection::DescriptorTooLong => "descriptor_too_long",
            Rejection::InvalidPrice => "invalid_price",
            Rejection::SignatureMissing => "signature_missing",
            Rejection::InvalidSignature => "invalid_signature",
        }
    }
}

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Transaction refused by the program
    #[error("Transaction rejected: {0}")]
    Rejected(#[from] Rejection),

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Receipt not found
    #[error("Receipt not found: {0}")]
    ReceiptNotFound(u64),

    /// Block not found
    #[error("Block not found: {0}")]
    BlockNotFound(String),

    /// Block cannot be sealed
    #[error("Invalid block: {0}")]
    InvalidBlock(String),

    /// Invariant violation (value conservation, ownership, hash chain)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Malformed address or key material
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Concurrency error (actor mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The protocol rejection carried by this error, if any
    pub fn rejection(&self) -> Option<Rejection> {
        match self {
            Error::Rejected(rejection) => Some(*rejection),
            _ => None,
        }
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
