//! Signed transactions
//!
//! A transaction is one instruction plus the signatures of the accounts that
//! authorize it. Signatures cover [`Transaction::message_bytes`], a domain
//! tagged fixed-layout encoding of the instruction.

use crate::crypto::{hash_bytes, KeyPair};
use crate::error::Rejection;
use crate::types::{Address, InstructionKind, Signature};
use serde::{Deserialize, Serialize};

const MESSAGE_DOMAIN: &[u8] = b"invoice-ledger/v1";

/// Instruction executed by the ledger program
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    /// Create an invoice record owned by its supplier
    List {
        /// Address of the new record (public key of a fresh per-invoice key)
        record_address: Address,
        /// Supplier creating the record
        supplier: Address,
        /// Price in base units
        asking_price: u64,
        /// Display descriptor
        descriptor: String,
    },

    /// Buy an invoice record, paying its supplier
    Purchase {
        /// Record being bought
        record_address: Address,
        /// Buyer paying the asking price
        buyer: Address,
        /// Supplier the buyer expects to pay
        supplier: Address,
    },
}

impl Instruction {
    /// Instruction kind
    pub fn kind(&self) -> InstructionKind {
        match self {
            Instruction::List { .. } => InstructionKind::List,
            Instruction::Purchase { .. } => InstructionKind::Purchase,
        }
    }

    /// Record the instruction targets
    pub fn record_address(&self) -> Address {
        match self {
            Instruction::List { record_address, .. } => *record_address,
            Instruction::Purchase { record_address, .. } => *record_address,
        }
    }

    /// Fixed-layout encoding: kind tag, addresses, big-endian integers and a
    /// length-prefixed descriptor
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![self.kind() as u8];
        match self {
            Instruction::List {
                record_address,
                supplier,
                asking_price,
                descriptor,
            } => {
                bytes.extend_from_slice(record_address.as_bytes());
                bytes.extend_from_slice(supplier.as_bytes());
                bytes.extend_from_slice(&asking_price.to_be_bytes());
                bytes.extend_from_slice(&(descriptor.len() as u64).to_be_bytes());
                bytes.extend_from_slice(descriptor.as_bytes());
            }
            Instruction::Purchase {
                record_address,
                buyer,
                supplier,
            } => {
                bytes.extend_from_slice(record_address.as_bytes());
                bytes.extend_from_slice(buyer.as_bytes());
                bytes.extend_from_slice(supplier.as_bytes());
            }
        }
        bytes
    }

    /// Accounts that must sign, in check order
    pub fn required_signers(&self) -> Vec<Address> {
        match self {
            Instruction::List {
                record_address,
                supplier,
                ..
            } => vec![*supplier, *record_address],
            Instruction::Purchase { buyer, .. } => vec![*buyer],
        }
    }
}

/// One signer's signature over the transaction message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerEntry {
    /// Signing account
    pub signer: Address,
    /// Signature over the message bytes
    pub signature: Signature,
}

/// Instruction with its authorizing signatures
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Instruction to execute
    pub instruction: Instruction,
    /// Signatures, in any order
    pub signatures: Vec<SignerEntry>,
}

impl Transaction {
    /// Unsigned transaction
    pub fn new(instruction: Instruction) -> Self {
        Self {
            instruction,
            signatures: Vec::new(),
        }
    }

    /// Build and sign a List transaction.
    ///
    /// `record_key` is a fresh key generated for this invoice; its public key
    /// becomes the record address and it co-signs to prove that.
    pub fn list(
        supplier: &KeyPair,
        record_key: &KeyPair,
        asking_price: u64,
        descriptor: impl Into<String>,
    ) -> Self {
        Self::new(Instruction::List {
            record_address: record_key.address(),
            supplier: supplier.address(),
            asking_price,
            descriptor: descriptor.into(),
        })
        .signed_by(supplier)
        .signed_by(record_key)
    }

    /// Build and sign a Purchase transaction.
    ///
    /// Payment happens inside the purchase itself; no separate transfer is
    /// composed alongside it.
    pub fn purchase(buyer: &KeyPair, record_address: Address, supplier: Address) -> Self {
        Self::new(Instruction::Purchase {
            record_address,
            buyer: buyer.address(),
            supplier,
        })
        .signed_by(buyer)
    }

    /// Append a signature from `keypair`
    pub fn signed_by(mut self, keypair: &KeyPair) -> Self {
        let signature = keypair.sign(&self.message_bytes());
        self.signatures.push(SignerEntry {
            signer: keypair.address(),
            signature,
        });
        self
    }

    /// Canonical bytes covered by signatures
    pub fn message_bytes(&self) -> Vec<u8> {
        let mut message = MESSAGE_DOMAIN.to_vec();
        message.extend(self.instruction.canonical_bytes());
        message
    }

    /// SHA-256 over the message and all signatures
    pub fn hash(&self) -> [u8; 32] {
        let mut bytes = self.message_bytes();
        for entry in &self.signatures {
            bytes.extend_from_slice(entry.signer.as_bytes());
            bytes.extend_from_slice(entry.signature.as_bytes());
        }
        hash_bytes(&bytes)
    }

    /// Check every attached signature, then that each required signer signed.
    ///
    /// This is the ledger's native authorization step and runs before the
    /// program sees the instruction.
    pub fn verify_signatures(&self) -> Result<(), Rejection> {
        let message = self.message_bytes();

        for entry in &self.signatures {
            if !entry.signature.verify(&message, &entry.signer) {
                return Err(Rejection::InvalidSignature);
            }
        }

        for required in self.instruction.required_signers() {
            if !self.signatures.iter().any(|entry| entry.signer == required) {
                return Err(Rejection::SignatureMissing);
            }
        }

        Ok(())
    }
}
