//! The ledger collaborator: the only way this crate touches the network.
//!
//! Implementations wrap an RPC client. Calls are blocking request/response
//! with no retry of their own; the lifecycle manager owns the only retry
//! loop (confirmation polling).

use chain_sol::{Hash, Pubkey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::EnvelopeError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// Network or RPC failure; the request may not have been processed.
    #[error("transport: {0}")]
    Transport(String),

    /// The node processed the request and refused it. Carries the raw
    /// error text for classification.
    #[error("rejected: {0}")]
    Rejected(String),
}

impl LedgerError {
    pub fn raw(&self) -> &str {
        match self {
            LedgerError::Transport(s) | LedgerError::Rejected(s) => s,
        }
    }
}

impl From<LedgerError> for EnvelopeError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::Transport(s) => EnvelopeError::Transport(s),
            LedgerError::Rejected(s) => EnvelopeError::Rejected(s),
        }
    }
}

/// What the ledger knows about a submitted signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SignatureStatus {
    /// Unknown to the node or not yet included.
    Pending,
    Confirmed { slot: u64 },
    Finalized { slot: u64 },
    /// Included, but the transaction failed on-chain.
    Errored { slot: u64, detail: String },
}

impl SignatureStatus {
    pub fn slot(&self) -> Option<u64> {
        match self {
            SignatureStatus::Pending => None,
            SignatureStatus::Confirmed { slot }
            | SignatureStatus::Finalized { slot }
            | SignatureStatus::Errored { slot, .. } => Some(*slot),
        }
    }

    pub fn is_settled(&self) -> bool {
        !matches!(self, SignatureStatus::Pending)
    }
}

pub trait Ledger: Send + Sync {
    /// A recent blockhash to anchor a new transaction.
    fn latest_blockhash(&self) -> Result<Hash, LedgerError>;

    /// Raw account data, `None` when the account does not exist.
    fn account_data(&self, address: &Pubkey) -> Result<Option<Vec<u8>>, LedgerError>;

    /// Submit signed wire bytes; returns the Base58 signature.
    fn send_transaction(&self, wire: &[u8]) -> Result<String, LedgerError>;

    fn signature_status(&self, signature: &str) -> Result<SignatureStatus, LedgerError>;

    /// Used only for confirmation depth.
    fn current_slot(&self) -> Result<u64, LedgerError>;
}

impl<L: Ledger + ?Sized> Ledger for &L {
    fn latest_blockhash(&self) -> Result<Hash, LedgerError> {
        (**self).latest_blockhash()
    }

    fn account_data(&self, address: &Pubkey) -> Result<Option<Vec<u8>>, LedgerError> {
        (**self).account_data(address)
    }

    fn send_transaction(&self, wire: &[u8]) -> Result<String, LedgerError> {
        (**self).send_transaction(wire)
    }

    fn signature_status(&self, signature: &str) -> Result<SignatureStatus, LedgerError> {
        (**self).signature_status(signature)
    }

    fn current_slot(&self) -> Result<u64, LedgerError> {
        (**self).current_slot()
    }
}
