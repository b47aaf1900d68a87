//! Ledger errors

use remit_policy::AllocationError;
use thiserror::Error;

/// Errors that can occur in ledger operations
///
/// Integrity violations found while verifying are not errors; they come back
/// as a [`Verification`](crate::Verification) value.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Chain conflict on {chain_key}: expected tip {expected}, found {actual}")]
    ChainConflict {
        chain_key: String,
        expected: String,
        actual: String,
    },

    #[error("Append to chain {chain_key} still conflicting after {attempts} attempts")]
    RetriesExhausted { chain_key: String, attempts: u32 },

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid signature encoding: {0}")]
    InvalidSignature(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error(transparent)]
    Allocation(#[from] AllocationError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LedgerError {
    /// Optimistic-concurrency miss; retry with the fresh tip
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ChainConflict { .. })
    }
}

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;
