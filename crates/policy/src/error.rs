//! Policy engine errors

use thiserror::Error;

/// Errors that can occur while validating a policy or allocating a bank line
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocationError {
    #[error("Invalid amount on bank line {bank_line_id}: {reason}")]
    InvalidAmount { bank_line_id: String, reason: String },

    #[error("Invalid policy {policy_id}: {reason}")]
    InvalidPolicy { policy_id: String, reason: String },

    #[error("No open gate can receive {amount} minor units of bank line {bank_line_id} bound for {target}")]
    NoOpenGates {
        bank_line_id: String,
        amount: i64,
        /// Where the stranded amount was headed
        target: String,
    },

    #[error("Weights of policy {policy_id} exceed safe integer bounds")]
    WeightOverflow { policy_id: String },

    #[error("Allocation invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AllocationError {
    pub(crate) fn invalid_policy(policy_id: &str, reason: impl Into<String>) -> Self {
        Self::InvalidPolicy {
            policy_id: policy_id.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for AllocationError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type for policy operations
pub type PolicyResult<T> = Result<T, AllocationError>;
