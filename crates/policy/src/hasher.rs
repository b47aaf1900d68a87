//! Policy Hasher
//!
//! Binds an allocation decision to one exact policy body. The digest is
//! SHA-256 over the canonical JSON of `{orgId, bankLineId, policy}`.

use remit_core::{canonical_digest, BankLine};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;

use crate::error::PolicyResult;
use crate::policy::Policy;

/// Hex-encoded SHA-256 policy digest (64 chars)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PolicyHash(String);

impl PolicyHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for PolicyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<PolicyHash> for String {
    fn from(hash: PolicyHash) -> Self {
        hash.0
    }
}

/// Hash a policy body in the context of one org and bank line.
///
/// `policy` may be a typed [`Policy`] or a raw ruleset as `serde_json::Value`.
pub fn policy_hash<P: Serialize + ?Sized>(
    org_id: &str,
    bank_line_id: &str,
    policy: &P,
) -> PolicyResult<PolicyHash> {
    let tuple = json!({
        "orgId": org_id,
        "bankLineId": bank_line_id,
        "policy": serde_json::to_value(policy)?,
    });
    Ok(PolicyHash(canonical_digest(&tuple)?))
}

impl Policy {
    /// Policy hash for this policy applied to `bank_line`
    pub fn hash_for(&self, bank_line: &BankLine) -> PolicyResult<PolicyHash> {
        policy_hash(&bank_line.org_id, &bank_line.id, self)
    }
}
