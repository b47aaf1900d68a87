//! Chain Verifier
//!
//! Hashing, sealing and verification shared by every chain in the ledger.
//! Receipts and audit entries differ only in their [`ChainPayload`]; both go
//! through the functions here.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use ed25519_dalek::Verifier;
use remit_core::{canonical_digest, Allocation};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

use crate::error::LedgerResult;
use crate::keys::{KeyProvider, KeyResolver, RecordSignature};

/// `prev_hash` of the first record of every chain
pub const GENESIS: &str = "GENESIS";

/// Payload kinds carried by chain records
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChainPayload<'a> {
    Receipt {
        org_id: &'a str,
        bank_line_id: &'a str,
        policy_hash: &'a str,
        allocations: &'a [Allocation],
    },
    Audit {
        payload: &'a BTreeMap<String, Value>,
    },
}

/// A record that lives in a hash chain
pub trait Chained: Clone + Send + Sync {
    fn id(&self) -> &str;

    /// Key of the chain this record belongs to
    fn chain_key(&self) -> &str;

    fn prev_hash(&self) -> &str;

    fn hash(&self) -> &str;

    fn timestamp(&self) -> DateTime<Utc>;

    fn signature(&self) -> &RecordSignature;

    fn payload(&self) -> ChainPayload<'_>;

    /// Key under which a retried request must find this record again
    fn idempotency_key(&self) -> Option<String> {
        None
    }
}

/// Drop sub-millisecond precision; hashed timestamps are millisecond RFC 3339
pub fn truncate_timestamp(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    timestamp.trunc_subsecs(3)
}

pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// The JSON object whose canonical form is hashed
pub fn canonical_body(
    payload: &ChainPayload<'_>,
    prev_hash: &str,
    timestamp: &DateTime<Utc>,
) -> LedgerResult<Value> {
    let mut body = match payload {
        ChainPayload::Receipt {
            org_id,
            bank_line_id,
            policy_hash,
            allocations,
        } => json!({
            "orgId": org_id,
            "bankLineId": bank_line_id,
            "policyHash": policy_hash,
            "allocations": serde_json::to_value(allocations)?,
        }),
        ChainPayload::Audit { payload } => json!({ "payload": serde_json::to_value(payload)? }),
    };
    body["prevHash"] = Value::from(prev_hash);
    body["timestamp"] = Value::from(format_timestamp(timestamp));
    Ok(body)
}

/// `hex(SHA-256(canonical(body)))`; the body contains `prevHash`, so the
/// hash commits to the record's chain position.
pub fn compute_hash(
    payload: &ChainPayload<'_>,
    prev_hash: &str,
    timestamp: &DateTime<Utc>,
) -> LedgerResult<String> {
    Ok(canonical_digest(&canonical_body(payload, prev_hash, timestamp)?)?)
}

/// Bytes covered by the signature: `id:timestamp:hash`
pub fn signing_message(id: &str, timestamp: &DateTime<Utc>, hash: &str) -> Vec<u8> {
    format!("{}:{}:{}", id, format_timestamp(timestamp), hash).into_bytes()
}

/// Hash and signature of a new record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seal {
    pub hash: String,
    pub signature: RecordSignature,
}

pub fn seal<K: KeyProvider + ?Sized>(
    id: &str,
    payload: &ChainPayload<'_>,
    prev_hash: &str,
    timestamp: &DateTime<Utc>,
    keys: &K,
) -> LedgerResult<Seal> {
    let hash = compute_hash(payload, prev_hash, timestamp)?;
    let signature = keys.sign(&signing_message(id, timestamp, &hash));
    Ok(Seal { hash, signature })
}

/// Why a record failed verification
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ChainFailure {
    #[error("stored hash {stored} does not match recomputed {computed}")]
    HashMismatch { stored: String, computed: String },

    #[error("signature does not verify")]
    BadSignature,

    #[error("no verifying key for version {key_version}")]
    UnknownKeyVersion { key_version: u32 },

    #[error("prev_hash {prev_hash} does not resolve to any record")]
    MissingParent { prev_hash: String },

    #[error("prev_hash {actual} does not link to expected {expected}")]
    BrokenLink { expected: String, actual: String },

    #[error("chain revisits hash {hash}")]
    Cycle { hash: String },

    #[error("record not found")]
    NotFound,

    #[error("malformed record: {reason}")]
    Malformed { reason: String },
}

/// Outcome of verifying one record or a chain segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Verification {
    pub valid: bool,
    /// First record that failed, for diagnostics
    pub failing_record_id: Option<String>,
    pub failure: Option<ChainFailure>,
    /// Records that passed before the walk stopped
    pub checked: usize,
}

impl Verification {
    pub fn ok(checked: usize) -> Self {
        Self {
            valid: true,
            failing_record_id: None,
            failure: None,
            checked,
        }
    }

    pub fn failed(record_id: impl Into<String>, failure: ChainFailure, checked: usize) -> Self {
        Self {
            valid: false,
            failing_record_id: Some(record_id.into()),
            failure: Some(failure),
            checked,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

/// Recompute the hash of `record` from its own fields and check its signature
pub fn verify_record<R, K>(record: &R, keys: &K) -> Result<(), ChainFailure>
where
    R: Chained,
    K: KeyResolver + ?Sized,
{
    let timestamp = record.timestamp();
    if timestamp != truncate_timestamp(timestamp) {
        return Err(ChainFailure::Malformed {
            reason: format!("timestamp {} has sub-millisecond precision", timestamp),
        });
    }
    let computed = compute_hash(&record.payload(), record.prev_hash(), &timestamp).map_err(|e| {
        ChainFailure::Malformed {
            reason: e.to_string(),
        }
    })?;
    if computed != record.hash() {
        return Err(ChainFailure::HashMismatch {
            stored: record.hash().to_string(),
            computed,
        });
    }

    let signature = record.signature();
    let decoded = signature.decode().map_err(|e| ChainFailure::Malformed {
        reason: e.to_string(),
    })?;
    let key = keys
        .verifying_key(signature.key_version)
        .ok_or(ChainFailure::UnknownKeyVersion {
            key_version: signature.key_version,
        })?;
    key.verify(&signing_message(record.id(), &timestamp, record.hash()), &decoded)
        .map_err(|_| ChainFailure::BadSignature)
}

/// Verify records given in chain order, starting from `GENESIS`
pub fn verify_sequence<R, K>(records: &[R], keys: &K) -> Verification
where
    R: Chained,
    K: KeyResolver + ?Sized,
{
    let mut expected_prev = GENESIS;

    for (checked, record) in records.iter().enumerate() {
        if record.prev_hash() != expected_prev {
            return Verification::failed(
                record.id(),
                ChainFailure::BrokenLink {
                    expected: expected_prev.to_string(),
                    actual: record.prev_hash().to_string(),
                },
                checked,
            );
        }
        if let Err(failure) = verify_record(record, keys) {
            return Verification::failed(record.id(), failure, checked);
        }
        expected_prev = record.hash();
    }

    Verification::ok(records.len())
}

/// Walk backward from `leaf_id` to `GENESIS`, resolving each `prev_hash`
/// through `load_by_hash`.
///
/// Every record on the way must verify on its own, and every link must
/// resolve to an existing record of the same chain whose hash matches. A
/// `prev_hash` that points nowhere fails at that record even when its own
/// signature is valid. A lookup that leads back to a visited record fails
/// with [`ChainFailure::Cycle`].
pub fn verify_backward<R, K, I, H>(
    leaf_id: &str,
    mut load_by_id: I,
    mut load_by_hash: H,
    keys: &K,
) -> LedgerResult<Verification>
where
    R: Chained,
    K: KeyResolver + ?Sized,
    I: FnMut(&str) -> LedgerResult<Option<R>>,
    H: FnMut(&str) -> LedgerResult<Option<R>>,
{
    let Some(mut current) = load_by_id(leaf_id)? else {
        return Ok(Verification::failed(leaf_id, ChainFailure::NotFound, 0));
    };

    let mut visited: HashSet<String> = HashSet::new();
    let mut checked = 0;

    loop {
        visited.insert(current.hash().to_string());
        if let Err(failure) = verify_record(&current, keys) {
            return Ok(Verification::failed(current.id(), failure, checked));
        }
        checked += 1;

        if current.prev_hash() == GENESIS {
            return Ok(Verification::ok(checked));
        }

        let Some(parent) = load_by_hash(current.prev_hash())? else {
            return Ok(Verification::failed(
                current.id(),
                ChainFailure::MissingParent {
                    prev_hash: current.prev_hash().to_string(),
                },
                checked,
            ));
        };
        if visited.contains(parent.hash()) {
            return Ok(Verification::failed(
                current.id(),
                ChainFailure::Cycle {
                    hash: parent.hash().to_string(),
                },
                checked,
            ));
        }
        if parent.hash() != current.prev_hash() || parent.chain_key() != current.chain_key() {
            return Ok(Verification::failed(
                current.id(),
                ChainFailure::BrokenLink {
                    expected: current.prev_hash().to_string(),
                    actual: parent.hash().to_string(),
                },
                checked,
            ));
        }
        current = parent;
    }
}
