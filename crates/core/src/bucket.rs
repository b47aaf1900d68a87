//! Buckets, gates and allocations
//!
//! A bucket is a compliance destination (operating funds, GST, PAYGW, tax
//! buffer...). Each bucket has a runtime gate owned by an external gating
//! subsystem; the allocation engine only reads a snapshot of it.

use crate::amount::Amount;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Bucket identifier. Ordering is plain byte order of the id, which is the
/// order remainders are handed out in.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BucketId(String);

impl BucketId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BucketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BucketId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for BucketId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Per-bucket gate - ordered from least to most restrictive
///
/// `Open < Suspended < Closed`; when several states are reported for one
/// bucket the most restrictive wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Gate {
    Open = 0,
    Suspended = 1,
    Closed = 2,
}

impl Gate {
    pub fn is_open(&self) -> bool {
        matches!(self, Gate::Open)
    }
}

impl PartialOrd for Gate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Gate {
    fn cmp(&self, other: &Self) -> Ordering {
        (*self as u8).cmp(&(*other as u8))
    }
}

/// Runtime gate of one bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountState {
    pub bucket_id: BucketId,
    pub gate: Gate,
}

impl AccountState {
    pub fn new(bucket_id: impl Into<BucketId>, gate: Gate) -> Self {
        Self {
            bucket_id: bucket_id.into(),
            gate,
        }
    }

    pub fn open(bucket_id: impl Into<BucketId>) -> Self {
        Self::new(bucket_id, Gate::Open)
    }

    pub fn closed(bucket_id: impl Into<BucketId>) -> Self {
        Self::new(bucket_id, Gate::Closed)
    }
}

/// Amount assigned to one bucket
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Allocation {
    pub bucket_id: BucketId,
    pub amount_minor_units: Amount,
}

impl Allocation {
    pub fn new(bucket_id: impl Into<BucketId>, amount: Amount) -> Self {
        Self {
            bucket_id: bucket_id.into(),
            amount_minor_units: amount,
        }
    }
}
