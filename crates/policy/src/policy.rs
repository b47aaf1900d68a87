//! Policy (ruleset) model
//!
//! A policy names its buckets, their weights, the allocation method, and what
//! happens to money that no open gate can receive. Policies are versioned and
//! identified by `(id, version)`; the policy hash binds a decision to one
//! exact body.

use remit_core::BucketId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{AllocationError, PolicyResult};

/// Basis points in 100%
pub const BASIS_POINTS_TOTAL: u64 = 10_000;

/// Allocation method, each with a stable version string.
///
/// * `largest-remainder/v1` - integer weights, floor shares, leftover minor
///   units handed out one at a time in ascending bucket-id order.
/// * `half-even-bps/v1` - basis-point rates rounded half-to-even per bucket;
///   whatever is not rated goes to `residual_bucket`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name")]
pub enum AllocationMethod {
    #[serde(rename = "largest-remainder/v1")]
    LargestRemainderV1,

    #[serde(rename = "half-even-bps/v1", rename_all = "camelCase")]
    HalfEvenBpsV1 { residual_bucket: BucketId },
}

impl AllocationMethod {
    pub fn version(&self) -> &'static str {
        match self {
            Self::LargestRemainderV1 => "largest-remainder/v1",
            Self::HalfEvenBpsV1 { .. } => "half-even-bps/v1",
        }
    }
}

impl Default for AllocationMethod {
    fn default() -> Self {
        Self::LargestRemainderV1
    }
}

/// What to do with money no open gate can receive.
///
/// There is no default; every policy names one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum NoOpenGates {
    /// Fail the allocation with `AllocationError::NoOpenGates`
    Reject,
    /// Park the money in a no-remittance bucket outside gating
    #[serde(rename_all = "camelCase")]
    Hold { bucket_id: BucketId },
}

/// One bucket of a policy and its weight (basis points for `half-even-bps/v1`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketShare {
    pub bucket_id: BucketId,
    pub weight: u64,
}

impl BucketShare {
    pub fn new(bucket_id: impl Into<BucketId>, weight: u64) -> Self {
        Self {
            bucket_id: bucket_id.into(),
            weight,
        }
    }
}

/// Versioned allocation policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    pub id: String,
    pub version: u32,
    #[serde(default)]
    pub method: AllocationMethod,
    pub buckets: Vec<BucketShare>,
    pub on_no_open_gates: NoOpenGates,
}

impl Policy {
    pub fn builder(id: impl Into<String>, version: u32) -> PolicyBuilder {
        PolicyBuilder::new(id, version)
    }

    /// Sum of all bucket weights, or `WeightOverflow`
    pub fn total_weight(&self) -> PolicyResult<u64> {
        self.buckets.iter().try_fold(0u64, |acc, b| {
            acc.checked_add(b.weight)
                .ok_or_else(|| AllocationError::WeightOverflow {
                    policy_id: self.id.clone(),
                })
        })
    }

    /// Structural validation; runs before every allocation
    pub fn validate(&self) -> PolicyResult<()> {
        if self.id.trim().is_empty() {
            return Err(AllocationError::invalid_policy(&self.id, "policy id cannot be empty"));
        }

        let mut seen = BTreeSet::new();
        for bucket in &self.buckets {
            if bucket.bucket_id.as_str().trim().is_empty() {
                return Err(AllocationError::invalid_policy(&self.id, "bucket id cannot be empty"));
            }
            if !seen.insert(&bucket.bucket_id) {
                return Err(AllocationError::invalid_policy(
                    &self.id,
                    format!("duplicate bucket {}", bucket.bucket_id),
                ));
            }
        }

        let total = self.total_weight()?;

        if let NoOpenGates::Hold { bucket_id } = &self.on_no_open_gates {
            if bucket_id.as_str().trim().is_empty() {
                return Err(AllocationError::invalid_policy(&self.id, "hold bucket id cannot be empty"));
            }
            if seen.contains(bucket_id) {
                return Err(AllocationError::invalid_policy(
                    &self.id,
                    format!("hold bucket {} must not be a gated policy bucket", bucket_id),
                ));
            }
        }

        if let AllocationMethod::HalfEvenBpsV1 { residual_bucket } = &self.method {
            if residual_bucket.as_str().trim().is_empty() {
                return Err(AllocationError::invalid_policy(&self.id, "residual bucket id cannot be empty"));
            }
            if seen.contains(residual_bucket) {
                return Err(AllocationError::invalid_policy(
                    &self.id,
                    format!("residual bucket {} must not carry a rate", residual_bucket),
                ));
            }
            if let NoOpenGates::Hold { bucket_id } = &self.on_no_open_gates {
                if bucket_id == residual_bucket {
                    return Err(AllocationError::invalid_policy(
                        &self.id,
                        "residual bucket and hold bucket must differ",
                    ));
                }
            }
            if total > BASIS_POINTS_TOTAL {
                return Err(AllocationError::invalid_policy(
                    &self.id,
                    format!("rates sum to {} basis points, above {}", total, BASIS_POINTS_TOTAL),
                ));
            }
        }

        Ok(())
    }
}

/// Builder for policies
///
/// # Example
/// ```
/// use remit_policy::Policy;
///
/// let policy = Policy::builder("au-default", 3)
///     .bucket("GST", 1_000)
///     .bucket("PAYGW", 2_000)
///     .half_even("OPERATING")
///     .hold("HOLD")
///     .build()
///     .unwrap();
///
/// assert_eq!(policy.method.version(), "half-even-bps/v1");
/// ```
#[derive(Debug, Clone)]
pub struct PolicyBuilder {
    id: String,
    version: u32,
    method: AllocationMethod,
    buckets: Vec<BucketShare>,
    on_no_open_gates: Option<NoOpenGates>,
}

impl PolicyBuilder {
    pub fn new(id: impl Into<String>, version: u32) -> Self {
        Self {
            id: id.into(),
            version,
            method: AllocationMethod::LargestRemainderV1,
            buckets: Vec::new(),
            on_no_open_gates: None,
        }
    }

    pub fn bucket(mut self, bucket_id: impl Into<BucketId>, weight: u64) -> Self {
        self.buckets.push(BucketShare::new(bucket_id, weight));
        self
    }

    /// Switch to `half-even-bps/v1` with the given residual bucket
    pub fn half_even(mut self, residual_bucket: impl Into<BucketId>) -> Self {
        self.method = AllocationMethod::HalfEvenBpsV1 {
            residual_bucket: residual_bucket.into(),
        };
        self
    }

    pub fn reject_when_closed(mut self) -> Self {
        self.on_no_open_gates = Some(NoOpenGates::Reject);
        self
    }

    pub fn hold(mut self, bucket_id: impl Into<BucketId>) -> Self {
        self.on_no_open_gates = Some(NoOpenGates::Hold {
            bucket_id: bucket_id.into(),
        });
        self
    }

    pub fn build(self) -> PolicyResult<Policy> {
        let on_no_open_gates = self.on_no_open_gates.ok_or_else(|| {
            AllocationError::invalid_policy(&self.id, "no-open-gates disposition must be chosen")
        })?;

        let policy = Policy {
            id: self.id,
            version: self.version,
            method: self.method,
            buckets: self.buckets,
            on_no_open_gates,
        };
        policy.validate()?;
        Ok(policy)
    }
}
