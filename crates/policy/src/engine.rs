//! Allocation Engine
//!
//! `allocate(bank_line, policy, account_states)` is a pure function: no I/O,
//! no clock, no shared state. For identical inputs it returns byte-identical
//! output, and the allocated amounts always sum to the bank line amount.
//!
//! All arithmetic is integer minor units. Shares are computed in `u128` so
//! `amount * weight` cannot overflow for any `i64` amount and `u64` weight;
//! half-even rounding uses `rust_decimal`, which is exact at this scale.

use std::collections::BTreeMap;

use remit_core::{AccountState, Allocation, Amount, BankLine, BucketId, Currency, Gate};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::{AllocationError, PolicyResult};
use crate::policy::{AllocationMethod, BucketShare, NoOpenGates, Policy, BASIS_POINTS_TOTAL};

/// Outcome of one allocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationResult {
    pub bank_line_id: String,
    /// Version string of the method that produced this result
    pub method: String,
    pub currency: Currency,
    /// One entry per bucket, ascending bucket id
    pub allocations: Vec<Allocation>,
    pub total_input: Amount,
}

impl AllocationResult {
    /// Sum of all allocations, `None` on overflow
    pub fn total_allocated(&self) -> Option<i64> {
        self.allocations
            .iter()
            .try_fold(0i64, |acc, a| acc.checked_add(a.amount_minor_units.minor_units()))
    }

    pub fn amount_for(&self, bucket_id: &str) -> Option<Amount> {
        self.allocations
            .iter()
            .find(|a| a.bucket_id.as_str() == bucket_id)
            .map(|a| a.amount_minor_units)
    }
}

/// Gate snapshot for one call. Missing buckets are `Closed`; duplicates
/// resolve to the most restrictive gate.
struct GateSnapshot<'a> {
    gates: BTreeMap<&'a BucketId, Gate>,
}

impl<'a> GateSnapshot<'a> {
    fn new(states: &'a [AccountState]) -> Self {
        let mut gates: BTreeMap<&BucketId, Gate> = BTreeMap::new();
        for state in states {
            gates
                .entry(&state.bucket_id)
                .and_modify(|g| *g = (*g).max(state.gate))
                .or_insert(state.gate);
        }
        Self { gates }
    }

    fn is_open(&self, bucket_id: &BucketId) -> bool {
        self.gates
            .get(bucket_id)
            .copied()
            .unwrap_or(Gate::Closed)
            .is_open()
    }
}

/// Per-bucket amounts plus whatever no open gate could take
struct Distribution {
    amounts: BTreeMap<BucketId, i64>,
    undeliverable: i64,
    /// Closed residual bucket that left `undeliverable` stranded
    closed_residual: Option<BucketId>,
}

/// Split a bank line across the policy's buckets
pub fn allocate(
    bank_line: &BankLine,
    policy: &Policy,
    account_states: &[AccountState],
) -> PolicyResult<AllocationResult> {
    policy.validate()?;

    let amount = bank_line
        .amount()
        .map_err(|e| AllocationError::InvalidAmount {
            bank_line_id: bank_line.id.clone(),
            reason: e.to_string(),
        })?;

    let gates = GateSnapshot::new(account_states);
    let minor_units = amount.minor_units();

    let mut distribution = match &policy.method {
        AllocationMethod::LargestRemainderV1 => {
            largest_remainder(policy, minor_units, &policy.buckets, &gates)?
        }
        AllocationMethod::HalfEvenBpsV1 { residual_bucket } => {
            half_even_bps(minor_units, &policy.buckets, residual_bucket, &gates)?
        }
    };

    if distribution.undeliverable > 0 {
        match &policy.on_no_open_gates {
            NoOpenGates::Reject => {
                tracing::debug!(
                    bank_line_id = %bank_line.id,
                    policy_id = %policy.id,
                    amount = distribution.undeliverable,
                    closed_residual = ?distribution.closed_residual,
                    "No open gate, rejecting allocation"
                );
                let target = match &distribution.closed_residual {
                    Some(bucket_id) => format!("closed residual bucket {}", bucket_id),
                    None => "any weighted bucket".to_string(),
                };
                return Err(AllocationError::NoOpenGates {
                    bank_line_id: bank_line.id.clone(),
                    amount: distribution.undeliverable,
                    target,
                });
            }
            NoOpenGates::Hold { bucket_id } => {
                *distribution.amounts.entry(bucket_id.clone()).or_insert(0) +=
                    distribution.undeliverable;
                distribution.undeliverable = 0;
            }
        }
    }

    let allocations = distribution
        .amounts
        .into_iter()
        .map(|(bucket_id, value)| {
            Amount::new(value)
                .map(|amount| Allocation::new(bucket_id.clone(), amount))
                .map_err(|_| {
                    AllocationError::InvariantViolation(format!(
                        "negative allocation {} for bucket {}",
                        value, bucket_id
                    ))
                })
        })
        .collect::<PolicyResult<Vec<_>>>()?;

    let result = AllocationResult {
        bank_line_id: bank_line.id.clone(),
        method: policy.method.version().to_string(),
        currency: bank_line.currency.clone(),
        allocations,
        total_input: amount,
    };

    check_conservation(&result)?;

    tracing::debug!(
        bank_line_id = %result.bank_line_id,
        policy_id = %policy.id,
        policy_version = policy.version,
        method = %result.method,
        total = minor_units,
        buckets = result.allocations.len(),
        "Allocation computed"
    );

    Ok(result)
}

fn largest_remainder(
    policy: &Policy,
    amount: i64,
    buckets: &[BucketShare],
    gates: &GateSnapshot<'_>,
) -> PolicyResult<Distribution> {
    let mut amounts: BTreeMap<BucketId, i64> =
        buckets.iter().map(|b| (b.bucket_id.clone(), 0)).collect();

    let mut open: Vec<(&BucketId, u64)> = buckets
        .iter()
        .filter(|b| b.weight > 0 && gates.is_open(&b.bucket_id))
        .map(|b| (&b.bucket_id, b.weight))
        .collect();
    open.sort_by(|a, b| a.0.cmp(b.0));

    let total_weight = open.iter().try_fold(0u64, |acc, (_, w)| {
        acc.checked_add(*w).ok_or_else(|| AllocationError::WeightOverflow {
            policy_id: policy.id.clone(),
        })
    })?;

    if total_weight == 0 {
        return Ok(Distribution {
            amounts,
            undeliverable: amount,
            closed_residual: None,
        });
    }

    let total = amount as u128;
    let mut distributed: u128 = 0;
    for (bucket_id, weight) in &open {
        let share = total * (*weight as u128) / (total_weight as u128);
        distributed += share;
        amounts.insert((*bucket_id).clone(), to_minor_units(share)?);
    }

    // remainder < open.len(), so this is a single partial pass in practice
    let mut remainder = total - distributed;
    while remainder > 0 {
        for (bucket_id, _) in &open {
            if remainder == 0 {
                break;
            }
            if let Some(value) = amounts.get_mut(*bucket_id) {
                *value += 1;
                remainder -= 1;
            }
        }
    }

    Ok(Distribution {
        amounts,
        undeliverable: 0,
        closed_residual: None,
    })
}

fn half_even_bps(
    amount: i64,
    buckets: &[BucketShare],
    residual_bucket: &BucketId,
    gates: &GateSnapshot<'_>,
) -> PolicyResult<Distribution> {
    let mut amounts: BTreeMap<BucketId, i64> =
        buckets.iter().map(|b| (b.bucket_id.clone(), 0)).collect();
    amounts.insert(residual_bucket.clone(), 0);

    let half = Decimal::new(5, 1);
    let denominator = Decimal::from(BASIS_POINTS_TOTAL);
    let mut rounded_up: Vec<(Decimal, BucketId)> = Vec::new();
    let mut rated_total: i64 = 0;

    let mut rated: Vec<&BucketShare> = buckets
        .iter()
        .filter(|b| b.weight > 0 && gates.is_open(&b.bucket_id))
        .collect();
    rated.sort_by(|a, b| a.bucket_id.cmp(&b.bucket_id));

    for bucket in rated {
        let exact = Decimal::from(amount)
            .checked_mul(Decimal::from(bucket.weight))
            .and_then(|v| v.checked_div(denominator))
            .ok_or_else(|| {
                AllocationError::InvariantViolation(format!(
                    "rate arithmetic overflow for bucket {}",
                    bucket.bucket_id
                ))
            })?;
        let rounded = exact.round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven);
        if rounded > exact {
            rounded_up.push(((exact.fract() - half).abs(), bucket.bucket_id.clone()));
        }

        let value = rounded.to_i64().ok_or_else(|| {
            AllocationError::InvariantViolation(format!("share out of range for {}", bucket.bucket_id))
        })?;
        rated_total += value;
        amounts.insert(bucket.bucket_id.clone(), value);
    }

    // Rounding up can overshoot by at most one unit per rounded-up bucket.
    // Take the excess back from the buckets that sat closest to .5.
    let mut drift = rated_total - amount;
    if drift > 0 {
        rounded_up.sort();
        for (_, bucket_id) in &rounded_up {
            if drift == 0 {
                break;
            }
            if let Some(value) = amounts.get_mut(bucket_id) {
                *value -= 1;
                rated_total -= 1;
                drift -= 1;
            }
        }
    }
    if drift > 0 {
        return Err(AllocationError::InvariantViolation(format!(
            "unreconciled rounding drift of {}",
            drift
        )));
    }

    let residual = amount - rated_total;
    if gates.is_open(residual_bucket) {
        amounts.insert(residual_bucket.clone(), residual);
        return Ok(Distribution {
            amounts,
            undeliverable: 0,
            closed_residual: None,
        });
    }

    Ok(Distribution {
        amounts,
        undeliverable: residual,
        closed_residual: (residual > 0).then(|| residual_bucket.clone()),
    })
}

fn to_minor_units(value: u128) -> PolicyResult<i64> {
    i64::try_from(value)
        .map_err(|_| AllocationError::InvariantViolation(format!("share {} exceeds i64", value)))
}

/// Conservation must hold for every result; a failure here is a defect.
fn check_conservation(result: &AllocationResult) -> PolicyResult<()> {
    let allocated = result.total_allocated();
    let conserved = allocated == Some(result.total_input.minor_units());
    debug_assert!(
        conserved,
        "conservation violated for {}: allocated {:?}, input {}",
        result.bank_line_id,
        allocated,
        result.total_input
    );
    if !conserved {
        return Err(AllocationError::InvariantViolation(format!(
            "allocated {:?} != input {} for bank line {}",
            allocated, result.total_input, result.bank_line_id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(amount: i64) -> BankLine {
        BankLine::new("bl-1", "org-1", amount, Currency::Aud)
    }

    fn open(ids: &[&str]) -> Vec<AccountState> {
        ids.iter().map(|id| AccountState::open(*id)).collect()
    }

    fn weighted() -> Policy {
        Policy::builder("weighted", 1)
            .bucket("A", 1)
            .bucket("B", 1)
            .bucket("C", 1)
            .reject_when_closed()
            .build()
            .unwrap()
    }

    fn amount_of(result: &AllocationResult, bucket: &str) -> i64 {
        result.amount_for(bucket).unwrap().minor_units()
    }

    #[test]
    fn test_remainder_goes_to_lowest_ids() {
        let result = allocate(&line(100), &weighted(), &open(&["A", "B", "C"])).unwrap();
        assert_eq!(amount_of(&result, "A"), 34);
        assert_eq!(amount_of(&result, "B"), 33);
        assert_eq!(amount_of(&result, "C"), 33);
        assert_eq!(result.method, "largest-remainder/v1");
    }

    #[test]
    fn test_closed_bucket_gets_zero_and_share_is_redistributed() {
        let states = vec![
            AccountState::open("A"),
            AccountState::closed("B"),
            AccountState::open("C"),
        ];
        let result = allocate(&line(101), &weighted(), &states).unwrap();
        assert_eq!(amount_of(&result, "A"), 51);
        assert_eq!(amount_of(&result, "B"), 0);
        assert_eq!(amount_of(&result, "C"), 50);
    }

    #[test]
    fn test_suspended_and_missing_states_are_excluded() {
        let states = vec![AccountState::new("A", Gate::Suspended), AccountState::open("C")];
        let result = allocate(&line(10), &weighted(), &states).unwrap();
        assert_eq!(amount_of(&result, "A"), 0);
        assert_eq!(amount_of(&result, "B"), 0);
        assert_eq!(amount_of(&result, "C"), 10);
    }

    #[test]
    fn test_duplicate_states_most_restrictive_wins() {
        let states = vec![
            AccountState::open("A"),
            AccountState::closed("A"),
            AccountState::open("A"),
            AccountState::open("B"),
        ];
        let result = allocate(&line(10), &weighted(), &states).unwrap();
        assert_eq!(amount_of(&result, "A"), 0);
        assert_eq!(amount_of(&result, "B"), 10);
    }

    #[test]
    fn test_all_closed_rejects() {
        let result = allocate(&line(100), &weighted(), &[]);
        assert!(matches!(
            result,
            Err(AllocationError::NoOpenGates { amount: 100, .. })
        ));
    }

    #[test]
    fn test_all_closed_holds() {
        let policy = Policy::builder("p", 1)
            .bucket("A", 1)
            .hold("HOLD")
            .build()
            .unwrap();
        let result = allocate(&line(100), &policy, &[AccountState::closed("A")]).unwrap();
        assert_eq!(amount_of(&result, "A"), 0);
        assert_eq!(amount_of(&result, "HOLD"), 100);
    }

    #[test]
    fn test_zero_amount_never_fails() {
        let result = allocate(&line(0), &weighted(), &[]).unwrap();
        assert_eq!(result.total_allocated(), Some(0));
        assert_eq!(result.allocations.len(), 3);
    }

    #[test]
    fn test_zero_buckets() {
        let hold = Policy::builder("p", 1).hold("HOLD").build().unwrap();
        let result = allocate(&line(7), &hold, &[]).unwrap();
        assert_eq!(result.allocations, vec![Allocation::new("HOLD", Amount::new(7).unwrap())]);

        let reject = Policy::builder("p", 1).reject_when_closed().build().unwrap();
        assert!(allocate(&line(0), &reject, &[]).unwrap().allocations.is_empty());
        assert!(allocate(&line(7), &reject, &[]).is_err());
    }

    #[test]
    fn test_negative_amount_rejected() {
        let result = allocate(&line(-5), &weighted(), &open(&["A"]));
        assert!(matches!(result, Err(AllocationError::InvalidAmount { .. })));
    }

    #[test]
    fn test_large_amount_large_weights() {
        let policy = Policy::builder("p", 1)
            .bucket("A", u64::MAX / 2)
            .bucket("B", u64::MAX / 2)
            .reject_when_closed()
            .build()
            .unwrap();
        let result = allocate(&line(i64::MAX), &policy, &open(&["A", "B"])).unwrap();
        assert_eq!(result.total_allocated(), Some(i64::MAX));
        assert_eq!(amount_of(&result, "A"), i64::MAX / 2 + 1);
    }

    #[test]
    fn test_half_even_rounding_parity() {
        let policy = Policy::builder("au", 1)
            .bucket("GST", 1_000)
            .bucket("PAYGW", 3_000)
            .half_even("OPERATING")
            .reject_when_closed()
            .build()
            .unwrap();
        let result = allocate(&line(5), &policy, &open(&["GST", "PAYGW", "OPERATING"])).unwrap();

        // 0.5 -> 0, 1.5 -> 2
        assert_eq!(amount_of(&result, "GST"), 0);
        assert_eq!(amount_of(&result, "PAYGW"), 2);
        assert_eq!(amount_of(&result, "OPERATING"), 3);
        assert_eq!(result.method, "half-even-bps/v1");
    }

    #[test]
    fn test_half_even_single_rate() {
        let policy = Policy::builder("au", 1)
            .bucket("GST", 5_000)
            .half_even("OPERATING")
            .reject_when_closed()
            .build()
            .unwrap();
        let result = allocate(&line(5), &policy, &open(&["GST", "OPERATING"])).unwrap();
        assert_eq!(amount_of(&result, "GST"), 2);
        assert_eq!(amount_of(&result, "OPERATING"), 3);
    }

    #[test]
    fn test_half_even_drift_reconciled() {
        // 1.5 and 1.5 both round to 2; the overshoot comes back from "A"
        let policy = Policy::builder("p", 1)
            .bucket("A", 5_000)
            .bucket("B", 5_000)
            .half_even("R")
            .reject_when_closed()
            .build()
            .unwrap();
        let result = allocate(&line(3), &policy, &open(&["A", "B", "R"])).unwrap();
        assert_eq!(amount_of(&result, "A"), 1);
        assert_eq!(amount_of(&result, "B"), 2);
        assert_eq!(amount_of(&result, "R"), 0);
    }

    #[test]
    fn test_half_even_drift_ties_broken_by_bucket_id() {
        // 3.5 and 3.5 both round up to 4; only "A" gives a unit back
        let policy = Policy::builder("p", 1)
            .bucket("A", 5_000)
            .bucket("B", 5_000)
            .half_even("R")
            .reject_when_closed()
            .build()
            .unwrap();
        let result = allocate(&line(7), &policy, &open(&["A", "B", "R"])).unwrap();
        assert_eq!(amount_of(&result, "A"), 3);
        assert_eq!(amount_of(&result, "B"), 4);
        assert_eq!(amount_of(&result, "R"), 0);
    }

    #[test]
    fn test_half_even_no_drift_when_rounding_balances() {
        // 1.5 -> 2 and 4.5 -> 4
        let policy = Policy::builder("p", 1)
            .bucket("C", 2_500)
            .bucket("D", 7_500)
            .half_even("R")
            .reject_when_closed()
            .build()
            .unwrap();
        let result = allocate(&line(6), &policy, &open(&["C", "D", "R"])).unwrap();
        assert_eq!(amount_of(&result, "C"), 2);
        assert_eq!(amount_of(&result, "D"), 4);
        assert_eq!(amount_of(&result, "R"), 0);
    }

    #[test]
    fn test_half_even_closed_rate_flows_to_residual() {
        let policy = Policy::builder("au", 1)
            .bucket("GST", 1_000)
            .half_even("OPERATING")
            .reject_when_closed()
            .build()
            .unwrap();
        let states = vec![AccountState::closed("GST"), AccountState::open("OPERATING")];
        let result = allocate(&line(10_000), &policy, &states).unwrap();
        assert_eq!(amount_of(&result, "GST"), 0);
        assert_eq!(amount_of(&result, "OPERATING"), 10_000);
    }

    #[test]
    fn test_half_even_closed_residual_uses_disposition() {
        let policy = Policy::builder("au", 1)
            .bucket("GST", 1_000)
            .half_even("OPERATING")
            .hold("HOLD")
            .build()
            .unwrap();
        let states = vec![AccountState::open("GST"), AccountState::closed("OPERATING")];
        let result = allocate(&line(10_000), &policy, &states).unwrap();
        assert_eq!(amount_of(&result, "GST"), 1_000);
        assert_eq!(amount_of(&result, "OPERATING"), 0);
        assert_eq!(amount_of(&result, "HOLD"), 9_000);
    }

    #[test]
    fn test_half_even_closed_residual_reject_names_bucket() {
        let policy = Policy::builder("au", 1)
            .bucket("GST", 1_000)
            .half_even("OPERATING")
            .reject_when_closed()
            .build()
            .unwrap();
        let states = vec![AccountState::open("GST"), AccountState::closed("OPERATING")];
        let err = allocate(&line(10_000), &policy, &states).unwrap_err();

        assert!(matches!(
            &err,
            AllocationError::NoOpenGates { amount: 9_000, target, .. }
                if target == "closed residual bucket OPERATING"
        ));
        assert!(err.to_string().contains("OPERATING"));

        let all_closed = allocate(&line(100), &weighted(), &[]).unwrap_err();
        assert!(all_closed.to_string().ends_with("bound for any weighted bucket"));
    }

    #[test]
    fn test_deterministic_output() {
        let states = open(&["C", "A", "B"]);
        let a = allocate(&line(1_000_003), &weighted(), &states).unwrap();
        let b = allocate(&line(1_000_003), &weighted(), &states).unwrap();
        assert_eq!(
            serde_json::to_vec(&a).unwrap(),
            serde_json::to_vec(&b).unwrap()
        );
    }

    #[test]
    fn test_state_order_does_not_matter() {
        let forward = open(&["A", "B", "C"]);
        let backward = open(&["C", "B", "A"]);
        assert_eq!(
            allocate(&line(1_000), &weighted(), &forward).unwrap(),
            allocate(&line(1_000), &weighted(), &backward).unwrap()
        );
    }
}
