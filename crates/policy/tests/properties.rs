//! Property tests for the allocation engine

use proptest::prelude::*;
use remit_core::{AccountState, BankLine, Currency, Gate};
use remit_policy::{allocate, AllocationError, AllocationResult, Policy};

const MAX_SAFE_INTEGER: i64 = (1 << 53) - 1;

fn arb_amount() -> impl Strategy<Value = i64> {
    prop_oneof![
        Just(0i64),
        Just(1i64),
        Just(MAX_SAFE_INTEGER - 1),
        Just(MAX_SAFE_INTEGER),
        Just(MAX_SAFE_INTEGER + 1),
        Just(i64::MAX),
        0i64..1_000_000,
        0i64..=i64::MAX,
    ]
}

/// `None` means no state is reported for the bucket
fn arb_gate() -> impl Strategy<Value = Option<Gate>> {
    prop_oneof![
        3 => Just(Some(Gate::Open)),
        1 => Just(Some(Gate::Suspended)),
        1 => Just(Some(Gate::Closed)),
        1 => Just(None),
    ]
}

fn arb_weighted() -> impl Strategy<Value = Vec<(u64, Option<Gate>)>> {
    prop::collection::vec((0u64..1_000_000, arb_gate()), 0..8)
}

fn arb_rated() -> impl Strategy<Value = (Vec<(u64, Option<Gate>)>, Option<Gate>)> {
    // at most 5 buckets of at most 2 000 bps keeps the sum within 10 000
    (prop::collection::vec((0u64..=2_000, arb_gate()), 0..6), arb_gate())
}

fn bucket_name(i: usize) -> String {
    format!("B{:02}", i)
}

fn states_for(gates: &[(u64, Option<Gate>)]) -> Vec<AccountState> {
    gates
        .iter()
        .enumerate()
        .filter_map(|(i, (_, gate))| gate.map(|g| AccountState::new(bucket_name(i), g)))
        .collect()
}

fn largest_remainder_policy(buckets: &[(u64, Option<Gate>)], hold: bool) -> Policy {
    let mut builder = Policy::builder("prop", 1);
    for (i, (weight, _)) in buckets.iter().enumerate() {
        builder = builder.bucket(bucket_name(i), *weight);
    }
    let builder = if hold {
        builder.hold("HOLD")
    } else {
        builder.reject_when_closed()
    };
    builder.build().unwrap()
}

fn half_even_policy(buckets: &[(u64, Option<Gate>)]) -> Policy {
    let mut builder = Policy::builder("prop", 1);
    for (i, (bps, _)) in buckets.iter().enumerate() {
        builder = builder.bucket(bucket_name(i), *bps);
    }
    builder.half_even("RESIDUAL").hold("HOLD").build().unwrap()
}

fn line(amount: i64) -> BankLine {
    BankLine::new("bl-prop", "org-prop", amount, Currency::Aud)
}

fn assert_non_gated_zero(result: &AllocationResult, buckets: &[(u64, Option<Gate>)]) {
    for (i, (_, gate)) in buckets.iter().enumerate() {
        if *gate != Some(Gate::Open) {
            let got = result.amount_for(&bucket_name(i)).unwrap().minor_units();
            assert_eq!(got, 0, "bucket {} with gate {:?} received {}", bucket_name(i), gate, got);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(10_000))]

    #[test]
    fn prop_largest_remainder_conserves(amount in arb_amount(), buckets in arb_weighted()) {
        let policy = largest_remainder_policy(&buckets, true);
        let result = allocate(&line(amount), &policy, &states_for(&buckets)).unwrap();
        prop_assert_eq!(result.total_allocated(), Some(amount));
    }

    #[test]
    fn prop_half_even_conserves(amount in arb_amount(), (buckets, residual) in arb_rated()) {
        let policy = half_even_policy(&buckets);
        let mut states = states_for(&buckets);
        if let Some(gate) = residual {
            states.push(AccountState::new("RESIDUAL", gate));
        }
        let result = allocate(&line(amount), &policy, &states).unwrap();
        prop_assert_eq!(result.total_allocated(), Some(amount));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(2_000))]

    #[test]
    fn prop_allocations_non_negative(amount in arb_amount(), buckets in arb_weighted()) {
        let policy = largest_remainder_policy(&buckets, true);
        let result = allocate(&line(amount), &policy, &states_for(&buckets)).unwrap();
        for allocation in &result.allocations {
            prop_assert!(allocation.amount_minor_units.minor_units() >= 0);
        }
    }

    #[test]
    fn prop_closed_buckets_receive_zero(amount in arb_amount(), buckets in arb_weighted()) {
        let policy = largest_remainder_policy(&buckets, true);
        let result = allocate(&line(amount), &policy, &states_for(&buckets)).unwrap();
        assert_non_gated_zero(&result, &buckets);
    }

    #[test]
    fn prop_half_even_closed_buckets_receive_zero(
        amount in arb_amount(),
        (buckets, residual) in arb_rated(),
    ) {
        let policy = half_even_policy(&buckets);
        let mut states = states_for(&buckets);
        if let Some(gate) = residual {
            states.push(AccountState::new("RESIDUAL", gate));
        }
        let result = allocate(&line(amount), &policy, &states).unwrap();
        assert_non_gated_zero(&result, &buckets);
        if residual != Some(Gate::Open) {
            prop_assert_eq!(result.amount_for("RESIDUAL").unwrap().minor_units(), 0);
        }
    }

    #[test]
    fn prop_output_is_byte_identical(amount in arb_amount(), buckets in arb_weighted()) {
        let policy = largest_remainder_policy(&buckets, false);
        let states = states_for(&buckets);
        let first = allocate(&line(amount), &policy, &states);
        let second = allocate(&line(amount), &policy, &states);
        match (first, second) {
            (Ok(a), Ok(b)) => prop_assert_eq!(
                serde_json::to_vec(&a).unwrap(),
                serde_json::to_vec(&b).unwrap()
            ),
            (Err(a), Err(b)) => prop_assert_eq!(a, b),
            _ => prop_assert!(false, "allocate is not deterministic"),
        }
    }

    #[test]
    fn prop_reject_only_without_open_weight(amount in arb_amount(), buckets in arb_weighted()) {
        let policy = largest_remainder_policy(&buckets, false);
        let has_open_weight = buckets
            .iter()
            .any(|(weight, gate)| *weight > 0 && *gate == Some(Gate::Open));

        match allocate(&line(amount), &policy, &states_for(&buckets)) {
            Ok(result) => prop_assert_eq!(result.total_allocated(), Some(amount)),
            Err(AllocationError::NoOpenGates { amount: stranded, .. }) => {
                prop_assert!(!has_open_weight);
                prop_assert!(amount > 0);
                prop_assert_eq!(stranded, amount);
            }
            Err(e) => prop_assert!(false, "unexpected error: {}", e),
        }
    }
}
