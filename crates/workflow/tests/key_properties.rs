//! Property tests for effect idempotency keys.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use std::collections::HashSet;

use jetstream_workflow::{InstanceId, RunId, effect_key, rng_seed};
use proptest::prelude::*;

proptest! {
    #[test]
    fn prop_key_is_stable_for_same_call(journey in "[A-Z]{1,3}-[0-9]{1,4}", seq in 1u64..10_000, name in "[a-z_]{1,20}") {
        let id = InstanceId::journey(&journey);
        let run = RunId::new();
        let first = effect_key(&id, run, seq, &name).ok();
        let second = effect_key(&id, run, seq, &name).ok();
        prop_assert!(first.is_some());
        prop_assert_eq!(first, second);
    }

    #[test]
    fn prop_keys_of_one_run_are_distinct(count in 1u64..200) {
        let id = InstanceId::journey("J-001");
        let run = RunId::new();
        let keys: HashSet<_> = (1..=count)
            .filter_map(|seq| effect_key(&id, run, seq, "publish_transition").ok())
            .collect();
        prop_assert_eq!(keys.len() as u64, count);
    }

    #[test]
    fn prop_seed_separates_instances(a in "[A-Z]{2}[0-9]{1,4}", b in "[A-Z]{2}[0-9]{1,4}") {
        prop_assume!(a != b);
        let run = RunId::new();
        let left = rng_seed(&InstanceId::journey(&a), run);
        let right = rng_seed(&InstanceId::journey(&b), run);
        prop_assert_ne!(left, right);
    }
}
