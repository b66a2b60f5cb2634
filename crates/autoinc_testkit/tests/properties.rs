//! Property tests for the allocation protocol.

use autoinc_core::{
    CounterKey, CounterRecord, CounterStore, Direction, MemoryCounterStore, SequenceConfig,
};
use autoinc_testkit::prelude::*;
use proptest::prelude::*;
use std::collections::HashSet;

proptest! {
    #[test]
    fn reconcile_leaves_max_of_count_and_value(
        key in counter_key_strategy(),
        count in -1_000_000i64..1_000_000,
        value in -1_000_000i64..1_000_000,
    ) {
        let store = MemoryCounterStore::seeded([CounterRecord::new(key.clone(), count)]);
        let moved = store.advance_watermark_if_behind(&key, value).unwrap();

        prop_assert_eq!(store.get(&key).unwrap(), Some(count.max(value)));
        prop_assert_eq!(moved, value > count);
    }

    #[test]
    fn reconcile_keeps_max_and_allocate_steps(
        start in start_at_strategy(),
        step in increment_strategy(),
        ops in op_sequence_strategy(64),
    ) {
        let store = TestStore::memory();
        let seq = store.sequence(SequenceConfig::new("Prop").start_at(start).increment_by(step));
        let mut previous = store.get(seq.key()).unwrap().unwrap();

        for op in ops {
            let expected = match op {
                SequenceOp::Allocate => {
                    let value = seq.allocate_next_blocking().unwrap();
                    prop_assert_eq!(value, previous + step);
                    value
                }
                SequenceOp::Reconcile(value) => {
                    seq.reconcile_blocking(value).unwrap();
                    previous.max(value)
                }
            };
            let current = store.get(seq.key()).unwrap().unwrap();
            prop_assert_eq!(current, expected);
            if step > 0 {
                prop_assert!(current >= previous);
            }
            previous = current;
        }
    }

    #[test]
    fn direction_aware_reconcile_never_regresses(
        start in start_at_strategy(),
        step in increment_strategy(),
        ops in op_sequence_strategy(64),
    ) {
        let store = TestStore::memory();
        let seq = store.sequence(
            SequenceConfig::new("Prop")
                .start_at(start)
                .increment_by(step)
                .reconcile_by_direction(true),
        );
        let direction = Direction::of_increment(step);
        let mut previous = store.get(seq.key()).unwrap().unwrap();

        for op in ops {
            match op {
                SequenceOp::Allocate => {
                    seq.allocate_next_blocking().unwrap();
                }
                SequenceOp::Reconcile(value) => seq.reconcile_blocking(value).unwrap(),
            }
            let current = store.get(seq.key()).unwrap().unwrap();
            prop_assert!(current == previous || direction.is_ahead(current, previous));
            previous = current;
        }
    }

    #[test]
    fn allocations_never_repeat_or_hit_explicit_values(
        ops in op_sequence_strategy(64),
    ) {
        let store = TestStore::memory();
        let seq = store.sequence(SequenceConfig::new("Prop"));
        let mut allocated = HashSet::new();
        let mut explicit_ahead = HashSet::new();

        for op in ops {
            match op {
                SequenceOp::Allocate => {
                    let value = seq.allocate_next_blocking().unwrap();
                    prop_assert!(allocated.insert(value));
                    prop_assert!(!explicit_ahead.contains(&value));
                }
                SequenceOp::Reconcile(value) => {
                    let before = store.get(seq.key()).unwrap().unwrap();
                    seq.reconcile_blocking(value).unwrap();
                    if value > before {
                        explicit_ahead.insert(value);
                    }
                }
            }
        }
    }

    #[test]
    fn peek_predicts_next_allocation(
        start in start_at_strategy(),
        step in increment_strategy(),
        warmup in 0usize..16,
    ) {
        let store = TestStore::memory();
        let seq = store.sequence(SequenceConfig::new("Prop").start_at(start).increment_by(step));
        for _ in 0..warmup {
            seq.allocate_next_blocking().unwrap();
        }
        let predicted = seq.peek_next_blocking().unwrap();
        prop_assert_eq!(seq.allocate_next_blocking().unwrap(), predicted);
    }

    #[test]
    fn key_display_joins_kind_and_field(key in counter_key_strategy()) {
        prop_assert_eq!(
            key.to_string(),
            format!("{}.{}", key.entity_kind, key.field_name)
        );
        prop_assert_eq!(CounterKey::new(key.entity_kind.clone(), key.field_name.clone()), key);
    }
}
