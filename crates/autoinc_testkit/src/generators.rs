//! Property-based test generators using proptest.

use autoinc_core::CounterKey;
use proptest::prelude::*;

/// Strategy for counter keys with identifier-like names.
pub fn counter_key_strategy() -> impl Strategy<Value = CounterKey> {
    (
        prop::string::string_regex("[A-Z][a-zA-Z0-9]{0,15}").expect("Invalid regex"),
        prop_oneof![
            Just("_id".to_string()),
            prop::string::string_regex("[a-z][a-z_]{0,15}").expect("Invalid regex"),
        ],
    )
        .prop_map(|(kind, field)| CounterKey::new(kind, field))
}

/// Strategy for non-zero increments of either sign.
pub fn increment_strategy() -> impl Strategy<Value = i64> {
    prop_oneof![1i64..=100, -100i64..=-1]
}

/// Strategy for start values far from the `i64` bounds.
pub fn start_at_strategy() -> impl Strategy<Value = i64> {
    -1_000_000i64..=1_000_000
}

/// One step of a record-save workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceOp {
    /// Save a record without a value.
    Allocate,
    /// Save a record that already carries this value.
    Reconcile(i64),
}

/// Strategy for interleaved allocate/reconcile workloads.
pub fn op_sequence_strategy(max_len: usize) -> impl Strategy<Value = Vec<SequenceOp>> {
    prop::collection::vec(
        prop_oneof![
            3 => Just(SequenceOp::Allocate),
            1 => (-2_000_000i64..=2_000_000).prop_map(SequenceOp::Reconcile),
        ],
        0..=max_len,
    )
}
