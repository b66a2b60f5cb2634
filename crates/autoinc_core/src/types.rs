//! Counter keys, records and sequence direction.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one counter: the record type and the field it numbers.
///
/// At most one counter row exists per key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CounterKey {
    /// Logical record type the counter belongs to.
    pub entity_kind: String,
    /// Field on that record type the counter drives.
    pub field_name: String,
}

impl CounterKey {
    /// Creates a key.
    pub fn new(entity_kind: impl Into<String>, field_name: impl Into<String>) -> Self {
        Self {
            entity_kind: entity_kind.into(),
            field_name: field_name.into(),
        }
    }
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.entity_kind, self.field_name)
    }
}

/// A persisted counter row.
///
/// `count` is the watermark: the last value considered issued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterRecord {
    /// Counter identity.
    pub key: CounterKey,
    /// Current watermark.
    pub count: i64,
}

impl CounterRecord {
    /// Creates a record.
    #[must_use]
    pub fn new(key: CounterKey, count: i64) -> Self {
        Self { key, count }
    }
}

/// Which way a sequence moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Positive increment; the watermark only grows.
    Ascending,
    /// Negative increment; the watermark only shrinks.
    Descending,
}

impl Direction {
    /// Direction implied by an increment. Zero counts as ascending; configs
    /// reject it before it gets here.
    #[must_use]
    pub const fn of_increment(increment_by: i64) -> Self {
        if increment_by < 0 {
            Self::Descending
        } else {
            Self::Ascending
        }
    }

    /// True when `candidate` is further along the sequence than `current`.
    #[must_use]
    pub const fn is_ahead(self, candidate: i64, current: i64) -> bool {
        match self {
            Self::Ascending => candidate > current,
            Self::Descending => candidate < current,
        }
    }
}
