//! Sequence and store configuration.

use crate::error::{CoreError, CoreResult};
use crate::types::{CounterKey, Direction};
use std::time::Duration;

/// Field numbered when no field is configured. It is the record's primary
/// key and therefore unique without an extra index.
pub const PRIMARY_KEY_FIELD: &str = "_id";

/// Delay between readiness polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Settings for one sequence.
///
/// Process-local; only the counter row it points at is shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceConfig {
    /// Record type the sequence numbers.
    pub entity_kind: String,
    /// Field the sequence writes.
    pub field_name: String,
    /// First value handed out by a fresh counter.
    pub start_at: i64,
    /// Step between values. Never zero; negative for descending sequences.
    pub increment_by: i64,
    /// Whether the host should declare the field unique.
    pub enforce_uniqueness: bool,
    /// How long the readiness gate sleeps between polls.
    pub poll_interval: Duration,
    /// Reconcile along the sequence's direction instead of always keeping
    /// the larger value. Only changes anything for negative increments.
    pub reconcile_by_direction: bool,
}

impl SequenceConfig {
    /// Creates a config for `entity_kind` numbering [`PRIMARY_KEY_FIELD`]
    /// from 0 in steps of 1.
    pub fn new(entity_kind: impl Into<String>) -> Self {
        Self {
            entity_kind: entity_kind.into(),
            field_name: PRIMARY_KEY_FIELD.to_string(),
            start_at: 0,
            increment_by: 1,
            enforce_uniqueness: true,
            poll_interval: DEFAULT_POLL_INTERVAL,
            reconcile_by_direction: false,
        }
    }

    /// Sets the field to number.
    #[must_use]
    pub fn field(mut self, field_name: impl Into<String>) -> Self {
        self.field_name = field_name.into();
        self
    }

    /// Sets the first value.
    #[must_use]
    pub const fn start_at(mut self, start_at: i64) -> Self {
        self.start_at = start_at;
        self
    }

    /// Sets the step.
    #[must_use]
    pub const fn increment_by(mut self, increment_by: i64) -> Self {
        self.increment_by = increment_by;
        self
    }

    /// Sets whether the field should be declared unique.
    #[must_use]
    pub const fn enforce_uniqueness(mut self, value: bool) -> Self {
        self.enforce_uniqueness = value;
        self
    }

    /// Sets the readiness poll interval.
    #[must_use]
    pub const fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Makes reconcile keep the lower value for descending sequences.
    #[must_use]
    pub const fn reconcile_by_direction(mut self, value: bool) -> Self {
        self.reconcile_by_direction = value;
        self
    }

    /// Counter key this sequence is bound to.
    #[must_use]
    pub fn key(&self) -> CounterKey {
        CounterKey::new(self.entity_kind.clone(), self.field_name.clone())
    }

    /// Direction implied by `increment_by`.
    #[must_use]
    pub const fn direction(&self) -> Direction {
        Direction::of_increment(self.increment_by)
    }

    /// Direction reconcile moves the watermark in: ascending (keep the
    /// larger value) unless [`reconcile_by_direction`](Self::reconcile_by_direction)
    /// is set.
    #[must_use]
    pub const fn reconcile_direction(&self) -> Direction {
        if self.reconcile_by_direction {
            self.direction()
        } else {
            Direction::Ascending
        }
    }

    /// Watermark of a fresh counter: `start_at - increment_by`, so the first
    /// allocation yields `start_at`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] when the subtraction overflows.
    pub fn initial_count(&self) -> CoreResult<i64> {
        self.start_at.checked_sub(self.increment_by).ok_or_else(|| {
            CoreError::invalid_config(format!(
                "start_at {} minus increment_by {} overflows",
                self.start_at, self.increment_by
            ))
        })
    }

    /// Checks the settings.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] for an empty kind or field, a
    /// zero increment, a zero poll interval, or an overflowing initial count.
    pub fn validate(&self) -> CoreResult<()> {
        if self.entity_kind.is_empty() {
            return Err(CoreError::invalid_config("entity_kind must be set"));
        }
        if self.field_name.is_empty() {
            return Err(CoreError::invalid_config("field_name must be set"));
        }
        if self.increment_by == 0 {
            return Err(CoreError::invalid_config("increment_by must not be zero"));
        }
        if self.poll_interval.is_zero() {
            return Err(CoreError::invalid_config("poll_interval must not be zero"));
        }
        self.initial_count()?;
        Ok(())
    }

    /// Field declaration the host schema should add for this sequence.
    #[must_use]
    pub fn field_spec(&self) -> FieldSpec {
        FieldSpec {
            name: self.field_name.clone(),
            unique: self.enforce_uniqueness && self.field_name != PRIMARY_KEY_FIELD,
            required: true,
        }
    }
}

/// How the host should declare the numbered field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    /// Field name.
    pub name: String,
    /// Whether to add a unique index. Always false for the primary key,
    /// which is unique already.
    pub unique: bool,
    /// The field always carries a value once persisted.
    pub required: bool,
}

/// Settings for a [`crate::DurableCounterStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Create the store directory when it does not exist.
    pub create_if_missing: bool,
    /// Sync the log after every frame.
    pub sync_on_write: bool,
    /// Compact once this many frames were appended since the last
    /// compaction (0 = never).
    pub compact_after: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sync_on_write: true,
            compact_after: 4096,
        }
    }
}

impl StoreConfig {
    /// Creates the default config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create a missing directory.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to sync after each frame.
    #[must_use]
    pub const fn sync_on_write(mut self, value: bool) -> Self {
        self.sync_on_write = value;
        self
    }

    /// Sets the automatic compaction threshold.
    #[must_use]
    pub const fn compact_after(mut self, frames: usize) -> Self {
        self.compact_after = frames;
        self
    }
}
