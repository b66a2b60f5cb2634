//! Counter stores.
//!
//! A counter store is a table of [`CounterRecord`]s keyed by
//! `(entity_kind, field_name)`. Every primitive below is a single atomic
//! operation: implementations must never expose a read-then-write window
//! in which two callers observe the same count.

mod durable;
pub(crate) mod frame;
mod memory;
mod table;

pub use durable::{DurableCounterStore, LogStats};
pub use frame::{FrameKind, FRAME_MAGIC, FRAME_VERSION};
pub use memory::MemoryCounterStore;

use crate::error::CoreResult;
use crate::types::{CounterKey, CounterRecord, Direction};

/// Atomic operations over the shared counter table.
///
/// # Invariants
///
/// - at most one row per [`CounterKey`]
/// - `increment_and_fetch` and `advance_watermark` are each one atomic
///   step; concurrent callers are totally ordered by the store
/// - a failed operation leaves the row unchanged
pub trait CounterStore: Send + Sync {
    /// Creates a row.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::DuplicateKey`] when a row for the key
    /// already exists.
    fn insert(&self, record: CounterRecord) -> CoreResult<()>;

    /// Creates the row unless it exists. Returns whether this call inserted.
    ///
    /// A concurrent creator winning the race is reported as `Ok(false)`,
    /// never as an error.
    ///
    /// # Errors
    ///
    /// Propagates every error from [`insert`](Self::insert) other than
    /// [`crate::CoreError::DuplicateKey`].
    fn ensure_exists(&self, key: &CounterKey, initial_count: i64) -> CoreResult<bool> {
        match self.insert(CounterRecord::new(key.clone(), initial_count)) {
            Ok(()) => Ok(true),
            Err(err) if err.is_duplicate_key() => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Reads the current count without modifying it.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn get(&self, key: &CounterKey) -> CoreResult<Option<i64>>;

    /// Adds `delta` to the count and returns the new count.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::MissingCounterRow`] when no row exists and
    /// [`crate::CoreError::CounterOverflow`] when the sum does not fit.
    fn increment_and_fetch(&self, key: &CounterKey, delta: i64) -> CoreResult<i64>;

    /// Moves the count to `candidate` when `candidate` is ahead of it in
    /// `direction`. Returns whether the row moved.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::MissingCounterRow`] when no row exists.
    fn advance_watermark(
        &self,
        key: &CounterKey,
        candidate: i64,
        direction: Direction,
    ) -> CoreResult<bool>;

    /// Sets `count := candidate` only if `count < candidate`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::MissingCounterRow`] when no row exists.
    fn advance_watermark_if_behind(&self, key: &CounterKey, candidate: i64) -> CoreResult<bool> {
        self.advance_watermark(key, candidate, Direction::Ascending)
    }

    /// Overwrites the count.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::MissingCounterRow`] when no row exists.
    fn reset(&self, key: &CounterKey, new_count: i64) -> CoreResult<()>;

    /// Every row, sorted by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn records(&self) -> CoreResult<Vec<CounterRecord>>;
}
