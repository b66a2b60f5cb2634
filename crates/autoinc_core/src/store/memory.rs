//! In-process counter store.

use super::table::CounterTable;
use super::CounterStore;
use crate::error::CoreResult;
use crate::types::{CounterKey, CounterRecord, Direction};
use parking_lot::Mutex;

/// A counter store held in memory.
///
/// Every primitive runs inside one critical section, which gives the same
/// atomicity a strongly consistent database gives its conditional updates.
/// Share it between sequences with an `Arc`.
///
/// ```rust
/// use autoinc_core::{CounterKey, CounterStore, MemoryCounterStore};
///
/// let store = MemoryCounterStore::new();
/// let key = CounterKey::new("Kitten", "_id");
/// assert!(store.ensure_exists(&key, -1).unwrap());
/// assert!(!store.ensure_exists(&key, -1).unwrap());
/// assert_eq!(store.increment_and_fetch(&key, 1).unwrap(), 0);
/// ```
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    table: Mutex<CounterTable>,
}

impl MemoryCounterStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store with pre-existing rows.
    #[must_use]
    pub fn seeded(records: impl IntoIterator<Item = CounterRecord>) -> Self {
        let mut table = CounterTable::default();
        for record in records {
            table.set(&record.key, record.count);
        }
        Self {
            table: Mutex::new(table),
        }
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    /// True when no row exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CounterStore for MemoryCounterStore {
    fn insert(&self, record: CounterRecord) -> CoreResult<()> {
        let mut table = self.table.lock();
        table.plan_insert(&record.key)?;
        table.set(&record.key, record.count);
        Ok(())
    }

    fn get(&self, key: &CounterKey) -> CoreResult<Option<i64>> {
        Ok(self.table.lock().get(key))
    }

    fn increment_and_fetch(&self, key: &CounterKey, delta: i64) -> CoreResult<i64> {
        let mut table = self.table.lock();
        let count = table.plan_increment(key, delta)?;
        table.set(key, count);
        Ok(count)
    }

    fn advance_watermark(
        &self,
        key: &CounterKey,
        candidate: i64,
        direction: Direction,
    ) -> CoreResult<bool> {
        let mut table = self.table.lock();
        match table.plan_advance(key, candidate, direction)? {
            Some(count) => {
                table.set(key, count);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn reset(&self, key: &CounterKey, new_count: i64) -> CoreResult<()> {
        let mut table = self.table.lock();
        table.plan_reset(key)?;
        table.set(key, new_count);
        Ok(())
    }

    fn records(&self) -> CoreResult<Vec<CounterRecord>> {
        Ok(self.table.lock().records())
    }
}
