//! The counter table shared by every store implementation.
//!
//! Each `plan_*` method validates a mutation and returns the count the row
//! should hold afterwards without touching the table, so a durable store can
//! log the new value before applying it.

use crate::error::{CoreError, CoreResult};
use crate::types::{CounterKey, CounterRecord, Direction};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub(crate) struct CounterTable {
    rows: HashMap<CounterKey, i64>,
}

impl CounterTable {
    pub(crate) fn get(&self, key: &CounterKey) -> Option<i64> {
        self.rows.get(key).copied()
    }

    pub(crate) fn len(&self) -> usize {
        self.rows.len()
    }

    pub(crate) fn set(&mut self, key: &CounterKey, count: i64) {
        match self.rows.get_mut(key) {
            Some(slot) => *slot = count,
            None => {
                self.rows.insert(key.clone(), count);
            }
        }
    }

    fn current(&self, key: &CounterKey) -> CoreResult<i64> {
        self.get(key)
            .ok_or_else(|| CoreError::MissingCounterRow { key: key.clone() })
    }

    pub(crate) fn plan_insert(&self, key: &CounterKey) -> CoreResult<()> {
        if self.rows.contains_key(key) {
            return Err(CoreError::DuplicateKey { key: key.clone() });
        }
        Ok(())
    }

    pub(crate) fn plan_increment(&self, key: &CounterKey, delta: i64) -> CoreResult<i64> {
        let count = self.current(key)?;
        count.checked_add(delta).ok_or_else(|| CoreError::CounterOverflow {
            key: key.clone(),
            count,
            delta,
        })
    }

    /// `Some(candidate)` when the row should move, `None` when it is already
    /// at or past the candidate.
    pub(crate) fn plan_advance(
        &self,
        key: &CounterKey,
        candidate: i64,
        direction: Direction,
    ) -> CoreResult<Option<i64>> {
        let count = self.current(key)?;
        Ok(direction.is_ahead(candidate, count).then_some(candidate))
    }

    pub(crate) fn plan_reset(&self, key: &CounterKey) -> CoreResult<()> {
        self.current(key).map(|_| ())
    }

    /// Rows sorted by key.
    pub(crate) fn records(&self) -> Vec<CounterRecord> {
        let mut records: Vec<_> = self
            .rows
            .iter()
            .map(|(key, count)| CounterRecord::new(key.clone(), *count))
            .collect();
        records.sort_by(|a, b| a.key.cmp(&b.key));
        records
    }
}
