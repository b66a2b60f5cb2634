//! Fault injection.
//!
//! [`FaultyStore`] wraps a counter store and fails chosen primitives with
//! [`CoreError::StoreUnavailable`] on demand. It can also stage the race in
//! which another process creates the counter row between our existence check
//! and our insert.

use autoinc_core::{
    CoreError, CoreResult, CounterKey, CounterRecord, CounterStore, Direction,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// A counter store primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    /// `insert` (and so `ensure_exists`).
    Insert,
    /// `get`.
    Get,
    /// `increment_and_fetch`.
    Increment,
    /// `advance_watermark`.
    Advance,
    /// `reset`.
    Reset,
    /// `records`.
    Records,
}

const PRIMITIVES: usize = 6;

impl Primitive {
    const fn index(self) -> usize {
        match self {
            Self::Insert => 0,
            Self::Get => 1,
            Self::Increment => 2,
            Self::Advance => 3,
            Self::Reset => 4,
            Self::Records => 5,
        }
    }
}

/// Wraps a store and injects failures.
pub struct FaultyStore {
    inner: Arc<dyn CounterStore>,
    failing: [AtomicBool; PRIMITIVES],
    calls: [AtomicUsize; PRIMITIVES],
    insert_race: AtomicBool,
}

impl FaultyStore {
    /// Wraps `inner` with no faults armed.
    pub fn new(inner: Arc<dyn CounterStore>) -> Self {
        Self {
            inner,
            failing: Default::default(),
            calls: Default::default(),
            insert_race: AtomicBool::new(false),
        }
    }

    /// Makes every call to `primitive` fail until healed.
    pub fn fail(&self, primitive: Primitive) {
        self.failing[primitive.index()].store(true, Ordering::SeqCst);
    }

    /// Stops failing `primitive`.
    pub fn heal(&self, primitive: Primitive) {
        self.failing[primitive.index()].store(false, Ordering::SeqCst);
    }

    /// Stops all failures.
    pub fn heal_all(&self) {
        for flag in &self.failing {
            flag.store(false, Ordering::SeqCst);
        }
    }

    /// On the next insert, the row is created "by someone else" first, so
    /// our insert sees a duplicate key.
    pub fn inject_insert_race(&self) {
        self.insert_race.store(true, Ordering::SeqCst);
    }

    /// How many times `primitive` was called, including failed calls.
    pub fn calls(&self, primitive: Primitive) -> usize {
        self.calls[primitive.index()].load(Ordering::SeqCst)
    }

    fn enter(&self, primitive: Primitive) -> CoreResult<()> {
        self.calls[primitive.index()].fetch_add(1, Ordering::SeqCst);
        if self.failing[primitive.index()].load(Ordering::SeqCst) {
            return Err(CoreError::unavailable(format!(
                "injected {primitive:?} failure"
            )));
        }
        Ok(())
    }
}

impl CounterStore for FaultyStore {
    fn insert(&self, record: CounterRecord) -> CoreResult<()> {
        self.enter(Primitive::Insert)?;
        if self.insert_race.swap(false, Ordering::SeqCst) {
            self.inner.insert(record.clone())?;
        }
        self.inner.insert(record)
    }

    fn get(&self, key: &CounterKey) -> CoreResult<Option<i64>> {
        self.enter(Primitive::Get)?;
        self.inner.get(key)
    }

    fn increment_and_fetch(&self, key: &CounterKey, delta: i64) -> CoreResult<i64> {
        self.enter(Primitive::Increment)?;
        self.inner.increment_and_fetch(key, delta)
    }

    fn advance_watermark(
        &self,
        key: &CounterKey,
        candidate: i64,
        direction: Direction,
    ) -> CoreResult<bool> {
        self.enter(Primitive::Advance)?;
        self.inner.advance_watermark(key, candidate, direction)
    }

    fn reset(&self, key: &CounterKey, new_count: i64) -> CoreResult<()> {
        self.enter(Primitive::Reset)?;
        self.inner.reset(key, new_count)
    }

    fn records(&self) -> CoreResult<Vec<CounterRecord>> {
        self.enter(Primitive::Records)?;
        self.inner.records()
    }
}
