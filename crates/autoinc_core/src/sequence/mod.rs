//! Sequences: per-key registration, readiness and allocation.
//!
//! A [`Sequence`] is the process-local handle onto one counter row. It is
//! created by a registration call, starts `Pending`, and becomes `Ready`
//! once the initialization handshake has confirmed the row exists:
//!
//! ```text
//! register ──► ensure_exists(key, start_at - increment_by) ──► Ready
//!                   │ (duplicate key: another creator won) ──► Ready
//!                   └ (any other error) ─────────────────────► Failed
//! ```
//!
//! Allocation requests that arrive while `Pending` wait in the readiness
//! gate; requests against a `Failed` sequence return
//! [`CoreError::NotInitialized`].

mod readiness;

pub use readiness::Readiness;

use crate::config::{FieldSpec, SequenceConfig};
use crate::error::{CoreError, CoreResult};
use crate::record::SequencedRecord;
use crate::store::CounterStore;
use crate::types::CounterKey;
use readiness::ReadinessFlag;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What the allocation protocol did for one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Allocation {
    /// A fresh value was allocated and should be written to the record.
    Generated(i64),
    /// The record's own value was kept and the watermark reconciled with it.
    Reconciled(i64),
    /// The record was already persisted; nothing happened.
    Skipped,
}

impl Allocation {
    /// The value the record carries after the call, if any.
    #[must_use]
    pub const fn value(self) -> Option<i64> {
        match self {
            Self::Generated(v) | Self::Reconciled(v) => Some(v),
            Self::Skipped => None,
        }
    }
}

struct SequenceState {
    config: SequenceConfig,
    key: CounterKey,
    initial_count: i64,
    store: Arc<dyn CounterStore>,
    readiness: ReadinessFlag,
}

impl SequenceState {
    fn new(store: Arc<dyn CounterStore>, config: SequenceConfig) -> CoreResult<Self> {
        config.validate()?;
        Ok(Self {
            key: config.key(),
            initial_count: config.initial_count()?,
            config,
            store,
            readiness: ReadinessFlag::pending(),
        })
    }

    /// The initialization handshake. A duplicate key is absorbed by
    /// `ensure_exists`; any other failure marks the sequence failed.
    fn initialize(&self) -> CoreResult<bool> {
        match self.store.ensure_exists(&self.key, self.initial_count) {
            Ok(inserted) => {
                if inserted {
                    info!(
                        entity_kind = %self.key.entity_kind,
                        field_name = %self.key.field_name,
                        count = self.initial_count,
                        "counter row created"
                    );
                } else {
                    debug!(counter = %self.key, "counter row already present");
                }
                self.readiness.mark_ready();
                Ok(inserted)
            }
            Err(err) => {
                warn!(counter = %self.key, error = %err, "sequence initialization failed");
                self.readiness.mark_failed(err.to_string());
                Err(err)
            }
        }
    }

    fn allocate(&self) -> CoreResult<i64> {
        self.store
            .increment_and_fetch(&self.key, self.config.increment_by)
    }

    fn reconcile(&self, value: i64) -> CoreResult<()> {
        let moved = self
            .store
            .advance_watermark(&self.key, value, self.config.reconcile_direction())?;
        if moved {
            debug!(counter = %self.key, count = value, "watermark advanced to explicit value");
        }
        Ok(())
    }

    fn prepare(&self, explicit: Option<i64>) -> CoreResult<Allocation> {
        match explicit {
            Some(value) => {
                self.reconcile(value)?;
                Ok(Allocation::Reconciled(value))
            }
            None => self.allocate().map(Allocation::Generated),
        }
    }

    fn peek(&self) -> CoreResult<i64> {
        let Some(count) = self.store.get(&self.key)? else {
            return Ok(self.config.start_at);
        };
        count
            .checked_add(self.config.increment_by)
            .ok_or_else(|| CoreError::CounterOverflow {
                key: self.key.clone(),
                count,
                delta: self.config.increment_by,
            })
    }

    fn reset(&self) -> CoreResult<i64> {
        self.store.reset(&self.key, self.initial_count)?;
        info!(counter = %self.key, start_at = self.config.start_at, "sequence reset");
        Ok(self.config.start_at)
    }
}

/// Handle onto one counter, bound to its config and store.
///
/// Clones share readiness. Every async operation has a `_blocking` twin for
/// callers without a tokio runtime.
///
/// ```rust
/// use autoinc_core::{MemoryCounterStore, Sequence, SequenceConfig};
/// use std::sync::Arc;
///
/// let store = Arc::new(MemoryCounterStore::new());
/// let seq = Sequence::register(store, SequenceConfig::new("Invoice").start_at(100).increment_by(2)).unwrap();
/// assert_eq!(seq.allocate_next_blocking().unwrap(), 100);
/// assert_eq!(seq.allocate_next_blocking().unwrap(), 102);
/// ```
#[derive(Clone)]
pub struct Sequence {
    state: Arc<SequenceState>,
}

/// Runs the initialization handshake for a pending [`Sequence`].
///
/// Dropping it unrun fails the sequence, so callers waiting on readiness
/// get [`CoreError::NotInitialized`] instead of polling forever.
pub struct Initializer {
    state: Option<Arc<SequenceState>>,
}

impl Initializer {
    /// Performs the handshake. Returns whether this call created the row.
    ///
    /// # Errors
    ///
    /// Returns the store error that kept the row from being confirmed; the
    /// sequence is then `Failed`.
    pub fn run(mut self) -> CoreResult<bool> {
        match self.state.take() {
            Some(state) => state.initialize(),
            None => Ok(false),
        }
    }
}

impl Drop for Initializer {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            state
                .readiness
                .mark_failed("initializer dropped before it ran");
        }
    }
}

impl std::fmt::Debug for Initializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Initializer")
            .field("key", &self.state.as_ref().map(|s| &s.key))
            .finish()
    }
}

impl Sequence {
    /// Validates `config`, runs the handshake on the calling thread, and
    /// returns a ready handle.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] for bad settings and the store
    /// error when the row cannot be confirmed.
    pub fn register(store: Arc<dyn CounterStore>, config: SequenceConfig) -> CoreResult<Self> {
        let (sequence, initializer) = Self::pending(store, config)?;
        initializer.run()?;
        Ok(sequence)
    }

    /// Like [`register`](Self::register) with the store call on the
    /// blocking pool.
    ///
    /// # Errors
    ///
    /// As for [`register`](Self::register).
    pub async fn register_async(
        store: Arc<dyn CounterStore>,
        config: SequenceConfig,
    ) -> CoreResult<Self> {
        let (sequence, initializer) = Self::pending(store, config)?;
        tokio::task::spawn_blocking(move || initializer.run())
            .await
            .map_err(|e| CoreError::unavailable(format!("initialization task failed: {e}")))??;
        Ok(sequence)
    }

    /// Returns a pending handle and the initializer that will make it ready.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] for bad settings.
    pub fn pending(
        store: Arc<dyn CounterStore>,
        config: SequenceConfig,
    ) -> CoreResult<(Self, Initializer)> {
        let state = Arc::new(SequenceState::new(store, config)?);
        let initializer = Initializer {
            state: Some(Arc::clone(&state)),
        };
        Ok((Self { state }, initializer))
    }

    /// Returns a pending handle immediately and runs the handshake on the
    /// current tokio runtime's blocking pool.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] for bad settings and
    /// [`CoreError::NoRuntime`] outside a tokio runtime.
    pub fn spawn(
        store: Arc<dyn CounterStore>,
        config: SequenceConfig,
    ) -> CoreResult<(Self, JoinHandle<CoreResult<bool>>)> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| CoreError::NoRuntime {
                message: e.to_string(),
            })?;
        let (sequence, initializer) = Self::pending(store, config)?;
        let task = runtime.spawn_blocking(move || initializer.run());
        Ok((sequence, task))
    }

    /// The sequence's settings.
    #[must_use]
    pub fn config(&self) -> &SequenceConfig {
        &self.state.config
    }

    /// Counter key.
    #[must_use]
    pub fn key(&self) -> &CounterKey {
        &self.state.key
    }

    /// The field declaration a schema layer should apply.
    #[must_use]
    pub fn field_spec(&self) -> FieldSpec {
        self.state.config.field_spec()
    }

    /// True once the counter row is confirmed.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state.readiness.is_ready()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn readiness(&self) -> Readiness {
        self.state.readiness.snapshot()
    }

    /// Waits in the readiness gate.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotInitialized`] if initialization failed.
    pub async fn wait_ready(&self) -> CoreResult<()> {
        self.state
            .readiness
            .wait(&self.state.key, self.state.config.poll_interval)
            .await
    }

    /// Blocking twin of [`wait_ready`](Self::wait_ready).
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotInitialized`] if initialization failed.
    pub fn wait_ready_blocking(&self) -> CoreResult<()> {
        self.state
            .readiness
            .wait_blocking(&self.state.key, self.state.config.poll_interval)
    }

    async fn run<T, F>(&self, op: F) -> CoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&SequenceState) -> CoreResult<T> + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        tokio::task::spawn_blocking(move || op(&state))
            .await
            .map_err(|e| CoreError::unavailable(format!("counter store task failed: {e}")))?
    }

    /// Allocates the next value: one atomic increment-and-fetch.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotInitialized`], [`CoreError::MissingCounterRow`],
    /// [`CoreError::CounterOverflow`] or the store's error.
    pub async fn allocate_next(&self) -> CoreResult<i64> {
        self.wait_ready().await?;
        self.run(SequenceState::allocate).await
    }

    /// Pulls the watermark forward to an explicitly supplied value so later
    /// allocations never collide with it: the count becomes
    /// `max(count, value)`. A value behind the watermark leaves it
    /// unchanged. With [`SequenceConfig::reconcile_by_direction`] a
    /// descending sequence keeps `min(count, value)` instead.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotInitialized`], [`CoreError::MissingCounterRow`]
    /// or the store's error.
    pub async fn reconcile(&self, value: i64) -> CoreResult<()> {
        self.wait_ready().await?;
        self.run(move |state| state.reconcile(value)).await
    }

    /// The allocation protocol: reconcile `explicit` when present, otherwise
    /// allocate.
    ///
    /// # Errors
    ///
    /// As for [`allocate_next`](Self::allocate_next) and
    /// [`reconcile`](Self::reconcile).
    pub async fn prepare(&self, explicit: Option<i64>) -> CoreResult<Allocation> {
        self.wait_ready().await?;
        self.run(move |state| state.prepare(explicit)).await
    }

    /// Applies the allocation protocol to a record about to be persisted for
    /// the first time. Generated values are written onto the record; records
    /// that are not new are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidFieldValue`] when the field holds a number
    /// that is not an integer, plus the errors of [`prepare`](Self::prepare).
    /// The record is left untouched on error.
    pub async fn prepare_record<R>(&self, record: &mut R) -> CoreResult<Allocation>
    where
        R: SequencedRecord + ?Sized,
    {
        if !record.is_new() {
            return Ok(Allocation::Skipped);
        }
        let field = &self.state.config.field_name;
        let explicit = record.sequence_value(field)?;
        let allocation = self.prepare(explicit).await?;
        if let Allocation::Generated(value) = allocation {
            record.set_sequence_value(field, value);
        }
        Ok(allocation)
    }

    /// Estimate of the next value: `count + increment_by`, or `start_at` if
    /// the row does not exist yet. Not a reservation; a concurrent
    /// allocation may take this value first.
    ///
    /// # Errors
    ///
    /// Returns the store's error.
    pub async fn peek_next(&self) -> CoreResult<i64> {
        self.run(SequenceState::peek).await
    }

    /// Rewrites the counter to `start_at - increment_by` and returns
    /// `start_at`. Meant for administrative re-seeding.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotInitialized`] or the store's error.
    pub async fn reset_sequence(&self) -> CoreResult<i64> {
        self.wait_ready().await?;
        self.run(SequenceState::reset).await
    }

    /// Blocking twin of [`allocate_next`](Self::allocate_next).
    ///
    /// # Errors
    ///
    /// As for [`allocate_next`](Self::allocate_next).
    pub fn allocate_next_blocking(&self) -> CoreResult<i64> {
        self.wait_ready_blocking()?;
        self.state.allocate()
    }

    /// Blocking twin of [`reconcile`](Self::reconcile).
    ///
    /// # Errors
    ///
    /// As for [`reconcile`](Self::reconcile).
    pub fn reconcile_blocking(&self, value: i64) -> CoreResult<()> {
        self.wait_ready_blocking()?;
        self.state.reconcile(value)
    }

    /// Blocking twin of [`prepare`](Self::prepare).
    ///
    /// # Errors
    ///
    /// As for [`prepare`](Self::prepare).
    pub fn prepare_blocking(&self, explicit: Option<i64>) -> CoreResult<Allocation> {
        self.wait_ready_blocking()?;
        self.state.prepare(explicit)
    }

    /// Blocking twin of [`prepare_record`](Self::prepare_record).
    ///
    /// # Errors
    ///
    /// As for [`prepare_record`](Self::prepare_record).
    pub fn prepare_record_blocking<R>(&self, record: &mut R) -> CoreResult<Allocation>
    where
        R: SequencedRecord + ?Sized,
    {
        if !record.is_new() {
            return Ok(Allocation::Skipped);
        }
        let field = &self.state.config.field_name;
        let explicit = record.sequence_value(field)?;
        let allocation = self.prepare_blocking(explicit)?;
        if let Allocation::Generated(value) = allocation {
            record.set_sequence_value(field, value);
        }
        Ok(allocation)
    }

    /// Blocking twin of [`peek_next`](Self::peek_next).
    ///
    /// # Errors
    ///
    /// Returns the store's error.
    pub fn peek_next_blocking(&self) -> CoreResult<i64> {
        self.state.peek()
    }

    /// Blocking twin of [`reset_sequence`](Self::reset_sequence).
    ///
    /// # Errors
    ///
    /// As for [`reset_sequence`](Self::reset_sequence).
    pub fn reset_sequence_blocking(&self) -> CoreResult<i64> {
        self.wait_ready_blocking()?;
        self.state.reset()
    }
}

impl std::fmt::Debug for Sequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sequence")
            .field("key", &self.state.key)
            .field("start_at", &self.state.config.start_at)
            .field("increment_by", &self.state.config.increment_by)
            .field("readiness", &self.readiness())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryCounterStore;
    use crate::types::CounterRecord;
    use serde_json::{json, Map, Value};
    use std::time::Duration;

    fn store() -> Arc<MemoryCounterStore> {
        Arc::new(MemoryCounterStore::new())
    }

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    #[test]
    fn register_creates_row_at_start_minus_increment() {
        let store = store();
        let seq = Sequence::register(
            store.clone(),
            SequenceConfig::new("Invoice").start_at(100).increment_by(2),
        )
        .unwrap();

        assert!(seq.is_ready());
        assert_eq!(seq.readiness(), Readiness::Ready);
        assert_eq!(store.get(seq.key()).unwrap(), Some(98));
    }

    #[test]
    fn register_rejects_bad_config() {
        let err = Sequence::register(store(), SequenceConfig::new("A").increment_by(0)).unwrap_err();
        assert!(matches!(err, CoreError::InvalidConfig { .. }));
    }

    #[test]
    fn sequential_allocations_step_by_increment() {
        let seq = Sequence::register(store(), SequenceConfig::new("Kitten")).unwrap();
        assert_eq!(seq.allocate_next_blocking().unwrap(), 0);
        assert_eq!(seq.allocate_next_blocking().unwrap(), 1);
    }

    #[test]
    fn descending_sequence_reconciles_to_the_larger_value() {
        let store = store();
        let seq = Sequence::register(
            store.clone(),
            SequenceConfig::new("Countdown").start_at(10).increment_by(-1),
        )
        .unwrap();
        assert_eq!(seq.allocate_next_blocking().unwrap(), 10);

        seq.reconcile_blocking(50).unwrap();
        assert_eq!(store.get(seq.key()).unwrap(), Some(50));
        seq.reconcile_blocking(5).unwrap();
        assert_eq!(store.get(seq.key()).unwrap(), Some(50));
        assert_eq!(seq.allocate_next_blocking().unwrap(), 49);
    }

    #[test]
    fn direction_aware_reconcile_is_opt_in() {
        let seq = Sequence::register(
            store(),
            SequenceConfig::new("Countdown")
                .start_at(10)
                .increment_by(-1)
                .reconcile_by_direction(true),
        )
        .unwrap();
        assert_eq!(seq.allocate_next_blocking().unwrap(), 10);
        assert_eq!(seq.allocate_next_blocking().unwrap(), 9);

        seq.reconcile_blocking(5).unwrap();
        assert_eq!(seq.allocate_next_blocking().unwrap(), 4);
        seq.reconcile_blocking(8).unwrap();
        assert_eq!(seq.allocate_next_blocking().unwrap(), 3);
    }

    #[test]
    fn prepare_picks_path_by_explicit_value() {
        let seq = Sequence::register(store(), SequenceConfig::new("Kitten")).unwrap();
        assert_eq!(seq.prepare_blocking(None).unwrap(), Allocation::Generated(0));
        assert_eq!(
            seq.prepare_blocking(Some(10)).unwrap(),
            Allocation::Reconciled(10)
        );
        assert_eq!(seq.prepare_blocking(None).unwrap(), Allocation::Generated(11));
    }

    #[test]
    fn prepare_record_writes_generated_value() {
        let seq = Sequence::register(store(), SequenceConfig::new("Kitten")).unwrap();
        let mut silence = object(json!({ "name": "Silence" }));
        let mut fluffy = object(json!({ "name": "fluffy" }));

        assert_eq!(
            seq.prepare_record_blocking(&mut silence).unwrap(),
            Allocation::Generated(0)
        );
        assert_eq!(
            seq.prepare_record_blocking(&mut fluffy).unwrap(),
            Allocation::Generated(1)
        );
        assert_eq!(silence["_id"], json!(0));
        assert_eq!(fluffy["_id"], json!(1));
    }

    #[test]
    fn prepare_record_keeps_explicit_value() {
        let seq = Sequence::register(
            store(),
            SequenceConfig::new("Invoice").field("number"),
        )
        .unwrap();
        let mut invoice = object(json!({ "number": 41 }));

        assert_eq!(
            seq.prepare_record_blocking(&mut invoice).unwrap(),
            Allocation::Reconciled(41)
        );
        assert_eq!(invoice["number"], json!(41));
        assert_eq!(seq.allocate_next_blocking().unwrap(), 42);
    }

    #[test]
    fn fractional_value_aborts_without_touching_counter() {
        let store = store();
        let seq = Sequence::register(store.clone(), SequenceConfig::new("Kitten")).unwrap();
        let mut doc = object(json!({ "_id": 2.5 }));

        let err = seq.prepare_record_blocking(&mut doc).unwrap_err();
        assert!(matches!(err, CoreError::InvalidFieldValue { .. }));
        assert_eq!(store.get(seq.key()).unwrap(), Some(-1));
        assert_eq!(doc["_id"], json!(2.5));
    }

    #[test]
    fn peek_estimates_without_mutating() {
        let store = store();
        let (seq, init) = Sequence::pending(
            store.clone(),
            SequenceConfig::new("Invoice").start_at(100).increment_by(2),
        )
        .unwrap();

        assert_eq!(seq.peek_next_blocking().unwrap(), 100);
        init.run().unwrap();
        seq.allocate_next_blocking().unwrap();
        assert_eq!(seq.peek_next_blocking().unwrap(), 102);
        assert_eq!(seq.peek_next_blocking().unwrap(), 102);
        assert_eq!(store.get(seq.key()).unwrap(), Some(100));
    }

    #[test]
    fn reset_returns_start_and_reseeds() {
        let seq = Sequence::register(
            store(),
            SequenceConfig::new("Invoice").start_at(100).increment_by(2),
        )
        .unwrap();
        for _ in 0..5 {
            seq.allocate_next_blocking().unwrap();
        }
        assert_eq!(seq.reset_sequence_blocking().unwrap(), 100);
        assert_eq!(seq.allocate_next_blocking().unwrap(), 100);
    }

    #[test]
    fn dropped_initializer_fails_sequence() {
        let (seq, init) = Sequence::pending(store(), SequenceConfig::new("Kitten")).unwrap();
        drop(init);

        assert!(matches!(seq.readiness(), Readiness::Failed(_)));
        assert!(matches!(
            seq.allocate_next_blocking(),
            Err(CoreError::NotInitialized { .. })
        ));
    }

    #[test]
    fn existing_row_wins_over_start_at() {
        let store = Arc::new(MemoryCounterStore::seeded([CounterRecord::new(
            CounterKey::new("Invoice", "_id"),
            10_000,
        )]));
        let (seq, init) = Sequence::pending(
            store,
            SequenceConfig::new("Invoice").start_at(100).increment_by(2),
        )
        .unwrap();
        assert!(!init.run().unwrap());
        assert_eq!(seq.allocate_next_blocking().unwrap(), 10_002);
    }

    #[tokio::test]
    async fn allocation_waits_for_pending_initialization() {
        let (seq, init) = Sequence::pending(
            store(),
            SequenceConfig::new("Kitten").poll_interval(Duration::from_millis(1)),
        )
        .unwrap();

        let early = {
            let seq = seq.clone();
            tokio::spawn(async move { seq.allocate_next().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!early.is_finished());

        init.run().unwrap();
        assert_eq!(early.await.unwrap().unwrap(), 0);
    }

    #[tokio::test]
    async fn spawned_initialization_becomes_ready() {
        let (seq, task) = Sequence::spawn(store(), SequenceConfig::new("Kitten")).unwrap();
        assert_eq!(seq.allocate_next().await.unwrap(), 0);
        assert!(task.await.unwrap().unwrap());
        assert!(seq.is_ready());
    }

    #[tokio::test]
    async fn async_operations_match_blocking_ones() {
        let seq = Sequence::register_async(
            store(),
            SequenceConfig::new("Invoice").start_at(100).increment_by(2),
        )
        .await
        .unwrap();

        assert_eq!(seq.allocate_next().await.unwrap(), 100);
        seq.reconcile(200).await.unwrap();
        assert_eq!(seq.peek_next().await.unwrap(), 202);
        assert_eq!(seq.prepare(None).await.unwrap(), Allocation::Generated(202));

        let mut doc = serde_json::Map::new();
        assert_eq!(
            seq.prepare_record(&mut doc).await.unwrap(),
            Allocation::Generated(204)
        );
        assert_eq!(seq.reset_sequence().await.unwrap(), 100);
    }

    #[test]
    fn allocation_value_accessor() {
        assert_eq!(Allocation::Generated(3).value(), Some(3));
        assert_eq!(Allocation::Reconciled(7).value(), Some(7));
        assert_eq!(Allocation::Skipped.value(), None);
    }
}
