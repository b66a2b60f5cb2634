//! Counter store made durable by an append-only log.

use super::frame::{encode_frame, scan_frames, FrameKind};
use super::table::CounterTable;
use super::CounterStore;
use crate::config::StoreConfig;
use crate::dir::StoreDir;
use crate::error::{CoreError, CoreResult};
use crate::types::{CounterKey, CounterRecord, Direction};
use autoinc_storage::{FileBackend, StorageBackend, StorageResult};
use parking_lot::Mutex;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// A counter store whose rows survive restarts.
///
/// Rows live in memory; every mutation first appends a frame to the log
/// (syncing it when [`StoreConfig::sync_on_write`] is set) and only then
/// changes the row. A write that fails leaves the row as it was.
///
/// On open the log is replayed, and an unfinished trailing frame from a
/// crash is cut off.
///
/// If a failed write cannot be rolled back, or a failed compaction cannot
/// put the previous log back, the store is poisoned: reads keep working and
/// every later mutation returns [`CoreError::StoreUnavailable`] until the
/// store is reopened.
///
/// ```rust
/// use autoinc_core::{CounterKey, CounterStore, DurableCounterStore, StoreConfig};
/// use autoinc_storage::InMemoryBackend;
///
/// let log = InMemoryBackend::new();
/// let key = CounterKey::new("Invoice", "number");
/// {
///     let store = DurableCounterStore::with_backend(Box::new(log.handle()), StoreConfig::default()).unwrap();
///     store.ensure_exists(&key, 0).unwrap();
///     store.increment_and_fetch(&key, 1).unwrap();
/// }
/// let reopened = DurableCounterStore::with_backend(Box::new(log.handle()), StoreConfig::default()).unwrap();
/// assert_eq!(reopened.get(&key).unwrap(), Some(1));
/// ```
pub struct DurableCounterStore {
    config: StoreConfig,
    dir: Option<StoreDir>,
    created: bool,
    state: Mutex<LogState>,
}

struct LogState {
    backend: Box<dyn StorageBackend>,
    table: CounterTable,
    frames_since_compaction: usize,
    poisoned: Option<String>,
}

impl LogState {
    fn ensure_writable(&self) -> CoreResult<()> {
        match &self.poisoned {
            Some(reason) => Err(CoreError::unavailable(format!(
                "counter log refuses writes until reopened: {reason}"
            ))),
            None => Ok(()),
        }
    }

    fn poison(&mut self, reason: String) {
        warn!(reason = %reason, "counter log poisoned");
        self.poisoned = Some(reason);
    }
}

/// Replaces the whole content of `backend` with `bytes`.
fn rewrite(backend: &mut dyn StorageBackend, bytes: &[u8]) -> StorageResult<()> {
    backend.truncate(0)?;
    backend.append(bytes)?;
    backend.sync()
}

/// Size of the log and its table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogStats {
    /// Number of counter rows.
    pub counters: usize,
    /// Log length in bytes.
    pub log_bytes: u64,
    /// Frames appended since the log was last compacted.
    pub frames_since_compaction: usize,
}

impl DurableCounterStore {
    /// Opens the store directory at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::StoreLocked`] when another process owns the
    /// directory, and replay errors when the log is damaged.
    pub fn open(path: &Path, config: StoreConfig) -> CoreResult<Self> {
        let dir = StoreDir::open(path, config.create_if_missing)?;
        let created = dir.is_new_store();
        if created {
            info!(path = %dir.path().display(), "creating counter log");
        }
        let backend = FileBackend::open(&dir.log_path())?;
        let mut store = Self::with_backend(Box::new(backend), config)?;
        store.dir = Some(dir);
        store.created = created;
        Ok(store)
    }

    /// Opens a store over an arbitrary backend, replaying whatever it holds.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::LogCorruption`] or
    /// [`crate::CoreError::ChecksumMismatch`] for a damaged log and
    /// [`crate::CoreError::StoreUnavailable`] when the backend fails.
    pub fn with_backend(mut backend: Box<dyn StorageBackend>, config: StoreConfig) -> CoreResult<Self> {
        let bytes = backend.read_to_end()?;
        let scan = scan_frames(&bytes)?;
        if scan.torn_bytes > 0 {
            warn!(
                valid_len = scan.valid_len,
                torn_bytes = scan.torn_bytes,
                "truncating unfinished frame at end of counter log"
            );
            backend.truncate(scan.valid_len)?;
        }

        let mut table = CounterTable::default();
        for frame in &scan.frames {
            table.set(&frame.record.key, frame.record.count);
        }
        info!(
            counters = table.len(),
            frames = scan.frames.len(),
            "counter log recovered"
        );

        Ok(Self {
            config,
            dir: None,
            created: false,
            state: Mutex::new(LogState {
                backend,
                table,
                frames_since_compaction: scan.frames.len(),
                poisoned: None,
            }),
        })
    }

    /// Directory the store was opened from, if any.
    #[must_use]
    pub fn dir(&self) -> Option<&StoreDir> {
        self.dir.as_ref()
    }

    /// True when [`DurableCounterStore::open`] found no counter log and
    /// started a new one.
    #[must_use]
    pub fn was_created(&self) -> bool {
        self.created
    }

    /// True once a failed write left the log in a state this handle can no
    /// longer append to safely.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.state.lock().poisoned.is_some()
    }

    /// Current log statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend size cannot be read.
    pub fn stats(&self) -> CoreResult<LogStats> {
        let state = self.state.lock();
        Ok(LogStats {
            counters: state.table.len(),
            log_bytes: state.backend.size()?,
            frames_since_compaction: state.frames_since_compaction,
        })
    }

    /// Rewrites the log as one frame per counter.
    ///
    /// # Errors
    ///
    /// Returns an error if writing or renaming the compacted log fails. The
    /// previous log is kept, or restored; if restoring it fails too the store
    /// is poisoned.
    pub fn compact(&self) -> CoreResult<()> {
        let mut state = self.state.lock();
        self.compact_locked(&mut state)
    }

    fn compact_locked(&self, state: &mut LogState) -> CoreResult<()> {
        state.ensure_writable()?;
        let records = state.table.records();
        let mut image = Vec::new();
        for record in &records {
            image.extend(encode_frame(FrameKind::Set, record)?);
        }
        let before = state.backend.size()?;

        match &self.dir {
            Some(dir) => {
                let staged = dir.compact_path();
                if staged.exists() {
                    fs::remove_file(&staged)?;
                }
                {
                    let mut out = FileBackend::open(&staged)?;
                    out.append(&image)?;
                    out.sync()?;
                }
                fs::rename(&staged, dir.log_path())?;
                match FileBackend::open(&dir.log_path()) {
                    Ok(backend) => state.backend = Box::new(backend),
                    Err(err) => {
                        state.poison(format!("compacted log could not be reopened: {err}"));
                        return Err(err.into());
                    }
                }
            }
            None => {
                let previous = state.backend.read_to_end()?;
                if let Err(err) = rewrite(state.backend.as_mut(), &image) {
                    if let Err(restore) = rewrite(state.backend.as_mut(), &previous) {
                        state.poison(format!(
                            "compaction failed ({err}) and the previous log could not be restored ({restore})"
                        ));
                    }
                    return Err(err.into());
                }
            }
        }

        state.frames_since_compaction = records.len();
        info!(
            counters = records.len(),
            before_bytes = before,
            after_bytes = image.len(),
            "counter log compacted"
        );
        Ok(())
    }

    /// Appends one frame. On failure the log is cut back to its previous
    /// length so a half-written frame never precedes later ones; if that cut
    /// fails the store is poisoned.
    fn log(&self, state: &mut LogState, kind: FrameKind, key: &CounterKey, count: i64) -> CoreResult<()> {
        state.ensure_writable()?;
        let frame = encode_frame(kind, &CounterRecord::new(key.clone(), count))?;
        let before = state.backend.size()?;

        let written = state.backend.append(&frame).and_then(|_| {
            if self.config.sync_on_write {
                state.backend.sync()
            } else {
                state.backend.flush()
            }
        });
        if let Err(err) = written {
            if let Err(rollback) = state.backend.truncate(before) {
                state.poison(format!(
                    "write failed ({err}) and the log could not be cut back to {before} bytes ({rollback})"
                ));
            }
            return Err(err.into());
        }

        state.frames_since_compaction += 1;
        Ok(())
    }

    fn maybe_compact(&self, state: &mut LogState) {
        let threshold = self.config.compact_after;
        if threshold == 0 || state.frames_since_compaction < threshold.max(state.table.len() * 2) {
            return;
        }
        if let Err(err) = self.compact_locked(state) {
            warn!(error = %err, "automatic counter log compaction failed");
        }
    }

    fn write(&self, state: &mut LogState, kind: FrameKind, key: &CounterKey, count: i64) -> CoreResult<()> {
        self.log(state, kind, key, count)?;
        state.table.set(key, count);
        self.maybe_compact(state);
        // A compaction that poisoned the log may have taken this frame with it.
        state.ensure_writable()
    }
}

impl CounterStore for DurableCounterStore {
    fn insert(&self, record: CounterRecord) -> CoreResult<()> {
        let mut state = self.state.lock();
        state.table.plan_insert(&record.key)?;
        self.write(&mut state, FrameKind::Insert, &record.key, record.count)?;
        debug!(counter = %record.key, count = record.count, "counter row inserted");
        Ok(())
    }

    fn get(&self, key: &CounterKey) -> CoreResult<Option<i64>> {
        Ok(self.state.lock().table.get(key))
    }

    fn increment_and_fetch(&self, key: &CounterKey, delta: i64) -> CoreResult<i64> {
        let mut state = self.state.lock();
        let count = state.table.plan_increment(key, delta)?;
        self.write(&mut state, FrameKind::Set, key, count)?;
        Ok(count)
    }

    fn advance_watermark(
        &self,
        key: &CounterKey,
        candidate: i64,
        direction: Direction,
    ) -> CoreResult<bool> {
        let mut state = self.state.lock();
        match state.table.plan_advance(key, candidate, direction)? {
            Some(count) => {
                self.write(&mut state, FrameKind::Set, key, count)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn reset(&self, key: &CounterKey, new_count: i64) -> CoreResult<()> {
        let mut state = self.state.lock();
        state.table.plan_reset(key)?;
        self.write(&mut state, FrameKind::Set, key, new_count)
    }

    fn records(&self) -> CoreResult<Vec<CounterRecord>> {
        Ok(self.state.lock().table.records())
    }
}

impl std::fmt::Debug for DurableCounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableCounterStore")
            .field("config", &self.config)
            .field("dir", &self.dir.as_ref().map(StoreDir::path))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use autoinc_storage::{InMemoryBackend, StorageError};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn key() -> CounterKey {
        CounterKey::new("Invoice", "number")
    }

    fn open(log: &InMemoryBackend, config: StoreConfig) -> DurableCounterStore {
        DurableCounterStore::with_backend(Box::new(log.handle()), config).unwrap()
    }

    /// Failure switches shared between a test and its [`ScriptedBackend`].
    #[derive(Default)]
    struct Faults {
        fail_append_after_truncate: AtomicBool,
        fail_once: AtomicBool,
        truncated: AtomicBool,
        partial_append: AtomicBool,
        fail_truncate: AtomicBool,
    }

    /// An in-memory log that misbehaves on command.
    struct ScriptedBackend {
        inner: InMemoryBackend,
        faults: Arc<Faults>,
    }

    impl ScriptedBackend {
        fn boxed(log: &InMemoryBackend, faults: &Arc<Faults>) -> Box<dyn StorageBackend> {
            Box::new(Self {
                inner: log.handle(),
                faults: Arc::clone(faults),
            })
        }
    }

    impl StorageBackend for ScriptedBackend {
        fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
            self.inner.read_at(offset, len)
        }

        fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
            let f = &self.faults;
            if f.fail_append_after_truncate.load(Ordering::SeqCst)
                && f.truncated.load(Ordering::SeqCst)
            {
                if f.fail_once.load(Ordering::SeqCst) {
                    f.fail_append_after_truncate.store(false, Ordering::SeqCst);
                }
                return Err(StorageError::unavailable("append after truncate refused"));
            }
            if f.partial_append.load(Ordering::SeqCst) {
                self.inner.append(&data[..data.len() / 2])?;
                return Err(StorageError::unavailable("short write"));
            }
            self.inner.append(data)
        }

        fn flush(&mut self) -> StorageResult<()> {
            self.inner.flush()
        }

        fn sync(&mut self) -> StorageResult<()> {
            self.inner.sync()
        }

        fn size(&self) -> StorageResult<u64> {
            self.inner.size()
        }

        fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
            if self.faults.fail_truncate.load(Ordering::SeqCst) {
                return Err(StorageError::unavailable("truncate refused"));
            }
            self.faults.truncated.store(true, Ordering::SeqCst);
            self.inner.truncate(new_size)
        }
    }

    fn seeded_log(faults: &Arc<Faults>) -> (InMemoryBackend, DurableCounterStore) {
        let log = InMemoryBackend::new();
        let store = DurableCounterStore::with_backend(
            ScriptedBackend::boxed(&log, faults),
            StoreConfig::new().compact_after(0),
        )
        .unwrap();
        store.ensure_exists(&key(), -1).unwrap();
        for _ in 0..5 {
            store.increment_and_fetch(&key(), 1).unwrap();
        }
        (log, store)
    }

    #[test]
    fn failed_compaction_restores_previous_log() {
        let faults = Arc::new(Faults::default());
        let (log, store) = seeded_log(&faults);
        let before = log.data();

        faults.fail_once.store(true, Ordering::SeqCst);
        faults.fail_append_after_truncate.store(true, Ordering::SeqCst);
        assert!(store.compact().unwrap_err().is_store_unavailable());

        assert_eq!(log.data(), before);
        assert!(!store.is_poisoned());
        assert_eq!(store.increment_and_fetch(&key(), 1).unwrap(), 5);

        drop(store);
        let store = open(&log, StoreConfig::default());
        assert_eq!(store.get(&key()).unwrap(), Some(5));
    }

    #[test]
    fn unrecoverable_compaction_poisons_store() {
        let faults = Arc::new(Faults::default());
        let (_log, store) = seeded_log(&faults);

        faults.fail_append_after_truncate.store(true, Ordering::SeqCst);
        assert!(store.compact().is_err());
        assert!(store.is_poisoned());

        faults.fail_append_after_truncate.store(false, Ordering::SeqCst);
        assert!(store.increment_and_fetch(&key(), 1).unwrap_err().is_store_unavailable());
        assert!(store.reset(&key(), -1).unwrap_err().is_store_unavailable());
        assert!(store.compact().unwrap_err().is_store_unavailable());
        assert_eq!(store.get(&key()).unwrap(), Some(4));
    }

    #[test]
    fn failed_rollback_poisons_store_and_keeps_log_readable() {
        let faults = Arc::new(Faults::default());
        let (log, store) = seeded_log(&faults);

        faults.partial_append.store(true, Ordering::SeqCst);
        faults.fail_truncate.store(true, Ordering::SeqCst);
        assert!(store.increment_and_fetch(&key(), 1).unwrap_err().is_store_unavailable());
        assert!(store.is_poisoned());

        faults.partial_append.store(false, Ordering::SeqCst);
        faults.fail_truncate.store(false, Ordering::SeqCst);
        assert!(store.increment_and_fetch(&key(), 1).unwrap_err().is_store_unavailable());
        assert_eq!(store.get(&key()).unwrap(), Some(4));

        drop(store);
        let store = open(&log, StoreConfig::default());
        assert_eq!(store.get(&key()).unwrap(), Some(4));
        assert!(!store.is_poisoned());
    }

    #[test]
    fn short_write_is_rolled_back() {
        let faults = Arc::new(Faults::default());
        let (log, store) = seeded_log(&faults);
        let before = log.data();

        faults.partial_append.store(true, Ordering::SeqCst);
        assert!(store.increment_and_fetch(&key(), 1).is_err());
        assert_eq!(log.data(), before);
        assert!(!store.is_poisoned());

        faults.partial_append.store(false, Ordering::SeqCst);
        assert_eq!(store.increment_and_fetch(&key(), 1).unwrap(), 5);
    }

    #[test]
    fn counts_survive_reopen() {
        let log = InMemoryBackend::new();
        {
            let store = open(&log, StoreConfig::default());
            store.ensure_exists(&key(), 98).unwrap();
            assert_eq!(store.increment_and_fetch(&key(), 2).unwrap(), 100);
            assert_eq!(store.increment_and_fetch(&key(), 2).unwrap(), 102);
        }

        let store = open(&log, StoreConfig::default());
        assert_eq!(store.get(&key()).unwrap(), Some(102));
        assert_eq!(store.increment_and_fetch(&key(), 2).unwrap(), 104);
    }

    #[test]
    fn duplicate_insert_writes_nothing() {
        let log = InMemoryBackend::new();
        let store = open(&log, StoreConfig::default());
        store.ensure_exists(&key(), 0).unwrap();
        let size = log.data().len();

        assert!(!store.ensure_exists(&key(), 7).unwrap());
        assert_eq!(log.data().len(), size);
    }

    #[test]
    fn unchanged_advance_writes_nothing() {
        let log = InMemoryBackend::new();
        let store = open(&log, StoreConfig::default());
        store.ensure_exists(&key(), 102).unwrap();
        let size = log.data().len();

        assert!(!store.advance_watermark_if_behind(&key(), 50).unwrap());
        assert_eq!(log.data().len(), size);
    }

    #[test]
    fn failed_write_leaves_row_unchanged() {
        let log = InMemoryBackend::new();
        let store = open(&log, StoreConfig::default());
        store.ensure_exists(&key(), 0).unwrap();

        log.close();
        let err = store.increment_and_fetch(&key(), 1).unwrap_err();
        assert!(err.is_store_unavailable());
        log.reopen();

        assert_eq!(store.get(&key()).unwrap(), Some(0));
        assert_eq!(store.increment_and_fetch(&key(), 1).unwrap(), 1);
    }

    #[test]
    fn torn_tail_is_truncated_on_open() {
        let log = InMemoryBackend::new();
        {
            let store = open(&log, StoreConfig::default());
            store.ensure_exists(&key(), 0).unwrap();
            store.increment_and_fetch(&key(), 1).unwrap();
        }
        let good = log.data();
        let mut torn = good.clone();
        torn.extend_from_slice(&b"ACTR\x01\x00\x02"[..]);
        let log = InMemoryBackend::with_data(torn);

        let store = open(&log, StoreConfig::default());
        assert_eq!(store.get(&key()).unwrap(), Some(1));
        assert_eq!(log.data(), good);
    }

    #[test]
    fn corrupt_frame_refuses_to_open() {
        let log = InMemoryBackend::new();
        {
            let store = open(&log, StoreConfig::default());
            store.ensure_exists(&key(), 0).unwrap();
        }
        let mut bytes = log.data();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;

        let result = DurableCounterStore::with_backend(
            Box::new(InMemoryBackend::with_data(bytes)),
            StoreConfig::default(),
        );
        assert!(matches!(result, Err(CoreError::ChecksumMismatch { .. })));
    }

    #[test]
    fn compaction_keeps_counts_and_shrinks_log() {
        let log = InMemoryBackend::new();
        let store = open(&log, StoreConfig::new().compact_after(0));
        store.ensure_exists(&key(), 0).unwrap();
        for _ in 0..50 {
            store.increment_and_fetch(&key(), 1).unwrap();
        }
        let before = store.stats().unwrap();
        assert_eq!(before.frames_since_compaction, 51);

        store.compact().unwrap();
        let after = store.stats().unwrap();
        assert!(after.log_bytes < before.log_bytes);
        assert_eq!(after.frames_since_compaction, 1);

        drop(store);
        let store = open(&log, StoreConfig::default());
        assert_eq!(store.get(&key()).unwrap(), Some(50));
    }

    #[test]
    fn automatic_compaction_bounds_log() {
        let log = InMemoryBackend::new();
        let store = open(&log, StoreConfig::new().compact_after(16));
        store.ensure_exists(&key(), 0).unwrap();
        for _ in 0..100 {
            store.increment_and_fetch(&key(), 1).unwrap();
        }
        assert!(store.stats().unwrap().frames_since_compaction < 16);
        assert_eq!(store.get(&key()).unwrap(), Some(100));
    }

    #[test]
    fn directory_store_round_trip_and_compaction() {
        let temp = tempdir().unwrap();
        {
            let store = DurableCounterStore::open(temp.path(), StoreConfig::default()).unwrap();
            assert!(store.was_created());
            store.ensure_exists(&key(), -1).unwrap();
            store.increment_and_fetch(&key(), 1).unwrap();
            store.increment_and_fetch(&key(), 1).unwrap();
            store.compact().unwrap();
            store.increment_and_fetch(&key(), 1).unwrap();
            assert!(!temp.path().join("counters.log.compact").exists());
        }

        let store = DurableCounterStore::open(temp.path(), StoreConfig::default()).unwrap();
        assert!(!store.was_created());
        assert_eq!(store.get(&key()).unwrap(), Some(2));
        assert_eq!(store.records().unwrap().len(), 1);
    }

    #[test]
    fn directory_is_exclusive() {
        let temp = tempdir().unwrap();
        let _store = DurableCounterStore::open(temp.path(), StoreConfig::default()).unwrap();
        assert!(matches!(
            DurableCounterStore::open(temp.path(), StoreConfig::default()),
            Err(CoreError::StoreLocked)
        ));
    }
}
