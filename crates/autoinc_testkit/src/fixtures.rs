//! Store fixtures.
//!
//! Convenience constructors for counter stores in tests: an in-process
//! table, a durable log in a temporary directory, or a durable log over an
//! in-memory backend whose bytes the test can inspect and break.

use autoinc_core::{
    CounterRecord, CounterStore, DurableCounterStore, MemoryCounterStore, Sequence,
    SequenceConfig, StoreConfig,
};
use autoinc_storage::InMemoryBackend;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// A counter store with automatic cleanup.
pub struct TestStore {
    /// The store instance.
    pub store: Arc<dyn CounterStore>,
    /// The temporary directory (kept alive to prevent cleanup).
    temp_dir: Option<TempDir>,
}

impl TestStore {
    /// Creates an in-memory store.
    pub fn memory() -> Self {
        Self {
            store: Arc::new(MemoryCounterStore::new()),
            temp_dir: None,
        }
    }

    /// Creates an in-memory store holding `records`.
    pub fn seeded(records: impl IntoIterator<Item = CounterRecord>) -> Self {
        Self {
            store: Arc::new(MemoryCounterStore::seeded(records)),
            temp_dir: None,
        }
    }

    /// Creates a durable store in a fresh temporary directory.
    pub fn durable() -> Self {
        Self::durable_with(StoreConfig::new())
    }

    /// Creates a durable store in a fresh temporary directory with `config`.
    pub fn durable_with(config: StoreConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = DurableCounterStore::open(temp_dir.path(), config)
            .expect("Failed to open durable counter store");
        Self {
            store: Arc::new(store),
            temp_dir: Some(temp_dir),
        }
    }

    /// Creates a durable store over an in-memory log. The returned backend
    /// shares its bytes with the store.
    pub fn durable_in_memory() -> (Self, InMemoryBackend) {
        let backend = InMemoryBackend::new();
        let handle = backend.handle();
        let store = DurableCounterStore::with_backend(Box::new(backend), StoreConfig::new())
            .expect("Failed to open in-memory counter log");
        (
            Self {
                store: Arc::new(store),
                temp_dir: None,
            },
            handle,
        )
    }

    /// Closes and reopens a directory-backed store, replaying its log.
    ///
    /// Every other handle on the store must be dropped first.
    pub fn reopen(self) -> Self {
        let temp_dir = self
            .temp_dir
            .expect("Only directory-backed stores can be reopened");
        drop(self.store);
        let store = DurableCounterStore::open(temp_dir.path(), StoreConfig::new())
            .expect("Failed to reopen durable counter store");
        Self {
            store: Arc::new(store),
            temp_dir: Some(temp_dir),
        }
    }

    /// Store directory, if directory-backed.
    pub fn path(&self) -> Option<&Path> {
        self.temp_dir.as_ref().map(TempDir::path)
    }

    /// A shared handle for [`Sequence`] registration.
    pub fn shared(&self) -> Arc<dyn CounterStore> {
        Arc::clone(&self.store)
    }

    /// Registers a sequence, panicking on failure.
    pub fn sequence(&self, config: SequenceConfig) -> Sequence {
        Sequence::register(self.shared(), config).expect("Failed to register sequence")
    }
}

impl std::ops::Deref for TestStore {
    type Target = dyn CounterStore;

    fn deref(&self) -> &Self::Target {
        self.store.as_ref()
    }
}

/// Builds a JSON object record, panicking if `value` is not an object.
pub fn json_record(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("Record must be a JSON object, got {other}"),
    }
}

/// Runs a test with an in-memory store.
pub fn with_memory_store<F, R>(f: F) -> R
where
    F: FnOnce(&TestStore) -> R,
{
    f(&TestStore::memory())
}

/// Runs a test with a durable store in a temporary directory.
pub fn with_durable_store<F, R>(f: F) -> R
where
    F: FnOnce(&TestStore) -> R,
{
    f(&TestStore::durable())
}

/// Runs a test once against each store implementation.
pub fn with_each_store<F>(mut f: F)
where
    F: FnMut(&TestStore),
{
    f(&TestStore::memory());
    f(&TestStore::durable());
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoinc_core::CounterKey;

    #[test]
    fn reopen_replays_counts() {
        let store = TestStore::durable();
        let key = CounterKey::new("Kitten", "_id");
        store.ensure_exists(&key, -1).unwrap();
        store.increment_and_fetch(&key, 1).unwrap();

        let store = store.reopen();
        assert_eq!(store.get(&key).unwrap(), Some(0));
        assert!(store.path().is_some());
    }

    #[test]
    fn in_memory_log_exposes_bytes() {
        let (store, backend) = TestStore::durable_in_memory();
        store
            .ensure_exists(&CounterKey::new("Kitten", "_id"), -1)
            .unwrap();
        assert!(!backend.data().is_empty());
    }
}
