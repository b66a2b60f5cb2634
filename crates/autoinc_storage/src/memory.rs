//! In-memory backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A backend that keeps its bytes in a shared buffer.
///
/// Clones made with [`handle`](Self::handle) see the same bytes, which lets
/// a test drop a counter store and reopen a new one over the same log as if
/// the process had restarted. [`close`](Self::close) makes every handle fail
/// with [`StorageError::Closed`] until [`reopen`](Self::reopen) is called.
///
/// ```rust
/// use autoinc_storage::{InMemoryBackend, StorageBackend};
///
/// let mut first = InMemoryBackend::new();
/// first.append(b"abc").unwrap();
/// let second = first.handle();
/// assert_eq!(second.size().unwrap(), 3);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    bytes: Arc<RwLock<Vec<u8>>>,
    closed: Arc<AtomicBool>,
}

impl InMemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend preloaded with `bytes`.
    #[must_use]
    pub fn with_data(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::new(RwLock::new(bytes)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns another handle onto the same buffer.
    #[must_use]
    pub fn handle(&self) -> Self {
        Self {
            bytes: Arc::clone(&self.bytes),
            closed: Arc::clone(&self.closed),
        }
    }

    /// Copies the current contents out.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.bytes.read().clone()
    }

    /// Makes every handle fail until [`reopen`](Self::reopen).
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Undoes [`close`](Self::close).
    pub fn reopen(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }

    fn check_open(&self) -> StorageResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.check_open()?;
        let bytes = self.bytes.read();
        let size = bytes.len() as u64;
        let end = offset.saturating_add(len as u64);
        if end > size {
            return Err(StorageError::OutOfBounds { offset, len, size });
        }
        Ok(bytes[offset as usize..end as usize].to_vec())
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        self.check_open()?;
        let mut bytes = self.bytes.write();
        let offset = bytes.len() as u64;
        bytes.extend_from_slice(data);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.check_open()
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.check_open()
    }

    fn size(&self) -> StorageResult<u64> {
        self.check_open()?;
        Ok(self.bytes.read().len() as u64)
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.check_open()?;
        let mut bytes = self.bytes.write();
        let size = bytes.len() as u64;
        if new_size > size {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_size,
                size,
            });
        }
        bytes.truncate(new_size as usize);
        Ok(())
    }
}
