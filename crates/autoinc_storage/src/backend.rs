//! The backend trait.

use crate::error::StorageResult;

/// An append-only byte store.
///
/// The durable counter log writes one frame per counter mutation with
/// [`append`](Self::append), replays the whole log on open with
/// [`read_to_end`](Self::read_to_end), and cuts a torn trailing frame off
/// with [`truncate`](Self::truncate).
///
/// # Invariants
///
/// - `append` returns the offset of the first written byte, which equals
///   `size()` before the call
/// - bytes returned by `read_at` are exactly the bytes appended there
/// - after `sync` returns, every appended byte survives a crash
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::OutOfBounds`] when the range is not
    /// fully inside the store.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends `data` and returns the offset it was written at.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Pushes buffered writes to the operating system.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Makes every appended byte, and the store's length, durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Current length in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the length cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Shrinks the store to `new_size` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::TruncateBeyondEnd`] when `new_size` is
    /// larger than the current size.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Reads the whole store.
    ///
    /// # Errors
    ///
    /// Returns an error if the size or the read fails.
    fn read_to_end(&self) -> StorageResult<Vec<u8>> {
        let size = self.size()?;
        let len = usize::try_from(size).map_err(|_| {
            crate::StorageError::unavailable(format!("store of {size} bytes does not fit in memory"))
        })?;
        self.read_at(0, len)
    }

    /// Returns true when nothing has been appended.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.size()? == 0)
    }
}
