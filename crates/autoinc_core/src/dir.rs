//! Store directory layout and locking.
//!
//! ```text
//! <store_path>/
//! ├─ LOCK                   # advisory lock, one owning process
//! ├─ counters.log           # counter log
//! └─ counters.log.compact   # compaction output, renamed over counters.log
//! ```

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const LOG_FILE: &str = "counters.log";
const COMPACT_FILE: &str = "counters.log.compact";

/// An opened, exclusively locked store directory.
///
/// The lock is released when the value is dropped.
#[derive(Debug)]
pub struct StoreDir {
    path: PathBuf,
    _lock_file: File,
}

impl StoreDir {
    /// Opens `path` and takes its lock.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] when the directory is missing and
    /// `create_if_missing` is false or the path is not a directory,
    /// [`CoreError::StoreLocked`] when another process holds the lock, and
    /// [`CoreError::StoreUnavailable`] on I/O failure.
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if !create_if_missing {
                return Err(CoreError::invalid_config(format!(
                    "store directory does not exist: {}",
                    path.display()
                )));
            }
            fs::create_dir_all(path)?;
        }
        if !path.is_dir() {
            return Err(CoreError::invalid_config(format!(
                "store path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::StoreLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the counter log.
    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.path.join(LOG_FILE)
    }

    /// Path compaction writes to before the rename.
    #[must_use]
    pub fn compact_path(&self) -> PathBuf {
        self.path.join(COMPACT_FILE)
    }

    /// True when no counter log has been written yet.
    #[must_use]
    pub fn is_new_store(&self) -> bool {
        !self.log_path().exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_missing_directory() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("counters");

        let dir = StoreDir::open(&path, true).unwrap();
        assert!(path.is_dir());
        assert!(path.join("LOCK").exists());
        assert!(dir.is_new_store());
        assert_eq!(dir.log_path(), path.join("counters.log"));
    }

    #[test]
    fn missing_directory_without_create_fails() {
        let temp = tempdir().unwrap();
        let result = StoreDir::open(&temp.path().join("absent"), false);
        assert!(matches!(result, Err(CoreError::InvalidConfig { .. })));
    }

    #[test]
    fn second_open_is_locked_out() {
        let temp = tempdir().unwrap();
        let _first = StoreDir::open(temp.path(), true).unwrap();
        assert!(matches!(
            StoreDir::open(temp.path(), true),
            Err(CoreError::StoreLocked)
        ));
    }

    #[test]
    fn lock_released_on_drop() {
        let temp = tempdir().unwrap();
        drop(StoreDir::open(temp.path(), true).unwrap());
        assert!(StoreDir::open(temp.path(), true).is_ok());
    }

    #[test]
    fn file_path_is_rejected() {
        let temp = tempdir().unwrap();
        let file = temp.path().join("plain");
        fs::write(&file, b"x").unwrap();
        assert!(matches!(
            StoreDir::open(&file, true),
            Err(CoreError::InvalidConfig { .. })
        ));
    }
}
