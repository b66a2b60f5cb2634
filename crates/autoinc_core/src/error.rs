//! Error types for autoinc core.

use crate::types::CounterKey;
use autoinc_storage::StorageError;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by counter stores and sequences.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The sequence's counter row could not be confirmed to exist.
    ///
    /// Raised when allocation is attempted on a sequence whose
    /// initialization failed. Never retried.
    #[error("sequence {key} is not initialized: {reason}")]
    NotInitialized {
        /// Counter the sequence is bound to.
        key: CounterKey,
        /// Why initialization did not complete.
        reason: String,
    },

    /// The underlying store failed or could not be reached.
    #[error("counter store unavailable: {0}")]
    StoreUnavailable(#[from] StorageError),

    /// An operation that needs a counter row found none.
    #[error("no counter row for {key}")]
    MissingCounterRow {
        /// The key that was looked up.
        key: CounterKey,
    },

    /// A counter row for this key already exists.
    #[error("counter row for {key} already exists")]
    DuplicateKey {
        /// The conflicting key.
        key: CounterKey,
    },

    /// Applying the increment would overflow the counter.
    #[error("counter {key} overflows: {count} + {delta}")]
    CounterOverflow {
        /// Counter that would overflow.
        key: CounterKey,
        /// Stored count.
        count: i64,
        /// Requested delta.
        delta: i64,
    },

    /// Sequence settings are unusable.
    #[error("invalid sequence config: {message}")]
    InvalidConfig {
        /// What is wrong.
        message: String,
    },

    /// A record carries a value that cannot be a sequence value.
    #[error("field {field} holds {value}, which is not an integer sequence value")]
    InvalidFieldValue {
        /// Field name.
        field: String,
        /// Rendered offending value.
        value: String,
    },

    /// The counter log holds a frame that cannot be decoded.
    #[error("counter log corrupted at offset {offset}: {message}")]
    LogCorruption {
        /// Offset of the bad frame.
        offset: u64,
        /// Description of the damage.
        message: String,
    },

    /// A log frame failed its checksum.
    #[error("checksum mismatch at offset {offset}: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Offset of the frame.
        offset: u64,
        /// Checksum stored in the frame.
        expected: u32,
        /// Checksum computed over the frame.
        actual: u32,
    },

    /// Another process holds the store directory lock.
    #[error("counter store locked: another process has exclusive access")]
    StoreLocked,

    /// An operation that schedules work on tokio was called outside a
    /// runtime.
    #[error("no tokio runtime: {message}")]
    NoRuntime {
        /// Why the runtime lookup failed.
        message: String,
    },
}

impl CoreError {
    /// Creates a not-initialized error.
    pub fn not_initialized(key: CounterKey, reason: impl Into<String>) -> Self {
        Self::NotInitialized {
            key,
            reason: reason.into(),
        }
    }

    /// Creates an invalid config error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates a log corruption error.
    pub fn log_corruption(offset: u64, message: impl Into<String>) -> Self {
        Self::LogCorruption {
            offset,
            message: message.into(),
        }
    }

    /// Wraps a failure of the blocking pool or of I/O as store unavailability.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::StoreUnavailable(StorageError::unavailable(message))
    }

    /// True for [`CoreError::DuplicateKey`].
    #[must_use]
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, Self::DuplicateKey { .. })
    }

    /// True for [`CoreError::StoreUnavailable`].
    #[must_use]
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        Self::StoreUnavailable(StorageError::Io(err))
    }
}
