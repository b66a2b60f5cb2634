//! # autoinc storage
//!
//! Byte-store backends that sit underneath the durable counter log.
//!
//! A backend only knows how to hold an ordered run of bytes: append to the
//! end, read a range back, make it durable, and cut it short. Framing,
//! checksums and replay belong to `autoinc_core`.
//!
//! ## Backends
//!
//! - [`InMemoryBackend`] - ephemeral, used by tests and throwaway stores
//! - [`FileBackend`] - a single file opened read/write
//!
//! ## Example
//!
//! ```rust
//! use autoinc_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut log = InMemoryBackend::new();
//! let at = log.append(b"frame-1").unwrap();
//! assert_eq!(at, 0);
//! assert_eq!(log.read_to_end().unwrap(), b"frame-1");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
