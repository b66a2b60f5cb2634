//! # autoinc core
//!
//! Race-free autoincrement sequences over a shared counter store.
//!
//! This crate provides:
//! - Counter stores: an in-memory table and a durable, checksummed log
//! - Sequence registration with an idempotent initialization handshake
//! - A readiness gate that holds allocations until the counter row exists
//! - The allocation protocol: allocate a fresh value, or reconcile the
//!   watermark with an explicitly supplied one
//!
//! ## Example
//!
//! ```rust
//! use autoinc_core::{Allocation, MemoryCounterStore, Sequence, SequenceConfig};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryCounterStore::new());
//! let kittens = Sequence::register(store, SequenceConfig::new("Kitten")).unwrap();
//!
//! let mut silence = json!({ "name": "Silence" }).as_object().unwrap().clone();
//! assert_eq!(kittens.prepare_record_blocking(&mut silence).unwrap(), Allocation::Generated(0));
//! assert_eq!(silence["_id"], json!(0));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod dir;
mod error;
mod record;
mod sequence;
mod store;
mod types;

pub use config::{FieldSpec, SequenceConfig, StoreConfig, DEFAULT_POLL_INTERVAL, PRIMARY_KEY_FIELD};
pub use dir::StoreDir;
pub use error::{CoreError, CoreResult};
pub use record::{Document, SequencedRecord};
pub use sequence::{Allocation, Initializer, Readiness, Sequence};
pub use store::{
    CounterStore, DurableCounterStore, FrameKind, LogStats, MemoryCounterStore, FRAME_MAGIC,
    FRAME_VERSION,
};
pub use types::{CounterKey, CounterRecord, Direction};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
