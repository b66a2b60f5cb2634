//! # autoinc testkit
//!
//! Test utilities for autoinc.
//!
//! This crate provides:
//! - Store fixtures (in-memory and temp-dir durable)
//! - A fault-injecting store wrapper
//! - Concurrency stress helpers
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust
//! use autoinc_testkit::prelude::*;
//! use autoinc_core::SequenceConfig;
//!
//! with_memory_store(|store| {
//!     let seq = store.sequence(SequenceConfig::new("Kitten"));
//!     assert_eq!(seq.allocate_next_blocking().unwrap(), 0);
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod faults;
pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::faults::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use faults::*;
pub use fixtures::*;
pub use generators::*;
pub use stress::*;
