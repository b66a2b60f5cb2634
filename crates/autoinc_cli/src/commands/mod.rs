//! CLI command implementations.

pub mod compact;
pub mod inspect;
pub mod sequence;

use autoinc_core::{DurableCounterStore, StoreConfig};
use std::path::Path;
use tracing::debug;

/// Opens an existing store directory.
pub(crate) fn open_existing(path: &Path) -> Result<DurableCounterStore, Box<dyn std::error::Error>> {
    if !path.is_dir() {
        return Err(format!("No counter store found at {}", path.display()).into());
    }
    debug!(path = %path.display(), "opening counter store");
    Ok(DurableCounterStore::open(
        path,
        StoreConfig::new().create_if_missing(false),
    )?)
}
