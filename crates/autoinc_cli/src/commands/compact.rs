//! Compact command implementation.

use autoinc_core::DurableCounterStore;
use std::path::Path;

/// Compaction statistics.
#[derive(Debug)]
pub struct CompactStats {
    /// Counters kept.
    pub counters: usize,
    /// Frames that compaction folds away.
    pub frames_before: usize,
    /// Bytes before compaction.
    pub bytes_before: u64,
    /// Bytes after compaction.
    pub bytes_after: u64,
}

/// Compacts an opened store, or only measures it when `dry_run` is set.
pub fn compact_store(
    store: &DurableCounterStore,
    dry_run: bool,
) -> Result<CompactStats, Box<dyn std::error::Error>> {
    let before = store.stats()?;
    let bytes_after = if dry_run {
        before.log_bytes
    } else {
        store.compact()?;
        store.stats()?.log_bytes
    };
    Ok(CompactStats {
        counters: before.counters,
        frames_before: before.frames_since_compaction,
        bytes_before: before.log_bytes,
        bytes_after,
    })
}

/// Runs the compact command.
pub fn run(path: &Path, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open_existing(path)?;

    println!("Compacting counter log at {}", path.display());
    if dry_run {
        println!("(dry run - no changes will be made)");
    }
    println!();

    let stats = compact_store(&store, dry_run)?;
    println!("  Counters:              {}", stats.counters);
    println!("  Frames since compaction: {}", stats.frames_before);
    println!("  Size before: {} bytes", stats.bytes_before);
    if !dry_run {
        println!("  Size after:  {} bytes", stats.bytes_after);
        println!("✓ Compaction complete");
    }

    Ok(())
}
