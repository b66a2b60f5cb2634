//! Inspect command implementation.

use autoinc_core::{CounterStore, DurableCounterStore};
use serde::Serialize;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Counter log size in bytes.
    pub log_bytes: u64,
    /// Frames appended since the last compaction.
    pub frames_since_compaction: usize,
    /// Counters in key order.
    pub counters: Vec<CounterSummary>,
}

/// One counter row.
#[derive(Debug, Serialize)]
pub struct CounterSummary {
    /// Entity kind.
    pub entity_kind: String,
    /// Numbered field.
    pub field_name: String,
    /// Last allocated or reconciled value.
    pub count: i64,
}

/// Collects the inspection result for an opened store.
pub fn collect(path: &Path, store: &DurableCounterStore) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let stats = store.stats()?;
    let counters = store
        .records()?
        .into_iter()
        .map(|record| CounterSummary {
            entity_kind: record.key.entity_kind,
            field_name: record.key.field_name,
            count: record.count,
        })
        .collect();

    Ok(InspectResult {
        path: path.display().to_string(),
        log_bytes: stats.log_bytes,
        frames_since_compaction: stats.frames_since_compaction,
        counters,
    })
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open_existing(path)?;
    let result = collect(path, &store)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("Counter store: {}", result.path);
    println!();
    println!("Log:");
    println!("  Size:                    {} bytes", result.log_bytes);
    println!("  Frames since compaction: {}", result.frames_since_compaction);
    println!();
    if result.counters.is_empty() {
        println!("No counters.");
        return;
    }
    println!("Counters ({}):", result.counters.len());
    for counter in &result.counters {
        println!(
            "  {}.{:<20} {}",
            counter.entity_kind, counter.field_name, counter.count
        );
    }
}
