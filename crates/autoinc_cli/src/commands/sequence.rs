//! Sequence commands: peek, next, reconcile, reset.

use autoinc_core::{
    CounterKey, CounterStore, DurableCounterStore, Sequence, SequenceConfig, StoreConfig,
    PRIMARY_KEY_FIELD,
};
use clap::Args;
use std::path::Path;
use std::sync::Arc;

/// Identifies the sequence a command acts on.
#[derive(Debug, Clone, Args)]
pub struct SequenceArgs {
    /// Entity kind the counter belongs to
    #[arg(short, long)]
    pub kind: String,

    /// Field the counter numbers
    #[arg(short, long, default_value = PRIMARY_KEY_FIELD)]
    pub field: String,

    /// First value a fresh counter hands out
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    pub start_at: i64,

    /// Step between values (negative counts down)
    #[arg(long, default_value_t = 1, allow_hyphen_values = true)]
    pub increment_by: i64,
}

impl SequenceArgs {
    /// Sequence settings for these arguments.
    pub fn config(&self) -> SequenceConfig {
        SequenceConfig::new(self.kind.clone())
            .field(self.field.clone())
            .start_at(self.start_at)
            .increment_by(self.increment_by)
    }

    /// Counter key for these arguments.
    pub fn key(&self) -> CounterKey {
        CounterKey::new(self.kind.clone(), self.field.clone())
    }
}

fn register(path: &Path, args: &SequenceArgs) -> Result<Sequence, Box<dyn std::error::Error>> {
    let store: Arc<dyn CounterStore> = Arc::new(DurableCounterStore::open(path, StoreConfig::new())?);
    Ok(Sequence::register(store, args.config())?)
}

/// Estimate of the next value. Never creates the counter row.
pub fn peek(path: &Path, args: &SequenceArgs) -> Result<i64, Box<dyn std::error::Error>> {
    let store: Arc<dyn CounterStore> = Arc::new(super::open_existing(path)?);
    let (sequence, _initializer) = Sequence::pending(store, args.config())?;
    Ok(sequence.peek_next_blocking()?)
}

/// Allocates one value, creating the counter row if needed.
pub fn next(path: &Path, args: &SequenceArgs) -> Result<i64, Box<dyn std::error::Error>> {
    Ok(register(path, args)?.allocate_next_blocking()?)
}

/// Reconciles the counter with `value` and returns the new estimate.
pub fn reconcile(
    path: &Path,
    args: &SequenceArgs,
    value: i64,
) -> Result<i64, Box<dyn std::error::Error>> {
    let sequence = register(path, args)?;
    sequence.reconcile_blocking(value)?;
    Ok(sequence.peek_next_blocking()?)
}

/// Re-seeds the counter and returns its start value.
pub fn reset(path: &Path, args: &SequenceArgs) -> Result<i64, Box<dyn std::error::Error>> {
    Ok(register(path, args)?.reset_sequence_blocking()?)
}
