//! Concurrency stress helpers.
//!
//! These run many allocations against one sequence from several threads and
//! report whether any value was handed out twice.

use autoinc_core::Sequence;
use std::collections::HashSet;
use std::thread;
use std::time::{Duration, Instant};

/// Configuration for stress runs.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of concurrent threads.
    pub threads: usize,
    /// Allocations per thread.
    pub allocations_per_thread: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 8,
            allocations_per_thread: 250,
        }
    }
}

/// Result of a stress run.
#[derive(Debug, Clone)]
pub struct StressResult {
    /// Every value handed out, sorted.
    pub values: Vec<i64>,
    /// Values handed out more than once.
    pub duplicates: usize,
    /// Allocations that returned an error.
    pub failed: usize,
    /// Wall-clock duration.
    pub duration: Duration,
    /// Allocations per second.
    pub ops_per_second: f64,
}

impl StressResult {
    fn new(mut values: Vec<i64>, failed: usize, duration: Duration) -> Self {
        values.sort_unstable();
        let distinct: HashSet<i64> = values.iter().copied().collect();
        let duplicates = values.len() - distinct.len();
        let total = values.len() + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            values,
            duplicates,
            failed,
            duration,
            ops_per_second,
        }
    }

    /// True when no value was handed out twice and nothing failed.
    pub fn is_clean(&self) -> bool {
        self.duplicates == 0 && self.failed == 0
    }

    /// Prints a summary of the run.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Allocations: {}", self.values.len());
        println!("Duplicates: {}", self.duplicates);
        println!("Failed: {}", self.failed);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Allocates from `sequence` on `config.threads` threads at once.
pub fn stress_concurrent_allocations(sequence: &Sequence, config: &StressConfig) -> StressResult {
    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|_| {
            let sequence = sequence.clone();
            let count = config.allocations_per_thread;
            thread::spawn(move || {
                let mut values = Vec::with_capacity(count);
                let mut failed = 0usize;
                for _ in 0..count {
                    match sequence.allocate_next_blocking() {
                        Ok(value) => values.push(value),
                        Err(_) => failed += 1,
                    }
                }
                (values, failed)
            })
        })
        .collect();

    let mut values = Vec::new();
    let mut failed = 0usize;
    for handle in handles {
        let (thread_values, thread_failed) = handle.join().expect("Stress thread panicked");
        values.extend(thread_values);
        failed += thread_failed;
    }

    StressResult::new(values, failed, start.elapsed())
}
