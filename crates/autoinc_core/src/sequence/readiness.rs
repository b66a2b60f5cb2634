//! Readiness flag and the gate that waits on it.
//!
//! The gate polls at a fixed interval instead of parking on a condition
//! variable. Between polls the async gate yields to the scheduler and the
//! blocking gate sleeps the thread; neither holds a store lock, so a caller
//! can drop the wait at any poll boundary.

use crate::error::{CoreError, CoreResult};
use crate::types::CounterKey;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tracing::debug;

const PENDING: u8 = 0;
const READY: u8 = 1;
const FAILED: u8 = 2;

/// Where a sequence is in its `created -> pending -> ready` lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// The counter row has not been confirmed yet.
    Pending,
    /// The counter row exists; allocation may proceed.
    Ready,
    /// Initialization failed and will not be retried.
    Failed(String),
}

/// One-way readiness flag. Leaves `Pending` at most once.
#[derive(Debug)]
pub(crate) struct ReadinessFlag {
    state: AtomicU8,
    failure: Mutex<Option<String>>,
}

impl ReadinessFlag {
    pub(crate) fn pending() -> Self {
        Self {
            state: AtomicU8::new(PENDING),
            failure: Mutex::new(None),
        }
    }

    /// Returns false if the flag had already left `Pending`.
    pub(crate) fn mark_ready(&self) -> bool {
        self.state
            .compare_exchange(PENDING, READY, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Returns false if the flag had already left `Pending`.
    pub(crate) fn mark_failed(&self, reason: impl Into<String>) -> bool {
        // Reason goes in first so a reader that sees FAILED finds it.
        let mut failure = self.failure.lock();
        if self.state.load(Ordering::Acquire) != PENDING {
            return false;
        }
        *failure = Some(reason.into());
        self.state
            .compare_exchange(PENDING, FAILED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.state.load(Ordering::Acquire) == READY
    }

    pub(crate) fn snapshot(&self) -> Readiness {
        match self.state.load(Ordering::Acquire) {
            READY => Readiness::Ready,
            FAILED => Readiness::Failed(self.failure_reason()),
            _ => Readiness::Pending,
        }
    }

    fn failure_reason(&self) -> String {
        self.failure
            .lock()
            .clone()
            .unwrap_or_else(|| "initialization failed".to_string())
    }

    /// `Ok(true)` when ready, `Ok(false)` while pending.
    fn poll(&self, key: &CounterKey) -> CoreResult<bool> {
        match self.state.load(Ordering::Acquire) {
            READY => Ok(true),
            FAILED => Err(CoreError::not_initialized(key.clone(), self.failure_reason())),
            _ => Ok(false),
        }
    }

    /// Waits until ready, sleeping `interval` between polls.
    pub(crate) async fn wait(&self, key: &CounterKey, interval: Duration) -> CoreResult<()> {
        let mut polls = 0u64;
        while !self.poll(key)? {
            if polls == 0 {
                debug!(counter = %key, "waiting for sequence initialization");
            }
            polls += 1;
            tokio::time::sleep(interval).await;
        }
        if polls > 0 {
            debug!(counter = %key, polls, "sequence became ready");
        }
        Ok(())
    }

    /// Thread-blocking twin of [`wait`](Self::wait).
    pub(crate) fn wait_blocking(&self, key: &CounterKey, interval: Duration) -> CoreResult<()> {
        let mut polls = 0u64;
        while !self.poll(key)? {
            if polls == 0 {
                debug!(counter = %key, "waiting for sequence initialization");
            }
            polls += 1;
            std::thread::sleep(interval);
        }
        if polls > 0 {
            debug!(counter = %key, polls, "sequence became ready");
        }
        Ok(())
    }
}
