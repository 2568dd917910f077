//! Batch completion tracking
//!
//! A batch is registered with the number of tasks dispatched for it. Every
//! task signals exactly once when it reaches a terminal state, whatever the
//! outcome. [`CompletionCoordinator::await_batch`] parks on a [`Notify`] and
//! wakes on the final signal instead of polling the counter.

use crate::error::{BatchError, Result};
use crate::types::BatchId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Shared completion state of one batch
///
/// Only `completed` is mutated after creation, and only through atomic
/// compare-and-swap, so it never exceeds `expected`.
#[derive(Debug)]
pub struct BatchState {
    batch_id: BatchId,
    expected: usize,
    completed: AtomicUsize,
    done: Notify,
}

impl BatchState {
    fn new(batch_id: BatchId, expected: usize) -> Self {
        Self {
            batch_id,
            expected,
            completed: AtomicUsize::new(0),
            done: Notify::new(),
        }
    }

    /// Batch identifier
    pub fn batch_id(&self) -> &BatchId {
        &self.batch_id
    }

    /// Number of tasks dispatched for the batch
    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Number of tasks that have signalled so far
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Acquire)
    }

    /// Whether every dispatched task has signalled
    pub fn is_done(&self) -> bool {
        self.completed() == self.expected
    }

    /// Record one terminal task; returns the new completed count
    pub fn signal_one(&self) -> Result<usize> {
        let expected = self.expected;
        let previous = self
            .completed
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < expected).then_some(n + 1)
            })
            .map_err(|_| BatchError::Overflow {
                batch: self.batch_id.clone(),
                expected,
            })?;

        let completed = previous + 1;
        if completed == expected {
            self.done.notify_waiters();
        }
        Ok(completed)
    }

    /// Wait until every dispatched task has signalled
    pub async fn wait(&self) {
        loop {
            let notified = self.done.notified();
            tokio::pin!(notified);
            // Register interest before checking, so a signal landing in between is not lost
            notified.as_mut().enable();
            if self.is_done() {
                return;
            }
            notified.await;
        }
    }
}

/// Tracks completion of every registered batch
#[derive(Debug, Default)]
pub struct CompletionCoordinator {
    batches: Mutex<HashMap<BatchId, Arc<BatchState>>>,
}

impl CompletionCoordinator {
    /// Create an empty coordinator
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a batch expecting `expected_count` completion signals
    pub fn register(&self, batch_id: BatchId, expected_count: usize) -> Result<Arc<BatchState>> {
        let mut batches = self.lock();
        if batches.contains_key(&batch_id) {
            return Err(BatchError::AlreadyRegistered(batch_id).into());
        }
        let state = Arc::new(BatchState::new(batch_id.clone(), expected_count));
        batches.insert(batch_id, Arc::clone(&state));
        Ok(state)
    }

    /// Record that one task of `batch_id` reached its terminal state
    pub fn signal_one(&self, batch_id: &BatchId) -> Result<usize> {
        self.get(batch_id)?.signal_one()
    }

    /// Wait until `batch_id` has received all of its signals
    ///
    /// Returns immediately for a batch registered with zero expected tasks.
    pub async fn await_batch(&self, batch_id: &BatchId) -> Result<()> {
        let state = self.get(batch_id)?;
        state.wait().await;
        Ok(())
    }

    /// Drop a batch once the harvester has moved past it
    pub fn remove(&self, batch_id: &BatchId) -> Option<Arc<BatchState>> {
        self.lock().remove(batch_id)
    }

    /// Look up a registered batch
    pub fn get(&self, batch_id: &BatchId) -> Result<Arc<BatchState>> {
        self.lock()
            .get(batch_id)
            .cloned()
            .ok_or_else(|| BatchError::Unknown(batch_id.clone()).into())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<BatchId, Arc<BatchState>>> {
        // The map holds no invariants a panicking holder could break
        self.batches
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Signals its batch exactly once when dropped
///
/// Workers hold one guard per dispatched item, so a completion signal is
/// produced on every path out of the item, including early returns and panics.
#[derive(Debug)]
pub struct CompletionGuard {
    state: Arc<BatchState>,
    signalled: bool,
}

impl CompletionGuard {
    /// Guard one task of `state`
    pub fn new(state: Arc<BatchState>) -> Self {
        Self {
            state,
            signalled: false,
        }
    }

    /// Batch this guard belongs to
    pub fn batch(&self) -> &BatchState {
        &self.state
    }

    /// Signal now and return the new completed count
    pub fn complete(mut self) -> Result<usize> {
        self.signalled = true;
        self.state.signal_one()
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if !self.signalled
            && let Err(e) = self.state.signal_one()
        {
            tracing::error!(batch = %self.state.batch_id(), error = %e, "Completion signal rejected");
        }
    }
}
