//! Bounded item queue consumed by a fixed set of workers
//!
//! Submitting waits while the queue is full, so the harvest loop never runs
//! further ahead of the workers than `queue_capacity` items.

use super::item::{ItemContext, ItemJob, process_item};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

/// Fixed-size pool of item workers
pub(crate) struct WorkerPool {
    tx: mpsc::Sender<ItemJob>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start `workers` workers reading from a queue of `capacity` jobs
    pub(crate) fn spawn(workers: usize, capacity: usize, ctx: Arc<ItemContext>) -> Self {
        let (tx, rx) = mpsc::channel::<ItemJob>(capacity);
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..workers)
            .map(|worker| {
                let rx = Arc::clone(&rx);
                let ctx = Arc::clone(&ctx);
                tokio::spawn(async move {
                    loop {
                        // Hold the lock only while taking the next job
                        let job = rx.lock().await.recv().await;
                        let Some(job) = job else {
                            break;
                        };
                        let outcome = process_item(&ctx, job).await;
                        ctx.record(outcome);
                    }
                    tracing::debug!(worker, "Item worker stopped");
                })
            })
            .collect();

        Self { tx, workers }
    }

    /// Queue a job, waiting for room if the queue is full
    ///
    /// Gives the job back if every worker has stopped.
    pub(crate) async fn submit(&self, job: ItemJob) -> std::result::Result<(), ItemJob> {
        self.tx.send(job).await.map_err(|rejected| rejected.0)
    }

    /// Close the queue and wait for the workers to drain it
    pub(crate) async fn shutdown(self) {
        drop(self.tx);
        for worker in self.workers {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Item worker panicked");
            }
        }
    }
}
