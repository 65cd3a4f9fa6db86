//! Worker pools for batch jobs.
//!
//! The executor hands each batch to a [`WorkerPool`] as a boxed future and
//! gets back a [`JobHandle`] to await its outcome. `submit` resolves once a
//! worker has taken the job, so a dispatcher that awaits `submit` never runs
//! ahead of the pool.
//!
//! - [`InlinePool`]: no workers; the job runs to completion inside `submit`.
//! - [`TokioPool`]: up to N jobs at once, each on its own `tokio::spawn`ed
//!   task, gated by a semaphore.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::Semaphore;

use crate::error::IngestError;

/// Result of one job as seen by whoever awaits its handle.
#[derive(Debug)]
pub enum JobOutcome {
    Done,
    /// Finished its work, but only after the run had been cancelled.
    DoneAfterCancel,
    /// The job declined to run (the run was already cancelled).
    Skipped,
    Failed(IngestError),
}

pub type Job = BoxFuture<'static, JobOutcome>;
pub type JobHandle = BoxFuture<'static, JobOutcome>;

#[async_trait]
pub trait WorkerPool: Send + Sync {
    /// Number of concurrent workers; 0 for inline execution.
    fn size(&self) -> usize;

    async fn submit(&self, job: Job) -> JobHandle;
}

/// Runs every job on the caller's task.
pub struct InlinePool;

#[async_trait]
impl WorkerPool for InlinePool {
    fn size(&self) -> usize {
        0
    }

    async fn submit(&self, job: Job) -> JobHandle {
        let outcome = job.await;
        futures::future::ready(outcome).boxed()
    }
}

pub struct TokioPool {
    workers: usize,
    slots: Arc<Semaphore>,
}

impl TokioPool {
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            workers,
            slots: Arc::new(Semaphore::new(workers)),
        }
    }
}

#[async_trait]
impl WorkerPool for TokioPool {
    fn size(&self) -> usize {
        self.workers
    }

    async fn submit(&self, job: Job) -> JobHandle {
        let permit = match self.slots.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                let outcome = JobOutcome::Failed(IngestError::Batch(format!(
                    "worker pool closed: {}",
                    e
                )));
                return futures::future::ready(outcome).boxed();
            }
        };

        // The permit is released only after the job's future has returned,
        // so anything the job does on failure happens before the next
        // waiting job can start.
        let task = tokio::spawn(async move {
            let outcome = job.await;
            drop(permit);
            outcome
        });

        async move {
            task.await.unwrap_or_else(|e| {
                JobOutcome::Failed(IngestError::Batch(format!("worker task failed: {}", e)))
            })
        }
        .boxed()
    }
}

/// `InlinePool` for 0 workers, `TokioPool` otherwise.
pub fn create_pool(workers: usize) -> Arc<dyn WorkerPool> {
    if workers == 0 {
        Arc::new(InlinePool)
    } else {
        Arc::new(TokioPool::new(workers))
    }
}
