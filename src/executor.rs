//! Batch executor.
//!
//! Applies one data source's changes to a corpus in bounded batches. A
//! [`BatchSession`] takes upserts one data point at a time and dispatches a
//! batch as soon as `batch_size` of them are pending, so only the pending
//! batch and the in-flight jobs are held in memory. Deletes are dispatched
//! by [`BatchSession::finish`] once every upsert batch has completed; the
//! two sets never share a FQN.
//!
//! Each upsert batch is embedded and written as one unit: if either call
//! fails, the batch as a whole is failed and nothing it carried is stored.
//!
//! Batches run on the injected [`WorkerPool`]. With `raise_error_on_failure`
//! the first failing batch cancels the run's [`CancellationToken`] before
//! giving back its worker slot; batches not yet dispatched at that point are
//! never started. Batches already running finish, but count as
//! `completed_after_cancel` rather than as successes. Without the flag,
//! failures are recorded and the rest carry on.
//!
//! Outcomes are merged as handles complete, so nothing here depends on the
//! order in which batches finish.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::embedding::Embedder;
use crate::error::{IngestError, Result};
use crate::models::{Chunk, DataPoint, ErrorRecord};
use crate::planner::ChangePlan;
use crate::pool::{JobOutcome, WorkerPool};
use crate::store::{EmbeddedDataPoint, VectorStore};

#[derive(Debug, Clone, Copy)]
pub struct ExecutorSettings {
    pub batch_size: usize,
    pub raise_error_on_failure: bool,
    /// Deadline for each embed / store call.
    pub call_timeout: Option<Duration>,
}

/// Run-wide batch numbering, so keys stay unique across data sources.
#[derive(Debug, Default)]
pub struct BatchCounter {
    deletes: usize,
    upserts: usize,
}

impl BatchCounter {
    fn next_delete(&mut self) -> String {
        self.deletes += 1;
        format!("delete-batch-{}", self.deletes)
    }

    fn next_upsert(&mut self) -> String {
        self.upserts += 1;
        format!("upsert-batch-{}", self.upserts)
    }
}

/// Tally of batch results. Merging is commutative.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RunOutcome {
    pub succeeded_batches: usize,
    pub failed_batches: usize,
    /// Batches never started because the run was cancelled.
    pub skipped_batches: usize,
    /// Batches that were running when the run was cancelled and then
    /// finished without error. Their writes are in the store but they are
    /// not part of the success tally.
    pub completed_after_cancel: usize,
    pub upserted: usize,
    pub deleted: usize,
    pub errors: Vec<ErrorRecord>,
}

impl RunOutcome {
    pub fn merge(&mut self, other: RunOutcome) {
        self.succeeded_batches += other.succeeded_batches;
        self.failed_batches += other.failed_batches;
        self.skipped_batches += other.skipped_batches;
        self.completed_after_cancel += other.completed_after_cancel;
        self.upserted += other.upserted;
        self.deleted += other.deleted;
        self.errors.extend(other.errors);
    }
}

enum BatchKind {
    Delete(Vec<String>),
    Upsert(Vec<DataPoint>),
}

struct BatchMeta {
    key: String,
    fqns: Vec<String>,
    is_delete: bool,
}

type InFlight = BoxFuture<'static, (BatchMeta, JobOutcome)>;

pub struct BatchExecutor {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    pool: Arc<dyn WorkerPool>,
}

impl BatchExecutor {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        pool: Arc<dyn WorkerPool>,
    ) -> Self {
        Self {
            store,
            embedder,
            pool,
        }
    }

    /// Start applying changes for one data source.
    pub fn session<'a>(
        &'a self,
        corpus: &'a str,
        data_source_fqn: &'a str,
        settings: ExecutorSettings,
        cancel: &'a CancellationToken,
        counter: &'a mut BatchCounter,
    ) -> BatchSession<'a> {
        BatchSession {
            executor: self,
            corpus,
            data_source_fqn,
            batch_size: settings.batch_size.max(1),
            settings,
            cancel,
            counter,
            pending: Vec::new(),
            in_flight: FuturesUnordered::new(),
            outcome: RunOutcome::default(),
        }
    }

    /// Apply a complete plan.
    pub async fn execute(
        &self,
        corpus: &str,
        data_source_fqn: &str,
        plan: ChangePlan,
        settings: ExecutorSettings,
        cancel: &CancellationToken,
        counter: &mut BatchCounter,
    ) -> RunOutcome {
        let mut session = self.session(corpus, data_source_fqn, settings, cancel, counter);
        for point in plan.upserts {
            session.push_upsert(point).await;
        }
        session.finish(plan.deletes).await
    }

    async fn dispatch(
        &self,
        corpus: &str,
        data_source_fqn: &str,
        batch: BatchKind,
        settings: ExecutorSettings,
        cancel: &CancellationToken,
        counter: &mut BatchCounter,
    ) -> InFlight {
        let store = self.store.clone();
        let embedder = self.embedder.clone();
        let cancel = cancel.clone();
        let corpus = corpus.to_string();
        let data_source_fqn = data_source_fqn.to_string();

        let (meta, work) = match batch {
            BatchKind::Delete(fqns) => {
                let meta = BatchMeta {
                    key: counter.next_delete(),
                    fqns: fqns.clone(),
                    is_delete: true,
                };
                let work = async move {
                    with_deadline(settings.call_timeout, "delete", store.delete(&corpus, &fqns))
                        .await
                }
                .boxed();
                (meta, work)
            }
            BatchKind::Upsert(points) => {
                let meta = BatchMeta {
                    key: counter.next_upsert(),
                    fqns: points.iter().map(|p| p.data_point_fqn.clone()).collect(),
                    is_delete: false,
                };
                let work = async move {
                    embed_and_upsert(
                        &*store,
                        &*embedder,
                        &corpus,
                        &data_source_fqn,
                        points,
                        settings.call_timeout,
                    )
                    .await
                }
                .boxed();
                (meta, work)
            }
        };

        tracing::debug!(batch = %meta.key, size = meta.fqns.len(), "dispatching batch");

        let raise = settings.raise_error_on_failure;
        let job = async move {
            if cancel.is_cancelled() {
                return JobOutcome::Skipped;
            }
            match work.await {
                Ok(()) if cancel.is_cancelled() => JobOutcome::DoneAfterCancel,
                Ok(()) => JobOutcome::Done,
                Err(e) => {
                    if raise {
                        cancel.cancel();
                    }
                    JobOutcome::Failed(e)
                }
            }
        }
        .boxed();

        let handle = self.pool.submit(job).await;
        handle.map(move |outcome| (meta, outcome)).boxed()
    }
}

/// Batches of one data source, dispatched as they fill.
pub struct BatchSession<'a> {
    executor: &'a BatchExecutor,
    corpus: &'a str,
    data_source_fqn: &'a str,
    batch_size: usize,
    settings: ExecutorSettings,
    cancel: &'a CancellationToken,
    counter: &'a mut BatchCounter,
    pending: Vec<DataPoint>,
    in_flight: FuturesUnordered<InFlight>,
    outcome: RunOutcome,
}

impl BatchSession<'_> {
    /// Queue one data point; dispatches a batch once `batch_size` are pending.
    pub async fn push_upsert(&mut self, point: DataPoint) {
        self.pending.push(point);
        if self.pending.len() >= self.batch_size {
            self.flush_upserts().await;
        }
    }

    /// Dispatch the partial upsert batch, wait for every upsert, then
    /// delete `deletes` in batches.
    pub async fn finish(mut self, deletes: Vec<String>) -> RunOutcome {
        self.flush_upserts().await;
        self.drain().await;

        for chunk in deletes.chunks(self.batch_size) {
            self.dispatch(BatchKind::Delete(chunk.to_vec())).await;
        }
        self.drain().await;

        self.outcome
    }

    async fn flush_upserts(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let points = std::mem::take(&mut self.pending);
        self.dispatch(BatchKind::Upsert(points)).await;
    }

    async fn dispatch(&mut self, batch: BatchKind) {
        if self.cancel.is_cancelled() {
            self.outcome.skipped_batches += 1;
            return;
        }
        let job = self
            .executor
            .dispatch(
                self.corpus,
                self.data_source_fqn,
                batch,
                self.settings,
                self.cancel,
                self.counter,
            )
            .await;
        self.in_flight.push(job);

        // Fold in whatever has already finished.
        while let Some(Some((meta, outcome))) = self.in_flight.next().now_or_never() {
            self.record(meta, outcome);
        }
    }

    async fn drain(&mut self) {
        while let Some((meta, outcome)) = self.in_flight.next().await {
            self.record(meta, outcome);
        }
    }

    fn record(&mut self, meta: BatchMeta, outcome: JobOutcome) {
        let tally = &mut self.outcome;
        match outcome {
            JobOutcome::Done => {
                tally.succeeded_batches += 1;
                if meta.is_delete {
                    tally.deleted += meta.fqns.len();
                } else {
                    tally.upserted += meta.fqns.len();
                }
            }
            JobOutcome::DoneAfterCancel => {
                tracing::warn!(
                    batch = %meta.key,
                    size = meta.fqns.len(),
                    "batch finished after the run was cancelled; not counted as a success"
                );
                tally.completed_after_cancel += 1;
            }
            JobOutcome::Skipped => tally.skipped_batches += 1,
            JobOutcome::Failed(e) => {
                tracing::warn!(batch = %meta.key, error = %e, "batch failed");
                tally.failed_batches += 1;
                tally.errors.push(ErrorRecord {
                    key: meta.key,
                    category: "batch".to_string(),
                    data_source_fqn: Some(self.data_source_fqn.to_string()),
                    data_point_fqns: meta.fqns,
                    message: e.to_string(),
                    occurred_at: Utc::now(),
                });
            }
        }
    }
}

async fn embed_and_upsert(
    store: &dyn VectorStore,
    embedder: &dyn Embedder,
    corpus: &str,
    data_source_fqn: &str,
    mut points: Vec<DataPoint>,
    deadline: Option<Duration>,
) -> Result<()> {
    // A data point must store at least one record or its fingerprint is lost.
    for point in &mut points {
        if point.content.chunks.is_empty() {
            point.content.chunks.push(Chunk {
                chunk_index: 0,
                text: String::new(),
            });
        }
    }

    let texts: Vec<String> = points
        .iter()
        .flat_map(|p| p.content.chunks.iter().map(|c| c.text.clone()))
        .collect();
    let vectors = with_deadline(deadline, "embed", embedder.embed(&texts)).await?;
    if vectors.len() != texts.len() {
        return Err(IngestError::Batch(format!(
            "embedder returned {} vectors for {} texts",
            vectors.len(),
            texts.len()
        )));
    }

    let mut vectors = vectors.into_iter();
    let embedded: Vec<EmbeddedDataPoint> = points
        .into_iter()
        .map(|data_point| {
            let n = data_point.content.chunks.len();
            EmbeddedDataPoint {
                vectors: vectors.by_ref().take(n).collect(),
                data_point,
            }
        })
        .collect();

    with_deadline(
        deadline,
        "upsert",
        store.replace(corpus, data_source_fqn, &embedded),
    )
    .await
}

async fn with_deadline<T>(
    deadline: Option<Duration>,
    call: &str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match deadline {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| IngestError::Batch(format!("{} call timed out after {:?}", call, limit)))?,
        None => fut.await,
    }
}
