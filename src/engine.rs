//! Ingestion engine: the public entry point.
//!
//! `submit_run` validates the request, persists an INITIALIZED run and
//! returns it immediately; reconciliation happens on a spawned task.
//! Callers poll [`IngestionEngine::get_run_status`].
//!
//! For each data source the run covers, in configuration order:
//!
//! 1. list the stored vectors and build the fingerprint map
//! 2. stream documents from the loader and parse each one
//! 3. classify every data point as it arrives; inserts and updates go
//!    straight to a [`crate::executor::BatchSession`], which dispatches
//!    full batches
//! 4. once the stream ends, hand the FULL-mode deletes to the session
//!
//! While a run is active a watcher polls its stored status. If another
//! writer ends the run (`abandon_run`, possibly from another process), the
//! run's cancellation token fires and nothing further is dispatched.
//!
//! Every failure ends up as recorded run state. Nothing the run does can
//! fail `submit_run` once it has returned.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use rand::Rng;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::capabilities::Capabilities;
use crate::config::Config;
use crate::error::{IngestError, Result};
use crate::executor::{BatchCounter, BatchExecutor, ExecutorSettings, RunOutcome};
use crate::fingerprint::build_fingerprint_map;
use crate::loader::DataSource;
use crate::models::{
    data_point_fqn, DataPoint, ErrorRecord, IngestionMode, IngestionRun, RawDocument, RunStatus,
    RunStatusReport,
};
use crate::parser::ParserSelection;
use crate::planner::PlanBuilder;
use crate::run_store::RunStore;
use crate::tracker::{aggregate_status, RunTracker};

const RUN_SUFFIX_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const RUN_SUFFIX_LEN: usize = 5;
const MAX_NAME_ATTEMPTS: usize = 8;

/// Parameters of a new run.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitRun {
    pub corpus_name: String,
    /// `None` reconciles every data source associated with the corpus.
    pub data_source_fqn: Option<String>,
    pub mode: IngestionMode,
    /// `None` uses `ingestion.default_batch_size`.
    pub batch_size: Option<usize>,
    pub raise_error_on_failure: bool,
}

impl SubmitRun {
    pub fn new(corpus_name: impl Into<String>) -> Self {
        Self {
            corpus_name: corpus_name.into(),
            data_source_fqn: None,
            mode: IngestionMode::Incremental,
            batch_size: None,
            raise_error_on_failure: true,
        }
    }

    pub fn data_source(mut self, fqn: impl Into<String>) -> Self {
        self.data_source_fqn = Some(fqn.into());
        self
    }

    pub fn mode(mut self, mode: IngestionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn raise_error_on_failure(mut self, raise: bool) -> Self {
        self.raise_error_on_failure = raise;
        self
    }
}

/// A failure that ends the run, with the key it is recorded under.
#[derive(Debug)]
struct RunFailure {
    key: String,
    data_source_fqn: Option<String>,
    data_point_fqns: Vec<String>,
    error: IngestError,
}

impl RunFailure {
    fn new(key: impl Into<String>, data_source_fqn: Option<String>, error: IngestError) -> Self {
        Self {
            key: key.into(),
            data_source_fqn,
            data_point_fqns: Vec::new(),
            error,
        }
    }

    fn record(&self) -> ErrorRecord {
        ErrorRecord {
            key: self.key.clone(),
            category: self.error.category().to_string(),
            data_source_fqn: self.data_source_fqn.clone(),
            data_point_fqns: self.data_point_fqns.clone(),
            message: self.error.to_string(),
            occurred_at: Utc::now(),
        }
    }
}

impl From<IngestError> for RunFailure {
    fn from(error: IngestError) -> Self {
        RunFailure::new("run", None, error)
    }
}

/// What one data source contributed to a run.
struct SourceReconciliation {
    outcome: RunOutcome,
    document_errors: Vec<ErrorRecord>,
    /// Set when a document error ended the run under `raise_error_on_failure`.
    failure: Option<RunFailure>,
}

struct EngineInner {
    config: Config,
    caps: Capabilities,
    executor: BatchExecutor,
    /// Serializes corpus deletion with run submission in this process.
    submit_lock: Mutex<()>,
}

#[derive(Clone)]
pub struct IngestionEngine {
    inner: Arc<EngineInner>,
}

impl IngestionEngine {
    pub fn new(config: Config, caps: Capabilities) -> Self {
        let executor = BatchExecutor::new(
            caps.vector_store.clone(),
            caps.embedder.clone(),
            caps.pool.clone(),
        );
        Self {
            inner: Arc::new(EngineInner {
                config,
                caps,
                executor,
                submit_lock: Mutex::new(()),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.inner.caps
    }

    pub async fn create_corpus(&self, name: &str) -> Result<()> {
        self.inner.caps.vector_store.create_corpus(name).await?;
        info!(corpus = %name, "corpus created");
        Ok(())
    }

    /// Drop a corpus from the vector store together with its run history.
    pub async fn delete_corpus(&self, name: &str) -> Result<()> {
        let _guard = self.inner.submit_lock.lock().await;
        let runs = self.inner.caps.run_store.list_runs(name, None).await?;
        if let Some(active) = runs.iter().find(|r| r.status.is_active()) {
            return Err(IngestError::ConcurrentRun {
                corpus: name.to_string(),
                data_source: active.data_source_fqn.clone().unwrap_or_else(|| "*".to_string()),
            });
        }
        self.inner.caps.vector_store.delete_corpus(name).await?;
        let removed = self.inner.caps.run_store.delete_runs_for_corpus(name).await?;
        info!(corpus = %name, runs_removed = removed, "corpus deleted");
        Ok(())
    }

    /// Validate and persist a new run, then start reconciling it in the background.
    pub async fn submit_run(&self, request: SubmitRun) -> Result<IngestionRun> {
        let inner = &self.inner;
        let batch_size = request
            .batch_size
            .unwrap_or(inner.config.ingestion.default_batch_size);
        if batch_size == 0 {
            return Err(IngestError::Configuration(
                "batch_size must be >= 1".to_string(),
            ));
        }

        let corpus = inner
            .config
            .corpus(&request.corpus_name)
            .ok_or_else(|| IngestError::NotFound(format!("corpus '{}'", request.corpus_name)))?;
        let associations: Vec<_> = corpus
            .data_sources
            .iter()
            .filter(|a| {
                request
                    .data_source_fqn
                    .as_deref()
                    .map_or(true, |fqn| fqn == a.fqn)
            })
            .collect();
        if let Some(fqn) = &request.data_source_fqn {
            if associations.is_empty() {
                return Err(IngestError::Configuration(format!(
                    "data source '{}' is not associated with corpus '{}'",
                    fqn, corpus.name
                )));
            }
        }
        for association in &associations {
            inner.caps.parsers.check(&association.parser_selection())?;
        }

        let store = &inner.caps.vector_store;
        if !store.supports_change_detection() {
            return Err(IngestError::Configuration(format!(
                "vector store '{}' cannot report content hashes; incremental sync is unsupported",
                store.name()
            )));
        }
        if !store.corpus_exists(&corpus.name).await? {
            return Err(IngestError::NotFound(format!(
                "corpus '{}' in vector store '{}'",
                corpus.name,
                store.name()
            )));
        }

        let run_store = &inner.caps.run_store;
        let _guard = inner.submit_lock.lock().await;
        let name = self.unused_run_name(&corpus.name).await?;
        let now = Utc::now();
        let run = IngestionRun {
            name,
            corpus_name: corpus.name.clone(),
            data_source_fqn: request.data_source_fqn,
            mode: request.mode,
            batch_size,
            raise_error_on_failure: request.raise_error_on_failure,
            status: RunStatus::Initialized,
            created_at: now,
            updated_at: now,
        };
        // Refused with ConcurrentRun if an overlapping run is active.
        run_store.create_run(&run).await?;
        info!(
            run = %run.name,
            corpus = %run.corpus_name,
            mode = %run.mode,
            batch_size = run.batch_size,
            "ingestion run submitted"
        );

        let engine = self.clone();
        let spawned = run.clone();
        tokio::spawn(async move { engine.reconcile(spawned).await });

        Ok(run)
    }

    pub async fn get_run(&self, name: &str) -> Result<IngestionRun> {
        self.inner
            .caps
            .run_store
            .get_run(name)
            .await?
            .ok_or_else(|| IngestError::NotFound(format!("run '{}'", name)))
    }

    pub async fn get_run_status(&self, name: &str) -> Result<RunStatusReport> {
        let run = self.get_run(name).await?;
        Ok(RunStatusReport {
            status: run.status,
            message: format!(
                "Data ingestion run {} in {}. Check logs for more details.",
                run.name, run.status
            ),
        })
    }

    pub async fn list_runs(
        &self,
        corpus: &str,
        data_source_fqn: Option<&str>,
    ) -> Result<Vec<IngestionRun>> {
        self.inner
            .caps
            .run_store
            .list_runs(corpus, data_source_fqn)
            .await
    }

    pub async fn run_errors(&self, name: &str) -> Result<Vec<ErrorRecord>> {
        self.get_run(name).await?;
        self.inner.caps.run_store.list_errors(name).await
    }

    /// Poll until the run reaches a terminal status.
    pub async fn wait_for_run(&self, name: &str, poll_interval: Duration) -> Result<IngestionRun> {
        loop {
            let run = self.get_run(name).await?;
            if run.status.is_terminal() {
                return Ok(run);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Fail a run that will never finish on its own, such as one whose
    /// process was killed mid-run. A run still being reconciled notices
    /// within one poll interval and stops dispatching batches.
    pub async fn abandon_run(&self, name: &str) -> Result<()> {
        let run = self.get_run(name).await?;
        let mut tracker = RunTracker::new(self.inner.caps.run_store.clone(), &run);
        tracker.finish(RunStatus::Failed).await?;
        tracker
            .record_errors(&[ErrorRecord {
                key: run.name.clone(),
                category: "internal".to_string(),
                data_source_fqn: run.data_source_fqn.clone(),
                data_point_fqns: Vec::new(),
                message: "run abandoned before it finished".to_string(),
                occurred_at: Utc::now(),
            }])
            .await?;
        warn!(run = %run.name, "run abandoned");
        Ok(())
    }

    async fn unused_run_name(&self, corpus: &str) -> Result<String> {
        for _ in 0..MAX_NAME_ATTEMPTS {
            let name = generate_run_name(corpus);
            if self.inner.caps.run_store.get_run(&name).await?.is_none() {
                return Ok(name);
            }
        }
        Err(IngestError::Configuration(format!(
            "could not find a free run name for corpus '{}'",
            corpus
        )))
    }

    async fn reconcile(self, run: IngestionRun) {
        let span = info_span!("ingestion_run", run = %run.name, corpus = %run.corpus_name);
        async move {
            let run_store = self.inner.caps.run_store.clone();
            let mut tracker = RunTracker::new(run_store.clone(), &run);
            let cancel = CancellationToken::new();
            let poll = Duration::from_millis(self.inner.config.ingestion.poll_interval_ms.max(1));
            let watcher = tokio::spawn(
                watch_run(run_store, run.name.clone(), cancel.clone(), poll).in_current_span(),
            );

            let result = self.drive(&run, &mut tracker, &cancel).await;
            watcher.abort();

            match result {
                Ok(()) => {}
                Err(failure) if matches!(failure.error, IngestError::InvalidTransition { .. }) => {
                    warn!(error = %failure.error, "run was ended by another writer; stopping");
                }
                Err(failure) => {
                    error!(key = %failure.key, error = %failure.error, "ingestion run failed");
                    if let Err(e) = tracker.record_errors(&[failure.record()]).await {
                        error!(error = %e, "could not record run failure");
                    }
                    if !tracker.status().is_terminal() {
                        if let Err(e) = tracker.finish(RunStatus::Failed).await {
                            error!(error = %e, "could not mark run as failed");
                        }
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn drive(
        &self,
        run: &IngestionRun,
        tracker: &mut RunTracker,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), RunFailure> {
        let sources = self.resolve_sources(run)?;
        tracker.start().await?;

        let settings = ExecutorSettings {
            batch_size: run.batch_size,
            raise_error_on_failure: run.raise_error_on_failure,
            call_timeout: self
                .inner
                .config
                .ingestion
                .call_timeout_secs
                .map(Duration::from_secs),
        };
        let mut counter = BatchCounter::default();
        let mut outcome = RunOutcome::default();
        let mut document_failures = 0;

        for (source, selection) in &sources {
            let span = info_span!("data_source", fqn = %source.fqn());
            let result = self
                .reconcile_source(run, source, selection, settings, cancel, &mut counter)
                .instrument(span)
                .await?;

            document_failures += result.document_errors.len();
            tracker.record_errors(&result.document_errors).await?;
            tracker.record_errors(&result.outcome.errors).await?;
            outcome.merge(result.outcome);
            if let Some(failure) = result.failure {
                return Err(failure);
            }

            if cancel.is_cancelled() {
                warn!("run cancelled; remaining data sources skipped");
                break;
            }
        }

        let status = aggregate_status(&outcome, document_failures, run.raise_error_on_failure);
        info!(
            status = %status,
            succeeded_batches = outcome.succeeded_batches,
            failed_batches = outcome.failed_batches,
            skipped_batches = outcome.skipped_batches,
            completed_after_cancel = outcome.completed_after_cancel,
            skipped_documents = document_failures,
            upserted = outcome.upserted,
            deleted = outcome.deleted,
            "ingestion run finished"
        );
        tracker.finish(status).await?;
        Ok(())
    }

    /// Data sources the run covers, with their parser selections.
    fn resolve_sources(&self, run: &IngestionRun) -> Result<Vec<(DataSource, ParserSelection)>> {
        let config = &self.inner.config;
        let corpus = config
            .corpus(&run.corpus_name)
            .ok_or_else(|| IngestError::NotFound(format!("corpus '{}'", run.corpus_name)))?;

        corpus
            .data_sources
            .iter()
            .filter(|a| {
                run.data_source_fqn
                    .as_deref()
                    .map_or(true, |fqn| fqn == a.fqn)
            })
            .map(|association| {
                let source = config.data_source(&association.fqn).cloned().ok_or_else(|| {
                    IngestError::Configuration(format!(
                        "unknown data source '{}'",
                        association.fqn
                    ))
                })?;
                Ok((source, association.parser_selection()))
            })
            .collect()
    }

    async fn reconcile_source(
        &self,
        run: &IngestionRun,
        source: &DataSource,
        selection: &ParserSelection,
        settings: ExecutorSettings,
        cancel: &CancellationToken,
        counter: &mut BatchCounter,
    ) -> std::result::Result<SourceReconciliation, RunFailure> {
        let caps = &self.inner.caps;
        let ds_fqn = source.fqn();
        let source_failure =
            |error: IngestError| RunFailure::new(ds_fqn.clone(), Some(ds_fqn.clone()), error);

        let loader = caps.loader_for(source).map_err(&source_failure)?;
        let vectors = caps
            .vector_store
            .list_vectors(&run.corpus_name, Some(&ds_fqn))
            .await
            .map_err(&source_failure)?;
        let fingerprints = build_fingerprint_map(&vectors).map_err(&source_failure)?;
        drop(vectors);
        debug!(stored = fingerprints.len(), "fingerprint map built");

        let mut stream = loader.enumerate(source).await.map_err(&source_failure)?;
        let mut planner = PlanBuilder::new(&fingerprints);
        let mut session = self
            .inner
            .executor
            .session(&run.corpus_name, &ds_fqn, settings, cancel, counter);
        let mut document_errors = Vec::new();
        let mut failure = None;
        let mut documents = 0usize;
        let mut parsed = 0usize;
        let mut interrupted = false;

        while let Some(item) = stream.next().await {
            if cancel.is_cancelled() {
                interrupted = true;
                break;
            }
            documents += 1;
            let points = match item {
                Ok(document) => {
                    let fqn = document.fqn();
                    self.parse_document(document, selection)
                        .await
                        .map_err(|e| (fqn, e))
                }
                Err(e) => {
                    let fqn = document_locator(&e)
                        .map(|locator| data_point_fqn(&ds_fqn, locator))
                        .unwrap_or_else(|| ds_fqn.clone());
                    Err((fqn, e))
                }
            };

            match points {
                Ok(points) => {
                    for point in points {
                        parsed += 1;
                        if let Some(point) = planner.classify(point) {
                            session.push_upsert(point).await;
                        }
                    }
                }
                Err((fqn, error)) if run.raise_error_on_failure => {
                    let mut run_failure = RunFailure::new(fqn.clone(), Some(ds_fqn.clone()), error);
                    run_failure.data_point_fqns.push(fqn);
                    failure = Some(run_failure);
                    cancel.cancel();
                    interrupted = true;
                    break;
                }
                Err((fqn, error)) => {
                    warn!(data_point = %fqn, error = %error, "skipping document");
                    // A skipped document keeps whatever is stored for it.
                    planner.retain(&fqn);
                    document_errors.push(ErrorRecord {
                        key: fqn.clone(),
                        category: error.category().to_string(),
                        data_source_fqn: Some(ds_fqn.clone()),
                        data_point_fqns: vec![fqn],
                        message: error.to_string(),
                        occurred_at: Utc::now(),
                    });
                }
            }
        }
        drop(stream);

        let plan = planner.finish(run.mode);
        if !plan.duplicates.is_empty() {
            warn!(
                count = plan.duplicates.len(),
                first = %plan.duplicates[0],
                "duplicate data point fqns in parse output; later copies dropped"
            );
        }
        // A cut-short stream says nothing about which documents are gone.
        let deletes = if interrupted { Vec::new() } else { plan.deletes };
        if run.mode == IngestionMode::Full && parsed == 0 && !deletes.is_empty() {
            warn!(
                deletes = deletes.len(),
                "full sync parsed no data points; every stored data point of this source will be deleted"
            );
        }
        info!(
            documents,
            inserts = plan.inserts,
            updates = plan.updates,
            unchanged = plan.unchanged,
            deletes = deletes.len(),
            interrupted,
            "source enumerated"
        );

        let outcome = session.finish(deletes).await;

        Ok(SourceReconciliation {
            outcome,
            document_errors,
            failure,
        })
    }

    /// Parse one document on the blocking pool.
    async fn parse_document(
        &self,
        document: RawDocument,
        selection: &ParserSelection,
    ) -> Result<Vec<DataPoint>> {
        let (parser, config) = self.inner.caps.parsers.parser_for(&document, selection)?;
        let locator = document.locator.clone();
        tokio::task::spawn_blocking(move || parser.parse(&document, &config))
            .await
            .map_err(|e| IngestError::source_error(locator, format!("parser task failed: {}", e)))?
    }
}

/// Cancel `cancel` once the stored run is no longer active, e.g. after
/// `abandon_run`. Returns when the token fires for any reason.
async fn watch_run(
    store: Arc<dyn RunStore>,
    name: String,
    cancel: CancellationToken,
    every: Duration,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(every) => {}
        }
        match store.get_run(&name).await {
            Ok(Some(run)) if run.status.is_active() => {}
            Ok(_) => {
                warn!("stored run is no longer active; cancelling");
                cancel.cancel();
                return;
            }
            Err(e) => debug!(error = %e, "run status check failed"),
        }
    }
}

fn document_locator(error: &IngestError) -> Option<&str> {
    match error {
        IngestError::Source { locator, .. } | IngestError::UnsupportedExtension { locator, .. } => {
            Some(locator)
        }
        _ => None,
    }
}

pub fn generate_run_name(corpus: &str) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..RUN_SUFFIX_LEN)
        .map(|_| RUN_SUFFIX_CHARSET[rng.gen_range(0..RUN_SUFFIX_CHARSET.len())] as char)
        .collect();
    format!("{}-{}", corpus, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::embedding::HashEmbedder;
    use crate::pool::InlinePool;
    use std::fs;

    fn engine_for(dir: &std::path::Path) -> IngestionEngine {
        let toml = format!(
            r#"
[db]
path = "{db}"

[ingestion]
workers = 0
default_batch_size = 2

[embedding]
provider = "hash"
dims = 16

[[data_sources]]
type = "localdir"
uri = "{docs}"

[[corpora]]
name = "handbook"
[[corpora.data_sources]]
fqn = "localdir::{docs}"
"#,
            db = dir.join("db.sqlite").display(),
            docs = dir.join("docs").display()
        );
        let config = parse_config(&toml).unwrap();
        let caps =
            Capabilities::in_memory(Arc::new(HashEmbedder::new(16)), Arc::new(InlinePool)).unwrap();
        IngestionEngine::new(config, caps)
    }

    #[test]
    fn test_run_name_shape() {
        let name = generate_run_name("handbook");
        let suffix = name.strip_prefix("handbook-").unwrap();
        assert_eq!(suffix.len(), 5);
        assert!(suffix
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit()));
    }

    #[tokio::test]
    async fn test_submit_validates_request() {
        let tmp = tempfile::TempDir::new().unwrap();
        let engine = engine_for(tmp.path());

        let unknown = engine.submit_run(SubmitRun::new("nope")).await;
        assert!(matches!(unknown, Err(IngestError::NotFound(_))));

        let missing_corpus = engine.submit_run(SubmitRun::new("handbook")).await;
        assert!(matches!(missing_corpus, Err(IngestError::NotFound(_))));

        engine.create_corpus("handbook").await.unwrap();
        let zero = engine
            .submit_run(SubmitRun::new("handbook").batch_size(0))
            .await;
        assert!(matches!(zero, Err(IngestError::Configuration(_))));

        let unassociated = engine
            .submit_run(SubmitRun::new("handbook").data_source("web::elsewhere"))
            .await;
        assert!(matches!(unassociated, Err(IngestError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_status_message_and_unknown_run() {
        let tmp = tempfile::TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("docs")).unwrap();
        fs::write(tmp.path().join("docs/a.md"), "# A\n\nalpha").unwrap();
        let engine = engine_for(tmp.path());
        engine.create_corpus("handbook").await.unwrap();

        let run = engine.submit_run(SubmitRun::new("handbook")).await.unwrap();
        assert_eq!(run.status, RunStatus::Initialized);
        assert!(run.name.starts_with("handbook-"));

        let done = engine
            .wait_for_run(&run.name, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(done.status, RunStatus::Completed);

        let report = engine.get_run_status(&run.name).await.unwrap();
        assert_eq!(
            report.message,
            format!(
                "Data ingestion run {} in COMPLETED. Check logs for more details.",
                run.name
            )
        );
        assert!(matches!(
            engine.get_run_status("handbook-zzzzz").await,
            Err(IngestError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_corpus_removes_runs() {
        let tmp = tempfile::TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("docs")).unwrap();
        fs::write(tmp.path().join("docs/a.txt"), "alpha").unwrap();
        let engine = engine_for(tmp.path());
        engine.create_corpus("handbook").await.unwrap();

        let run = engine.submit_run(SubmitRun::new("handbook")).await.unwrap();
        engine
            .wait_for_run(&run.name, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(engine.list_runs("handbook", None).await.unwrap().len(), 1);

        engine.delete_corpus("handbook").await.unwrap();
        assert!(engine.list_runs("handbook", None).await.unwrap().is_empty());
        assert!(!engine
            .capabilities()
            .vector_store
            .corpus_exists("handbook")
            .await
            .unwrap());
    }
}
