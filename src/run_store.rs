//! Durable ingestion run records.
//!
//! A [`RunStore`] persists [`IngestionRun`]s keyed by name plus an
//! append-only list of [`ErrorRecord`]s per run. Listing is
//! most-recent-first, by a monotonic sequence number assigned at creation.
//!
//! The store is where run exclusion is decided. `create_run` refuses a run
//! whose scope overlaps an active run of the same corpus, and
//! `update_status` only moves a run out of the status the caller expects.
//! Both are single atomic steps, so they hold across processes sharing one
//! database.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tokio::sync::RwLock;

use crate::error::{IngestError, Result};
use crate::models::{ErrorRecord, IngestionRun, RunStatus};

#[async_trait]
pub trait RunStore: Send + Sync {
    /// Insert a new run. Fails with `ConcurrentRun` if an INITIALIZED or
    /// RUNNING run of the same corpus has an overlapping scope.
    async fn create_run(&self, run: &IngestionRun) -> Result<()>;

    async fn get_run(&self, name: &str) -> Result<Option<IngestionRun>>;

    /// Compare-and-set: move the run from `from` to `to`. Fails with
    /// `InvalidTransition` if the stored status is no longer `from`.
    async fn update_status(&self, name: &str, from: RunStatus, to: RunStatus) -> Result<()>;

    /// Add error records; existing records are never touched.
    async fn append_errors(&self, name: &str, errors: &[ErrorRecord]) -> Result<()>;

    /// Runs for a corpus, newest first. With `data_source_fqn`, only runs
    /// created for that data source.
    async fn list_runs(&self, corpus: &str, data_source_fqn: Option<&str>)
        -> Result<Vec<IngestionRun>>;

    async fn list_errors(&self, name: &str) -> Result<Vec<ErrorRecord>>;

    /// Remove every run of a corpus and its errors. Returns the number of runs removed.
    async fn delete_runs_for_corpus(&self, corpus: &str) -> Result<usize>;
}

fn unknown_run(name: &str) -> IngestError {
    IngestError::NotFound(format!("run '{}'", name))
}

fn stale_status(actual: RunStatus, to: RunStatus) -> IngestError {
    IngestError::InvalidTransition {
        from: actual.as_str().to_string(),
        event: to.as_str(),
    }
}

fn concurrent_run(run: &IngestionRun) -> IngestError {
    IngestError::ConcurrentRun {
        corpus: run.corpus_name.clone(),
        data_source: run.data_source_fqn.clone().unwrap_or_else(|| "*".to_string()),
    }
}

/// Two runs collide when either covers the whole corpus or both target the same source.
pub fn scopes_overlap(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    }
}

// ============ SQLite ============

#[derive(Clone)]
pub struct SqliteRunStore {
    pool: SqlitePool,
}

impl SqliteRunStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn row_to_run(row: &SqliteRow) -> Result<IngestionRun> {
    let mode: String = row.try_get("mode")?;
    let status: String = row.try_get("status")?;
    let batch_size: i64 = row.try_get("batch_size")?;
    Ok(IngestionRun {
        name: row.try_get("name")?,
        corpus_name: row.try_get("corpus_name")?,
        data_source_fqn: row.try_get("data_source_fqn")?,
        mode: mode.parse()?,
        batch_size: batch_size.max(1) as usize,
        raise_error_on_failure: row.try_get("raise_error_on_failure")?,
        status: status.parse()?,
        created_at: millis_to_datetime(row.try_get("created_at")?),
        updated_at: millis_to_datetime(row.try_get("updated_at")?),
    })
}

fn row_to_error(row: &SqliteRow) -> Result<ErrorRecord> {
    let fqns_json: String = row.try_get("data_point_fqns_json")?;
    Ok(ErrorRecord {
        key: row.try_get("error_key")?,
        category: row.try_get("category")?,
        data_source_fqn: row.try_get("data_source_fqn")?,
        data_point_fqns: serde_json::from_str(&fqns_json)?,
        message: row.try_get("message")?,
        occurred_at: millis_to_datetime(row.try_get("occurred_at")?),
    })
}

#[async_trait]
impl RunStore for SqliteRunStore {
    async fn create_run(&self, run: &IngestionRun) -> Result<()> {
        // One statement: the overlap check and the insert cannot interleave
        // with another writer.
        let inserted = sqlx::query(
            r#"
            INSERT INTO ingestion_runs
                (name, corpus_name, data_source_fqn, mode, batch_size,
                 raise_error_on_failure, status, created_at, updated_at, seq)
            SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?,
                   (SELECT COALESCE(MAX(seq), 0) + 1 FROM ingestion_runs)
            WHERE NOT EXISTS (
                SELECT 1 FROM ingestion_runs
                WHERE corpus_name = ?
                  AND status IN ('INITIALIZED', 'RUNNING')
                  AND (data_source_fqn IS NULL OR ? IS NULL OR data_source_fqn = ?)
            )
            "#,
        )
        .bind(&run.name)
        .bind(&run.corpus_name)
        .bind(&run.data_source_fqn)
        .bind(run.mode.as_str())
        .bind(run.batch_size as i64)
        .bind(run.raise_error_on_failure)
        .bind(run.status.as_str())
        .bind(run.created_at.timestamp_millis())
        .bind(run.updated_at.timestamp_millis())
        .bind(&run.corpus_name)
        .bind(&run.data_source_fqn)
        .bind(&run.data_source_fqn)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if inserted == 0 {
            return Err(concurrent_run(run));
        }
        Ok(())
    }

    async fn get_run(&self, name: &str) -> Result<Option<IngestionRun>> {
        let row = sqlx::query("SELECT * FROM ingestion_runs WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_run).transpose()
    }

    async fn update_status(&self, name: &str, from: RunStatus, to: RunStatus) -> Result<()> {
        let result = sqlx::query(
            "UPDATE ingestion_runs SET status = ?, updated_at = ? WHERE name = ? AND status = ?",
        )
        .bind(to.as_str())
        .bind(Utc::now().timestamp_millis())
        .bind(name)
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return match self.get_run(name).await? {
                Some(current) => Err(stale_status(current.status, to)),
                None => Err(unknown_run(name)),
            };
        }
        Ok(())
    }

    async fn append_errors(&self, name: &str, errors: &[ErrorRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for error in errors {
            sqlx::query(
                r#"
                INSERT INTO ingestion_run_errors
                    (run_name, error_key, category, data_source_fqn,
                     data_point_fqns_json, message, occurred_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(name)
            .bind(&error.key)
            .bind(&error.category)
            .bind(&error.data_source_fqn)
            .bind(serde_json::to_string(&error.data_point_fqns)?)
            .bind(&error.message)
            .bind(error.occurred_at.timestamp_millis())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn list_runs(
        &self,
        corpus: &str,
        data_source_fqn: Option<&str>,
    ) -> Result<Vec<IngestionRun>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM ingestion_runs
            WHERE corpus_name = ? AND (? IS NULL OR data_source_fqn = ?)
            ORDER BY seq DESC
            "#,
        )
        .bind(corpus)
        .bind(data_source_fqn)
        .bind(data_source_fqn)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_run).collect()
    }

    async fn list_errors(&self, name: &str) -> Result<Vec<ErrorRecord>> {
        let rows = sqlx::query("SELECT * FROM ingestion_run_errors WHERE run_name = ? ORDER BY id")
            .bind(name)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_error).collect()
    }

    async fn delete_runs_for_corpus(&self, corpus: &str) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "DELETE FROM ingestion_run_errors WHERE run_name IN (SELECT name FROM ingestion_runs WHERE corpus_name = ?)",
        )
        .bind(corpus)
        .execute(&mut *tx)
        .await?;
        let removed = sqlx::query("DELETE FROM ingestion_runs WHERE corpus_name = ?")
            .bind(corpus)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(removed as usize)
    }
}

// ============ In-memory ============

#[derive(Default)]
struct MemoryState {
    /// Creation order; newest last.
    runs: Vec<IngestionRun>,
    errors: HashMap<String, Vec<ErrorRecord>>,
}

#[derive(Default)]
pub struct InMemoryRunStore {
    state: RwLock<MemoryState>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn create_run(&self, run: &IngestionRun) -> Result<()> {
        let mut state = self.state.write().await;
        if state.runs.iter().any(|r| r.name == run.name) {
            return Err(IngestError::Configuration(format!(
                "run '{}' already exists",
                run.name
            )));
        }
        let busy = state.runs.iter().any(|r| {
            r.corpus_name == run.corpus_name
                && r.status.is_active()
                && scopes_overlap(r.data_source_fqn.as_deref(), run.data_source_fqn.as_deref())
        });
        if busy {
            return Err(concurrent_run(run));
        }
        state.runs.push(run.clone());
        Ok(())
    }

    async fn get_run(&self, name: &str) -> Result<Option<IngestionRun>> {
        let state = self.state.read().await;
        Ok(state.runs.iter().find(|r| r.name == name).cloned())
    }

    async fn update_status(&self, name: &str, from: RunStatus, to: RunStatus) -> Result<()> {
        let mut state = self.state.write().await;
        let run = state
            .runs
            .iter_mut()
            .find(|r| r.name == name)
            .ok_or_else(|| unknown_run(name))?;
        if run.status != from {
            return Err(stale_status(run.status, to));
        }
        run.status = to;
        run.updated_at = Utc::now();
        Ok(())
    }

    async fn append_errors(&self, name: &str, errors: &[ErrorRecord]) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .errors
            .entry(name.to_string())
            .or_default()
            .extend(errors.iter().cloned());
        Ok(())
    }

    async fn list_runs(
        &self,
        corpus: &str,
        data_source_fqn: Option<&str>,
    ) -> Result<Vec<IngestionRun>> {
        let state = self.state.read().await;
        Ok(state
            .runs
            .iter()
            .rev()
            .filter(|r| r.corpus_name == corpus)
            .filter(|r| data_source_fqn.map_or(true, |fqn| r.data_source_fqn.as_deref() == Some(fqn)))
            .cloned()
            .collect())
    }

    async fn list_errors(&self, name: &str) -> Result<Vec<ErrorRecord>> {
        let state = self.state.read().await;
        Ok(state.errors.get(name).cloned().unwrap_or_default())
    }

    async fn delete_runs_for_corpus(&self, corpus: &str) -> Result<usize> {
        let mut state = self.state.write().await;
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.runs)
            .into_iter()
            .partition(|r| r.corpus_name == corpus);
        state.runs = kept;
        for run in &removed {
            state.errors.remove(&run.name);
        }
        Ok(removed.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::migrate;
    use crate::models::IngestionMode;

    fn run(name: &str, corpus: &str, source: Option<&str>) -> IngestionRun {
        run_with_status(name, corpus, source, RunStatus::Initialized)
    }

    fn run_with_status(
        name: &str,
        corpus: &str,
        source: Option<&str>,
        status: RunStatus,
    ) -> IngestionRun {
        IngestionRun {
            name: name.to_string(),
            corpus_name: corpus.to_string(),
            data_source_fqn: source.map(str::to_string),
            mode: IngestionMode::Full,
            batch_size: 50,
            raise_error_on_failure: false,
            status,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn error(key: &str) -> ErrorRecord {
        ErrorRecord {
            key: key.to_string(),
            category: "batch".to_string(),
            data_source_fqn: Some("localdir::docs".to_string()),
            data_point_fqns: vec!["localdir::docs::a.md".to_string()],
            message: "embedding call failed".to_string(),
            occurred_at: Utc::now(),
        }
    }

    async fn sqlite_store() -> SqliteRunStore {
        let pool = db::connect_in_memory().await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        SqliteRunStore::new(pool)
    }

    async fn exercise(store: &dyn RunStore) {
        store.create_run(&run("c-1", "c", Some("localdir::docs"))).await.unwrap();
        store
            .create_run(&run_with_status("c-2", "c", None, RunStatus::Completed))
            .await
            .unwrap();
        store.create_run(&run("d-1", "d", None)).await.unwrap();

        let names: Vec<String> = store
            .list_runs("c", None)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["c-2", "c-1"]);
        assert_eq!(
            store.list_runs("c", Some("localdir::docs")).await.unwrap().len(),
            1
        );

        store
            .update_status("c-1", RunStatus::Initialized, RunStatus::Running)
            .await
            .unwrap();
        let fetched = store.get_run("c-1").await.unwrap().unwrap();
        assert_eq!(fetched.status, RunStatus::Running);
        assert_eq!(fetched.mode, IngestionMode::Full);
        assert_eq!(fetched.batch_size, 50);
        assert!(store.get_run("missing").await.unwrap().is_none());
        assert!(matches!(
            store
                .update_status("missing", RunStatus::Running, RunStatus::Failed)
                .await,
            Err(IngestError::NotFound(_))
        ));

        // A writer holding a stale view of the status is refused.
        store
            .update_status("c-1", RunStatus::Running, RunStatus::Failed)
            .await
            .unwrap();
        assert!(matches!(
            store
                .update_status("c-1", RunStatus::Running, RunStatus::Completed)
                .await,
            Err(IngestError::InvalidTransition { .. })
        ));
        assert_eq!(
            store.get_run("c-1").await.unwrap().unwrap().status,
            RunStatus::Failed
        );

        store.append_errors("c-1", &[error("upsert-batch-2")]).await.unwrap();
        store.append_errors("c-1", &[error("upsert-batch-5")]).await.unwrap();
        let errors = store.list_errors("c-1").await.unwrap();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].key, "upsert-batch-2");
        assert_eq!(errors[1].data_point_fqns, vec!["localdir::docs::a.md"]);

        assert_eq!(store.delete_runs_for_corpus("c").await.unwrap(), 2);
        assert!(store.list_runs("c", None).await.unwrap().is_empty());
        assert!(store.list_errors("c-1").await.unwrap().is_empty());
        assert_eq!(store.list_runs("d", None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sqlite_run_store() {
        exercise(&sqlite_store().await).await;
    }

    #[tokio::test]
    async fn test_memory_run_store() {
        exercise(&InMemoryRunStore::new()).await;
    }

    async fn exercise_exclusion(store: &dyn RunStore) {
        store.create_run(&run("c-1", "c", Some("git::a"))).await.unwrap();
        store.create_run(&run("c-2", "c", Some("git::b"))).await.unwrap();
        store.create_run(&run("d-1", "d", None)).await.unwrap();

        for clash in [run("c-3", "c", Some("git::a")), run("c-4", "c", None)] {
            assert!(matches!(
                store.create_run(&clash).await,
                Err(IngestError::ConcurrentRun { .. })
            ));
        }

        store
            .update_status("c-1", RunStatus::Initialized, RunStatus::Failed)
            .await
            .unwrap();
        store.create_run(&run("c-5", "c", Some("git::a"))).await.unwrap();
        assert!(store.get_run("c-3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_run_exclusion() {
        exercise_exclusion(&sqlite_store().await).await;
    }

    #[tokio::test]
    async fn test_memory_run_exclusion() {
        exercise_exclusion(&InMemoryRunStore::new()).await;
    }

    #[tokio::test]
    async fn test_exclusion_holds_across_connections_to_one_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("runs.sqlite");
        let first = db::connect_path(&path).await.unwrap();
        migrate::run_migrations(&first).await.unwrap();
        let second = db::connect_path(&path).await.unwrap();

        let (a, b) = (SqliteRunStore::new(first), SqliteRunStore::new(second));
        let run_a = run("c-aaaaa", "c", None);
        let run_b = run("c-bbbbb", "c", None);
        let (ra, rb) = tokio::join!(a.create_run(&run_a), b.create_run(&run_b));
        assert!(ra.is_ok() != rb.is_ok());
        assert_eq!(a.list_runs("c", None).await.unwrap().len(), 1);
    }

    #[test]
    fn test_scopes_overlap() {
        assert!(scopes_overlap(None, Some("a")));
        assert!(scopes_overlap(Some("a"), None));
        assert!(scopes_overlap(Some("a"), Some("a")));
        assert!(!scopes_overlap(Some("a"), Some("b")));
    }

    #[tokio::test]
    async fn test_duplicate_run_name_rejected() {
        let store = sqlite_store().await;
        store
            .create_run(&run_with_status("c-1", "c", None, RunStatus::Completed))
            .await
            .unwrap();
        assert!(matches!(
            store
                .create_run(&run_with_status("c-1", "c", None, RunStatus::Completed))
                .await,
            Err(IngestError::Database(_))
        ));
    }
}
