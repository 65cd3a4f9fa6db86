use sqlx::SqlitePool;

use crate::error::Result;

/// Create every table and index. Safe to run repeatedly.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS corpora (
            name TEXT PRIMARY KEY,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // data_point_fqn / data_point_hash stay nullable: rows written by other
    // tools may lack them and must be rejected at planning, not here.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS data_point_vectors (
            id TEXT PRIMARY KEY,
            corpus TEXT NOT NULL,
            data_source_fqn TEXT NOT NULL,
            data_point_fqn TEXT,
            data_point_hash TEXT,
            chunk_index INTEGER NOT NULL DEFAULT 0,
            text TEXT NOT NULL DEFAULT '',
            metadata_json TEXT NOT NULL DEFAULT '{}',
            embedding BLOB,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (corpus) REFERENCES corpora(name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingestion_runs (
            name TEXT PRIMARY KEY,
            corpus_name TEXT NOT NULL,
            data_source_fqn TEXT,
            mode TEXT NOT NULL,
            batch_size INTEGER NOT NULL,
            raise_error_on_failure INTEGER NOT NULL,
            status TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            seq INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingestion_run_errors (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_name TEXT NOT NULL,
            error_key TEXT NOT NULL,
            category TEXT NOT NULL,
            data_source_fqn TEXT,
            data_point_fqns_json TEXT NOT NULL DEFAULT '[]',
            message TEXT NOT NULL,
            occurred_at INTEGER NOT NULL,
            FOREIGN KEY (run_name) REFERENCES ingestion_runs(name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_vectors_corpus_fqn ON data_point_vectors(corpus, data_point_fqn)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_vectors_corpus_source ON data_point_vectors(corpus, data_source_fqn)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_runs_corpus_seq ON ingestion_runs(corpus_name, seq DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_run_errors_run ON ingestion_run_errors(run_name)")
        .execute(pool)
        .await?;

    Ok(())
}
