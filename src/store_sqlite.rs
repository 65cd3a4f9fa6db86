//! SQLite-backed [`VectorStore`].
//!
//! One row per chunk in `data_point_vectors`, embeddings as little-endian
//! f32 BLOBs. Upsert and delete each run in a single transaction, so a
//! failed batch leaves no partial rows behind.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use crate::embedding::vec_to_blob;
use crate::error::{IngestError, Result};
use crate::models::DataPointVector;
use crate::store::{EmbeddedDataPoint, VectorStore};

#[derive(Clone)]
pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn require_corpus<'e, E>(executor: E, corpus: &str) -> Result<()>
    where
        E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
    {
        let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM corpora WHERE name = ?")
            .bind(corpus)
            .fetch_one(executor)
            .await?;
        if exists {
            Ok(())
        } else {
            Err(IngestError::NotFound(format!("corpus '{}'", corpus)))
        }
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn create_corpus(&self, corpus: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO corpora (name, created_at) VALUES (?, ?)")
            .bind(corpus)
            .bind(Utc::now().timestamp())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_corpus(&self, corpus: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        Self::require_corpus(&mut *tx, corpus).await?;
        sqlx::query("DELETE FROM data_point_vectors WHERE corpus = ?")
            .bind(corpus)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM corpora WHERE name = ?")
            .bind(corpus)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn corpus_exists(&self, corpus: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM corpora WHERE name = ?")
            .bind(corpus)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn list_vectors(
        &self,
        corpus: &str,
        data_source_fqn: Option<&str>,
    ) -> Result<Vec<DataPointVector>> {
        Self::require_corpus(&self.pool, corpus).await?;

        let rows = sqlx::query(
            r#"
            SELECT id, data_point_fqn, data_point_hash
            FROM data_point_vectors
            WHERE corpus = ? AND (? IS NULL OR data_source_fqn = ?)
            ORDER BY rowid
            "#,
        )
        .bind(corpus)
        .bind(data_source_fqn)
        .bind(data_source_fqn)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<DataPointVector> {
                Ok(DataPointVector {
                    data_point_vector_id: row.try_get("id")?,
                    data_point_fqn: row.try_get("data_point_fqn")?,
                    data_point_hash: row.try_get("data_point_hash")?,
                })
            })
            .collect()
    }

    async fn upsert(&self, corpus: &str, points: &[EmbeddedDataPoint]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        Self::require_corpus(&mut *tx, corpus).await?;
        let now = Utc::now().timestamp();

        for point in points {
            let dp = &point.data_point;
            if point.vectors.len() != dp.content.chunks.len() {
                return Err(IngestError::Batch(format!(
                    "{}: {} vectors for {} chunks",
                    dp.data_point_fqn,
                    point.vectors.len(),
                    dp.content.chunks.len()
                )));
            }

            sqlx::query("DELETE FROM data_point_vectors WHERE corpus = ? AND data_point_fqn = ?")
                .bind(corpus)
                .bind(&dp.data_point_fqn)
                .execute(&mut *tx)
                .await?;

            let metadata_json = serde_json::to_string(&dp.content.metadata)?;
            for (chunk, vector) in dp.content.chunks.iter().zip(&point.vectors) {
                sqlx::query(
                    r#"
                    INSERT INTO data_point_vectors
                        (id, corpus, data_source_fqn, data_point_fqn, data_point_hash,
                         chunk_index, text, metadata_json, embedding, created_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(uuid::Uuid::new_v4().to_string())
                .bind(corpus)
                .bind(&dp.data_source_fqn)
                .bind(&dp.data_point_fqn)
                .bind(&dp.data_point_hash)
                .bind(chunk.chunk_index)
                .bind(&chunk.text)
                .bind(&metadata_json)
                .bind(vec_to_blob(vector))
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, corpus: &str, data_point_fqns: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        Self::require_corpus(&mut *tx, corpus).await?;
        for fqn in data_point_fqns {
            sqlx::query("DELETE FROM data_point_vectors WHERE corpus = ? AND data_point_fqn = ?")
                .bind(corpus)
                .bind(fqn)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete_vectors(&self, corpus: &str, vector_ids: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        Self::require_corpus(&mut *tx, corpus).await?;
        for id in vector_ids {
            sqlx::query("DELETE FROM data_point_vectors WHERE corpus = ? AND id = ?")
                .bind(corpus)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::embedding::blob_to_vec;
    use crate::migrate;
    use crate::models::{Chunk, DataPoint, DataPointContent};

    async fn store() -> SqliteVectorStore {
        let pool = db::connect_in_memory().await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        let store = SqliteVectorStore::new(pool);
        store.create_corpus("c").await.unwrap();
        store
    }

    fn point(fqn: &str, hash: &str, chunks: usize) -> EmbeddedDataPoint {
        EmbeddedDataPoint {
            data_point: DataPoint {
                data_point_fqn: fqn.to_string(),
                data_point_hash: hash.to_string(),
                data_source_fqn: "localdir::docs".to_string(),
                content: DataPointContent {
                    chunks: (0..chunks)
                        .map(|i| Chunk {
                            chunk_index: i as i64,
                            text: format!("chunk {}", i),
                        })
                        .collect(),
                    metadata: Default::default(),
                },
            },
            vectors: vec![vec![0.5, -1.0]; chunks],
        }
    }

    #[tokio::test]
    async fn test_upsert_overwrites_by_fqn() {
        let store = store().await;
        store.upsert("c", &[point("a", "h1", 3)]).await.unwrap();
        store.upsert("c", &[point("a", "h2", 2)]).await.unwrap();

        let vectors = store.list_vectors("c", None).await.unwrap();
        assert_eq!(vectors.len(), 2);
        assert!(vectors
            .iter()
            .all(|v| v.data_point_hash.as_deref() == Some("h2")));
    }

    #[tokio::test]
    async fn test_embedding_blob_persisted() {
        let store = store().await;
        store.upsert("c", &[point("a", "h1", 1)]).await.unwrap();
        let blob: Vec<u8> = sqlx::query_scalar("SELECT embedding FROM data_point_vectors")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(blob_to_vec(&blob), vec![0.5, -1.0]);
    }

    #[tokio::test]
    async fn test_failed_upsert_rolls_back() {
        let store = store().await;
        let mut bad = point("b", "h", 2);
        bad.vectors.clear();
        assert!(store.upsert("c", &[point("a", "h", 1), bad]).await.is_err());
        assert!(store.list_vectors("c", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_null_hash_rows_are_listed() {
        let store = store().await;
        sqlx::query(
            "INSERT INTO data_point_vectors (id, corpus, data_source_fqn, data_point_fqn, created_at) VALUES ('v1', 'c', 'localdir::docs', 'x', 0)",
        )
        .execute(&store.pool)
        .await
        .unwrap();
        let vectors = store.list_vectors("c", Some("localdir::docs")).await.unwrap();
        assert_eq!(vectors.len(), 1);
        assert_eq!(vectors[0].data_point_hash, None);
    }

    #[tokio::test]
    async fn test_delete_and_corpus_lifecycle() {
        let store = store().await;
        store
            .upsert("c", &[point("a", "h1", 1), point("b", "h2", 1)])
            .await
            .unwrap();
        store.delete("c", &["a".to_string()]).await.unwrap();
        let left = store.list_vectors("c", None).await.unwrap();
        assert_eq!(left.len(), 1);

        store
            .delete_vectors("c", &[left[0].data_point_vector_id.clone()])
            .await
            .unwrap();
        assert!(store.list_vectors("c", None).await.unwrap().is_empty());

        store.delete_corpus("c").await.unwrap();
        assert!(!store.corpus_exists("c").await.unwrap());
        assert!(matches!(
            store.list_vectors("c", None).await,
            Err(IngestError::NotFound(_))
        ));
    }
}
