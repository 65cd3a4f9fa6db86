//! In-memory [`VectorStore`] for tests and embedding in other hosts.
//!
//! Corpora are `Vec`s of records behind a `tokio::sync::RwLock`, so listing
//! order is insertion order.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{IngestError, Result};
use crate::models::DataPointVector;
use crate::store::{EmbeddedDataPoint, VectorStore};

/// One stored chunk record.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub id: String,
    pub data_source_fqn: String,
    pub data_point_fqn: Option<String>,
    pub data_point_hash: Option<String>,
    pub chunk_index: i64,
    pub text: String,
    pub vector: Vec<f32>,
}

#[derive(Default)]
pub struct InMemoryVectorStore {
    corpora: RwLock<HashMap<String, Vec<StoredRecord>>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a corpus, for assertions.
    pub async fn records(&self, corpus: &str) -> Vec<StoredRecord> {
        self.corpora
            .read()
            .await
            .get(corpus)
            .cloned()
            .unwrap_or_default()
    }

    /// Insert a raw record as-is, bypassing the upsert path.
    pub async fn insert_raw(&self, corpus: &str, record: StoredRecord) -> Result<()> {
        let mut corpora = self.corpora.write().await;
        let records = corpora
            .get_mut(corpus)
            .ok_or_else(|| unknown_corpus(corpus))?;
        records.push(record);
        Ok(())
    }
}

fn unknown_corpus(corpus: &str) -> IngestError {
    IngestError::NotFound(format!("corpus '{}'", corpus))
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn create_corpus(&self, corpus: &str) -> Result<()> {
        self.corpora
            .write()
            .await
            .entry(corpus.to_string())
            .or_default();
        Ok(())
    }

    async fn delete_corpus(&self, corpus: &str) -> Result<()> {
        self.corpora
            .write()
            .await
            .remove(corpus)
            .map(|_| ())
            .ok_or_else(|| unknown_corpus(corpus))
    }

    async fn corpus_exists(&self, corpus: &str) -> Result<bool> {
        Ok(self.corpora.read().await.contains_key(corpus))
    }

    async fn list_vectors(
        &self,
        corpus: &str,
        data_source_fqn: Option<&str>,
    ) -> Result<Vec<DataPointVector>> {
        let corpora = self.corpora.read().await;
        let records = corpora.get(corpus).ok_or_else(|| unknown_corpus(corpus))?;
        Ok(records
            .iter()
            .filter(|r| data_source_fqn.map_or(true, |fqn| r.data_source_fqn == fqn))
            .map(|r| DataPointVector {
                data_point_vector_id: r.id.clone(),
                data_point_fqn: r.data_point_fqn.clone(),
                data_point_hash: r.data_point_hash.clone(),
            })
            .collect())
    }

    async fn upsert(&self, corpus: &str, points: &[EmbeddedDataPoint]) -> Result<()> {
        for point in points {
            if point.vectors.len() != point.data_point.content.chunks.len() {
                return Err(IngestError::Batch(format!(
                    "{}: {} vectors for {} chunks",
                    point.data_point.data_point_fqn,
                    point.vectors.len(),
                    point.data_point.content.chunks.len()
                )));
            }
        }

        let mut corpora = self.corpora.write().await;
        let records = corpora
            .get_mut(corpus)
            .ok_or_else(|| unknown_corpus(corpus))?;
        for point in points {
            let dp = &point.data_point;
            records.retain(|r| r.data_point_fqn.as_deref() != Some(dp.data_point_fqn.as_str()));
            for (chunk, vector) in dp.content.chunks.iter().zip(&point.vectors) {
                records.push(StoredRecord {
                    id: uuid::Uuid::new_v4().to_string(),
                    data_source_fqn: dp.data_source_fqn.clone(),
                    data_point_fqn: Some(dp.data_point_fqn.clone()),
                    data_point_hash: Some(dp.data_point_hash.clone()),
                    chunk_index: chunk.chunk_index,
                    text: chunk.text.clone(),
                    vector: vector.clone(),
                });
            }
        }
        Ok(())
    }

    async fn delete(&self, corpus: &str, data_point_fqns: &[String]) -> Result<()> {
        let mut corpora = self.corpora.write().await;
        let records = corpora
            .get_mut(corpus)
            .ok_or_else(|| unknown_corpus(corpus))?;
        records.retain(|r| {
            r.data_point_fqn
                .as_ref()
                .map_or(true, |fqn| !data_point_fqns.contains(fqn))
        });
        Ok(())
    }

    async fn delete_vectors(&self, corpus: &str, vector_ids: &[String]) -> Result<()> {
        let mut corpora = self.corpora.write().await;
        let records = corpora
            .get_mut(corpus)
            .ok_or_else(|| unknown_corpus(corpus))?;
        records.retain(|r| !vector_ids.contains(&r.id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, DataPoint, DataPointContent};

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
            vectors: vec![vec![1.0, 0.0]; chunks],
        }
    }

    #[tokio::test]
    async fn test_upsert_replaces_all_chunks_of_fqn() {
        let store = InMemoryVectorStore::new();
        store.create_corpus("c").await.unwrap();
        store.upsert("c", &[point("a", "h1", 3)]).await.unwrap();
        store.upsert("c", &[point("a", "h2", 1)]).await.unwrap();

        let vectors = store.list_vectors("c", None).await.unwrap();
        assert_eq!(vectors.len(), 1);
        assert_eq!(vectors[0].data_point_hash.as_deref(), Some("h2"));
    }

    #[tokio::test]
    async fn test_delete_removes_every_record() {
        let store = InMemoryVectorStore::new();
        store.create_corpus("c").await.unwrap();
        store
            .upsert("c", &[point("a", "h1", 2), point("b", "h2", 2)])
            .await
            .unwrap();
        store.delete("c", &["a".to_string()]).await.unwrap();

        let vectors = store.list_vectors("c", None).await.unwrap();
        assert_eq!(vectors.len(), 2);
        assert!(vectors.iter().all(|v| v.data_point_fqn.as_deref() == Some("b")));
    }

    #[tokio::test]
    async fn test_delete_vectors_by_id() {
        let store = InMemoryVectorStore::new();
        store.create_corpus("c").await.unwrap();
        store.upsert("c", &[point("a", "h1", 2)]).await.unwrap();
        let first = store.records("c").await[0].id.clone();
        store.delete_vectors("c", &[first.clone()]).await.unwrap();

        let left = store.records("c").await;
        assert_eq!(left.len(), 1);
        assert_ne!(left[0].id, first);
    }

    #[tokio::test]
    async fn test_list_filters_by_data_source() {
        let store = InMemoryVectorStore::new();
        store.create_corpus("c").await.unwrap();
        store.upsert("c", &[point("a", "h1", 1)]).await.unwrap();
        assert_eq!(
            store.list_vectors("c", Some("localdir::docs")).await.unwrap().len(),
            1
        );
        assert!(store
            .list_vectors("c", Some("web::other"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_unknown_corpus_is_not_found() {
        let store = InMemoryVectorStore::new();
        assert!(matches!(
            store.list_vectors("nope", None).await,
            Err(IngestError::NotFound(_))
        ));
        assert!(store.delete_corpus("nope").await.is_err());
    }

    #[tokio::test]
    async fn test_mismatched_vector_count_writes_nothing() {
        let store = InMemoryVectorStore::new();
        store.create_corpus("c").await.unwrap();
        let mut bad = point("b", "h", 2);
        bad.vectors.pop();
        let res = store.upsert("c", &[point("a", "h", 1), bad]).await;
        assert!(res.is_err());
        assert!(store.records("c").await.is_empty());
    }
}
