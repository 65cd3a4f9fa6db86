//! Vector store abstraction.
//!
//! The [`VectorStore`] trait is everything the reconciliation engine needs
//! from a corpus backend: corpus lifecycle, a listing of stored vectors for
//! fingerprinting, and keyed upsert / delete. Implementations must be
//! `Send + Sync`; the executor calls them from several workers at once.
//!
//! Stores keep one record per chunk. Every record of a data point carries
//! the data point's FQN and hash, so a listing can be folded back into a
//! fingerprint map.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | `create_corpus` | Create an empty corpus (idempotent) |
//! | `delete_corpus` | Drop a corpus and every vector in it |
//! | `list_vectors` | Stored records, optionally for one data source |
//! | `upsert` | Write data points, replacing any records with the same FQN |
//! | `delete` | Remove every record of the given FQNs |
//! | `delete_vectors` | Remove records by vector id |
//! | `replace` | Write data points, superseding what is stored for them |

use std::collections::HashSet;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{DataPoint, DataPointVector};

/// A data point paired with one embedding per chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedDataPoint {
    pub data_point: DataPoint,
    /// `vectors[i]` embeds `data_point.content.chunks[i]`.
    pub vectors: Vec<Vec<f32>>,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Backend name for logs and `ksync sources`.
    fn name(&self) -> &'static str;

    async fn create_corpus(&self, corpus: &str) -> Result<()>;

    async fn delete_corpus(&self, corpus: &str) -> Result<()>;

    async fn corpus_exists(&self, corpus: &str) -> Result<bool>;

    /// Stored records in a stable order (insertion order).
    /// Fails with `NotFound` for an unknown corpus.
    async fn list_vectors(
        &self,
        corpus: &str,
        data_source_fqn: Option<&str>,
    ) -> Result<Vec<DataPointVector>>;

    /// Write all data points in one call. Either every point is written or
    /// none is.
    async fn upsert(&self, corpus: &str, points: &[EmbeddedDataPoint]) -> Result<()>;

    async fn delete(&self, corpus: &str, data_point_fqns: &[String]) -> Result<()>;

    async fn delete_vectors(&self, corpus: &str, vector_ids: &[String]) -> Result<()>;

    /// Whether `upsert` replaces existing records with the same FQN. When
    /// false `upsert` only appends.
    fn supports_keyed_overwrite(&self) -> bool {
        true
    }

    /// Write `points` so that afterwards only their new records remain.
    ///
    /// Without keyed overwrite the old record ids are listed first, the new
    /// records are written, and only then are the old ids removed. A failed
    /// write leaves the stored records untouched. If the final removal
    /// fails, old and new records coexist; the fingerprint map keeps the
    /// first listed (old) hash, so the next run rewrites the point.
    async fn replace(
        &self,
        corpus: &str,
        data_source_fqn: &str,
        points: &[EmbeddedDataPoint],
    ) -> Result<()> {
        if self.supports_keyed_overwrite() {
            return self.upsert(corpus, points).await;
        }

        let fqns: HashSet<&str> = points
            .iter()
            .map(|p| p.data_point.data_point_fqn.as_str())
            .collect();
        let superseded: Vec<String> = self
            .list_vectors(corpus, Some(data_source_fqn))
            .await?
            .into_iter()
            .filter(|v| {
                v.data_point_fqn
                    .as_deref()
                    .map_or(false, |fqn| fqns.contains(fqn))
            })
            .map(|v| v.data_point_vector_id)
            .collect();

        self.upsert(corpus, points).await?;
        if !superseded.is_empty() {
            self.delete_vectors(corpus, &superseded).await?;
        }
        Ok(())
    }

    /// Whether stored records carry real content hashes. Runs against a
    /// store without them are refused.
    fn supports_change_detection(&self) -> bool {
        true
    }
}
