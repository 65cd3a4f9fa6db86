//! Content fingerprints and the run-scoped fingerprint map.
//!
//! A fingerprint is the hex SHA-256 of a document's raw bytes. Identical
//! bytes always produce identical fingerprints, so unchanged documents are
//! recognised across runs without re-embedding them.

use std::collections::HashMap;

use sha2::{Digest, Sha256};

use crate::error::{IngestError, Result};
use crate::models::DataPointVector;

/// Mapping from data point FQN to the content hash currently stored for it.
pub type FingerprintMap = HashMap<String, String>;

/// Hex SHA-256 of raw content bytes.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Build the FQN → hash map from the stored vectors of a corpus.
///
/// Stores keep one record per chunk, so the same FQN usually appears
/// several times. The first occurrence in listing order wins. A record
/// missing its FQN or hash aborts the build: diffing against state we
/// cannot read would produce a wrong plan.
pub fn build_fingerprint_map(vectors: &[DataPointVector]) -> Result<FingerprintMap> {
    let mut map = FingerprintMap::with_capacity(vectors.len());
    for vector in vectors {
        let fqn = non_empty(vector.data_point_fqn.as_deref()).ok_or_else(|| {
            IngestError::MalformedVectorRecord {
                vector_id: vector.data_point_vector_id.clone(),
                missing: "data_point_fqn",
            }
        })?;
        let hash = non_empty(vector.data_point_hash.as_deref()).ok_or_else(|| {
            IngestError::MalformedVectorRecord {
                vector_id: vector.data_point_vector_id.clone(),
                missing: "data_point_hash",
            }
        })?;
        map.entry(fqn.to_string())
            .or_insert_with(|| hash.to_string());
    }
    Ok(map)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}
