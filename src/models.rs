//! Core data models used throughout the reconciliation engine.
//!
//! These types represent the raw documents, data points, stored vectors and
//! ingestion runs that flow between loaders, parsers, the planner, the batch
//! executor and the run tracker.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IngestError;

/// Separator between the parts of a fully qualified name.
pub const FQN_SEPARATOR: &str = "::";

/// Build the fully qualified name of a data point from its data source and locator.
///
/// The result is deterministic: the same data source and locator always map
/// to the same FQN, which is what makes change detection across runs work.
pub fn data_point_fqn(data_source_fqn: &str, locator: &str) -> String {
    format!("{}{}{}", data_source_fqn, FQN_SEPARATOR, locator)
}

/// Raw item produced by a loader before parsing.
#[derive(Debug, Clone)]
pub struct RawDocument {
    /// FQN of the data source this document was enumerated from.
    pub data_source_fqn: String,
    /// Stable locator within the data source (relative path, URL, record id).
    pub locator: String,
    /// Lowercase file extension including the dot (e.g. `".md"`), or empty.
    pub extension: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
    pub updated_at: DateTime<Utc>,
    pub metadata: BTreeMap<String, String>,
}

impl RawDocument {
    pub fn fqn(&self) -> String {
        data_point_fqn(&self.data_source_fqn, &self.locator)
    }
}

/// A chunk of parsed content inside a [`DataPoint`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_index: i64,
    pub text: String,
}

/// Parsed content of a data point: chunks plus free-form metadata
/// (source path, mime type, parser name).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataPointContent {
    pub chunks: Vec<Chunk>,
    pub metadata: BTreeMap<String, String>,
}

/// One addressable unit of ingested content.
#[derive(Debug, Clone, PartialEq)]
pub struct DataPoint {
    pub data_point_fqn: String,
    pub data_point_hash: String,
    pub data_source_fqn: String,
    pub content: DataPointContent,
}

/// A stored vector record, as read back from a vector store.
///
/// Several records usually share one `data_point_fqn` (one per chunk).
/// The FQN and hash fields are optional because records written by other
/// tools may lack them; [`crate::fingerprint::build_fingerprint_map`]
/// rejects such records.
#[derive(Debug, Clone, PartialEq)]
pub struct DataPointVector {
    pub data_point_vector_id: String,
    pub data_point_fqn: Option<String>,
    pub data_point_hash: Option<String>,
}

/// How a run treats stored data points that are missing from the new parse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IngestionMode {
    /// Additive sync: inserts and updates only, never deletes.
    #[default]
    Incremental,
    /// Full sync: stale data points are deleted.
    Full,
}

impl IngestionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestionMode::Incremental => "INCREMENTAL",
            IngestionMode::Full => "FULL",
        }
    }
}

impl fmt::Display for IngestionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IngestionMode {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INCREMENTAL" => Ok(IngestionMode::Incremental),
            "FULL" => Ok(IngestionMode::Full),
            other => Err(IngestError::Configuration(format!(
                "unknown ingestion mode '{}': expected incremental or full",
                other
            ))),
        }
    }
}

/// Lifecycle status of an ingestion run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    #[default]
    Initialized,
    Running,
    Completed,
    Failed,
    PartiallyFailed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Initialized => "INITIALIZED",
            RunStatus::Running => "RUNNING",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
            RunStatus::PartiallyFailed => "PARTIALLY_FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::PartiallyFailed
        )
    }

    /// Whether a run in this status still holds its (corpus, data source) slot.
    pub fn is_active(&self) -> bool {
        matches!(self, RunStatus::Initialized | RunStatus::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INITIALIZED" => Ok(RunStatus::Initialized),
            "RUNNING" => Ok(RunStatus::Running),
            "COMPLETED" => Ok(RunStatus::Completed),
            "FAILED" => Ok(RunStatus::Failed),
            "PARTIALLY_FAILED" => Ok(RunStatus::PartiallyFailed),
            other => Err(IngestError::Configuration(format!(
                "unknown run status '{}'",
                other
            ))),
        }
    }
}

/// One reconciliation attempt, as persisted by a [`crate::run_store::RunStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionRun {
    pub name: String,
    pub corpus_name: String,
    /// `None` means every data source associated with the corpus.
    pub data_source_fqn: Option<String>,
    pub mode: IngestionMode,
    pub batch_size: usize,
    pub raise_error_on_failure: bool,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One failing unit of work recorded against a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Batch id (`upsert-batch-3`) or data point FQN for per-document failures.
    pub key: String,
    /// Error category: configuration, source, batch, integrity or internal.
    pub category: String,
    pub data_source_fqn: Option<String>,
    pub data_point_fqns: Vec<String>,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

/// Caller-visible status report returned by `get_run_status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunStatusReport {
    pub status: RunStatus,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_point_fqn_is_deterministic() {
        let a = data_point_fqn("localdir::/docs", "guide/intro.md");
        let b = data_point_fqn("localdir::/docs", "guide/intro.md");
        assert_eq!(a, b);
        assert_eq!(a, "localdir::/docs::guide/intro.md");
    }

    #[test]
    fn test_run_status_roundtrip_strings() {
        for status in [
            RunStatus::Initialized,
            RunStatus::Running,
            RunStatus::Completed,
            RunStatus::Failed,
            RunStatus::PartiallyFailed,
        ] {
            assert_eq!(status.as_str().parse::<RunStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(!RunStatus::Initialized.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::PartiallyFailed.is_terminal());
    }

    #[test]
    fn test_mode_parse_case_insensitive() {
        assert_eq!("full".parse::<IngestionMode>().unwrap(), IngestionMode::Full);
        assert_eq!(
            "Incremental".parse::<IngestionMode>().unwrap(),
            IngestionMode::Incremental
        );
        assert!("append".parse::<IngestionMode>().is_err());
    }
}
