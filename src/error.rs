//! Error taxonomy for the reconciliation engine.
//!
//! Every failure the engine can observe maps onto one of a few categories:
//! configuration, source, batch, integrity, or internal. The executor and
//! engine convert these into recorded run state; they never escape the
//! engine's public entry point as uncaught faults.

use thiserror::Error;

pub type Result<T, E = IngestError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("No parser registered for extension '{extension}' ({locator})")]
    UnsupportedExtension { extension: String, locator: String },
    #[error("Source error at {locator}: {message}")]
    Source { locator: String, message: String },
    #[error("Batch error: {0}")]
    Batch(String),
    #[error("Malformed vector record {vector_id}: missing {missing}")]
    MalformedVectorRecord {
        vector_id: String,
        missing: &'static str,
    },
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("A run for corpus '{corpus}' and data source '{data_source}' is already in progress")]
    ConcurrentRun { corpus: String, data_source: String },
    #[error("Invalid run transition: {from} -> {event}")]
    InvalidTransition { from: String, event: &'static str },
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl IngestError {
    pub fn source_error(locator: impl Into<String>, message: impl ToString) -> Self {
        IngestError::Source {
            locator: locator.into(),
            message: message.to_string(),
        }
    }

    /// Coarse category used in run error records.
    pub fn category(&self) -> &'static str {
        match self {
            IngestError::Configuration(_) | IngestError::UnsupportedExtension { .. } => {
                "configuration"
            }
            IngestError::Source { .. } | IngestError::Http(_) | IngestError::Io(_) => "source",
            IngestError::Batch(_) => "batch",
            IngestError::MalformedVectorRecord { .. } => "integrity",
            _ => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(
            IngestError::Configuration("x".into()).category(),
            "configuration"
        );
        assert_eq!(
            IngestError::UnsupportedExtension {
                extension: ".xyz".into(),
                locator: "a.xyz".into()
            }
            .category(),
            "configuration"
        );
        assert_eq!(IngestError::source_error("a.md", "gone").category(), "source");
        assert_eq!(IngestError::Batch("boom".into()).category(), "batch");
        assert_eq!(
            IngestError::MalformedVectorRecord {
                vector_id: "v1".into(),
                missing: "data_point_hash"
            }
            .category(),
            "integrity"
        );
        assert_eq!(IngestError::NotFound("run".into()).category(), "internal");
    }

    #[test]
    fn test_display_mentions_extension() {
        let err = IngestError::UnsupportedExtension {
            extension: ".bin".into(),
            locator: "blob.bin".into(),
        };
        assert!(err.to_string().contains(".bin"));
    }
}
