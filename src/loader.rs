//! Data sources and the loader abstraction.
//!
//! A [`DataSource`] describes where documents come from; a [`Loader`]
//! enumerates them as a lazy stream of [`RawDocument`]s. Enumeration is
//! restartable: calling [`Loader::enumerate`] again with the same source
//! walks it from the beginning.
//!
//! Failures come in two shapes. If the source itself cannot be opened
//! (missing directory, failed clone) `enumerate` returns `Err` and no
//! documents are produced. If a single document cannot be read, the stream
//! yields an `Err` item for it and keeps going.
//!
//! | Type | Loader | FQN |
//! |------|--------|-----|
//! | `localdir` | [`crate::loader_fs::FsLoader`] | `localdir::{uri}` |
//! | `git` | [`crate::loader_git::GitLoader`] | `git::{uri}` |
//! | `web` | [`crate::loader_web::WebLoader`] | `web::{uri}` |

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Deserialize;

use crate::error::Result;
use crate::models::{RawDocument, FQN_SEPARATOR};

/// Lazy, finite sequence of documents from one data source.
pub type DocumentStream<'a> = BoxStream<'a, Result<RawDocument>>;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DataSource {
    Localdir(LocalDirSource),
    Git(GitSource),
    Web(WebSource),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LocalDirSource {
    pub uri: String,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GitSource {
    /// Clone URL (`https://…`, `git@…`, or a local path).
    pub uri: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Subdirectory within the repo to walk.
    #[serde(default = "default_root")]
    pub root: String,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default = "default_shallow")]
    pub shallow: bool,
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WebSource {
    /// Label identifying this set of pages.
    pub uri: String,
    #[serde(default)]
    pub urls: Vec<String>,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*".to_string()]
}
fn default_branch() -> String {
    "main".to_string()
}
fn default_root() -> String {
    ".".to_string()
}
fn default_shallow() -> bool {
    true
}

impl DataSource {
    /// Loader key for this source (`localdir`, `git`, `web`).
    pub fn kind(&self) -> &'static str {
        match self {
            DataSource::Localdir(_) => "localdir",
            DataSource::Git(_) => "git",
            DataSource::Web(_) => "web",
        }
    }

    pub fn uri(&self) -> &str {
        match self {
            DataSource::Localdir(s) => &s.uri,
            DataSource::Git(s) => &s.uri,
            DataSource::Web(s) => &s.uri,
        }
    }

    pub fn fqn(&self) -> String {
        format!("{}{}{}", self.kind(), FQN_SEPARATOR, self.uri())
    }
}

/// Enumerates the raw documents of one kind of data source.
#[async_trait]
pub trait Loader: Send + Sync {
    /// The [`DataSource::kind`] this loader handles.
    fn kind(&self) -> &'static str;

    /// Open the source and return its documents in deterministic order.
    async fn enumerate<'a>(&'a self, source: &'a DataSource) -> Result<DocumentStream<'a>>;

    /// Cheap reachability probe used by `ksync sources`.
    async fn check(&self, source: &DataSource) -> Result<()>;
}

/// Lowercase extension with a leading dot, or empty.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_ascii_lowercase()))
        .unwrap_or_default()
}

pub fn mime_for_extension(ext: &str) -> &'static str {
    match ext {
        ".md" | ".markdown" => "text/markdown",
        ".html" | ".htm" => "text/html",
        ".pdf" => "application/pdf",
        ".docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        ".json" => "application/json",
        ".txt" | ".rst" | ".log" | ".csv" => "text/plain",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_source_fqn() {
        let src: DataSource = toml::from_str("type = \"localdir\"\nuri = \"./docs\"").unwrap();
        assert_eq!(src.fqn(), "localdir::./docs");
        assert_eq!(src.kind(), "localdir");
    }

    #[test]
    fn test_git_defaults() {
        let src: DataSource =
            toml::from_str("type = \"git\"\nuri = \"https://example.com/r.git\"").unwrap();
        match src {
            DataSource::Git(g) => {
                assert_eq!(g.branch, "main");
                assert_eq!(g.root, ".");
                assert!(g.shallow);
            }
            other => panic!("expected git source, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_rejected() {
        let res: std::result::Result<DataSource, _> = toml::from_str("type = \"s3\"\nuri = \"b\"");
        assert!(res.is_err());
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of(Path::new("a/b/README.MD")), ".md");
        assert_eq!(extension_of(Path::new("Makefile")), "");
        assert_eq!(mime_for_extension(".pdf"), "application/pdf");
    }
}
