//! Local directory loader.
//!
//! Walks the source root with `walkdir`, applies include/exclude globs to
//! paths relative to the root, and reads each match as one raw document.
//! The locator is the relative path, so moving the root does not change
//! data point identities.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::bail;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::error::{IngestError, Result};
use crate::loader::{extension_of, mime_for_extension, DataSource, DocumentStream, Loader};
use crate::models::RawDocument;

pub struct FsLoader;

#[async_trait]
impl Loader for FsLoader {
    fn kind(&self) -> &'static str {
        "localdir"
    }

    async fn enumerate<'a>(&'a self, source: &'a DataSource) -> Result<DocumentStream<'a>> {
        let DataSource::Localdir(cfg) = source else {
            return Err(IngestError::Configuration(format!(
                "localdir loader cannot read {}",
                source.fqn()
            )));
        };
        let fqn = source.fqn();
        let root = PathBuf::from(&cfg.uri);
        let files = walk_files(&root, &cfg.include_globs, &cfg.exclude_globs, cfg.follow_symlinks)
            .map_err(|e| IngestError::source_error(&fqn, format!("{:#}", e)))?;

        let docs = stream::iter(files).then(move |(path, relative)| {
            let fqn = fqn.clone();
            async move { read_file_document(&fqn, &path, &relative, BTreeMap::new()).await }
        });
        Ok(docs.boxed())
    }

    async fn check(&self, source: &DataSource) -> Result<()> {
        let root = Path::new(source.uri());
        if root.is_dir() {
            Ok(())
        } else {
            Err(IngestError::source_error(
                source.fqn(),
                format!("root does not exist: {}", root.display()),
            ))
        }
    }
}

/// Files under `root` matching the globs, as (absolute path, relative path)
/// pairs sorted by relative path.
pub(crate) fn walk_files(
    root: &Path,
    include_globs: &[String],
    exclude_globs: &[String],
    follow_symlinks: bool,
) -> anyhow::Result<Vec<(PathBuf, String)>> {
    if !root.is_dir() {
        bail!("root does not exist: {}", root.display());
    }

    let include_set = build_globset(include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(exclude_globs.iter().cloned());
    let exclude_set = build_globset(&default_excludes)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(follow_symlinks) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }
        files.push((path.to_path_buf(), rel_str));
    }

    files.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(files)
}

pub(crate) async fn read_file_document(
    data_source_fqn: &str,
    path: &Path,
    relative: &str,
    metadata: BTreeMap<String, String>,
) -> Result<RawDocument> {
    let unreadable = |e: std::io::Error| IngestError::source_error(relative, e);
    let bytes = tokio::fs::read(path).await.map_err(unreadable)?;
    let modified = tokio::fs::metadata(path)
        .await
        .map_err(unreadable)?
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());

    let extension = extension_of(path);
    Ok(RawDocument {
        data_source_fqn: data_source_fqn.to_string(),
        locator: relative.to_string(),
        mime_type: mime_for_extension(&extension).to_string(),
        extension,
        bytes,
        updated_at: modified,
        metadata,
    })
}

pub(crate) fn build_globset(patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
