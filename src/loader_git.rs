//! Git repository loader.
//!
//! Keeps a local clone per repository under a cache directory, updates it
//! on every enumeration (clone on first use, fetch + hard reset after), then
//! walks the configured subdirectory exactly like the local directory
//! loader. Requires a `git` binary on `PATH`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use sha2::{Digest, Sha256};
use tokio::process::Command;

use crate::error::{IngestError, Result};
use crate::loader::{DataSource, DocumentStream, GitSource, Loader};
use crate::loader_fs::{read_file_document, walk_files};

pub struct GitLoader {
    cache_root: PathBuf,
}

impl GitLoader {
    /// Clones without an explicit `cache_dir` land under `cache_root`.
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
        }
    }

    fn cache_dir(&self, cfg: &GitSource) -> PathBuf {
        match &cfg.cache_dir {
            Some(dir) => dir.clone(),
            None => self.cache_root.join(short_hash(&cfg.uri)),
        }
    }
}

#[async_trait]
impl Loader for GitLoader {
    fn kind(&self) -> &'static str {
        "git"
    }

    async fn enumerate<'a>(&'a self, source: &'a DataSource) -> Result<DocumentStream<'a>> {
        let DataSource::Git(cfg) = source else {
            return Err(IngestError::Configuration(format!(
                "git loader cannot read {}",
                source.fqn()
            )));
        };
        let fqn = source.fqn();
        let unreachable = |e: anyhow::Error| IngestError::source_error(&fqn, format!("{:#}", e));

        let cache_dir = self.cache_dir(cfg);
        sync_checkout(cfg, &cache_dir).await.map_err(unreachable)?;

        let scan_root = if cfg.root == "." {
            cache_dir.clone()
        } else {
            cache_dir.join(&cfg.root)
        };
        let head_sha = git_head_sha(&cache_dir)
            .await
            .unwrap_or_else(|_| "unknown".to_string());

        let files = walk_files(&scan_root, &cfg.include_globs, &cfg.exclude_globs, false)
            .map_err(unreachable)?;

        let repo_url = cfg.uri.clone();
        let docs = stream::iter(files).then(move |(path, relative)| {
            let fqn = fqn.clone();
            let mut metadata = BTreeMap::new();
            metadata.insert("git_sha".to_string(), head_sha.clone());
            metadata.insert("repo_url".to_string(), repo_url.clone());
            metadata.insert(
                "source_url".to_string(),
                build_web_url(&repo_url, &head_sha, &relative),
            );
            async move { read_file_document(&fqn, &path, &relative, metadata).await }
        });
        Ok(docs.boxed())
    }

    async fn check(&self, source: &DataSource) -> Result<()> {
        let output = Command::new("git")
            .args(["ls-remote", "--exit-code", "--heads"])
            .arg(source.uri())
            .output()
            .await
            .map_err(|e| IngestError::source_error(source.fqn(), e))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(IngestError::source_error(
                source.fqn(),
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }
}

async fn sync_checkout(cfg: &GitSource, cache_dir: &Path) -> anyhow::Result<()> {
    if cache_dir.join(".git").exists() {
        git_pull(cache_dir, &cfg.branch).await
    } else {
        git_clone(&cfg.uri, &cfg.branch, cfg.shallow, cache_dir).await
    }
}

async fn git_clone(url: &str, branch: &str, shallow: bool, dest: &Path) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(dest)
        .await
        .with_context(|| format!("Failed to create cache directory: {}", dest.display()))?;

    let mut cmd = Command::new("git");
    cmd.args(["clone", "--branch", branch, "--single-branch"]);
    if shallow {
        cmd.args(["--depth", "1"]);
    }
    cmd.arg(url).arg(dest);

    run_git(cmd, "clone").await
}

async fn git_pull(repo_dir: &Path, branch: &str) -> anyhow::Result<()> {
    let mut fetch = Command::new("git");
    fetch.args(["fetch", "origin", branch]).current_dir(repo_dir);
    run_git(fetch, "fetch").await?;

    let mut reset = Command::new("git");
    reset
        .args(["reset", "--hard", &format!("origin/{}", branch)])
        .current_dir(repo_dir);
    run_git(reset, "reset").await
}

async fn run_git(mut cmd: Command, what: &str) -> anyhow::Result<()> {
    let output = cmd
        .output()
        .await
        .with_context(|| format!("Failed to execute 'git {}'. Is git installed?", what))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git {} failed: {}", what, stderr.trim());
    }
    Ok(())
}

async fn git_head_sha(repo_dir: &Path) -> anyhow::Result<String> {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(repo_dir)
        .output()
        .await
        .context("Failed to get HEAD SHA")?;
    if !output.status.success() {
        bail!("git rev-parse HEAD failed");
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Browsable URL for a file when the remote is GitHub or GitLab.
fn build_web_url(repo_url: &str, sha: &str, relative_path: &str) -> String {
    if let Some(rest) = repo_url.strip_prefix("git@github.com:") {
        let repo = rest.trim_end_matches(".git");
        return format!("https://github.com/{}/blob/{}/{}", repo, sha, relative_path);
    }
    if repo_url.contains("github.com") {
        let base = repo_url.trim_end_matches(".git");
        return format!("{}/blob/{}/{}", base, sha, relative_path);
    }
    if let Some(rest) = repo_url.strip_prefix("git@gitlab.com:") {
        let repo = rest.trim_end_matches(".git");
        return format!("https://gitlab.com/{}/-/blob/{}/{}", repo, sha, relative_path);
    }
    format!("git://{}/{}", repo_url, relative_path)
}

fn short_hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())[..12].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_web_url_github_ssh() {
        assert_eq!(
            build_web_url("git@github.com:acme/handbook.git", "abc", "docs/a.md"),
            "https://github.com/acme/handbook/blob/abc/docs/a.md"
        );
    }

    #[test]
    fn test_web_url_gitlab_ssh() {
        assert_eq!(
            build_web_url("git@gitlab.com:acme/handbook.git", "abc", "a.md"),
            "https://gitlab.com/acme/handbook/-/blob/abc/a.md"
        );
    }

    #[test]
    fn test_web_url_fallback() {
        assert_eq!(
            build_web_url("/srv/repo", "abc", "a.md"),
            "git:///srv/repo/a.md"
        );
    }

    #[test]
    fn test_cache_dir_is_stable_per_url() {
        let loader = GitLoader::new("/tmp/cache");
        let cfg = GitSource {
            uri: "https://example.com/r.git".to_string(),
            branch: "main".to_string(),
            root: ".".to_string(),
            include_globs: vec!["**/*".to_string()],
            exclude_globs: vec![],
            shallow: true,
            cache_dir: None,
        };
        assert_eq!(loader.cache_dir(&cfg), loader.cache_dir(&cfg));
        assert_eq!(short_hash(&cfg.uri).len(), 12);
    }

    #[tokio::test]
    async fn test_wrong_source_type_is_configuration_error() {
        let src: DataSource = toml::from_str("type = \"web\"\nuri = \"site\"").unwrap();
        let loader = GitLoader::new("/tmp/cache");
        assert!(matches!(
            loader.enumerate(&src).await.err(),
            Some(IngestError::Configuration(_))
        ));
    }
}
