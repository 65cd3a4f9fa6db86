//! The capability table handed to the engine.
//!
//! Loaders, parsers, the embedder, both stores and the worker pool are
//! built once at startup and passed in explicitly. Tests swap any of them
//! by constructing the table by hand.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::db;
use crate::embedding::{create_embedder, Embedder};
use crate::error::{IngestError, Result};
use crate::loader::{DataSource, Loader};
use crate::loader_fs::FsLoader;
use crate::loader_git::GitLoader;
use crate::loader_web::WebLoader;
use crate::migrate;
use crate::parser::ParserRegistry;
use crate::pool::{create_pool, WorkerPool};
use crate::run_store::{InMemoryRunStore, RunStore, SqliteRunStore};
use crate::store::VectorStore;
use crate::store_memory::InMemoryVectorStore;
use crate::store_sqlite::SqliteVectorStore;

const WEB_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct Capabilities {
    pub loaders: HashMap<&'static str, Arc<dyn Loader>>,
    pub parsers: ParserRegistry,
    pub embedder: Arc<dyn Embedder>,
    pub vector_store: Arc<dyn VectorStore>,
    pub run_store: Arc<dyn RunStore>,
    pub pool: Arc<dyn WorkerPool>,
}

impl Capabilities {
    /// SQLite-backed stores, built-in loaders and parsers, embedder from config.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::run_migrations(&pool).await?;

        let mut caps = Self {
            loaders: HashMap::new(),
            parsers: ParserRegistry::with_builtin(),
            embedder: create_embedder(&config.embedding)?,
            vector_store: Arc::new(SqliteVectorStore::new(pool.clone())),
            run_store: Arc::new(SqliteRunStore::new(pool)),
            pool: create_pool(config.ingestion.workers),
        };
        caps.register_builtin_loaders(config.git_cache_root())?;
        Ok(caps)
    }

    /// In-memory stores with the given embedder and pool.
    pub fn in_memory(embedder: Arc<dyn Embedder>, pool: Arc<dyn WorkerPool>) -> Result<Self> {
        let mut caps = Self {
            loaders: HashMap::new(),
            parsers: ParserRegistry::with_builtin(),
            embedder,
            vector_store: Arc::new(InMemoryVectorStore::new()),
            run_store: Arc::new(InMemoryRunStore::new()),
            pool,
        };
        caps.register_builtin_loaders(std::env::temp_dir().join("ksync-git-cache"))?;
        Ok(caps)
    }

    fn register_builtin_loaders(&mut self, git_cache_root: std::path::PathBuf) -> Result<()> {
        self.register_loader(Arc::new(FsLoader));
        self.register_loader(Arc::new(GitLoader::new(git_cache_root)));
        self.register_loader(Arc::new(WebLoader::new(WEB_FETCH_TIMEOUT)?));
        Ok(())
    }

    pub fn register_loader(&mut self, loader: Arc<dyn Loader>) {
        self.loaders.insert(loader.kind(), loader);
    }

    pub fn with_vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.vector_store = store;
        self
    }

    pub fn with_run_store(mut self, store: Arc<dyn RunStore>) -> Self {
        self.run_store = store;
        self
    }

    pub fn loader_for(&self, source: &DataSource) -> Result<Arc<dyn Loader>> {
        self.loaders.get(source.kind()).cloned().ok_or_else(|| {
            IngestError::Configuration(format!("no loader registered for '{}'", source.kind()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::pool::InlinePool;

    #[test]
    fn test_builtin_loaders_registered() {
        let caps = Capabilities::in_memory(Arc::new(HashEmbedder::new(8)), Arc::new(InlinePool))
            .unwrap();
        for ty in ["localdir", "git", "web"] {
            let toml = format!("type = \"{}\"\nuri = \"x\"", ty);
            let source: DataSource = toml::from_str(&toml).unwrap();
            assert_eq!(caps.loader_for(&source).unwrap().kind(), ty);
        }
    }

    #[test]
    fn test_missing_loader_is_configuration_error() {
        let mut caps =
            Capabilities::in_memory(Arc::new(HashEmbedder::new(8)), Arc::new(InlinePool)).unwrap();
        caps.loaders.clear();
        let source: DataSource = toml::from_str("type = \"localdir\"\nuri = \"x\"").unwrap();
        assert!(matches!(
            caps.loader_for(&source),
            Err(IngestError::Configuration(_))
        ));
    }
}
