use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use crate::loader::DataSource;
use crate::parser::{default_parser_config, ParserConfig, ParserSelection};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub data_sources: Vec<DataSource>,
    #[serde(default)]
    pub corpora: Vec<CorpusConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestionConfig {
    /// Worker-pool size. `0` runs batches inline on the run's task.
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_batch_size")]
    pub default_batch_size: usize,
    /// Deadline for each embed / store call.
    #[serde(default)]
    pub call_timeout_secs: Option<u64>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            default_batch_size: default_batch_size(),
            call_timeout_secs: None,
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_workers() -> usize {
    4
}
fn default_batch_size() -> usize {
    100
}
fn default_poll_interval_ms() -> u64 {
    250
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL override (Ollama server, OpenAI-compatible gateway).
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            max_retries: 5,
            timeout_secs: 30,
            url: None,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    pub name: String,
    #[serde(default)]
    pub data_sources: Vec<CorpusDataSource>,
}

/// A data source associated with a corpus, with its parser selection.
#[derive(Debug, Deserialize, Clone)]
pub struct CorpusDataSource {
    pub fqn: String,
    /// Extension (`".md"`) → parser. Empty means the built-in defaults.
    #[serde(default)]
    pub parser_config: BTreeMap<String, ParserConfig>,
    #[serde(default)]
    pub fallback_parser: Option<ParserConfig>,
}

impl CorpusDataSource {
    pub fn parser_selection(&self) -> ParserSelection {
        let by_extension = if self.parser_config.is_empty() {
            default_parser_config()
        } else {
            self.parser_config.clone()
        };
        ParserSelection::new(by_extension, self.fallback_parser.clone())
    }
}

impl Config {
    pub fn data_source(&self, fqn: &str) -> Option<&DataSource> {
        self.data_sources.iter().find(|s| s.fqn() == fqn)
    }

    pub fn corpus(&self, name: &str) -> Option<&CorpusConfig> {
        self.corpora.iter().find(|c| c.name == name)
    }

    /// Directory holding git clones: `.git-cache` next to the database.
    pub fn git_cache_root(&self) -> PathBuf {
        self.db
            .path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(".git-cache")
    }

    pub fn validate(&self) -> Result<()> {
        if self.ingestion.default_batch_size == 0 {
            bail!("ingestion.default_batch_size must be >= 1");
        }
        if self.ingestion.call_timeout_secs == Some(0) {
            bail!("ingestion.call_timeout_secs must be > 0 when set");
        }

        match self.embedding.provider.as_str() {
            "disabled" => {}
            "hash" => {
                if self.embedding.dims.unwrap_or(0) == 0 {
                    bail!("embedding.dims must be > 0 when provider is 'hash'");
                }
            }
            "openai" | "ollama" => {
                if self.embedding.dims.unwrap_or(0) == 0 {
                    bail!(
                        "embedding.dims must be > 0 when provider is '{}'",
                        self.embedding.provider
                    );
                }
                if self.embedding.model.is_none() {
                    bail!(
                        "embedding.model must be specified when provider is '{}'",
                        self.embedding.provider
                    );
                }
            }
            other => bail!(
                "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or hash.",
                other
            ),
        }

        let mut fqns = HashSet::new();
        for source in &self.data_sources {
            if source.uri().is_empty() {
                bail!("data source of type '{}' has an empty uri", source.kind());
            }
            if !fqns.insert(source.fqn()) {
                bail!("duplicate data source: {}", source.fqn());
            }
        }

        let mut corpus_names = HashSet::new();
        for corpus in &self.corpora {
            if corpus.name.trim().is_empty() {
                bail!("corpus name must not be empty");
            }
            if !corpus_names.insert(corpus.name.as_str()) {
                bail!("duplicate corpus: {}", corpus.name);
            }
            for assoc in &corpus.data_sources {
                if !fqns.contains(&assoc.fqn) {
                    bail!(
                        "corpus '{}' refers to unknown data source '{}'",
                        corpus.name,
                        assoc.fqn
                    );
                }
                for parser in assoc.parser_config.values().chain(assoc.fallback_parser.iter()) {
                    parser.validate().with_context(|| {
                        format!("corpus '{}', data source '{}'", corpus.name, assoc.fqn)
                    })?;
                }
            }
        }

        Ok(())
    }
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[db]
path = "./data/ksync.sqlite"

[ingestion]
workers = 2
default_batch_size = 10

[embedding]
provider = "hash"
dims = 32

[[data_sources]]
type = "localdir"
uri = "./docs"
include_globs = ["**/*.md"]

[[data_sources]]
type = "web"
uri = "site"
urls = ["https://acme.dev/about"]

[[corpora]]
name = "handbook"

[[corpora.data_sources]]
fqn = "localdir::./docs"

[corpora.data_sources.parser_config.".md"]
name = "markdown"
max_chunk_tokens = 300

[[corpora.data_sources]]
fqn = "web::site"
"#;

    #[test]
    fn test_parse_sample() {
        let config = parse_config(SAMPLE).unwrap();
        assert_eq!(config.ingestion.workers, 2);
        assert_eq!(config.ingestion.poll_interval_ms, 250);
        assert_eq!(config.data_sources.len(), 2);
        assert!(config.data_source("web::site").is_some());

        let corpus = config.corpus("handbook").unwrap();
        let md = corpus.data_sources[0].parser_selection();
        assert_eq!(md.config_for(".md").unwrap().max_chunk_tokens(), 300);
        assert!(md.config_for(".pdf").is_none());

        let web = corpus.data_sources[1].parser_selection();
        assert_eq!(web.config_for(".html").unwrap().parser_name(), "html");
    }

    #[test]
    fn test_defaults() {
        let config = parse_config("[db]\npath = \"x.sqlite\"").unwrap();
        assert_eq!(config.ingestion.default_batch_size, 100);
        assert_eq!(config.ingestion.workers, 4);
        assert!(!config.embedding.is_enabled());
        assert_eq!(config.git_cache_root(), PathBuf::from(".git-cache"));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let toml = "[db]\npath = \"x\"\n[ingestion]\ndefault_batch_size = 0";
        assert!(parse_config(toml).is_err());
    }

    #[test]
    fn test_unknown_corpus_source_rejected() {
        let toml = "[db]\npath = \"x\"\n[[corpora]]\nname = \"c\"\n[[corpora.data_sources]]\nfqn = \"localdir::nope\"";
        let err = parse_config(toml).unwrap_err();
        assert!(format!("{:#}", err).contains("unknown data source"));
    }

    #[test]
    fn test_duplicate_source_rejected() {
        let toml = "[db]\npath = \"x\"\n[[data_sources]]\ntype = \"localdir\"\nuri = \"a\"\n[[data_sources]]\ntype = \"localdir\"\nuri = \"a\"";
        assert!(parse_config(toml).is_err());
    }

    #[test]
    fn test_openai_requires_model() {
        let toml = "[db]\npath = \"x\"\n[embedding]\nprovider = \"openai\"\ndims = 8";
        assert!(parse_config(toml).is_err());
    }

    #[test]
    fn test_unknown_parser_name_rejected() {
        let toml = SAMPLE.replace("name = \"markdown\"", "name = \"latex\"");
        assert!(parse_config(&toml).is_err());
    }

    #[test]
    fn test_zero_chunk_tokens_rejected() {
        let toml = SAMPLE.replace("max_chunk_tokens = 300", "max_chunk_tokens = 0");
        assert!(parse_config(&toml).is_err());
    }
}
