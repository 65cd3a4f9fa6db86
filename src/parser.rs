//! Parsers and the extension-keyed parser registry.
//!
//! A [`Parser`] turns one [`RawDocument`] into data points. Which parser
//! handles a document is decided per data source by a map from file
//! extension to [`ParserConfig`], a tagged variant whose tag names the
//! parser and whose payload is that parser's typed parameters. Config is
//! checked when it is loaded, not when a document is parsed.
//!
//! ```toml
//! [corpora.data_sources.parser_config.".md"]
//! name = "markdown"
//! max_chunk_tokens = 500
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::chunk::{chunk_text, split_markdown_sections};
use crate::error::{IngestError, Result};
use crate::extract;
use crate::fingerprint::hash_bytes;
use crate::models::{Chunk, DataPoint, DataPointContent, RawDocument};

fn default_max_chunk_tokens() -> usize {
    700
}
fn default_true() -> bool {
    true
}
fn default_wrap_width() -> usize {
    80
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TextParserParams {
    #[serde(default = "default_max_chunk_tokens")]
    pub max_chunk_tokens: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarkdownParserParams {
    #[serde(default = "default_max_chunk_tokens")]
    pub max_chunk_tokens: usize,
    /// Start a new chunk at every heading.
    #[serde(default = "default_true")]
    pub split_on_headings: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HtmlParserParams {
    #[serde(default = "default_max_chunk_tokens")]
    pub max_chunk_tokens: usize,
    #[serde(default = "default_wrap_width")]
    pub wrap_width: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PdfParserParams {
    #[serde(default = "default_max_chunk_tokens")]
    pub max_chunk_tokens: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DocxParserParams {
    #[serde(default = "default_max_chunk_tokens")]
    pub max_chunk_tokens: usize,
}

/// Parser selection plus its typed parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "lowercase")]
pub enum ParserConfig {
    Text(TextParserParams),
    Markdown(MarkdownParserParams),
    Html(HtmlParserParams),
    Pdf(PdfParserParams),
    Docx(DocxParserParams),
}

impl ParserConfig {
    /// Registry key of the parser this config selects.
    pub fn parser_name(&self) -> &'static str {
        match self {
            ParserConfig::Text(_) => "text",
            ParserConfig::Markdown(_) => "markdown",
            ParserConfig::Html(_) => "html",
            ParserConfig::Pdf(_) => "pdf",
            ParserConfig::Docx(_) => "docx",
        }
    }

    pub fn max_chunk_tokens(&self) -> usize {
        match self {
            ParserConfig::Text(p) => p.max_chunk_tokens,
            ParserConfig::Markdown(p) => p.max_chunk_tokens,
            ParserConfig::Html(p) => p.max_chunk_tokens,
            ParserConfig::Pdf(p) => p.max_chunk_tokens,
            ParserConfig::Docx(p) => p.max_chunk_tokens,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_chunk_tokens() == 0 {
            return Err(IngestError::Configuration(format!(
                "parser '{}': max_chunk_tokens must be > 0",
                self.parser_name()
            )));
        }
        if let ParserConfig::Html(p) = self {
            if p.wrap_width == 0 {
                return Err(IngestError::Configuration(
                    "parser 'html': wrap_width must be > 0".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Extension → parser mapping used when a corpus data source configures none.
pub fn default_parser_config() -> BTreeMap<String, ParserConfig> {
    let text = || {
        ParserConfig::Text(TextParserParams {
            max_chunk_tokens: default_max_chunk_tokens(),
        })
    };
    let markdown = || {
        ParserConfig::Markdown(MarkdownParserParams {
            max_chunk_tokens: default_max_chunk_tokens(),
            split_on_headings: true,
        })
    };
    let html = || {
        ParserConfig::Html(HtmlParserParams {
            max_chunk_tokens: default_max_chunk_tokens(),
            wrap_width: default_wrap_width(),
        })
    };
    let mut map = BTreeMap::new();
    map.insert(".txt".to_string(), text());
    map.insert(".md".to_string(), markdown());
    map.insert(".markdown".to_string(), markdown());
    map.insert(".html".to_string(), html());
    map.insert(".htm".to_string(), html());
    map.insert(
        ".pdf".to_string(),
        ParserConfig::Pdf(PdfParserParams {
            max_chunk_tokens: default_max_chunk_tokens(),
        }),
    );
    map.insert(
        ".docx".to_string(),
        ParserConfig::Docx(DocxParserParams {
            max_chunk_tokens: default_max_chunk_tokens(),
        }),
    );
    map
}

/// Normalize an extension to lowercase with a leading dot.
pub fn normalize_extension(ext: &str) -> String {
    let trimmed = ext.trim().trim_start_matches('.').to_ascii_lowercase();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(".{}", trimmed)
    }
}

/// Splits a raw document into data points.
pub trait Parser: Send + Sync {
    /// Registry key, matching [`ParserConfig::parser_name`].
    fn name(&self) -> &'static str;

    fn parse(&self, document: &RawDocument, config: &ParserConfig) -> Result<Vec<DataPoint>>;
}

/// Per-data-source parser selection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParserSelection {
    pub by_extension: BTreeMap<String, ParserConfig>,
    pub fallback: Option<ParserConfig>,
}

impl ParserSelection {
    pub fn new(by_extension: BTreeMap<String, ParserConfig>, fallback: Option<ParserConfig>) -> Self {
        let by_extension = by_extension
            .into_iter()
            .map(|(ext, cfg)| (normalize_extension(&ext), cfg))
            .collect();
        Self {
            by_extension,
            fallback,
        }
    }

    pub fn config_for(&self, extension: &str) -> Option<&ParserConfig> {
        self.by_extension
            .get(&normalize_extension(extension))
            .or(self.fallback.as_ref())
    }
}

/// Parsers keyed by name. Built once at startup and handed to the engine.
#[derive(Clone, Default)]
pub struct ParserRegistry {
    parsers: HashMap<&'static str, Arc<dyn Parser>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in parser.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(TextParser));
        registry.register(Arc::new(MarkdownParser));
        registry.register(Arc::new(HtmlParser));
        registry.register(Arc::new(PdfParser));
        registry.register(Arc::new(DocxParser));
        registry
    }

    pub fn register(&mut self, parser: Arc<dyn Parser>) {
        self.parsers.insert(parser.name(), parser);
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.parsers.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Check that every parser a selection refers to is registered.
    pub fn check(&self, selection: &ParserSelection) -> Result<()> {
        for cfg in selection
            .by_extension
            .values()
            .chain(selection.fallback.iter())
        {
            cfg.validate()?;
            if !self.parsers.contains_key(cfg.parser_name()) {
                return Err(IngestError::Configuration(format!(
                    "parser '{}' is not registered",
                    cfg.parser_name()
                )));
            }
        }
        Ok(())
    }

    /// Resolve the parser for a document's extension.
    pub fn parser_for(
        &self,
        document: &RawDocument,
        selection: &ParserSelection,
    ) -> Result<(Arc<dyn Parser>, ParserConfig)> {
        let unsupported = || IngestError::UnsupportedExtension {
            extension: document.extension.clone(),
            locator: document.locator.clone(),
        };
        let config = selection
            .config_for(&document.extension)
            .ok_or_else(unsupported)?;
        let parser = self
            .parsers
            .get(config.parser_name())
            .cloned()
            .ok_or_else(unsupported)?;
        Ok((parser, config.clone()))
    }
}

fn mismatched(parser: &str, config: &ParserConfig) -> IngestError {
    IngestError::Configuration(format!(
        "parser '{}' was given config for '{}'",
        parser,
        config.parser_name()
    ))
}

fn decode_utf8(document: &RawDocument) -> Result<String> {
    String::from_utf8(document.bytes.clone())
        .map_err(|e| IngestError::source_error(&document.locator, format!("not valid UTF-8: {}", e)))
}

/// Wrap parsed chunks into the single data point for a document.
fn document_data_point(document: &RawDocument, parser: &str, chunks: Vec<Chunk>) -> DataPoint {
    let mut metadata = document.metadata.clone();
    metadata.insert("source_path".to_string(), document.locator.clone());
    metadata.insert("mime_type".to_string(), document.mime_type.clone());
    metadata.insert("parser".to_string(), parser.to_string());

    DataPoint {
        data_point_fqn: document.fqn(),
        data_point_hash: hash_bytes(&document.bytes),
        data_source_fqn: document.data_source_fqn.clone(),
        content: DataPointContent { chunks, metadata },
    }
}

pub struct TextParser;

impl Parser for TextParser {
    fn name(&self) -> &'static str {
        "text"
    }

    fn parse(&self, document: &RawDocument, config: &ParserConfig) -> Result<Vec<DataPoint>> {
        let ParserConfig::Text(params) = config else {
            return Err(mismatched(self.name(), config));
        };
        let text = decode_utf8(document)?;
        let chunks = chunk_text(&text, params.max_chunk_tokens);
        Ok(vec![document_data_point(document, self.name(), chunks)])
    }
}

pub struct MarkdownParser;

impl Parser for MarkdownParser {
    fn name(&self) -> &'static str {
        "markdown"
    }

    fn parse(&self, document: &RawDocument, config: &ParserConfig) -> Result<Vec<DataPoint>> {
        let ParserConfig::Markdown(params) = config else {
            return Err(mismatched(self.name(), config));
        };
        let text = decode_utf8(document)?;
        let chunks = if params.split_on_headings {
            let mut chunks = Vec::new();
            for section in split_markdown_sections(&text) {
                for piece in chunk_text(&section, params.max_chunk_tokens) {
                    chunks.push(Chunk {
                        chunk_index: chunks.len() as i64,
                        text: piece.text,
                    });
                }
            }
            if chunks.is_empty() {
                chunks = chunk_text(&text, params.max_chunk_tokens);
            }
            chunks
        } else {
            chunk_text(&text, params.max_chunk_tokens)
        };
        Ok(vec![document_data_point(document, self.name(), chunks)])
    }
}

pub struct HtmlParser;

impl Parser for HtmlParser {
    fn name(&self) -> &'static str {
        "html"
    }

    fn parse(&self, document: &RawDocument, config: &ParserConfig) -> Result<Vec<DataPoint>> {
        let ParserConfig::Html(params) = config else {
            return Err(mismatched(self.name(), config));
        };
        let text = html2text::from_read(document.bytes.as_slice(), params.wrap_width);
        let chunks = chunk_text(&text, params.max_chunk_tokens);
        Ok(vec![document_data_point(document, self.name(), chunks)])
    }
}

pub struct PdfParser;

impl Parser for PdfParser {
    fn name(&self) -> &'static str {
        "pdf"
    }

    fn parse(&self, document: &RawDocument, config: &ParserConfig) -> Result<Vec<DataPoint>> {
        let ParserConfig::Pdf(params) = config else {
            return Err(mismatched(self.name(), config));
        };
        let text = extract::extract_pdf(&document.bytes)
            .map_err(|e| IngestError::source_error(&document.locator, e))?;
        let chunks = chunk_text(&text, params.max_chunk_tokens);
        Ok(vec![document_data_point(document, self.name(), chunks)])
    }
}

pub struct DocxParser;

impl Parser for DocxParser {
    fn name(&self) -> &'static str {
        "docx"
    }

    fn parse(&self, document: &RawDocument, config: &ParserConfig) -> Result<Vec<DataPoint>> {
        let ParserConfig::Docx(params) = config else {
            return Err(mismatched(self.name(), config));
        };
        let text = extract::extract_docx(&document.bytes)
            .map_err(|e| IngestError::source_error(&document.locator, e))?;
        let chunks = chunk_text(&text, params.max_chunk_tokens);
        Ok(vec![document_data_point(document, self.name(), chunks)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn doc(locator: &str, ext: &str, body: &str) -> RawDocument {
        RawDocument {
            data_source_fqn: "localdir::/tmp/docs".to_string(),
            locator: locator.to_string(),
            extension: ext.to_string(),
            mime_type: "text/plain".to_string(),
            bytes: body.as_bytes().to_vec(),
            updated_at: Utc::now(),
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn test_parser_config_tagged_by_name() {
        let cfg: ParserConfig = toml::from_str("name = \"markdown\"\nmax_chunk_tokens = 42").unwrap();
        assert_eq!(
            cfg,
            ParserConfig::Markdown(MarkdownParserParams {
                max_chunk_tokens: 42,
                split_on_headings: true
            })
        );
    }

    #[test]
    fn test_parser_config_unknown_name_rejected() {
        let res: std::result::Result<ParserConfig, _> = toml::from_str("name = \"ocr\"");
        assert!(res.is_err());
    }

    #[test]
    fn test_parser_config_unknown_field_rejected() {
        let res: std::result::Result<ParserConfig, _> =
            toml::from_str("name = \"pdf\"\nsplit_on_headings = true");
        assert!(res.is_err());
    }

    #[test]
    fn test_zero_chunk_tokens_invalid() {
        let cfg = ParserConfig::Text(TextParserParams { max_chunk_tokens: 0 });
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_normalize_extension() {
        assert_eq!(normalize_extension("MD"), ".md");
        assert_eq!(normalize_extension(".Pdf"), ".pdf");
        assert_eq!(normalize_extension(""), "");
    }

    #[test]
    fn test_resolve_by_extension() {
        let registry = ParserRegistry::with_builtin();
        let selection = ParserSelection::new(default_parser_config(), None);
        let (parser, cfg) = registry
            .parser_for(&doc("a.md", ".md", "# hi"), &selection)
            .unwrap();
        assert_eq!(parser.name(), "markdown");
        assert_eq!(cfg.parser_name(), "markdown");
    }

    #[test]
    fn test_unsupported_extension_without_fallback() {
        let registry = ParserRegistry::with_builtin();
        let selection = ParserSelection::new(default_parser_config(), None);
        let err = registry
            .parser_for(&doc("blob.bin", ".bin", "xx"), &selection)
            .err()
            .unwrap();
        assert!(matches!(err, IngestError::UnsupportedExtension { .. }));
    }

    #[test]
    fn test_fallback_parser_used() {
        let registry = ParserRegistry::with_builtin();
        let fallback = ParserConfig::Text(TextParserParams {
            max_chunk_tokens: 100,
        });
        let selection = ParserSelection::new(BTreeMap::new(), Some(fallback));
        let (parser, _) = registry
            .parser_for(&doc("notes.log", ".log", "line"), &selection)
            .unwrap();
        assert_eq!(parser.name(), "text");
    }

    #[test]
    fn test_check_rejects_unregistered_parser() {
        let registry = ParserRegistry::new();
        let selection = ParserSelection::new(default_parser_config(), None);
        assert!(registry.check(&selection).is_err());
        assert!(ParserRegistry::with_builtin().check(&selection).is_ok());
    }

    #[test]
    fn test_text_parser_single_data_point() {
        let d = doc("notes/a.txt", ".txt", "one\n\ntwo");
        let cfg = ParserConfig::Text(TextParserParams {
            max_chunk_tokens: 700,
        });
        let points = TextParser.parse(&d, &cfg).unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].data_point_fqn, "localdir::/tmp/docs::notes/a.txt");
        assert_eq!(points[0].data_point_hash, hash_bytes(b"one\n\ntwo"));
        assert_eq!(points[0].content.metadata["parser"], "text");
        assert_eq!(points[0].content.metadata["source_path"], "notes/a.txt");
    }

    #[test]
    fn test_markdown_sections_become_chunks() {
        let d = doc("g.md", ".md", "# A\nalpha\n# B\nbeta\n");
        let cfg = ParserConfig::Markdown(MarkdownParserParams {
            max_chunk_tokens: 700,
            split_on_headings: true,
        });
        let points = MarkdownParser.parse(&d, &cfg).unwrap();
        let chunks = &points[0].content.chunks;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].chunk_index, 1);
        assert!(chunks[1].text.starts_with("# B"));
    }

    #[test]
    fn test_mismatched_config_is_configuration_error() {
        let d = doc("a.txt", ".txt", "x");
        let cfg = ParserConfig::Pdf(PdfParserParams {
            max_chunk_tokens: 10,
        });
        assert!(matches!(
            TextParser.parse(&d, &cfg),
            Err(IngestError::Configuration(_))
        ));
    }

    #[test]
    fn test_invalid_utf8_is_source_error() {
        let mut d = doc("a.txt", ".txt", "");
        d.bytes = vec![0xff, 0xfe, 0xfd];
        let cfg = ParserConfig::Text(TextParserParams {
            max_chunk_tokens: 10,
        });
        assert!(matches!(
            TextParser.parse(&d, &cfg),
            Err(IngestError::Source { .. })
        ));
    }

    #[test]
    fn test_html_parser_strips_markup() {
        let d = doc("p.html", ".html", "<html><body><p>Hello <b>there</b></p></body></html>");
        let cfg = ParserConfig::Html(HtmlParserParams {
            max_chunk_tokens: 700,
            wrap_width: 80,
        });
        let points = HtmlParser.parse(&d, &cfg).unwrap();
        let text = &points[0].content.chunks[0].text;
        assert!(text.contains("Hello"));
        assert!(!text.contains("<p>"));
    }
}
