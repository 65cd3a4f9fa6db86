//! Web page loader.
//!
//! Fetches each configured URL with a plain HTTP GET. The URL is the
//! locator; the extension is taken from the response `Content-Type`, falling
//! back to the URL path. A page that fails to download is a per-document
//! source error.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};

use crate::error::{IngestError, Result};
use crate::loader::{extension_of, mime_for_extension, DataSource, DocumentStream, Loader};
use crate::models::RawDocument;

pub struct WebLoader {
    client: reqwest::Client,
}

impl WebLoader {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("ksync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    async fn fetch(&self, data_source_fqn: &str, url: &str) -> Result<RawDocument> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| IngestError::source_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::source_error(url, format!("HTTP {}", status)));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response
            .bytes()
            .await
            .map_err(|e| IngestError::source_error(url, e))?;

        let extension = content_type
            .as_deref()
            .and_then(extension_for_content_type)
            .map(str::to_string)
            .unwrap_or_else(|| url_extension(url));

        let mut metadata = BTreeMap::new();
        metadata.insert("source_url".to_string(), url.to_string());

        Ok(RawDocument {
            data_source_fqn: data_source_fqn.to_string(),
            locator: url.to_string(),
            mime_type: content_type
                .unwrap_or_else(|| mime_for_extension(&extension).to_string()),
            extension,
            bytes: bytes.to_vec(),
            updated_at: Utc::now(),
            metadata,
        })
    }
}

#[async_trait]
impl Loader for WebLoader {
    fn kind(&self) -> &'static str {
        "web"
    }

    async fn enumerate<'a>(&'a self, source: &'a DataSource) -> Result<DocumentStream<'a>> {
        let DataSource::Web(cfg) = source else {
            return Err(IngestError::Configuration(format!(
                "web loader cannot read {}",
                source.fqn()
            )));
        };
        let fqn = source.fqn();
        let docs = stream::iter(cfg.urls.iter()).then(move |url| {
            let fqn = fqn.clone();
            async move { self.fetch(&fqn, url).await }
        });
        Ok(docs.boxed())
    }

    async fn check(&self, source: &DataSource) -> Result<()> {
        let DataSource::Web(cfg) = source else {
            return Ok(());
        };
        for url in &cfg.urls {
            reqwest::Url::parse(url).map_err(|e| IngestError::source_error(url, e))?;
        }
        Ok(())
    }
}

fn extension_for_content_type(content_type: &str) -> Option<&'static str> {
    let essence = content_type.split(';').next()?.trim().to_ascii_lowercase();
    match essence.as_str() {
        "text/html" | "application/xhtml+xml" => Some(".html"),
        "text/markdown" => Some(".md"),
        "text/plain" => Some(".txt"),
        "application/pdf" => Some(".pdf"),
        _ => None,
    }
}

fn url_extension(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .map(|u| extension_of(std::path::Path::new(u.path())))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::WebSource;
    use futures::TryStreamExt;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response per accepted connection.
    async fn serve(responses: Vec<String>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for response in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
            }
        });
        format!("http://{}", addr)
    }

    fn http_response(status: &str, content_type: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            content_type,
            body.len(),
            body
        )
    }

    #[test]
    fn test_content_type_mapping() {
        assert_eq!(
            extension_for_content_type("text/html; charset=utf-8"),
            Some(".html")
        );
        assert_eq!(extension_for_content_type("application/pdf"), Some(".pdf"));
        assert_eq!(extension_for_content_type("image/png"), None);
        assert_eq!(url_extension("https://acme.dev/files/Guide.PDF?x=1"), ".pdf");
    }

    #[tokio::test]
    async fn test_fetches_pages_and_reports_failures_per_document() {
        let base = serve(vec![
            http_response("200 OK", "text/html", "<p>about us</p>"),
            http_response("404 Not Found", "text/plain", "nope"),
        ])
        .await;
        let src = DataSource::Web(WebSource {
            uri: "acme-site".to_string(),
            urls: vec![format!("{}/about", base), format!("{}/missing", base)],
        });

        let loader = WebLoader::new(Duration::from_secs(5)).unwrap();
        let results: Vec<Result<RawDocument>> =
            loader.enumerate(&src).await.unwrap().collect().await;

        assert_eq!(results.len(), 2);
        let page = results[0].as_ref().unwrap();
        assert_eq!(page.extension, ".html");
        assert_eq!(page.bytes, b"<p>about us</p>");
        assert_eq!(page.data_source_fqn, "web::acme-site");
        assert!(matches!(results[1], Err(IngestError::Source { .. })));
    }

    #[tokio::test]
    async fn test_empty_url_list_yields_nothing() {
        let src = DataSource::Web(WebSource {
            uri: "empty".to_string(),
            urls: vec![],
        });
        let loader = WebLoader::new(Duration::from_secs(5)).unwrap();
        let docs: Vec<RawDocument> = loader
            .enumerate(&src)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert!(docs.is_empty());
    }
}
