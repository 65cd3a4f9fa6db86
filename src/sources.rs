use anyhow::Result;

use crate::capabilities::Capabilities;
use crate::config::Config;

/// Health of one configured data source.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceHealth {
    pub fqn: String,
    pub kind: &'static str,
    pub healthy: bool,
    pub detail: String,
}

pub async fn check_sources(config: &Config, caps: &Capabilities) -> Vec<SourceHealth> {
    let mut report = Vec::with_capacity(config.data_sources.len());
    for source in &config.data_sources {
        let probe = match caps.loader_for(source) {
            Ok(loader) => loader.check(source).await,
            Err(e) => Err(e),
        };
        let (healthy, detail) = match probe {
            Ok(()) => (true, "OK".to_string()),
            Err(e) => (false, e.to_string()),
        };
        report.push(SourceHealth {
            fqn: source.fqn(),
            kind: source.kind(),
            healthy,
            detail,
        });
    }
    report
}

pub async fn list_sources(config: &Config, caps: &Capabilities) -> Result<()> {
    let report = check_sources(config, caps).await;
    if report.is_empty() {
        println!("no data sources configured");
        return Ok(());
    }

    println!("{:<10} {:<8} {:<48} STATUS", "TYPE", "HEALTHY", "FQN");
    for source in &report {
        println!(
            "{:<10} {:<8} {:<48} {}",
            source.kind, source.healthy, source.fqn, source.detail
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::embedding::HashEmbedder;
    use crate::pool::InlinePool;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_missing_directory_is_unhealthy() {
        let tmp = tempfile::TempDir::new().unwrap();
        let toml = format!(
            r#"
[db]
path = "{db}"

[[data_sources]]
type = "localdir"
uri = "{present}"

[[data_sources]]
type = "localdir"
uri = "{absent}"
"#,
            db = tmp.path().join("db.sqlite").display(),
            present = tmp.path().display(),
            absent = tmp.path().join("missing").display()
        );
        let config = parse_config(&toml).unwrap();
        let caps =
            Capabilities::in_memory(Arc::new(HashEmbedder::new(8)), Arc::new(InlinePool)).unwrap();

        let report = check_sources(&config, &caps).await;
        assert_eq!(report.len(), 2);
        assert!(report[0].healthy);
        assert!(!report[1].healthy);
        assert_eq!(report[1].kind, "localdir");
    }
}
