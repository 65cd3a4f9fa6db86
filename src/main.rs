//! # Knowledge Sync CLI (`ksync`)
//!
//! Drives the reconciliation engine from the command line: create corpora,
//! start ingestion runs and inspect their status and errors.
//!
//! ## Usage
//!
//! ```bash
//! ksync --config ./config/ksync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ksync init` | Create the SQLite database and run schema migrations |
//! | `ksync sources` | List configured data sources and their health |
//! | `ksync corpus create <name>` | Create a corpus in the vector store |
//! | `ksync corpus delete <name>` | Delete a corpus and its run history |
//! | `ksync ingest <corpus>` | Reconcile a corpus with its data sources |
//! | `ksync status <run>` | Show the status of a run |
//! | `ksync runs <corpus>` | List runs, newest first |
//! | `ksync errors <run>` | Show the errors recorded for a run |
//! | `ksync abandon <run>` | Mark a run left behind by a killed process as failed |
//! | `ksync completions <shell>` | Print shell completions |

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use knowledge_sync::capabilities::Capabilities;
use knowledge_sync::config::{self, Config};
use knowledge_sync::db;
use knowledge_sync::engine::{IngestionEngine, SubmitRun};
use knowledge_sync::migrate;
use knowledge_sync::models::{IngestionMode, RunStatus};
use knowledge_sync::sources;

/// Knowledge Sync: keeps a vector corpus in sync with its document sources.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file.
#[derive(Parser)]
#[command(
    name = "ksync",
    about = "Knowledge Sync: incremental ingestion of document sources into a vector corpus",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ksync.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// List configured data sources and whether they are reachable.
    Sources,

    /// Create or delete a corpus.
    Corpus {
        #[command(subcommand)]
        action: CorpusAction,
    },

    /// Reconcile a corpus with its data sources.
    ///
    /// Enumerates and parses every document, compares content hashes with
    /// what the corpus stores, and writes only the difference. Waits for the
    /// run to finish and prints its outcome.
    Ingest {
        /// Corpus name.
        corpus: String,

        /// Only reconcile this data source (`type::uri`).
        #[arg(long)]
        source: Option<String>,

        /// `incremental` keeps data points missing from the sources;
        /// `full` deletes them.
        #[arg(long, default_value = "incremental")]
        mode: IngestionMode,

        /// Data points per batch. Defaults to `ingestion.default_batch_size`.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Record failures and carry on instead of failing the run at the first one.
        #[arg(long)]
        no_raise: bool,
    },

    /// Show the status of a run.
    Status {
        /// Run name.
        run: String,
    },

    /// List the runs of a corpus, newest first.
    Runs {
        /// Corpus name.
        corpus: String,

        /// Only runs for this data source.
        #[arg(long)]
        source: Option<String>,
    },

    /// Show the errors recorded for a run.
    Errors {
        /// Run name.
        run: String,
    },

    /// Mark an unfinished run as FAILED.
    ///
    /// A run whose process was killed stays RUNNING and blocks new runs on
    /// the same corpus. This releases it.
    Abandon {
        /// Run name.
        run: String,
    },

    /// Print shell completions to stdout.
    Completions {
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum CorpusAction {
    /// Create a corpus in the vector store.
    Create { name: String },
    /// Delete a corpus, its vectors and its run history.
    Delete { name: String },
}

async fn open_engine(cfg: &Config) -> anyhow::Result<IngestionEngine> {
    let caps = Capabilities::from_config(cfg)
        .await
        .context("Failed to set up ingestion capabilities")?;
    Ok(IngestionEngine::new(cfg.clone(), caps))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init()
        .ok();

    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "ksync", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            println!("Database initialized successfully.");
        }
        Commands::Sources => {
            let engine = open_engine(&cfg).await?;
            sources::list_sources(engine.config(), engine.capabilities()).await?;
        }
        Commands::Corpus { action } => {
            let engine = open_engine(&cfg).await?;
            match action {
                CorpusAction::Create { name } => {
                    engine.create_corpus(&name).await?;
                    println!("corpus {} created", name);
                }
                CorpusAction::Delete { name } => {
                    engine.delete_corpus(&name).await?;
                    println!("corpus {} deleted", name);
                }
            }
        }
        Commands::Ingest {
            corpus,
            source,
            mode,
            batch_size,
            no_raise,
        } => {
            let engine = open_engine(&cfg).await?;
            let mut request = SubmitRun::new(corpus)
                .mode(mode)
                .raise_error_on_failure(!no_raise);
            request.data_source_fqn = source;
            request.batch_size = batch_size;

            let run = engine.submit_run(request).await?;
            println!("ingest {}", run.corpus_name);
            println!("  run: {}", run.name);
            println!("  mode: {}", run.mode);
            println!("  batch size: {}", run.batch_size);

            let poll = Duration::from_millis(cfg.ingestion.poll_interval_ms.max(1));
            let finished = engine.wait_for_run(&run.name, poll).await?;
            let errors = engine.run_errors(&run.name).await?;
            println!("  status: {}", finished.status);
            println!("  errors: {}", errors.len());
            for error in &errors {
                println!("    {} [{}] {}", error.key, error.category, error.message);
            }
            if finished.status == RunStatus::Failed {
                bail!("run {} failed", finished.name);
            }
            println!("ok");
        }
        Commands::Status { run } => {
            let engine = open_engine(&cfg).await?;
            let report = engine.get_run_status(&run).await?;
            println!("{}", report.status);
            println!("{}", report.message);
        }
        Commands::Runs { corpus, source } => {
            let engine = open_engine(&cfg).await?;
            let runs = engine.list_runs(&corpus, source.as_deref()).await?;
            if runs.is_empty() {
                println!("no runs for corpus {}", corpus);
                return Ok(());
            }
            println!(
                "{:<24} {:<17} {:<12} {:<20} SOURCE",
                "NAME", "STATUS", "MODE", "CREATED"
            );
            for run in &runs {
                println!(
                    "{:<24} {:<17} {:<12} {:<20} {}",
                    run.name,
                    run.status,
                    run.mode,
                    run.created_at.format("%Y-%m-%d %H:%M:%S"),
                    run.data_source_fqn.as_deref().unwrap_or("*")
                );
            }
        }
        Commands::Errors { run } => {
            let engine = open_engine(&cfg).await?;
            let errors = engine.run_errors(&run).await?;
            if errors.is_empty() {
                println!("no errors recorded for {}", run);
                return Ok(());
            }
            for error in &errors {
                println!(
                    "{} {} [{}] {}",
                    error.occurred_at.format("%Y-%m-%d %H:%M:%S"),
                    error.key,
                    error.category,
                    error.message
                );
                for fqn in &error.data_point_fqns {
                    println!("    {}", fqn);
                }
            }
        }
        Commands::Abandon { run } => {
            let engine = open_engine(&cfg).await?;
            engine.abandon_run(&run).await?;
            println!("run {} marked FAILED", run);
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}
