//! # Knowledge Sync
//!
//! An ingestion reconciliation engine: keeps a vector corpus in sync with
//! the document sources it was built from.
//!
//! Each run enumerates a data source, parses documents into data points,
//! compares their content fingerprints against what the corpus already
//! stores, and applies only the difference in bounded batches. Runs are
//! tracked as durable records with a status lifecycle and an error log.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌──────────┐
//! │ Loaders  │──▶│ Parsers  │──▶│ Planner  │──▶│ Executor │──▶ Vector store
//! │ dir/git/ │   │ txt/md/  │   │ diff vs  │   │ batches  │
//! │ web      │   │ html/pdf │   │ hashes   │   │ + embed  │
//! └──────────┘   └──────────┘   └──────────┘   └────┬─────┘
//!                                                   ▼
//!                                            Run tracker ──▶ Run store
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ksync init                              # create database
//! ksync corpus create handbook            # create the target corpus
//! ksync ingest handbook --mode full       # reconcile every associated source
//! ksync status handbook-x7k2p             # poll a run
//! ksync errors handbook-x7k2p             # inspect failures
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`engine`] | Public entry point: submit runs, report status |
//! | [`capabilities`] | Loaders, parsers, embedder, stores and pool handed to the engine |
//! | [`config`] | TOML configuration, data source and corpus catalog |
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy |
//! | [`loader`], [`loader_fs`], [`loader_git`], [`loader_web`] | Document enumeration |
//! | [`parser`], [`chunk`], [`extract`] | Parsing raw documents into data points |
//! | [`fingerprint`] | Content hashes and the stored fingerprint map |
//! | [`planner`] | Insert / update / delete planning |
//! | [`executor`], [`pool`] | Batched application of a plan |
//! | [`embedding`] | Embedding providers |
//! | [`store`], [`store_memory`], [`store_sqlite`] | Vector stores |
//! | [`run_store`], [`tracker`] | Run records and lifecycle |
//! | [`sources`] | Data source health |
//! | [`db`], [`migrate`] | Database connection and schema |

pub mod capabilities;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod executor;
pub mod extract;
pub mod fingerprint;
pub mod loader;
pub mod loader_fs;
pub mod loader_git;
pub mod loader_web;
pub mod migrate;
pub mod models;
pub mod parser;
pub mod planner;
pub mod pool;
pub mod run_store;
pub mod sources;
pub mod store;
pub mod store_memory;
pub mod store_sqlite;
pub mod tracker;
