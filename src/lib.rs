//! # passdb
//!
//! Ingests leaked-credential dumps (`.tar.gz` archives of `email:password`
//! text files) into a normalized store and serves lookups over it.
//!
//! Usernames, domains and passwords are each stored once; a record is the
//! unique (username, domain, password) triple. Re-ingesting the same data
//! adds nothing.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────────┐   ┌──────────┐
//! │   Archive   │──▶│  Normalize  │──▶│   Resolve    │──▶│  SQLite  │
//! │  tar + gz   │   │ email:pass  │   │ ids + record │   │  (WAL)   │
//! └─────────────┘   └─────────────┘   └──────────────┘   └────┬─────┘
//!                                                             │
//!                                          ┌──────────────────┤
//!                                          ▼                  ▼
//!                                     ┌──────────┐      ┌──────────┐
//!                                     │   CLI    │      │   HTTP   │
//!                                     │ (passdb) │      │  /api/v1 │
//!                                     └──────────┘      └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Line, store and archive error taxonomy |
//! | [`archive`] | Streaming `.tar.gz` line reader |
//! | [`normalize`] | Raw line → credential |
//! | [`store`] | Entity resolution and record deduplication |
//! | [`ingest`] | Ingestion driver, ledger and reject log |
//! | [`progress`] | Ingest progress reporting |
//! | [`lookup`] | Credential queries |
//! | [`breach`] | Breach history client |
//! | [`server`] | HTTP query API |
//! | [`cache`] | HTTP response cache |
//! | [`stats`] | Database statistics |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |

pub mod archive;
pub mod breach;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod lookup;
pub mod migrate;
pub mod models;
pub mod normalize;
pub mod progress;
pub mod server;
pub mod stats;
pub mod store;
