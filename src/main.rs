//! # passdb CLI
//!
//! Ingests leaked-credential `.tar.gz` dumps into a normalized SQLite store
//! and serves lookups over it.
//!
//! ## Usage
//!
//! ```bash
//! passdb --config ./config/passdb.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `passdb init` | Create the SQLite database and schema |
//! | `passdb ingest <archive>` | Ingest every entry of a `.tar.gz` dump |
//! | `passdb lookup <kind> <value>` | Records for a username, domain or password |
//! | `passdb email <address>` | Records for an exact `user@domain` |
//! | `passdb stats` | Row counts and ingest history |
//! | `passdb serve` | Start the HTTP query API |
//!
//! ## Examples
//!
//! ```bash
//! passdb init
//! passdb ingest ./dumps/collection.tar.gz --workers 8 --resume
//! passdb lookup domain example.com --page 2
//! passdb email alice@example.com
//! passdb serve
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use passdb::config::{self, Config};
use passdb::ingest::{self, IngestArgs};
use passdb::models::EntityKind;
use passdb::progress::ProgressMode;
use passdb::{lookup, migrate, server, stats};

/// Ingest leaked-credential dumps and look them up.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/passdb.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "passdb",
    about = "passdb — ingest leaked-credential dumps into a normalized store and query it",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/passdb.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file, the username/domain/password/record
    /// tables, their indexes and the ingest ledger. Safe to run repeatedly.
    Init,

    /// Ingest a `.tar.gz` credential dump.
    ///
    /// Every regular file in the archive is read as `email:password` or
    /// `email;password` lines. Each line is counted as added, duplicate or
    /// malformed; a bad line never stops the run.
    Ingest {
        /// Path to the gzip-compressed tar archive.
        archive: PathBuf,

        /// Lines in flight at once (overrides `[ingest].workers`).
        #[arg(long)]
        workers: Option<usize>,

        /// Skip entries already recorded as completed for this archive.
        #[arg(long)]
        resume: bool,

        /// Ingest into memory only; nothing is written to the database.
        #[arg(long)]
        dry_run: bool,

        /// Progress output on stderr: `human`, `json`, or `off`.
        /// Defaults to `human` when stderr is a terminal.
        #[arg(long)]
        progress: Option<ProgressMode>,
    },

    /// Look up records by username, domain, or password.
    Lookup {
        /// `username`, `domain`, or `password`.
        kind: EntityKind,

        /// Value to match. Usernames and domains are case-insensitive.
        value: String,

        /// 1-based page number.
        #[arg(long)]
        page: Option<u32>,

        /// Records per page (clamped to `[server].max_per_page`).
        #[arg(long)]
        per_page: Option<u32>,
    },

    /// Look up every record for an exact `user@domain`.
    Email {
        address: String,
    },

    /// Show row counts and ingest history.
    Stats,

    /// Start the HTTP query API on `[server].bind`.
    Serve,
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli, cfg: Config) -> anyhow::Result<()> {
    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            archive,
            workers,
            resume,
            dry_run,
            progress,
        } => {
            let args = IngestArgs {
                workers,
                resume,
                dry_run,
                progress: progress.unwrap_or_else(ProgressMode::default_for_tty),
            };
            ingest::run_ingest(&cfg, &archive, args).await?;
        }
        Commands::Lookup {
            kind,
            value,
            page,
            per_page,
        } => {
            lookup::run_lookup(&cfg, kind, &value, page, per_page).await?;
        }
        Commands::Email { address } => {
            lookup::run_email(&cfg, &address).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let cfg = match config::load_config(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::FAILURE;
        }
    };
    init_logging(&cfg);

    match run(cli, cfg).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
