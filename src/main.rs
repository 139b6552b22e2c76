//! # Seed Pipeline CLI (`seedctl`)
//!
//! The `seedctl` binary is the primary interface for Seed Pipeline. It
//! provides commands for database initialization, batch ingestion of
//! name-variation files, store statistics, and the read-only query server.
//!
//! ## Usage
//!
//! ```bash
//! seedctl --config ./config/seed.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `seedctl init` | Create the SQLite database and run schema migrations |
//! | `seedctl adapters` | List registered source-format adapters |
//! | `seedctl ingest` | Ingest a directory of `.json` files into a batch |
//! | `seedctl stats` | Row counts and per-batch breakdown |
//! | `seedctl serve` | Start the HTTP query server |
//!
//! ## Examples
//!
//! ```bash
//! seedctl init
//! seedctl ingest --batch-name run-42 --adapter generic_responses_v1 --path ./dumps/run-42
//! seedctl ingest --batch-name run-42 --adapter generic_responses_v1 --path ./dumps/run-42 --dry-run
//! seedctl serve
//! ```
//!
//! Logging goes to stderr through `tracing`; set `RUST_LOG` (or `[log] filter`
//! in the config) to see per-file decisions.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use seed_pipeline::adapters::{list_adapters, AdapterRegistry};
use seed_pipeline::config::{self, Config};
use seed_pipeline::ingest::{run_ingest, IngestOptions};
use seed_pipeline::progress::ProgressMode;
use seed_pipeline::{migrate, server, stats};

/// Seed Pipeline CLI: batch ingestion and deduplication of name-variation
/// observations.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/seed.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "seedctl",
    about = "Seed Pipeline — ingest, normalize, and deduplicate name-variation observations",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/seed.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// List registered adapters.
    Adapters,

    /// Ingest every `.json` file in a directory into a named batch.
    ///
    /// Re-running with the same batch name continues that batch; files whose
    /// content was already ingested are skipped unless `--no-resume` is given.
    Ingest {
        /// Batch name. Existing batches are reused.
        #[arg(long)]
        batch_name: String,

        /// Adapter that parses the files (see `seedctl adapters`).
        #[arg(long)]
        adapter: String,

        /// Directory containing `.json` files.
        #[arg(long)]
        path: PathBuf,

        /// Count everything but write nothing.
        #[arg(long)]
        dry_run: bool,

        /// Reprocess files even if their content was already ingested.
        #[arg(long)]
        no_resume: bool,

        /// Worker count (>= 1). Reserved; processing is sequential.
        #[arg(long)]
        workers: Option<usize>,

        /// Source-system label for a newly created batch.
        #[arg(long)]
        source_system: Option<String>,

        /// Progress on stderr. Defaults to `human` on a terminal, else `off`.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,

        /// Print the metrics as a JSON object instead of the summary line.
        #[arg(long)]
        json: bool,
    },

    /// Show database statistics.
    Stats,

    /// Start the HTTP query server on `[server].bind`.
    Serve,
}

fn init_tracing(cfg: Option<&Config>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let directive = cfg
            .and_then(|c| c.log.filter.as_deref())
            .unwrap_or("warn");
        EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("warn"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Adapters = cli.command {
        init_tracing(None);
        list_adapters(&AdapterRegistry::with_builtins());
        return Ok(());
    }

    let cfg = match config::load_config(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            init_tracing(None);
            return Err(e);
        }
    };
    init_tracing(Some(&cfg));

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Adapters => {}
        Commands::Ingest {
            batch_name,
            adapter,
            path,
            dry_run,
            no_resume,
            workers,
            source_system,
            progress,
            json,
        } => {
            let mut options = IngestOptions::from_config(&cfg);
            options.dry_run = dry_run;
            options.resume = !no_resume;
            if let Some(workers) = workers {
                options.workers = workers;
            }
            if source_system.is_some() {
                options.source_system = source_system;
            }
            let progress = progress.unwrap_or_else(ProgressMode::default_for_tty);

            run_ingest(&cfg, &batch_name, &adapter, &path, &options, progress, json).await?;
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
