//! # ragcache CLI
//!
//! ```bash
//! ragcache --config ./config/ragcache.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragcache init` | Create the SQLite database and run schema migrations |
//! | `ragcache ingest "<text>"` | Chunk, embed, and store text (or `--file <path>`) |
//! | `ragcache query "<question>"` | Answer a question from the knowledge base |
//! | `ragcache cache clear` | Drop every cached answer |
//! | `ragcache serve` | Start the HTTP server |
//!
//! Logging goes to stderr; set `RUST_LOG` (default `info`) to adjust it.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use ragcache::{commands, config, migrate, server};

#[derive(Parser)]
#[command(
    name = "ragcache",
    about = "ragcache: retrieval-augmented answers with a semantic answer cache",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ragcache.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Ingest text into the knowledge base.
    ///
    /// Near-duplicates of existing chunks supersede them, and the answer
    /// cache is cleared afterwards.
    Ingest {
        /// Text to ingest.
        text: Option<String>,

        /// Read the text from a file instead.
        #[arg(long, conflicts_with = "text")]
        file: Option<PathBuf>,
    },

    /// Answer a question, from cache when possible.
    Query {
        /// The question.
        query: String,
    },

    /// Manage the answer cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum CacheAction {
    /// Remove every cached answer.
    Clear,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { text, file } => {
            commands::run_ingest(&cfg, text, file.as_deref()).await?;
        }
        Commands::Query { query } => {
            commands::run_query(&cfg, &query).await?;
        }
        Commands::Cache { action } => match action {
            CacheAction::Clear => {
                commands::run_cache_clear(&cfg).await?;
            }
        },
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
