//! odix-cli: CLI entry point for the odix Odoo codebase index.

mod commands_index;
mod commands_search;
mod commands_serve;

use clap::{Parser, Subcommand};
use odix_core::OdixConfig;
use odix_storage::Storage;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "odix",
    about = "Structural index and query engine for Odoo codebases"
)]
#[command(version, propagate_version = true)]
struct Cli {
    /// Config file (defaults to ~/.odix/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start MCP server (stdio), indexing first when the index is empty
    Serve,

    /// Index the Odoo codebase
    Index {
        /// Re-extract every file instead of only changed ones
        #[arg(long)]
        full: bool,

        /// Restrict the run to these modules (comma-separated)
        #[arg(long, value_delimiter = ',')]
        modules: Vec<String>,

        /// Drop existing index content before indexing
        #[arg(long)]
        clear: bool,
    },

    /// Search indexed items by name ('%' is a wildcard)
    Search {
        /// Name pattern
        pattern: String,

        /// Item type (model, field, function, view, ...)
        #[arg(short, long)]
        kind: Option<String>,

        /// Restrict to one module
        #[arg(short, long)]
        module: Option<String>,

        /// Number of results
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show index statistics
    Status,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = OdixConfig::load_with_env(cli.config.as_deref())?;

    // Tracing goes to stderr (stdout reserved for JSON-RPC in serve mode)
    let filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => tracing_subscriber::EnvFilter::try_new(format!("odix={}", config.log_level))?,
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Serve => {
            commands_serve::cmd_serve(&config)?;
        }
        Commands::Index {
            full,
            modules,
            clear,
        } => {
            commands_index::cmd_index(&config, full, modules, clear)?;
        }
        Commands::Search {
            pattern,
            kind,
            module,
            limit,
        } => {
            commands_search::cmd_search(&config, &pattern, kind.as_deref(), module.as_deref(), limit)?;
        }
        Commands::Status => {
            commands_search::cmd_status(&config)?;
        }
    }

    Ok(())
}

/// Open the configured index store.
pub(crate) fn open_storage(config: &OdixConfig) -> anyhow::Result<Arc<Storage>> {
    let path = Path::new(&config.storage.db_path);
    let storage = Storage::open_with(path, &config.storage)?;
    Ok(Arc::new(storage))
}
