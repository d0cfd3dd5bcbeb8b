//! # Weft CLI Module
//!
//! ## Available Commands
//!
//! - `server` - Start the HTTP server
//! - `status` - Show store and history status
//! - `init` - Initialize a new database
//! - `get` - One-shot `GET` through the router
//! - `put` - One-shot `PUT` through the router
//! - `compact` - Compact the database file

mod commands;

use crate::config::Config;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use weft_core::WeftError;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Weft - project graph store with stamps and undo history
#[derive(Parser, Debug)]
#[command(name = "weft")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the redb database
    #[arg(short = 'D', long, global = true, default_value = "weft.redb")]
    pub database: PathBuf,

    /// Use a volatile in-memory store instead of the database file
    #[arg(long, global = true)]
    pub memory: bool,

    /// Configuration file (default: ./weft.toml if present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start HTTP server
    Server {
        /// Host to bind to (overrides [server] host)
        #[arg(short = 'H', long)]
        host: Option<String>,

        /// Port to bind to (overrides [server] port)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Show store and history status
    Status,

    /// Initialize a new empty database
    Init {
        /// Overwrite an existing database
        #[arg(short, long)]
        force: bool,
    },

    /// Send a GET request through the router, e.g. `weft get /projects`
    Get {
        path: String,
    },

    /// Send a PUT request through the router, e.g. `weft put /projects '{"name":"p"}'`
    Put {
        path: String,

        /// JSON body (omitted means null)
        body: Option<String>,

        /// Do not record a history entry
        #[arg(long)]
        skip_history: bool,
    },

    /// Compact the database file
    Compact,
}

/// Where the session's store lives.
#[derive(Debug, Clone)]
pub enum StoreLocation {
    File(PathBuf),
    Memory,
}

impl Cli {
    pub fn store_location(&self) -> StoreLocation {
        if self.memory {
            StoreLocation::Memory
        } else {
            StoreLocation::File(self.database.clone())
        }
    }
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

pub async fn execute(cli: Cli) -> Result<(), WeftError> {
    let config = Config::load(cli.config.as_deref())?;
    let location = cli.store_location();
    let json_mode = cli.json_mode;

    match cli.command {
        Some(Commands::Server { host, port }) => {
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);
            cmd_server(&location, &config, &host, port).await
        }
        Some(Commands::Init { force }) => cmd_init(&location, force),
        Some(Commands::Get { path }) => cmd_get(&location, &config, &path),
        Some(Commands::Put {
            path,
            body,
            skip_history,
        }) => cmd_put(&location, &config, &path, body.as_deref(), skip_history),
        Some(Commands::Compact) => cmd_compact(&location),
        Some(Commands::Status) | None => cmd_status(&location, &config, json_mode),
    }
}
