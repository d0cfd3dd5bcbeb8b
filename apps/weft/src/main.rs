//! # Weft
//!
//! Server and CLI for the Weft project graph store.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │              apps/weft (THE BINARY)          │
//! │                                              │
//! │   ┌─────────────┐        ┌─────────────┐     │
//! │   │    CLI      │        │  HTTP API   │     │
//! │   │   (clap)    │        │   (axum)    │     │
//! │   └──────┬──────┘        └──────┬──────┘     │
//! │          └───────────┬──────────┘            │
//! │                      ▼                       │
//! │              ┌───────────────┐               │
//! │              │   weft-core   │               │
//! │              │ router+history│               │
//! │              └───────────────┘               │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! weft server --host 0.0.0.0 --port 8080
//! weft put /projects '{"name":"adder"}'
//! weft get /projects
//! weft status --json-mode
//! ```

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use weft::cli;

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();

    init_tracing(cli.verbose);

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Logs go to stderr so `get`/`put` output stays clean JSON.
/// `WEFT_LOG_FORMAT=json` switches to machine-parseable output. `RUST_LOG`
/// overrides the default filter.
fn init_tracing(verbose: bool) {
    let log_format = std::env::var("WEFT_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let default_filter = if verbose {
        "weft=debug,weft_core=debug,tower_http=debug"
    } else {
        "weft=info,weft_core=info,tower_http=debug"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn print_banner() {
    println!(
        r#"
  ██╗    ██╗███████╗███████╗████████╗
  ██║    ██║██╔════╝██╔════╝╚══██╔══╝
  ██║ █╗ ██║█████╗  █████╗     ██║
  ██║███╗██║██╔══╝  ██╔══╝     ██║
  ╚███╔███╔╝███████╗██║        ██║
   ╚══╝╚══╝ ╚══════╝╚═╝        ╚═╝

  Project graph store v{}
"#,
        env!("CARGO_PKG_VERSION")
    );
}
