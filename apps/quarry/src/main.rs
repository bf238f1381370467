//! # Quarry
//!
//! Command-line host for the quarry materialization control plane.
//!
//! ## Usage
//!
//! ```bash
//! # Materialize a text file split on commas
//! quarry materialize 'x-quarry:location=data.txt,txt.split=\,'
//!
//! # Per-graph counts as JSON
//! quarry --json materialize x-quarry:location=bundle.zip
//!
//! # Normalized options and fingerprint of a locator
//! quarry fingerprint 'x-quarry:root=http://ex.org/,location=a.txt'
//!
//! # Registered materializers
//! quarry formats
//! ```

mod cli;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    // QUARRY_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("QUARRY_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "quarry=info,quarry_core=info".into());

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

    let cli = cli::Cli::parse();

    if !cli.quiet {
        print_banner();
    }

    if let Err(e) = cli::execute(cli) {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Banner goes to stderr; stdout carries only results.
fn print_banner() {
    eprintln!(
        r#"
  quarry v{}
  structured sources as queryable graphs
"#,
        env!("CARGO_PKG_VERSION")
    );
}
