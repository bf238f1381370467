//! # Quarry CLI Module
//!
//! ## Available Commands
//!
//! - `materialize` - Materialize a locator and print N-Quads or counts
//! - `fingerprint` - Show the normalized options and fingerprint of a locator
//! - `formats` - List registered materializers
//! - `functions` - List the session helper functions

mod commands;

use clap::{Parser, Subcommand};
use quarry_core::{EngineSettings, QuarryError};
use std::path::{Path, PathBuf};

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Quarry - materialize structured sources as RDF quads
#[derive(Parser, Debug)]
#[command(name = "quarry")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Engine settings file (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Materialize a locator and print the result
    Materialize {
        /// Reserved-scheme locator, e.g. x-quarry:location=data.txt
        locator: String,
    },

    /// Show the normalized options and fingerprint of a locator
    Fingerprint {
        /// Reserved-scheme locator
        locator: String,
    },

    /// List registered materializers
    Formats,

    /// List the session helper functions and their IRIs
    Functions,
}

// =============================================================================
// SETTINGS
// =============================================================================

/// Load engine settings from a TOML file; missing keys keep their defaults.
pub fn load_settings(path: Option<&Path>) -> Result<EngineSettings, QuarryError> {
    let Some(path) = path else {
        return Ok(EngineSettings::default());
    };
    let text = std::fs::read_to_string(path)
        .map_err(|e| QuarryError::IoError(format!("Cannot read {}: {}", path.display(), e)))?;
    toml::from_str(&text).map_err(|e| {
        QuarryError::InvalidConfiguration(format!("Invalid settings in {}: {}", path.display(), e))
    })
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub fn execute(cli: Cli) -> Result<(), QuarryError> {
    let settings = load_settings(cli.config.as_deref())?;
    let engine = build_engine(settings);
    let mut out = std::io::stdout().lock();

    match cli.command {
        Commands::Materialize { locator } => cmd_materialize(&engine, &locator, cli.json, &mut out),
        Commands::Fingerprint { locator } => cmd_fingerprint(&engine, &locator, cli.json, &mut out),
        Commands::Formats => cmd_formats(&engine, cli.json, &mut out),
        Commands::Functions => cmd_functions(cli.json, &mut out),
    }
}
