//! # flashcheck CLI Module
//!
//! ## Available Commands
//!
//! - `run` - Run the post-flash self-test on one or more ports
//! - `sessions` - List stored sessions
//! - `show` - Show one session with every stage outcome
//! - `export` - Export sessions as CSV
//! - `serials` - Inspect the serial-number ledger (`next`, `list`, `verify`)
//! - `ports` - List serial ports
//! - `serve` - Start the read-only query API
//! - `init` - Write a config template and create the database

mod commands;

use crate::config::{DEFAULT_CONFIG_FILE, StationConfig};
use clap::{Parser, Subcommand};
use flashcheck_core::FlashcheckError;
use std::path::{Path, PathBuf};

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// flashcheck - post-flash validation station
///
/// Watches a freshly flashed device boot, walks it through its self-test,
/// assigns it a serial number and records the result.
#[derive(Parser, Debug)]
#[command(name = "flashcheck")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Show per-stage details in summaries
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Station config file (default: ./flashcheck.toml if present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Result database; overrides the config
    #[arg(short = 'D', long, global = true)]
    pub database: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the self-test on freshly flashed devices
    Run {
        /// Serial port of the device; repeat for several devices
        #[arg(short, long, required = true)]
        port: Vec<String>,

        /// MAC address reported by the flashing tool (single port only)
        #[arg(short, long)]
        mac: Option<String>,

        /// Reset the device through DTR/RTS before monitoring
        #[arg(short, long)]
        reset: bool,
    },

    /// List stored sessions
    Sessions {
        /// Only sessions started on this UTC date (YYYY-MM-DD)
        #[arg(short, long)]
        date: Option<String>,
    },

    /// Show one session
    Show {
        /// Session id
        id: String,
    },

    /// Export sessions as CSV
    Export {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// Only sessions started on this UTC date (YYYY-MM-DD)
        #[arg(short, long)]
        date: Option<String>,
    },

    /// Inspect the serial-number ledger
    Serials {
        #[command(subcommand)]
        action: SerialsAction,
    },

    /// List available serial ports
    Ports,

    /// Start the read-only query API
    Serve {
        /// Host to bind to
        #[arg(short = 'H', long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind to
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },

    /// Write a config template and create the database
    Init {
        /// Overwrite an existing config file
        #[arg(short, long)]
        force: bool,
    },
}

/// `serials` subcommands.
#[derive(Subcommand, Debug)]
pub enum SerialsAction {
    /// Preview the next serial number without reserving it
    Next {
        /// Station-local date (YYYY-MM-DD); today if absent
        #[arg(short, long)]
        date: Option<String>,
    },

    /// List issued serial numbers
    List {
        /// Only this bucket
        #[arg(short, long)]
        bucket: Option<String>,
    },

    /// Check ledger digests and sequence contiguity
    Verify,
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), FlashcheckError> {
    let json_mode = cli.json_mode;

    if let Commands::Init { force } = cli.command {
        let path = cli
            .config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        return cmd_init(&path, cli.database.as_deref(), force);
    }

    let config = station_config(cli.config.as_deref(), cli.database)?;

    match cli.command {
        Commands::Run { port, mac, reset } => {
            cmd_run(&config, &port, mac, reset, json_mode, cli.verbose).await
        }
        Commands::Sessions { date } => cmd_sessions(&config, date.as_deref(), json_mode),
        Commands::Show { id } => cmd_show(&config, &id, json_mode),
        Commands::Export { output, date } => cmd_export(&config, &output, date.as_deref()),
        Commands::Serials { action } => match action {
            SerialsAction::Next { date } => cmd_serials_next(&config, date.as_deref(), json_mode),
            SerialsAction::List { bucket } => {
                cmd_serials_list(&config, bucket.as_deref(), json_mode)
            }
            SerialsAction::Verify => cmd_serials_verify(&config, json_mode),
        },
        Commands::Ports => cmd_ports(json_mode),
        Commands::Serve { host, port } => cmd_serve(&config, &host, port).await,
        Commands::Init { .. } => Ok(()),
    }
}

/// Load the station config and apply the `--database` override.
fn station_config(
    path: Option<&Path>,
    database: Option<PathBuf>,
) -> Result<StationConfig, FlashcheckError> {
    let mut config = StationConfig::load(path)?;
    if let Some(db) = database {
        config.database = db;
    }
    Ok(config)
}

// =============================================================================
// TESTS
// =============================================================================
