//! CLI argument types for `taskgate serve` and `taskgate check`.
//!
//! Defined apart from `main.rs` so tests can build them directly.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// taskgate: long-running task tracking over JSON-RPC.
#[derive(Parser, Debug)]
#[command(name = "taskgate", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve task requests as NDJSON JSON-RPC on stdin/stdout.
    Serve(ServeArgs),
    /// Load and validate configuration, then exit.
    Check(CheckArgs),
}

/// Arguments for `taskgate serve`.
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Configuration file. Falls back to $TASKGATE_CONFIG, then the default
    /// search paths.
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Serve /health and /metrics on this port (overrides `admin.port`).
    #[arg(long)]
    pub admin_port: Option<u16>,

    /// Enable debug logging.
    #[arg(long, short)]
    pub verbose: bool,
}

/// Arguments for `taskgate check`.
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Configuration file to validate.
    #[arg(long, short)]
    pub config: Option<PathBuf>,
}
