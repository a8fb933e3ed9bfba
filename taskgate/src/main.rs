//! taskgate CLI entry point.
//!
//! `serve` hosts the task service on stdin/stdout; `check` validates
//! configuration. Logs always go to stderr so stdout carries only protocol
//! traffic.

use clap::Parser;

use taskgate::cli::{Cli, Commands};
use taskgate::serve::{run_check, run_serve};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Serve(args) => {
            init_tracing(args.verbose);
            match run_serve(args).await {
                Ok(()) => 0,
                Err(e) => {
                    tracing::error!(error = %e, "serve failed");
                    eprintln!("taskgate serve: {e}");
                    1
                }
            }
        }
        Commands::Check(args) => match run_check(args) {
            Ok(()) => 0,
            Err(e) => {
                eprintln!("taskgate check: {e}");
                1
            }
        },
    };

    std::process::exit(code);
}

/// Initialise tracing with stderr output.
///
/// `verbose` forces `debug`; otherwise `RUST_LOG` applies, defaulting to
/// `info`.
fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
