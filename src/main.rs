//! CLI entry point for the Monster Siren downloader.

use std::process::ExitCode;

use clap::Parser;
use tracing::{debug, error};

mod app;
mod app_config;
mod cli;

use app::exit_handler::ProcessExit;
use cli::Args;

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    match app::runtime::run_downloader(args).await {
        Ok(exit) => exit.into(),
        Err(e) => {
            error!("{e:#}");
            ProcessExit::Failure.into()
        }
    }
}
