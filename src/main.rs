//! CLI entry point for the batch downloader.

use anyhow::Result;
use clap::Parser;
use tracing::{debug, info};

mod app;
mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();
    let file_config = app::config::load_default_file_config()?;

    // Priority: RUST_LOG env var > quiet flag > verbose flag > config file > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => file_config
                .as_ref()
                .and_then(|config| config.verbosity)
                .map_or("info", |verbosity| verbosity.level()),
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
    info!("Batch downloader starting");

    app::run(args, file_config).await
}
