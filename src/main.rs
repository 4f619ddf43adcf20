//! Main application for the YouTube Downloader GUI and command line

// Native window
mod app;
// Command line parsing and headless runs
mod cli;
// Thumbnail fetching module
mod thumbnail;

use clap::Parser;
use tokio::runtime::Runtime;

use cli::Cli;
use tubegrab::{config::AppConfig, logging};

/// Program entry point: downloads headless when given a URL, otherwise opens the window
fn main() -> anyhow::Result<()> {
    // Tool locations may live in a .env next to the binary
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    logging::init(cli.verbose);

    let mut config = AppConfig::load(cli.config.as_deref())?;
    cli.apply_to(&mut config);

    match cli.request(&config) {
        Some(request) => {
            let runtime = Runtime::new()?;
            if !runtime.block_on(cli::run_headless(request, &config)) {
                std::process::exit(1);
            }
            Ok(())
        }
        None => app::run(config),
    }
}
