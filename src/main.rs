//! Vanguard - Attack orchestration server
//!
//! CLI entry point for the Vanguard server.

#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use tracing::debug;

mod api;
mod cli;
mod server;
mod websocket;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let cli = cli::Cli::parse();
    let config = server::load_config()?;
    let _log_guard = server::init_logging(&config.logging);

    debug!(command = ?cli.command, "Parsed command line");

    cli::run(cli, config).await
}
