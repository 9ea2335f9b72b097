//! CLI module for Vanguard
//!
//! Provides commands:
//! - `serve`: Start the server (default)
//! - `config`: Print the effective configuration
//! - `tools`: List the configured tool catalog

use clap::{Parser, Subcommand};

use crate::server::AppConfig;

pub mod config;
pub mod tools;

/// Vanguard attack orchestration server
#[derive(Parser, Debug)]
#[command(name = "vanguard")]
#[command(about = "Attack orchestration server: scenarios, campaigns and live terminals")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Start the server (default)
    Serve,
    /// Print the effective configuration as TOML
    Config,
    /// List the configured tools and their setup steps
    Tools,
}

/// Run the CLI command
pub async fn run(cli: Cli, config: AppConfig) -> anyhow::Result<()> {
    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => crate::server::run(config).await,
        Commands::Config => config::run(&config),
        Commands::Tools => tools::run(&config),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        let cli = Cli::try_parse_from(["vanguard"]).unwrap();
        assert!(cli.command.is_none());

        let cli = Cli::try_parse_from(["vanguard", "tools"]).unwrap();
        assert_eq!(cli.command, Some(Commands::Tools));

        assert!(Cli::try_parse_from(["vanguard", "launch"]).is_err());
    }
}
