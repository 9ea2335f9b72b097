//! Configuration loading
//!
//! Handles loading configuration from embedded defaults, files, and environment.

use super::config::AppConfig;
use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};

/// Embedded default configuration (compiled into binary)
pub const DEFAULT_CONFIG: &str = include_str!("../../config/default.toml");

/// Load configuration from files and environment
pub fn load_config() -> Result<AppConfig> {
    let config = Config::builder()
        // 1. Embedded defaults (always available)
        .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
        // 2. External overrides (optional)
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            File::with_name(&format!(
                "config/{}",
                std::env::var("VANGUARD_ENV").unwrap_or_else(|_| "development".to_string())
            ))
            .required(false),
        )
        .add_source(File::with_name("config/local").required(false))
        // 3. Environment variables (highest priority)
        // prefix_separator("_") so VANGUARD_SERVER__PORT works with a single _ after the prefix
        .add_source(
            Environment::with_prefix("VANGUARD")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?;

    config
        .try_deserialize()
        .context("Failed to deserialize configuration")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_defaults_parse() {
        let config: AppConfig = toml::from_str(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.server.port, 8090);
        assert_eq!(config.broadcast.event_bus_capacity, 4096);
        assert_eq!(config.campaigns.completion_poll_secs, 5);

        let nmap = config.tools.iter().find(|t| t.name == "nmap").unwrap();
        assert_eq!(nmap.program, "nmap");
        let msf = config
            .tools
            .iter()
            .find(|t| t.name == "msf-handler")
            .unwrap();
        assert_eq!(msf.pre_commands.len(), 1);
        assert!(msf.is_multi_stage());
    }

    #[test]
    fn test_embedded_tools_are_allowed() {
        let config: AppConfig = toml::from_str(DEFAULT_CONFIG).unwrap();
        let policy = vanguard_tools::CommandPolicy::new(config.supervisor.allowed_programs.clone());
        for tool in &config.tools {
            assert!(policy.permits(&tool.program), "{} not allowed", tool.program);
        }
    }
}
