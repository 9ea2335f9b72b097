//! `vanguard config`: print the effective configuration

use anyhow::{Context, Result};

use crate::server::AppConfig;

/// Effective configuration as TOML
pub fn render(config: &AppConfig) -> Result<String> {
    toml::to_string_pretty(config).context("Failed to serialize configuration")
}

pub fn run(config: &AppConfig) -> Result<()> {
    println!("{}", render(config)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::DEFAULT_CONFIG;

    #[test]
    fn test_render_reloads() {
        let config: AppConfig = toml::from_str(DEFAULT_CONFIG).unwrap();
        let text = render(&config).unwrap();
        let reloaded: AppConfig = toml::from_str(&text).unwrap();

        assert_eq!(reloaded.server.port, config.server.port);
        assert_eq!(reloaded.tools, config.tools);
        assert_eq!(
            reloaded.supervisor.allowed_programs,
            config.supervisor.allowed_programs
        );
    }
}
