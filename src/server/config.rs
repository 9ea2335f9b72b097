//! Server configuration types
//!
//! Every section has serde defaults so a partial file still loads.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vanguard_core::{CampaignConfig, ExecutionConfig, TerminalConfig};
use vanguard_tools::{SupervisorConfig, ToolSpec, DEFAULT_ALLOWED_PROGRAMS};

use crate::websocket::HubConfig;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub supervisor: SupervisorSection,
    #[serde(default)]
    pub terminals: TerminalsSection,
    #[serde(default)]
    pub execution: ExecutionSection,
    #[serde(default)]
    pub campaigns: CampaignsSection,
    #[serde(default)]
    pub broadcast: BroadcastSection,
    /// Declarative tool catalog
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
}

/// HTTP listener
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8090
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human-readable text
    #[serde(default)]
    pub json: bool,
    /// Also write daily-rotated files here
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

/// Persistence backend selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            sqlite_path: default_sqlite_path(),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("data/vanguard.db")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorSection {
    #[serde(default = "default_allowed_programs")]
    pub allowed_programs: Vec<String>,
    #[serde(default = "default_supervisor_sweep")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_inactivity_timeout")]
    pub inactivity_timeout_secs: u64,
    #[serde(default = "default_kill_grace")]
    pub kill_grace_secs: u64,
    #[serde(default = "default_container_remove_delay")]
    pub container_remove_delay_secs: u64,
    #[serde(default = "default_finished_retention")]
    pub finished_retention_secs: u64,
}

impl Default for SupervisorSection {
    fn default() -> Self {
        Self {
            allowed_programs: default_allowed_programs(),
            sweep_interval_secs: default_supervisor_sweep(),
            inactivity_timeout_secs: default_inactivity_timeout(),
            kill_grace_secs: default_kill_grace(),
            container_remove_delay_secs: default_container_remove_delay(),
            finished_retention_secs: default_finished_retention(),
        }
    }
}

impl SupervisorSection {
    pub fn to_supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig::new()
            .with_allowed_programs(self.allowed_programs.iter().cloned())
            .with_sweep_interval(Duration::from_secs(self.sweep_interval_secs))
            .with_inactivity_timeout(Duration::from_secs(self.inactivity_timeout_secs))
            .with_kill_grace(Duration::from_secs(self.kill_grace_secs))
            .with_container_remove_delay(Duration::from_secs(self.container_remove_delay_secs))
            .with_finished_retention(Duration::from_secs(self.finished_retention_secs))
    }
}

fn default_allowed_programs() -> Vec<String> {
    DEFAULT_ALLOWED_PROGRAMS
        .iter()
        .map(|s| (*s).to_string())
        .collect()
}
fn default_supervisor_sweep() -> u64 {
    60
}
fn default_inactivity_timeout() -> u64 {
    600
}
fn default_kill_grace() -> u64 {
    5
}
fn default_container_remove_delay() -> u64 {
    2
}
fn default_finished_retention() -> u64 {
    600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalsSection {
    #[serde(default = "default_max_lines")]
    pub max_lines: usize,
    #[serde(default = "default_terminal_retention")]
    pub retention_secs: u64,
    #[serde(default = "default_terminal_sweep")]
    pub sweep_interval_secs: u64,
}

impl Default for TerminalsSection {
    fn default() -> Self {
        Self {
            max_lines: default_max_lines(),
            retention_secs: default_terminal_retention(),
            sweep_interval_secs: default_terminal_sweep(),
        }
    }
}

impl TerminalsSection {
    pub fn to_terminal_config(&self) -> TerminalConfig {
        let mut config = TerminalConfig::new()
            .with_max_lines(self.max_lines)
            .with_retention(Duration::from_secs(self.retention_secs));
        config.sweep_interval = Duration::from_secs(self.sweep_interval_secs);
        config
    }
}

fn default_max_lines() -> usize {
    1000
}
fn default_terminal_retention() -> u64 {
    24 * 60 * 60
}
fn default_terminal_sweep() -> u64 {
    3600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSection {
    /// Delay after starting pre-commands before the main command runs
    #[serde(default = "default_settle_ms")]
    pub pre_command_settle_ms: u64,
}

impl Default for ExecutionSection {
    fn default() -> Self {
        Self {
            pre_command_settle_ms: default_settle_ms(),
        }
    }
}

impl ExecutionSection {
    pub fn to_execution_config(&self) -> ExecutionConfig {
        ExecutionConfig {
            pre_command_settle: Duration::from_millis(self.pre_command_settle_ms),
        }
    }
}

fn default_settle_ms() -> u64 {
    3000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignsSection {
    #[serde(default = "default_completion_poll")]
    pub completion_poll_secs: u64,
}

impl Default for CampaignsSection {
    fn default() -> Self {
        Self {
            completion_poll_secs: default_completion_poll(),
        }
    }
}

impl CampaignsSection {
    pub fn to_campaign_config(&self) -> CampaignConfig {
        CampaignConfig {
            completion_poll: Duration::from_secs(self.completion_poll_secs.max(1)),
        }
    }
}

fn default_completion_poll() -> u64 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastSection {
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    #[serde(default = "default_idle_ttl")]
    pub idle_ttl_secs: u64,
    #[serde(default = "default_broadcast_sweep")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_client_buffer")]
    pub client_buffer: usize,
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
}

impl Default for BroadcastSection {
    fn default() -> Self {
        Self {
            history_capacity: default_history_capacity(),
            idle_ttl_secs: default_idle_ttl(),
            sweep_interval_secs: default_broadcast_sweep(),
            client_buffer: default_client_buffer(),
            event_bus_capacity: default_event_bus_capacity(),
        }
    }
}

impl BroadcastSection {
    pub fn to_hub_config(&self) -> HubConfig {
        HubConfig {
            history_capacity: self.history_capacity.max(1),
            idle_ttl: Duration::from_secs(self.idle_ttl_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
            client_buffer: self.client_buffer.max(1),
        }
    }
}

fn default_history_capacity() -> usize {
    500
}
fn default_idle_ttl() -> u64 {
    24 * 60 * 60
}
fn default_broadcast_sweep() -> u64 {
    900
}
fn default_client_buffer() -> usize {
    1024
}
fn default_event_bus_capacity() -> usize {
    4096
}
