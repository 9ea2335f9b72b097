//! Vanguard Core - Attack Execution Engine
//!
//! This crate provides the orchestration layer of the Vanguard engine:
//! - Model: scenarios, attacks, campaigns and their status machines
//! - Store: persistence interface with in-memory and SQLite backends
//! - Terminals: bounded per-attack output buffers
//! - Execution: multi-stage attack runs on top of the process supervisor
//! - Scenario / Campaign: the two orchestrators
//! - Event bus: engine events consumed by the real-time layer

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod campaign;
pub mod error;
pub mod event_bus;
pub mod execution;
mod keyed_lock;
pub mod model;
pub mod scenario;
pub mod shutdown;
pub mod store;
pub mod terminal;

#[cfg(test)]
mod test_support;

pub use campaign::{CampaignConfig, CampaignOrchestrator};
pub use error::{Error, Result};
pub use event_bus::{EngineEvent, EventBus};
pub use execution::{terminal_callbacks, AttackExecutor, AttackOutcome, ExecutionConfig};
pub use model::{
    Attack, Campaign, CampaignStatus, ExecutionProgress, ProgressDelta, RunStatus, Scenario,
    Target,
};
pub use scenario::{ScenarioFinished, ScenarioOrchestrator};
pub use shutdown::{wait_for_shutdown_signal, ShutdownController, TaskGuard};
pub use store::{MemoryStore, SqliteStore, Store};
pub use terminal::{
    aux_terminal_id, terminal_id, LineKind, TerminalConfig, TerminalLine, TerminalRegistry,
    TerminalSnapshot,
};
