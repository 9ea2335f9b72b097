//! Background task startup functions
//!
//! Sweepers for processes, terminals and broadcast rooms, plus the pump that
//! feeds engine events into the hub. Each task stops on its shutdown token.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;
use vanguard_core::{EngineEvent, ShutdownController, TerminalRegistry};
use vanguard_tools::ProcessSupervisor;

use crate::websocket::{run_event_pump, Hub};

/// Start the process inactivity and zombie sweep
pub fn start_supervisor_sweeper(
    supervisor: &Arc<ProcessSupervisor>,
    shutdown_controller: &Arc<ShutdownController>,
) {
    let supervisor = supervisor.clone();
    let token = shutdown_controller.token();
    let guard = shutdown_controller.register_task();
    tokio::spawn(async move {
        let _guard = guard;
        supervisor.run_sweeper(token).await;
    });
}

/// Start the terminal retention sweep
pub fn start_terminal_sweeper(
    terminals: &Arc<TerminalRegistry>,
    shutdown_controller: &Arc<ShutdownController>,
) {
    let terminals = terminals.clone();
    let token = shutdown_controller.token();
    let guard = shutdown_controller.register_task();
    tokio::spawn(async move {
        let _guard = guard;
        terminals.run_sweeper(token).await;
    });
    info!("Terminal retention sweep started");
}

/// Start the idle room and observer sweep
pub fn start_hub_sweeper(hub: &Arc<Hub>, shutdown_controller: &Arc<ShutdownController>) {
    let hub = hub.clone();
    let token = shutdown_controller.token();
    let guard = shutdown_controller.register_task();
    tokio::spawn(async move {
        let _guard = guard;
        hub.run_sweeper(token).await;
    });
}

/// Start forwarding engine events into the hub.
///
/// `rx` must be subscribed before any component publishes.
pub fn start_event_pump(
    hub: &Arc<Hub>,
    rx: broadcast::Receiver<EngineEvent>,
    shutdown_controller: &Arc<ShutdownController>,
) {
    let hub = hub.clone();
    let token = shutdown_controller.token();
    let guard = shutdown_controller.register_task();
    tokio::spawn(async move {
        let _guard = guard;
        run_event_pump(hub, rx, token).await;
    });
}
