//! Observer gateway.
//!
//! WebSocket endpoint of the real-time broadcast layer.
//!
//! Flow:
//! 1. Client connects and is registered with the hub
//! 2. Client sends control messages (subscribe, execute, stop, ...)
//! 3. Server pushes room frames, campaign updates and direct replies

pub mod connection;
mod dispatch;
pub(crate) mod events;


pub use events::{convert_event, run_event_pump, Route};

use std::sync::Arc;

use axum::{extract::ws::WebSocketUpgrade, response::IntoResponse, Extension};
use connection::handle_connection;
use vanguard_core::{ScenarioOrchestrator, TerminalRegistry};
use vanguard_tools::{ProcessSupervisor, ToolCatalog};

use super::hub::Hub;

/// Maximum size of a single WS text message (1 MB).
const MAX_MESSAGE_BYTES: usize = 1_048_576;

/// Services a connection dispatches into
#[derive(Clone)]
pub struct GatewayState {
    pub hub: Arc<Hub>,
    pub supervisor: Arc<ProcessSupervisor>,
    pub terminals: Arc<TerminalRegistry>,
    pub scenarios: Arc<ScenarioOrchestrator>,
    pub catalog: Arc<ToolCatalog>,
}

/// WebSocket upgrade handler for `/ws`.
pub async fn gateway_handler(
    ws: WebSocketUpgrade,
    Extension(state): Extension<GatewayState>,
) -> impl IntoResponse {
    ws.max_message_size(MAX_MESSAGE_BYTES)
        .on_upgrade(move |socket| handle_connection(socket, state))
}
