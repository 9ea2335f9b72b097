//! Real-time broadcast layer
//!
//! - `hub` - observers, scenario rooms and history rings
//! - `gateway` - the `/ws` endpoint and inbound dispatch
//! - `protocol` - JSON frames exchanged with observers

pub mod gateway;
pub mod hub;
pub mod protocol;

pub use gateway::{gateway_handler, run_event_pump, GatewayState};
pub use hub::{Hub, HubConfig};

use axum::{routing::get, Router};

/// Create the WebSocket router
pub fn websocket_router() -> Router {
    Router::new().route("/ws", get(gateway_handler))
}
