use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use super::dispatch::{handle_text, DispatchContext};
use super::GatewayState;
use crate::websocket::hub::Outbound;

/// Max time without receiving a message before considering the connection dead.
pub const HEARTBEAT_TIMEOUT_SECS: u64 = 60;
/// How often to send server-side pings.
pub const PING_INTERVAL_SECS: u64 = 30;

/// Main observer connection handler.
pub async fn handle_connection(socket: WebSocket, state: GatewayState) {
    let conn_id = Uuid::new_v4();
    info!(conn_id = %conn_id, "Observer connection opened");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut outbound = state.hub.register(conn_id).await;

    let ctx = DispatchContext {
        conn_id,
        hub: &state.hub,
        supervisor: &state.supervisor,
        terminals: &state.terminals,
        scenarios: &state.scenarios,
        catalog: &state.catalog,
    };

    let ping_interval = tokio::time::interval(tokio::time::Duration::from_secs(PING_INTERVAL_SECS));
    tokio::pin!(ping_interval);

    let mut last_recv = tokio::time::Instant::now();
    let heartbeat_timeout = tokio::time::Duration::from_secs(HEARTBEAT_TIMEOUT_SECS);

    loop {
        tokio::select! {
            // Client message
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        last_recv = tokio::time::Instant::now();
                        state.hub.touch(conn_id).await;
                        if let Some(reply) = handle_text(&text, &ctx).await {
                            if ws_tx.send(Message::Text(reply)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        last_recv = tokio::time::Instant::now();
                        let _ = ws_tx.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_recv = tokio::time::Instant::now();
                        state.hub.touch(conn_id).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(conn_id = %conn_id, error = %e, "Observer WS error");
                        break;
                    }
                    _ => {}
                }
            }
            // Hub frames → forward to client
            item = outbound.recv() => {
                match item {
                    Some(Outbound::Text(json)) => {
                        if ws_tx.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    Some(Outbound::Close) | None => {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            // Server ping (WS protocol level)
            _ = ping_interval.tick() => {
                if last_recv.elapsed() > heartbeat_timeout {
                    info!(conn_id = %conn_id, "Heartbeat timeout, closing");
                    break;
                }
                if ws_tx.send(Message::Ping(vec![])).await.is_err() {
                    break;
                }
            }
        }
    }

    state.hub.unregister(conn_id).await;
    info!(conn_id = %conn_id, "Observer connection closed");
}
