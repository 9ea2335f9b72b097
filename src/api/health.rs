//! Health check endpoint.
//!
//! `/health`: status, version and live counts.

use axum::extract::Extension;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use std::sync::Arc;
use vanguard_core::TerminalRegistry;
use vanguard_tools::ProcessSupervisor;

use crate::websocket::Hub;

/// Health response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub processes: usize,
    pub terminals: usize,
    pub observers: usize,
}

async fn health_check(
    Extension(supervisor): Extension<Arc<ProcessSupervisor>>,
    Extension(terminals): Extension<Arc<TerminalRegistry>>,
    Extension(hub): Extension<Arc<Hub>>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        processes: supervisor.count(),
        terminals: terminals.len(),
        observers: hub.client_count().await,
    })
}

/// Create health routes
pub fn health_routes() -> Router {
    Router::new().route("/health", get(health_check))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::HubConfig;
    use vanguard_core::{EventBus, TerminalConfig};
    use vanguard_tools::SupervisorConfig;

    #[tokio::test]
    async fn test_health_counts() {
        let terminals = Arc::new(TerminalRegistry::new(TerminalConfig::new(), EventBus::new(8)));
        let supervisor = Arc::new(ProcessSupervisor::new(SupervisorConfig::new()));
        let hub = Arc::new(Hub::new(
            HubConfig::default(),
            supervisor.clone(),
            terminals.clone(),
        ));
        terminals.create("s1", "a1", "nmap", Some(0));
        let _rx = hub.register(uuid::Uuid::new_v4()).await;

        let Json(health) =
            health_check(Extension(supervisor), Extension(terminals), Extension(hub)).await;
        assert_eq!(health.status, "healthy");
        assert_eq!(health.processes, 0);
        assert_eq!(health.terminals, 1);
        assert_eq!(health.observers, 1);
    }
}
