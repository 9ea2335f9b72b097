//! Server initialization
//!
//! Contains the main `run()` function that wires every component and serves
//! HTTP and WebSocket traffic until a shutdown signal arrives.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{routing::get, Extension, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use vanguard_core::{
    wait_for_shutdown_signal, AttackExecutor, CampaignOrchestrator, EventBus, MemoryStore,
    ScenarioOrchestrator, ShutdownController, SqliteStore, Store, TerminalRegistry,
};
use vanguard_tools::{ProcessSupervisor, ToolCatalog};

use super::background_tasks::{
    start_event_pump, start_hub_sweeper, start_supervisor_sweeper, start_terminal_sweeper,
};
use super::config::{AppConfig, StoreBackend, StoreConfig};
use crate::websocket::{GatewayState, Hub};

/// Open the configured persistence backend
async fn open_store(config: &StoreConfig) -> Result<Arc<dyn Store>> {
    match config.backend {
        StoreBackend::Memory => {
            info!("Using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Sqlite => {
            let store = SqliteStore::from_path(&config.sqlite_path)
                .await
                .with_context(|| {
                    format!("Failed to open SQLite store at {}", config.sqlite_path.display())
                })?;
            info!(path = %config.sqlite_path.display(), "Using SQLite store");
            Ok(Arc::new(store))
        }
    }
}

/// Wait for Ctrl+C or SIGTERM, then cancel background tasks
async fn shutdown_signal(shutdown_controller: Arc<ShutdownController>) {
    wait_for_shutdown_signal().await;
    info!("Shutdown signal received");
    shutdown_controller.shutdown().await;
}

/// Run the server
pub async fn run(config: AppConfig) -> Result<()> {
    info!("Starting Vanguard v{}", env!("CARGO_PKG_VERSION"));

    let store = open_store(&config.store).await?;
    let event_bus = EventBus::new(config.broadcast.event_bus_capacity);
    // Subscribed before anything can publish
    let event_rx = event_bus.subscribe();

    let terminals = Arc::new(TerminalRegistry::new(
        config.terminals.to_terminal_config(),
        event_bus.clone(),
    ));
    let supervisor = Arc::new(ProcessSupervisor::new(
        config.supervisor.to_supervisor_config(),
    ));
    let catalog = Arc::new(ToolCatalog::new(config.tools.iter().cloned()));
    info!(tools = catalog.len(), "Tool catalog loaded");

    let executor = Arc::new(AttackExecutor::new(
        supervisor.clone(),
        terminals.clone(),
        catalog.clone(),
        config.execution.to_execution_config(),
    ));
    let scenarios = ScenarioOrchestrator::new(
        store.clone(),
        terminals.clone(),
        supervisor.clone(),
        executor,
        event_bus.clone(),
    );
    let campaigns = CampaignOrchestrator::new(
        store.clone(),
        scenarios.clone(),
        event_bus.clone(),
        config.campaigns.to_campaign_config(),
    );
    let hub = Arc::new(Hub::new(
        config.broadcast.to_hub_config(),
        supervisor.clone(),
        terminals.clone(),
    ));

    let shutdown_controller = ShutdownController::new();
    start_event_pump(&hub, event_rx, &shutdown_controller);
    start_supervisor_sweeper(&supervisor, &shutdown_controller);
    start_terminal_sweeper(&terminals, &shutdown_controller);
    start_hub_sweeper(&hub, &shutdown_controller);

    match campaigns.restore_schedules().await {
        Ok(0) => {}
        Ok(n) => info!(campaigns = n, "Re-armed scheduled campaigns"),
        Err(e) => warn!(error = %e, "Failed to restore campaign schedules"),
    }

    let gateway_state = GatewayState {
        hub: hub.clone(),
        supervisor: supervisor.clone(),
        terminals: terminals.clone(),
        scenarios: scenarios.clone(),
        catalog,
    };

    // Build the main router with all endpoints
    let app = Router::new()
        .merge(crate::api::api_router())
        .merge(crate::websocket::websocket_router())
        .route("/", get(|| async { "Vanguard attack orchestration server" }))
        // Layers (applied to all routes)
        .layer(Extension(gateway_state))
        .layer(Extension(hub.clone()))
        .layer(Extension(supervisor))
        .layer(Extension(terminals))
        .layer(Extension(scenarios))
        .layer(Extension(campaigns.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("HTTP server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_controller.clone()))
        .await
        .context("HTTP server error")?;

    // Also covers the server exiting on its own
    shutdown_controller.shutdown().await;
    campaigns.cancel_all();
    hub.shutdown().await;

    info!("Vanguard shutdown complete");
    Ok(())
}
