//! Engine event conversion and the pump feeding the hub.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vanguard_core::EngineEvent;

use crate::websocket::hub::Hub;
use crate::websocket::protocol::ServerFrame;

/// Where a converted frame goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Room of this scenario
    Scenario(String),
    /// Every observer
    Campaign(String),
}

/// Convert an engine event to its outbound frame and route.
pub fn convert_event(event: EngineEvent) -> (Route, ServerFrame) {
    match event {
        EngineEvent::TerminalOutput {
            scenario_id,
            terminal_id,
            line,
            timestamp,
        } => (
            Route::Scenario(scenario_id.clone()),
            ServerFrame::TerminalOutput {
                scenario_id,
                terminal_id,
                line,
                timestamp,
            },
        ),
        EngineEvent::TerminalError {
            scenario_id,
            terminal_id,
            line,
            timestamp,
        } => (
            Route::Scenario(scenario_id.clone()),
            ServerFrame::TerminalError {
                scenario_id,
                terminal_id,
                line,
                timestamp,
            },
        ),
        EngineEvent::TerminalStatus {
            scenario_id,
            terminal_id,
            status,
            previous,
            timestamp,
        } => (
            Route::Scenario(scenario_id.clone()),
            ServerFrame::TerminalStatus {
                scenario_id,
                terminal_id,
                status,
                previous,
                timestamp,
            },
        ),
        EngineEvent::TerminalCleared {
            scenario_id,
            terminal_id,
        } => (
            Route::Scenario(scenario_id.clone()),
            ServerFrame::TerminalCleared {
                scenario_id,
                terminal_id,
            },
        ),
        EngineEvent::TerminalRemoved {
            scenario_id,
            terminal_id,
        } => (
            Route::Scenario(scenario_id.clone()),
            ServerFrame::TerminalRemoved {
                scenario_id,
                terminal_id,
            },
        ),
        EngineEvent::TerminalState {
            scenario_id,
            terminal,
        } => (
            Route::Scenario(scenario_id.clone()),
            ServerFrame::TerminalState {
                scenario_id,
                terminal,
            },
        ),
        EngineEvent::ScenarioUpdate {
            scenario,
            timestamp,
        } => (
            Route::Scenario(scenario.id.clone()),
            ServerFrame::ScenarioUpdate {
                scenario_id: scenario.id.clone(),
                data: scenario,
                timestamp,
            },
        ),
        EngineEvent::CampaignUpdate {
            campaign,
            timestamp,
        } => (
            Route::Campaign(campaign.id.clone()),
            ServerFrame::CampaignUpdate {
                campaign_id: campaign.id.clone(),
                data: campaign,
                timestamp,
            },
        ),
    }
}

/// Forward engine events into the hub until cancelled or the bus closes.
pub async fn run_event_pump(
    hub: Arc<Hub>,
    mut rx: broadcast::Receiver<EngineEvent>,
    token: CancellationToken,
) {
    info!("Event pump started");
    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(event) => match convert_event(event) {
                        (Route::Scenario(id), frame) => hub.broadcast_scenario(&id, frame).await,
                        (Route::Campaign(id), frame) => hub.broadcast_campaign(&id, frame).await,
                    },
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(lagged = n, "Event pump lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Event bus closed");
                        break;
                    }
                }
            }
            _ = token.cancelled() => {
                info!("Event pump shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vanguard_core::{Campaign, RunStatus, Scenario};

    #[test]
    fn test_convert_routes() {
        let (route, frame) = convert_event(EngineEvent::TerminalStatus {
            scenario_id: "s1".into(),
            terminal_id: "s1-attack-0".into(),
            status: RunStatus::Completed,
            previous: RunStatus::Running,
            timestamp: chrono::Utc::now(),
        });
        assert_eq!(route, Route::Scenario("s1".into()));
        assert!(matches!(frame, ServerFrame::TerminalStatus { .. }));

        let (route, frame) =
            convert_event(EngineEvent::scenario_update(&Scenario::new("s2", "web")));
        assert_eq!(route, Route::Scenario("s2".into()));
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "scenario-update");
        assert_eq!(json["scenarioId"], "s2");

        let campaign = Campaign::new("c1", "nightly", vec!["s1".into()]);
        let (route, frame) = convert_event(EngineEvent::campaign_update(&campaign));
        assert_eq!(route, Route::Campaign("c1".into()));
        assert_eq!(serde_json::to_value(&frame).unwrap()["campaignId"], "c1");
    }
}
