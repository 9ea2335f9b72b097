use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{Campaign, RunStatus, Scenario};
use crate::terminal::TerminalSnapshot;

/// Events emitted by the engine.
///
/// Terminal events carry the owning scenario so the real-time layer can
/// route them to the right room without a registry lookup.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// One stdout line appended to a terminal
    TerminalOutput {
        /// Owning scenario
        scenario_id: String,
        /// Terminal id
        terminal_id: String,
        /// Line text
        line: String,
        /// Append time
        timestamp: DateTime<Utc>,
    },
    /// One error line appended to a terminal
    TerminalError {
        /// Owning scenario
        scenario_id: String,
        /// Terminal id
        terminal_id: String,
        /// Line text
        line: String,
        /// Append time
        timestamp: DateTime<Utc>,
    },
    /// Terminal status changed
    TerminalStatus {
        /// Owning scenario
        scenario_id: String,
        /// Terminal id
        terminal_id: String,
        /// New status
        status: RunStatus,
        /// Status before the change
        previous: RunStatus,
        /// Change time
        timestamp: DateTime<Utc>,
    },
    /// Terminal buffer emptied
    TerminalCleared {
        /// Owning scenario
        scenario_id: String,
        /// Terminal id
        terminal_id: String,
    },
    /// Terminal dropped from the registry
    TerminalRemoved {
        /// Owning scenario
        scenario_id: String,
        /// Terminal id
        terminal_id: String,
    },
    /// Full terminal snapshot, sent when a terminal is created
    TerminalState {
        /// Owning scenario
        scenario_id: String,
        /// Snapshot
        terminal: TerminalSnapshot,
    },
    /// Scenario record changed
    ScenarioUpdate {
        /// Current record
        scenario: Scenario,
        /// Change time
        timestamp: DateTime<Utc>,
    },
    /// Campaign record changed
    CampaignUpdate {
        /// Current record
        campaign: Campaign,
        /// Change time
        timestamp: DateTime<Utc>,
    },
}

impl EngineEvent {
    /// Scenario this event belongs to; `None` for campaign events
    #[must_use]
    pub fn scenario_id(&self) -> Option<&str> {
        match self {
            Self::TerminalOutput { scenario_id, .. }
            | Self::TerminalError { scenario_id, .. }
            | Self::TerminalStatus { scenario_id, .. }
            | Self::TerminalCleared { scenario_id, .. }
            | Self::TerminalRemoved { scenario_id, .. }
            | Self::TerminalState { scenario_id, .. } => Some(scenario_id),
            Self::ScenarioUpdate { scenario, .. } => Some(&scenario.id),
            Self::CampaignUpdate { .. } => None,
        }
    }

    /// Terminal this event belongs to
    #[must_use]
    pub fn terminal_id(&self) -> Option<&str> {
        match self {
            Self::TerminalOutput { terminal_id, .. }
            | Self::TerminalError { terminal_id, .. }
            | Self::TerminalStatus { terminal_id, .. }
            | Self::TerminalCleared { terminal_id, .. }
            | Self::TerminalRemoved { terminal_id, .. } => Some(terminal_id),
            Self::TerminalState { terminal, .. } => Some(&terminal.id),
            Self::ScenarioUpdate { .. } | Self::CampaignUpdate { .. } => None,
        }
    }

    /// Scenario update stamped now
    #[must_use]
    pub fn scenario_update(scenario: &Scenario) -> Self {
        Self::ScenarioUpdate {
            scenario: scenario.clone(),
            timestamp: Utc::now(),
        }
    }

    /// Campaign update stamped now
    #[must_use]
    pub fn campaign_update(campaign: &Campaign) -> Self {
        Self::CampaignUpdate {
            campaign: campaign.clone(),
            timestamp: Utc::now(),
        }
    }
}
