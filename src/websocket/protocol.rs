//! Real-time wire protocol.
//!
//! Every frame is a JSON object tagged by `type`. Field names are camelCase.
//! A bare `ping` text frame is answered with a bare `pong`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use vanguard_core::{Campaign, RunStatus, Scenario, Target, TerminalSnapshot};
use vanguard_tools::NotificationLevel;

/// Client → server
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    SubscribeScenario {
        scenario_id: String,
    },
    UnsubscribeScenario {
        scenario_id: String,
    },
    RequestExecutionHistory {
        scenario_id: String,
    },
    /// Free-form command run in a throwaway terminal of the scenario
    TerminalCommand {
        scenario_id: String,
        #[serde(default)]
        attack_id: Option<String>,
        command: String,
    },
    /// Run a catalog tool, or a free-form command line, under `tab_id`
    Execute {
        command: String,
        #[serde(default)]
        parameters: HashMap<String, Value>,
        tab_id: String,
        #[serde(default)]
        project_id: Option<String>,
        #[serde(default)]
        campaign_id: Option<String>,
        #[serde(default)]
        scenario_id: Option<String>,
        #[serde(default)]
        targets: Vec<Target>,
    },
    Stop {
        tab_id: String,
        #[serde(default)]
        port: Option<u16>,
        #[serde(default)]
        scenario_id: Option<String>,
    },
    StopScenario {
        scenario_id: String,
    },
    ClearTerminal {
        scenario_id: String,
        terminal_id: String,
    },
    /// Like `execute`, with output frames tagged by `output_id`
    ExecuteMulti {
        command: String,
        output_id: String,
        #[serde(default)]
        parameters: HashMap<String, Value>,
        tab_id: String,
    },
    Ping,
}

impl ClientMessage {
    /// Tab the message refers to, for error frames
    pub fn tab_id(&self) -> Option<&str> {
        match self {
            Self::Execute { tab_id, .. }
            | Self::Stop { tab_id, .. }
            | Self::ExecuteMulti { tab_id, .. } => Some(tab_id),
            _ => None,
        }
    }
}

/// Server → client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerFrame {
    Output {
        payload: String,
        tab_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output_id: Option<String>,
    },
    Error {
        payload: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tab_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
    Notification {
        level: NotificationLevel,
        message: String,
        tab_id: String,
    },
    ScenarioUpdate {
        scenario_id: String,
        data: Scenario,
        timestamp: DateTime<Utc>,
    },
    CampaignUpdate {
        campaign_id: String,
        data: Campaign,
        timestamp: DateTime<Utc>,
    },
    TerminalOutput {
        scenario_id: String,
        terminal_id: String,
        line: String,
        timestamp: DateTime<Utc>,
    },
    TerminalError {
        scenario_id: String,
        terminal_id: String,
        line: String,
        timestamp: DateTime<Utc>,
    },
    TerminalStatus {
        scenario_id: String,
        terminal_id: String,
        status: RunStatus,
        previous: RunStatus,
        timestamp: DateTime<Utc>,
    },
    TerminalRemoved {
        scenario_id: String,
        terminal_id: String,
    },
    TerminalCleared {
        scenario_id: String,
        terminal_id: String,
    },
    TerminalState {
        scenario_id: String,
        terminal: TerminalSnapshot,
    },
    ExecutionHistory {
        scenario_id: String,
        history: Vec<HistoryEntry>,
    },
    ExecutionHistoryUpdate {
        scenario_id: String,
        entry: HistoryEntry,
    },
    ScenarioSubscriptionConfirmed {
        scenario_id: String,
    },
    Pong,
}

impl ServerFrame {
    /// Error frame for a failed request
    pub fn error(message: impl Into<String>, tab_id: Option<&str>, code: &str) -> Self {
        Self::Error {
            payload: message.into(),
            tab_id: tab_id.map(str::to_string),
            code: Some(code.to_string()),
        }
    }

    /// Kind under which this frame is kept in a room's history, if at all
    pub fn history_kind(&self) -> Option<HistoryKind> {
        match self {
            Self::TerminalOutput { .. } => Some(HistoryKind::Output),
            Self::TerminalError { .. } => Some(HistoryKind::Error),
            Self::TerminalStatus { status, .. } => match status {
                RunStatus::Running => Some(HistoryKind::Start),
                RunStatus::Completed => Some(HistoryKind::Complete),
                RunStatus::Failed => Some(HistoryKind::Error),
                RunStatus::Stopped => Some(HistoryKind::Abort),
                RunStatus::Pending | RunStatus::Paused => None,
            },
            _ => None,
        }
    }

    /// Deduplication key and value for state updates; `None` for streamed frames
    pub fn update_key(&self) -> Option<(String, String)> {
        match self {
            Self::ScenarioUpdate { data, .. } => Some((
                "scenario".to_string(),
                serde_json::to_string(data).unwrap_or_default(),
            )),
            Self::TerminalStatus {
                terminal_id,
                status,
                ..
            } => Some((format!("status:{terminal_id}"), status.as_str().to_string())),
            _ => None,
        }
    }

    /// Serialize to a text frame
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Kind of a history entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryKind {
    Start,
    Output,
    Error,
    Complete,
    Abort,
}

/// One retained entry of a room's execution history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: HistoryKind,
    pub data: Value,
}

/// Parameter map with JSON values flattened to strings
pub fn string_parameters(parameters: &HashMap<String, Value>) -> HashMap<String, String> {
    parameters
        .iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(key, value)| {
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (key.clone(), text)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_subscribe() {
        let msg: ClientMessage =
            serde_json::from_value(json!({"type": "subscribe-scenario", "scenarioId": "s1"}))
                .unwrap();
        assert_eq!(
            msg,
            ClientMessage::SubscribeScenario {
                scenario_id: "s1".into()
            }
        );
    }

    #[test]
    fn test_parse_execute_with_defaults() {
        let msg: ClientMessage = serde_json::from_value(json!({
            "type": "execute",
            "command": "nmap",
            "tabId": "tab-1",
            "parameters": {"ports": "80,443", "count": 3},
            "targets": [{"host": "10.0.0.5", "port": 80}]
        }))
        .unwrap();
        let ClientMessage::Execute {
            parameters,
            targets,
            scenario_id,
            ..
        } = &msg
        else {
            panic!("wrong variant: {msg:?}");
        };
        assert_eq!(msg.tab_id(), Some("tab-1"));
        assert!(scenario_id.is_none());
        assert_eq!(targets[0].port, Some(80));
        let flat = string_parameters(parameters);
        assert_eq!(flat["ports"], "80,443");
        assert_eq!(flat["count"], "3");
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let result = serde_json::from_value::<ClientMessage>(json!({"type": "reboot"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_frame_shape() {
        let frame = ServerFrame::Output {
            payload: "open 80/tcp".into(),
            tab_id: "tab-1".into(),
            output_id: None,
        };
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({"type": "output", "payload": "open 80/tcp", "tabId": "tab-1"})
        );

        let confirmed = ServerFrame::ScenarioSubscriptionConfirmed {
            scenario_id: "s1".into(),
        };
        assert_eq!(
            serde_json::to_value(&confirmed).unwrap(),
            json!({"type": "scenario-subscription-confirmed", "scenarioId": "s1"})
        );
    }

    #[test]
    fn test_history_kinds() {
        let status = |status| ServerFrame::TerminalStatus {
            scenario_id: "s1".into(),
            terminal_id: "s1-attack-0".into(),
            status,
            previous: RunStatus::Pending,
            timestamp: Utc::now(),
        };
        assert_eq!(status(RunStatus::Running).history_kind(), Some(HistoryKind::Start));
        assert_eq!(status(RunStatus::Stopped).history_kind(), Some(HistoryKind::Abort));
        assert_eq!(status(RunStatus::Pending).history_kind(), None);
        let cleared = ServerFrame::TerminalCleared {
            scenario_id: "s1".into(),
            terminal_id: "t".into(),
        };
        assert_eq!(cleared.history_kind(), None);
    }
}
