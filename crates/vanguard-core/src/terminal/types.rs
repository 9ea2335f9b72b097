//! Terminal types

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::RunStatus;

/// Terminal registry configuration
#[derive(Debug, Clone)]
pub struct TerminalConfig {
    /// Lines kept per terminal; older lines are evicted first
    pub max_lines: usize,
    /// How long a finished terminal is kept
    pub retention: Duration,
    /// Interval between retention sweeps
    pub sweep_interval: Duration,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            max_lines: 1000,
            retention: Duration::from_secs(24 * 60 * 60),
            sweep_interval: Duration::from_secs(3600),
        }
    }
}

impl TerminalConfig {
    /// Create a new configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-terminal line cap
    pub fn with_max_lines(mut self, max_lines: usize) -> Self {
        self.max_lines = max_lines.max(1);
        self
    }

    /// Set the retention window
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }
}

/// Which stream a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineKind {
    /// Standard output
    Output,
    /// Standard error or engine-reported error
    Error,
}

/// One buffered line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalLine {
    /// Line text without terminator
    pub text: String,
    /// Source stream
    pub kind: LineKind,
    /// Append time
    pub timestamp: DateTime<Utc>,
}

/// Point-in-time copy of a terminal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalSnapshot {
    /// Terminal id
    pub id: String,
    /// Owning scenario
    pub scenario_id: String,
    /// Attack id (or setup step label)
    pub attack_id: String,
    /// Tool name
    pub tool: String,
    /// Status
    pub status: RunStatus,
    /// Buffered lines, oldest first
    pub lines: Vec<TerminalLine>,
    /// When the terminal entered `running`
    pub started_at: Option<DateTime<Utc>>,
    /// When the terminal entered a terminal status
    pub ended_at: Option<DateTime<Utc>>,
}

pub(crate) struct Terminal {
    pub(crate) id: String,
    pub(crate) scenario_id: String,
    pub(crate) attack_id: String,
    pub(crate) tool: String,
    pub(crate) status: RunStatus,
    pub(crate) lines: VecDeque<TerminalLine>,
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) ended_at: Option<DateTime<Utc>>,
}

impl Terminal {
    pub(crate) fn new(id: &str, scenario_id: &str, attack_id: &str, tool: &str) -> Self {
        Self {
            id: id.to_string(),
            scenario_id: scenario_id.to_string(),
            attack_id: attack_id.to_string(),
            tool: tool.to_string(),
            status: RunStatus::Pending,
            lines: VecDeque::new(),
            started_at: None,
            ended_at: None,
        }
    }

    pub(crate) fn snapshot(&self) -> TerminalSnapshot {
        TerminalSnapshot {
            id: self.id.clone(),
            scenario_id: self.scenario_id.clone(),
            attack_id: self.attack_id.clone(),
            tool: self.tool.clone(),
            status: self.status,
            lines: self.lines.iter().cloned().collect(),
            started_at: self.started_at,
            ended_at: self.ended_at,
        }
    }
}
