use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::RunStatus;

/// Lines of output kept on an attack record
pub const ATTACK_OUTPUT_CAP: usize = 200;

/// Host an attack runs against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    /// Hostname or address
    pub host: String,
    /// Port
    #[serde(default)]
    pub port: Option<u16>,
    /// Protocol (tcp, http, smb, ...)
    #[serde(default)]
    pub protocol: Option<String>,
    /// Display name
    #[serde(default)]
    pub name: Option<String>,
}

impl Target {
    /// Target on a bare host
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            protocol: None,
            name: None,
        }
    }

    /// Set the port
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Template variables: `host`, `port`, `protocol`, `target`
    #[must_use]
    pub fn template_vars(&self) -> HashMap<String, String> {
        let mut vars = HashMap::new();
        vars.insert("host".to_string(), self.host.clone());
        vars.insert(
            "target".to_string(),
            self.name.clone().unwrap_or_else(|| self.host.clone()),
        );
        if let Some(port) = self.port {
            vars.insert("port".to_string(), port.to_string());
        }
        if let Some(protocol) = &self.protocol {
            vars.insert("protocol".to_string(), protocol.clone());
        }
        vars
    }
}

/// One tool invocation inside a scenario
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attack {
    /// Attack id, human-friendly
    pub id: String,
    /// Tool identifier from the catalog
    pub tool: String,
    /// Tool parameters
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    /// Index into the scenario's targets
    #[serde(default)]
    pub target: Option<usize>,
    /// Lifecycle status
    #[serde(default)]
    pub status: RunStatus,
    /// External id of the spawned main process
    #[serde(default)]
    pub process_id: Option<String>,
    /// Start time
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// End time
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    /// Tail of the attack's output
    #[serde(default)]
    pub output: Vec<String>,
}

impl Attack {
    /// Pending attack
    pub fn new(id: impl Into<String>, tool: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tool: tool.into(),
            parameters: BTreeMap::new(),
            target: None,
            status: RunStatus::Pending,
            process_id: None,
            started_at: None,
            ended_at: None,
            output: Vec::new(),
        }
    }

    /// Add a parameter
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Select a target by index
    #[must_use]
    pub fn with_target(mut self, index: usize) -> Self {
        self.target = Some(index);
        self
    }

    /// Apply `next` if the transition table allows it
    pub fn transition(&mut self, next: RunStatus) -> bool {
        if self.status == next || !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        true
    }

    /// Clear run state for a fresh run
    pub fn reset(&mut self) {
        self.status = RunStatus::Pending;
        self.process_id = None;
        self.started_at = None;
        self.ended_at = None;
        self.output.clear();
    }

    /// Replace the output tail, keeping at most [`ATTACK_OUTPUT_CAP`] lines
    pub fn set_output(&mut self, mut lines: Vec<String>) {
        if lines.len() > ATTACK_OUTPUT_CAP {
            lines.drain(..lines.len() - ATTACK_OUTPUT_CAP);
        }
        self.output = lines;
    }

    /// Append one line, evicting the oldest beyond [`ATTACK_OUTPUT_CAP`]
    pub fn push_output(&mut self, line: impl Into<String>) {
        self.output.push(line.into());
        if self.output.len() > ATTACK_OUTPUT_CAP {
            self.output.remove(0);
        }
    }
}

/// Group of attacks run as a unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    /// Scenario id
    pub id: String,
    /// Display name
    pub name: String,
    /// Targets, referenced by index from attacks
    #[serde(default)]
    pub targets: Vec<Target>,
    /// Attacks in execution order
    #[serde(default)]
    pub attacks: Vec<Attack>,
    /// Run attacks in order (true) or concurrently (false)
    #[serde(default = "default_sequence")]
    pub sequence: bool,
    /// Lifecycle status
    #[serde(default)]
    pub status: RunStatus,
    /// Start time
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// End time
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    /// Seconds between start and end
    #[serde(default)]
    pub duration_secs: Option<i64>,
}

fn default_sequence() -> bool {
    true
}

impl Scenario {
    /// Empty sequential scenario
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            targets: Vec::new(),
            attacks: Vec::new(),
            sequence: true,
            status: RunStatus::Pending,
            started_at: None,
            ended_at: None,
            duration_secs: None,
        }
    }

    /// Add a target
    #[must_use]
    pub fn with_target(mut self, target: Target) -> Self {
        self.targets.push(target);
        self
    }

    /// Add an attack
    #[must_use]
    pub fn with_attack(mut self, attack: Attack) -> Self {
        self.attacks.push(attack);
        self
    }

    /// Set sequential or parallel execution
    #[must_use]
    pub fn parallel(mut self) -> Self {
        self.sequence = false;
        self
    }

    /// Target for an attack, defaulting to the first one
    #[must_use]
    pub fn target_for(&self, attack: &Attack) -> Option<&Target> {
        self.targets.get(attack.target.unwrap_or(0))
    }

    /// Index of the first attack not yet in a terminal status
    #[must_use]
    pub fn first_unfinished(&self) -> Option<usize> {
        self.attacks.iter().position(|a| !a.status.is_terminal())
    }

    /// Whether every attack completed
    #[must_use]
    pub fn all_completed(&self) -> bool {
        self.attacks
            .iter()
            .all(|a| a.status == RunStatus::Completed)
    }

    /// Stamp the end time and derived duration
    pub fn mark_ended(&mut self, at: DateTime<Utc>) {
        self.ended_at = Some(at);
        self.duration_secs = self.started_at.map(|s| (at - s).num_seconds());
    }
}
