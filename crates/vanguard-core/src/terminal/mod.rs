//! Virtual terminal registry
//!
//! One logical terminal per attack, plus auxiliary terminals for setup steps.
//! A terminal buffers a bounded number of output lines and follows the
//! [`RunStatus`] transition table. Every accepted change is published on the
//! [`EventBus`].

mod types;


pub use types::{LineKind, TerminalConfig, TerminalLine, TerminalSnapshot};

use chrono::Utc;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::event_bus::{EngineEvent, EventBus};
use crate::model::RunStatus;
use types::Terminal;

/// Terminal id of the attack at `index` in `scenario_id`
#[must_use]
pub fn terminal_id(scenario_id: &str, index: usize) -> String {
    format!("{}-attack-{}", scenario_id, index)
}

/// Id of the `n`th auxiliary terminal of `stage` ("pre", "init") under `parent`
#[must_use]
pub fn aux_terminal_id(parent: &str, stage: &str, n: usize) -> String {
    format!("{}-{}-{}", parent, stage, n)
}

/// Registry of virtual terminals
pub struct TerminalRegistry {
    terminals: DashMap<String, Terminal>,
    config: TerminalConfig,
    events: EventBus,
}

impl TerminalRegistry {
    /// Create a registry publishing on `events`
    #[must_use]
    pub fn new(config: TerminalConfig, events: EventBus) -> Self {
        Self {
            terminals: DashMap::new(),
            config,
            events,
        }
    }

    /// Configuration in effect
    #[must_use]
    pub fn config(&self) -> &TerminalConfig {
        &self.config
    }

    /// Create the terminal for an attack and return its id.
    ///
    /// The id is derived from the scenario id and `index`, or from the attack
    /// id when no index is given. A terminal with the same id is replaced.
    pub fn create(
        &self,
        scenario_id: &str,
        attack_id: &str,
        tool: &str,
        index: Option<usize>,
    ) -> String {
        let id = match index {
            Some(index) => terminal_id(scenario_id, index),
            None => format!("{}-{}", scenario_id, attack_id),
        };
        self.create_with_id(&id, scenario_id, attack_id, tool);
        id
    }

    /// Create (or replace) a terminal under an explicit id
    pub fn create_with_id(
        &self,
        id: &str,
        scenario_id: &str,
        attack_id: &str,
        tool: &str,
    ) -> TerminalSnapshot {
        let terminal = Terminal::new(id, scenario_id, attack_id, tool);
        let snapshot = terminal.snapshot();
        if self.terminals.insert(id.to_string(), terminal).is_some() {
            debug!(terminal_id = %id, "Replaced existing terminal");
        }
        self.events.publish(EngineEvent::TerminalState {
            scenario_id: scenario_id.to_string(),
            terminal: snapshot.clone(),
        });
        snapshot
    }

    fn push_line(&self, id: &str, text: &str, kind: LineKind) -> Option<String> {
        let mut terminal = self.terminals.get_mut(id)?;
        terminal.lines.push_back(TerminalLine {
            text: text.to_string(),
            kind,
            timestamp: Utc::now(),
        });
        while terminal.lines.len() > self.config.max_lines {
            terminal.lines.pop_front();
        }
        Some(terminal.scenario_id.clone())
    }

    /// Append a stdout line
    pub fn append_output(&self, id: &str, line: &str) -> bool {
        let Some(scenario_id) = self.push_line(id, line, LineKind::Output) else {
            return false;
        };
        self.events.publish(EngineEvent::TerminalOutput {
            scenario_id,
            terminal_id: id.to_string(),
            line: line.to_string(),
            timestamp: Utc::now(),
        });
        true
    }

    /// Append a stderr line without touching the status
    pub fn append_stderr(&self, id: &str, line: &str) -> bool {
        let Some(scenario_id) = self.push_line(id, line, LineKind::Error) else {
            return false;
        };
        self.events.publish(EngineEvent::TerminalError {
            scenario_id,
            terminal_id: id.to_string(),
            line: line.to_string(),
            timestamp: Utc::now(),
        });
        true
    }

    /// Append an error line and move the terminal to `failed`
    pub fn append_error(&self, id: &str, message: &str) -> bool {
        if !self.append_stderr(id, message) {
            return false;
        }
        self.update_status(id, RunStatus::Failed);
        true
    }

    /// Move a terminal to `next` if the transition table allows it.
    ///
    /// Returns whether the status changed; only actual changes are published.
    pub fn update_status(&self, id: &str, next: RunStatus) -> bool {
        let (scenario_id, previous) = {
            let Some(mut terminal) = self.terminals.get_mut(id) else {
                debug!(terminal_id = %id, "Status update for unknown terminal");
                return false;
            };
            let previous = terminal.status;
            if previous == next {
                return false;
            }
            if !previous.can_transition_to(next) {
                debug!(
                    terminal_id = %id,
                    from = %previous,
                    to = %next,
                    "Rejected terminal status transition"
                );
                return false;
            }

            let now = Utc::now();
            terminal.status = next;
            if next == RunStatus::Running && terminal.started_at.is_none() {
                terminal.started_at = Some(now);
            }
            if next.is_terminal() {
                terminal.ended_at = Some(now);
            }
            (terminal.scenario_id.clone(), previous)
        };

        self.events.publish(EngineEvent::TerminalStatus {
            scenario_id,
            terminal_id: id.to_string(),
            status: next,
            previous,
            timestamp: Utc::now(),
        });
        true
    }

    /// Empty a terminal's buffer
    pub fn clear(&self, id: &str) -> bool {
        let scenario_id = {
            let Some(mut terminal) = self.terminals.get_mut(id) else {
                return false;
            };
            terminal.lines.clear();
            terminal.scenario_id.clone()
        };
        self.events.publish(EngineEvent::TerminalCleared {
            scenario_id,
            terminal_id: id.to_string(),
        });
        true
    }

    /// Drop a terminal
    pub fn remove(&self, id: &str) -> bool {
        let Some((_, terminal)) = self.terminals.remove(id) else {
            return false;
        };
        self.events.publish(EngineEvent::TerminalRemoved {
            scenario_id: terminal.scenario_id,
            terminal_id: id.to_string(),
        });
        true
    }

    /// Remove every terminal belonging to `scenario_id`
    pub fn clear_all_for_scenario(&self, scenario_id: &str) -> usize {
        let ids: Vec<String> = self
            .terminals
            .iter()
            .filter(|t| t.scenario_id == scenario_id)
            .map(|t| t.key().clone())
            .collect();
        let removed = ids.iter().filter(|id| self.remove(id)).count();
        if removed > 0 {
            debug!(scenario_id = %scenario_id, removed, "Cleared scenario terminals");
        }
        removed
    }

    /// Remove every terminal
    pub fn remove_all(&self) -> usize {
        let ids: Vec<String> = self.terminals.iter().map(|t| t.key().clone()).collect();
        ids.iter().filter(|id| self.remove(id)).count()
    }

    /// Snapshot of one terminal
    #[must_use]
    pub fn get(&self, id: &str) -> Option<TerminalSnapshot> {
        self.terminals.get(id).map(|t| t.snapshot())
    }

    /// Current status of one terminal
    #[must_use]
    pub fn status(&self, id: &str) -> Option<RunStatus> {
        self.terminals.get(id).map(|t| t.status)
    }

    /// Buffered line texts, oldest first
    #[must_use]
    pub fn lines(&self, id: &str) -> Vec<String> {
        self.terminals
            .get(id)
            .map(|t| t.lines.iter().map(|l| l.text.clone()).collect())
            .unwrap_or_default()
    }

    /// Snapshots of a scenario's terminals, ordered by id
    #[must_use]
    pub fn for_scenario(&self, scenario_id: &str) -> Vec<TerminalSnapshot> {
        let mut snapshots: Vec<TerminalSnapshot> = self
            .terminals
            .iter()
            .filter(|t| t.scenario_id == scenario_id)
            .map(|t| t.snapshot())
            .collect();
        snapshots.sort_by(|a, b| a.id.cmp(&b.id));
        snapshots
    }

    /// Number of terminals
    #[must_use]
    pub fn len(&self) -> usize {
        self.terminals.len()
    }

    /// Whether the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.terminals.is_empty()
    }

    /// Remove terminals that finished longer ago than the retention window
    pub fn sweep(&self) -> usize {
        let retention = chrono::Duration::from_std(self.config.retention)
            .unwrap_or_else(|_| chrono::Duration::days(1));
        let cutoff = Utc::now() - retention;

        let expired: Vec<String> = self
            .terminals
            .iter()
            .filter(|t| t.status.is_terminal() && t.ended_at.is_some_and(|at| at < cutoff))
            .map(|t| t.key().clone())
            .collect();

        let removed = expired.iter().filter(|id| self.remove(id)).count();
        if removed > 0 {
            info!(removed, "Swept finished terminals");
        }
        removed
    }

    /// Run [`Self::sweep`] every `sweep_interval` until cancelled
    pub async fn run_sweeper(&self, token: CancellationToken) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.sweep_interval) => {
                    self.sweep();
                }
                _ = token.cancelled() => {
                    debug!("Terminal sweeper stopped");
                    break;
                }
            }
        }
    }
}
