//! Attack execution
//!
//! Runs one attack end to end: resolves the tool invocation from the catalog,
//! launches pre-commands in auxiliary terminals, runs init commands to
//! completion, then runs the main command in the attack's terminal and waits
//! for it. Failures never escape as errors; they become an
//! [`AttackOutcome::Failed`] so sibling attacks keep running.
//!
//! A `halt` token aborts the attack between stages and stops whatever
//! process of the attack is being awaited.

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vanguard_tools::{
    ExitOutcome, NotificationLevel, PreparedStep, ProcessCallbacks, ProcessContext,
    ProcessHandle, ProcessSupervisor, TerminationCause, ToolCatalog,
};

use crate::error::{Error, Result};
use crate::model::{Attack, RunStatus, Target};
use crate::terminal::{aux_terminal_id, TerminalRegistry};

/// Attack execution configuration
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Wait after launching pre-commands before init/main commands run
    pub pre_command_settle: Duration,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            pre_command_settle: Duration::from_millis(3000),
        }
    }
}

/// How an attack ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttackOutcome {
    /// Main command exited with code 0
    Completed {
        /// External id of the main process
        process_id: String,
    },
    /// Invocation, setup or main command failed
    Failed {
        /// External id of the main process, when it was spawned
        process_id: Option<String>,
        /// Failure description
        error: String,
    },
    /// Halted, or the main process was stopped from outside
    Stopped {
        /// External id of the main process, when it was spawned
        process_id: Option<String>,
    },
}

/// Route a process's output into a terminal.
///
/// Stdout lines become output, stderr lines become error lines, and error
/// notifications fail the terminal.
pub fn terminal_callbacks(terminals: Arc<TerminalRegistry>, terminal_id: &str) -> ProcessCallbacks {
    let (out_terms, out_id) = (terminals.clone(), terminal_id.to_string());
    let (err_terms, err_id) = (terminals.clone(), terminal_id.to_string());
    let (note_terms, note_id) = (terminals, terminal_id.to_string());

    ProcessCallbacks::new(
        move |line| {
            out_terms.append_output(&out_id, line);
        },
        move |line| {
            err_terms.append_stderr(&err_id, line);
        },
        move |notification| {
            if notification.level == NotificationLevel::Error {
                note_terms.append_error(&note_id, &notification.message);
            }
        },
    )
}

/// Executes attacks through the process supervisor
pub struct AttackExecutor {
    supervisor: Arc<ProcessSupervisor>,
    terminals: Arc<TerminalRegistry>,
    catalog: Arc<ToolCatalog>,
    config: ExecutionConfig,
}

impl AttackExecutor {
    /// Create an executor
    #[must_use]
    pub fn new(
        supervisor: Arc<ProcessSupervisor>,
        terminals: Arc<TerminalRegistry>,
        catalog: Arc<ToolCatalog>,
        config: ExecutionConfig,
    ) -> Self {
        Self {
            supervisor,
            terminals,
            catalog,
            config,
        }
    }

    /// Tool catalog in use
    #[must_use]
    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    /// Run the attack at `index` of `scenario_id` against `target`
    pub async fn execute(
        &self,
        scenario_id: &str,
        index: usize,
        attack: &Attack,
        target: Option<&Target>,
        halt: &CancellationToken,
    ) -> AttackOutcome {
        let terminal_id = self
            .terminals
            .create(scenario_id, &attack.id, &attack.tool, Some(index));
        self.terminals.update_status(&terminal_id, RunStatus::Running);

        let mut helpers = Vec::new();
        let result = self
            .run(scenario_id, &terminal_id, attack, target, halt, &mut helpers)
            .await;

        for helper in &helpers {
            self.supervisor.stop(helper, None).await;
            self.terminals.update_status(helper, RunStatus::Stopped);
        }

        match result {
            Ok(None) => {
                debug!(scenario_id = %scenario_id, attack_id = %attack.id, "Attack halted before its main command");
                self.terminals.update_status(&terminal_id, RunStatus::Stopped);
                AttackOutcome::Stopped { process_id: None }
            }
            Ok(Some(outcome)) if outcome.success => {
                self.terminals
                    .update_status(&terminal_id, RunStatus::Completed);
                info!(scenario_id = %scenario_id, attack_id = %attack.id, "Attack completed");
                AttackOutcome::Completed {
                    process_id: terminal_id,
                }
            }
            Ok(Some(ExitOutcome {
                cause: Some(TerminationCause::Stopped | TerminationCause::Shutdown),
                ..
            })) => {
                debug!(scenario_id = %scenario_id, attack_id = %attack.id, "Attack stopped");
                self.terminals.update_status(&terminal_id, RunStatus::Stopped);
                AttackOutcome::Stopped {
                    process_id: Some(terminal_id),
                }
            }
            Ok(Some(outcome)) => {
                self.terminals.update_status(&terminal_id, RunStatus::Failed);
                warn!(
                    scenario_id = %scenario_id,
                    attack_id = %attack.id,
                    code = ?outcome.code,
                    "Attack failed"
                );
                AttackOutcome::Failed {
                    process_id: Some(terminal_id),
                    error: outcome.describe(),
                }
            }
            Err(e) => {
                warn!(scenario_id = %scenario_id, attack_id = %attack.id, error = %e, "Attack failed");
                self.terminals.append_error(&terminal_id, &e.to_string());
                AttackOutcome::Failed {
                    process_id: None,
                    error: e.to_string(),
                }
            }
        }
    }

    /// `Ok(None)` when halted before the main command was spawned
    async fn run(
        &self,
        scenario_id: &str,
        terminal_id: &str,
        attack: &Attack,
        target: Option<&Target>,
        halt: &CancellationToken,
        helpers: &mut Vec<String>,
    ) -> Result<Option<ExitOutcome>> {
        let mut vars = target.map(Target::template_vars).unwrap_or_default();
        vars.extend(
            attack
                .parameters
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        let invocation = self.catalog.invocation(&attack.tool, &vars)?;

        for (n, step) in invocation.pre.iter().enumerate() {
            if halt.is_cancelled() {
                return Ok(None);
            }
            let id = aux_terminal_id(terminal_id, "pre", n);
            self.start_step(scenario_id, &id, attack, step).await?;
            helpers.push(id);
        }
        if !invocation.pre.is_empty() {
            debug!(
                attack_id = %attack.id,
                settle_ms = self.config.pre_command_settle.as_millis() as u64,
                "Waiting for pre-commands to initialize"
            );
            tokio::select! {
                _ = tokio::time::sleep(self.config.pre_command_settle) => {}
                _ = halt.cancelled() => return Ok(None),
            }
        }

        for (n, step) in invocation.init.iter().enumerate() {
            if halt.is_cancelled() {
                return Ok(None);
            }
            let id = aux_terminal_id(terminal_id, "init", n);
            let mut handle = self.start_step(scenario_id, &id, attack, step).await?;
            let outcome = tokio::select! {
                outcome = handle.wait() => outcome,
                _ = halt.cancelled() => {
                    self.supervisor.stop_and_wait(&mut handle).await;
                    self.terminals.update_status(&id, RunStatus::Stopped);
                    return Ok(None);
                }
            };
            if !outcome.success {
                return Err(Error::Execution(format!(
                    "init step '{}' failed: {}",
                    step.name,
                    outcome.describe()
                )));
            }
            self.terminals.update_status(&id, RunStatus::Completed);
        }

        if halt.is_cancelled() {
            return Ok(None);
        }
        let context = ProcessContext {
            scenario_id: Some(scenario_id.to_string()),
            attack_id: Some(attack.id.clone()),
            tool: Some(invocation.tool.clone()),
            container_id: invocation.container.clone(),
        };
        let mut handle = self
            .supervisor
            .start(
                terminal_id,
                invocation.main,
                terminal_callbacks(self.terminals.clone(), terminal_id),
                context,
            )
            .await?;

        tokio::select! {
            outcome = handle.wait() => return Ok(Some(outcome)),
            _ = halt.cancelled() => {}
        }
        Ok(Some(self.supervisor.stop_and_wait(&mut handle).await))
    }

    async fn start_step(
        &self,
        scenario_id: &str,
        terminal_id: &str,
        attack: &Attack,
        step: &PreparedStep,
    ) -> Result<ProcessHandle> {
        self.terminals.create_with_id(
            terminal_id,
            scenario_id,
            &format!("{} / {}", attack.id, step.name),
            &step.name,
        );
        self.terminals.update_status(terminal_id, RunStatus::Running);
        if !step.description.is_empty() {
            self.terminals
                .append_output(terminal_id, &format!("# {}", step.description));
        }

        let context = ProcessContext {
            scenario_id: Some(scenario_id.to_string()),
            attack_id: Some(attack.id.clone()),
            tool: Some(step.name.clone()),
            container_id: None,
        };
        self.supervisor
            .start(
                terminal_id,
                step.spec.clone(),
                terminal_callbacks(self.terminals.clone(), terminal_id),
                context,
            )
            .await
            .map_err(|e| {
                self.terminals.append_error(terminal_id, &e.to_string());
                Error::from(e)
            })
    }
}
